//! Event-level access to libyaml.
//!
//! `Parser` turns a YAML stream into owned events and `Emitter` writes events
//! back out. Working at this level keeps what a value tree loses: the raw text
//! and style of every scalar, and the anchors and aliases of the document.

use std::ffi::{c_void, CStr, CString};
use std::marker::PhantomData;
use std::mem::{self, MaybeUninit};
use std::ptr;
use std::slice;

use unsafe_libyaml as sys;

use yamlcrypt_common::{Error, Result};

use crate::node::ScalarStyle;

/// A parse or emit event.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Event {
    StreamStart,
    StreamEnd,
    DocumentStart,
    DocumentEnd,
    Alias(String),
    Scalar(ScalarEvent),
    SequenceStart(Properties),
    SequenceEnd,
    MappingStart(Properties),
    MappingEnd,
}

/// Anchor and tag of a node.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Properties {
    pub anchor: Option<String>,
    pub tag: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ScalarEvent {
    pub properties: Properties,
    pub text: String,
    pub style: ScalarStyle,
    /// The tag may be omitted when the scalar is written plain.
    pub plain_implicit: bool,
    /// The tag may be omitted when the scalar is written in any other style.
    pub quoted_implicit: bool,
}

/// Pull parser over a borrowed UTF-8 input.
///
/// The libyaml state lives on the heap and never moves after initialization.
pub(crate) struct Parser<'input> {
    sys: Box<MaybeUninit<sys::yaml_parser_t>>,
    input: PhantomData<&'input str>,
}

impl<'input> Parser<'input> {
    pub fn new(input: &'input str) -> Result<Self> {
        let mut pinned = Box::new(MaybeUninit::<sys::yaml_parser_t>::uninit());
        let parser = pinned.as_mut_ptr();
        unsafe {
            if sys::yaml_parser_initialize(parser).fail {
                return Err(Error::Structural(
                    "failed to allocate the YAML parser".to_string(),
                ));
            }
            sys::yaml_parser_set_encoding(parser, sys::YAML_UTF8_ENCODING);
            sys::yaml_parser_set_input_string(parser, input.as_ptr(), input.len() as u64);
        }
        Ok(Self {
            sys: pinned,
            input: PhantomData,
        })
    }

    /// Next event of the stream.
    ///
    /// # Errors
    /// - `Structural` if the input is not valid YAML
    pub fn next(&mut self) -> Result<Event> {
        let mut event = MaybeUninit::<sys::yaml_event_t>::uninit();
        unsafe {
            let parser = self.sys.as_mut_ptr();
            if (&(*parser)).error != sys::YAML_NO_ERROR {
                return Err(parse_error(parser));
            }
            let event = event.as_mut_ptr();
            if sys::yaml_parser_parse(parser, event).fail {
                return Err(parse_error(parser));
            }
            let converted = convert_event(&*event);
            sys::yaml_event_delete(event);
            converted
        }
    }
}

impl Drop for Parser<'_> {
    fn drop(&mut self) {
        unsafe { sys::yaml_parser_delete(self.sys.as_mut_ptr()) }
    }
}

unsafe fn convert_event(event: &sys::yaml_event_t) -> Result<Event> {
    let converted = match event.type_ {
        sys::YAML_STREAM_START_EVENT => Event::StreamStart,
        sys::YAML_STREAM_END_EVENT => Event::StreamEnd,
        sys::YAML_DOCUMENT_START_EVENT => Event::DocumentStart,
        sys::YAML_DOCUMENT_END_EVENT => Event::DocumentEnd,
        sys::YAML_ALIAS_EVENT => Event::Alias(c_text(event.data.alias.anchor).unwrap_or_default()),
        sys::YAML_SCALAR_EVENT => {
            let scalar = event.data.scalar;
            let bytes = slice::from_raw_parts(scalar.value, scalar.length as usize);
            let text = String::from_utf8(bytes.to_vec())
                .map_err(|e| Error::Structural(format!("scalar is not UTF-8: {}", e)))?;
            let style = match scalar.style {
                sys::YAML_PLAIN_SCALAR_STYLE => ScalarStyle::Plain,
                sys::YAML_SINGLE_QUOTED_SCALAR_STYLE => ScalarStyle::SingleQuoted,
                sys::YAML_DOUBLE_QUOTED_SCALAR_STYLE => ScalarStyle::DoubleQuoted,
                sys::YAML_LITERAL_SCALAR_STYLE => ScalarStyle::Literal,
                sys::YAML_FOLDED_SCALAR_STYLE => ScalarStyle::Folded,
                _ => ScalarStyle::Any,
            };
            Event::Scalar(ScalarEvent {
                properties: Properties {
                    anchor: c_text(scalar.anchor),
                    tag: c_text(scalar.tag),
                },
                text,
                style,
                plain_implicit: scalar.plain_implicit,
                quoted_implicit: scalar.quoted_implicit,
            })
        }
        sys::YAML_SEQUENCE_START_EVENT => Event::SequenceStart(Properties {
            anchor: c_text(event.data.sequence_start.anchor),
            tag: c_text(event.data.sequence_start.tag),
        }),
        sys::YAML_SEQUENCE_END_EVENT => Event::SequenceEnd,
        sys::YAML_MAPPING_START_EVENT => Event::MappingStart(Properties {
            anchor: c_text(event.data.mapping_start.anchor),
            tag: c_text(event.data.mapping_start.tag),
        }),
        sys::YAML_MAPPING_END_EVENT => Event::MappingEnd,
        _ => {
            return Err(Error::Structural(
                "YAML parser produced no event".to_string(),
            ))
        }
    };
    Ok(converted)
}

unsafe fn parse_error(parser: *const sys::yaml_parser_t) -> Error {
    let problem = c_text((&(*parser)).problem.cast())
        .unwrap_or_else(|| "YAML parser failed without a reason".to_string());
    let mark = (&(*parser)).problem_mark;
    let mut message = format!(
        "{} at line {} column {}",
        problem,
        mark.line + 1,
        mark.column + 1
    );
    if let Some(context) = c_text((&(*parser)).context.cast()) {
        message = format!("{}, {}", message, context);
    }
    Error::Structural(message)
}

/// Emitter writing into an in-memory buffer.
#[allow(clippy::box_collection)]
pub(crate) struct Emitter {
    sys: Box<MaybeUninit<sys::yaml_emitter_t>>,
    output: Box<Vec<u8>>,
}

impl Emitter {
    pub fn new() -> Result<Self> {
        let mut pinned = Box::new(MaybeUninit::<sys::yaml_emitter_t>::uninit());
        let mut output = Box::new(Vec::new());
        let emitter = pinned.as_mut_ptr();
        unsafe {
            if sys::yaml_emitter_initialize(emitter).fail {
                return Err(Error::Structural(
                    "failed to allocate the YAML emitter".to_string(),
                ));
            }
            sys::yaml_emitter_set_unicode(emitter, true);
            sys::yaml_emitter_set_width(emitter, -1);
            let data: *mut Vec<u8> = &mut *output;
            sys::yaml_emitter_set_output(emitter, write_to_buffer, data.cast());
        }
        Ok(Self {
            sys: pinned,
            output,
        })
    }

    /// Emit one event.
    ///
    /// # Errors
    /// - `Structural` if the event is out of order or cannot be represented
    pub fn emit(&mut self, event: &Event) -> Result<()> {
        let mut sys_event = MaybeUninit::<sys::yaml_event_t>::uninit();
        let sys_event = sys_event.as_mut_ptr();
        unsafe {
            let emitter = self.sys.as_mut_ptr();
            let initialized = match event {
                Event::StreamStart => {
                    sys::yaml_stream_start_event_initialize(sys_event, sys::YAML_UTF8_ENCODING)
                }
                Event::StreamEnd => sys::yaml_stream_end_event_initialize(sys_event),
                Event::DocumentStart => sys::yaml_document_start_event_initialize(
                    sys_event,
                    ptr::null_mut(),
                    ptr::null_mut(),
                    ptr::null_mut(),
                    true,
                ),
                Event::DocumentEnd => sys::yaml_document_end_event_initialize(sys_event, true),
                Event::Alias(anchor) => {
                    let anchor = c_string(anchor)?;
                    sys::yaml_alias_event_initialize(sys_event, anchor.as_ptr().cast())
                }
                Event::Scalar(scalar) => {
                    let anchor = optional_c_string(scalar.properties.anchor.as_deref())?;
                    let tag = optional_c_string(scalar.properties.tag.as_deref())?;
                    let length = i32::try_from(scalar.text.len()).map_err(|_| {
                        Error::Structural("scalar is too long to emit".to_string())
                    })?;
                    sys::yaml_scalar_event_initialize(
                        sys_event,
                        c_ptr(&anchor),
                        c_ptr(&tag),
                        scalar.text.as_ptr(),
                        length,
                        scalar.plain_implicit,
                        scalar.quoted_implicit,
                        sys_style(scalar.style),
                    )
                }
                Event::SequenceStart(properties) => {
                    let anchor = optional_c_string(properties.anchor.as_deref())?;
                    let tag = optional_c_string(properties.tag.as_deref())?;
                    sys::yaml_sequence_start_event_initialize(
                        sys_event,
                        c_ptr(&anchor),
                        c_ptr(&tag),
                        tag.is_none(),
                        sys::YAML_ANY_SEQUENCE_STYLE,
                    )
                }
                Event::SequenceEnd => sys::yaml_sequence_end_event_initialize(sys_event),
                Event::MappingStart(properties) => {
                    let anchor = optional_c_string(properties.anchor.as_deref())?;
                    let tag = optional_c_string(properties.tag.as_deref())?;
                    sys::yaml_mapping_start_event_initialize(
                        sys_event,
                        c_ptr(&anchor),
                        c_ptr(&tag),
                        tag.is_none(),
                        sys::YAML_ANY_MAPPING_STYLE,
                    )
                }
                Event::MappingEnd => sys::yaml_mapping_end_event_initialize(sys_event),
            };
            if initialized.fail {
                return Err(emit_error(emitter));
            }
            if sys::yaml_emitter_emit(emitter, sys_event).fail {
                return Err(emit_error(emitter));
            }
        }
        Ok(())
    }

    /// Flush and return everything emitted so far.
    pub fn finish(mut self) -> Result<String> {
        unsafe {
            let emitter = self.sys.as_mut_ptr();
            if sys::yaml_emitter_flush(emitter).fail {
                return Err(emit_error(emitter));
            }
        }
        let bytes = mem::take(&mut *self.output);
        String::from_utf8(bytes).map_err(|e| Error::Structural(e.to_string()))
    }
}

impl Drop for Emitter {
    fn drop(&mut self) {
        unsafe { sys::yaml_emitter_delete(self.sys.as_mut_ptr()) }
    }
}

unsafe fn write_to_buffer(data: *mut c_void, buffer: *mut u8, size: u64) -> i32 {
    let output = &mut *data.cast::<Vec<u8>>();
    output.extend_from_slice(slice::from_raw_parts(buffer, size as usize));
    1
}

unsafe fn emit_error(emitter: *const sys::yaml_emitter_t) -> Error {
    let problem = c_text((&(*emitter)).problem.cast())
        .unwrap_or_else(|| "YAML emitter failed without a reason".to_string());
    Error::Structural(problem)
}

fn sys_style(style: ScalarStyle) -> sys::yaml_scalar_style_t {
    match style {
        ScalarStyle::Any => sys::YAML_ANY_SCALAR_STYLE,
        ScalarStyle::Plain => sys::YAML_PLAIN_SCALAR_STYLE,
        ScalarStyle::SingleQuoted => sys::YAML_SINGLE_QUOTED_SCALAR_STYLE,
        ScalarStyle::DoubleQuoted => sys::YAML_DOUBLE_QUOTED_SCALAR_STYLE,
        ScalarStyle::Literal => sys::YAML_LITERAL_SCALAR_STYLE,
        ScalarStyle::Folded => sys::YAML_FOLDED_SCALAR_STYLE,
    }
}

/// Copy a NUL-terminated libyaml string. Null pointers read as `None`.
unsafe fn c_text(text: *const u8) -> Option<String> {
    if text.is_null() {
        return None;
    }
    Some(CStr::from_ptr(text.cast()).to_string_lossy().into_owned())
}

fn c_string(text: &str) -> Result<CString> {
    CString::new(text)
        .map_err(|_| Error::Structural(format!("{:?} contains a NUL byte", text)))
}

fn optional_c_string(text: Option<&str>) -> Result<Option<CString>> {
    text.map(c_string).transpose()
}

fn c_ptr(text: &Option<CString>) -> *const u8 {
    text.as_ref().map_or(ptr::null(), |text| text.as_ptr().cast())
}
