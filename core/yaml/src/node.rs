//! Tagged document tree.
//!
//! `Node` is a closed view of a parsed YAML document: every node is a scalar,
//! a sequence, a mapping or an alias, and any node but an alias may carry a
//! tag and an anchor. Scalars keep the exact text and style they were written
//! with, so nodes the engine does not touch come back out as they went in.
//! Comments are not part of the tree and are dropped on output.

use serde::de::DeserializeOwned;
use serde_yaml::Value;

use yamlcrypt_common::{Error, Result};

use crate::events::{Emitter, Event, Parser, Properties, ScalarEvent};

/// Nesting depth at which parsing gives up.
const MAX_DEPTH: usize = 128;

/// How a scalar is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScalarStyle {
    /// Let the emitter pick the simplest style that keeps the text a string.
    #[default]
    Any,
    Plain,
    SingleQuoted,
    DoubleQuoted,
    Literal,
    Folded,
}

/// Content of a scalar node: its raw text and the style it is written in.
///
/// The text is never interpreted. `1.50`, `0x1F` and `~` stay exactly that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scalar {
    pub text: String,
    pub style: ScalarStyle,
}

impl Scalar {
    pub fn new(text: impl Into<String>) -> Self {
        Self::with_style(text, ScalarStyle::Any)
    }

    pub fn with_style(text: impl Into<String>, style: ScalarStyle) -> Self {
        Self {
            text: text.into(),
            style,
        }
    }

    /// Raw text of the scalar.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Plain for a single line, literal block for several.
    pub(crate) fn fitted(text: String) -> Self {
        let style = if text.contains('\n') {
            ScalarStyle::Literal
        } else {
            ScalarStyle::Plain
        };
        Self { text, style }
    }
}

/// A node of a document tree.
///
/// Children are owned exclusively. Sharing expressed in the document through
/// anchors stays in the tree as an `Alias` node and is never expanded. Tags
/// are stored as written, including the leading `!`.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Scalar {
        anchor: Option<String>,
        tag: Option<String>,
        value: Scalar,
    },
    Sequence {
        anchor: Option<String>,
        tag: Option<String>,
        items: Vec<Node>,
    },
    /// Entries keep insertion order. Duplicate keys are not merged here.
    Mapping {
        anchor: Option<String>,
        tag: Option<String>,
        entries: Vec<(Node, Node)>,
    },
    /// Reference to the node carrying `anchor`.
    Alias { anchor: String },
}

impl Node {
    /// Untagged string scalar.
    pub fn string(value: impl Into<String>) -> Self {
        Node::Scalar {
            anchor: None,
            tag: None,
            value: Scalar::new(value),
        }
    }

    /// Tagged string scalar.
    pub fn tagged_string(tag: &str, value: impl Into<String>) -> Self {
        Node::string(value).with_tag(tag)
    }

    /// Untagged sequence.
    pub fn sequence(items: Vec<Node>) -> Self {
        Node::Sequence {
            anchor: None,
            tag: None,
            items,
        }
    }

    /// Untagged mapping.
    pub fn mapping(entries: Vec<(Node, Node)>) -> Self {
        Node::Mapping {
            anchor: None,
            tag: None,
            entries,
        }
    }

    /// Replace this node's tag.
    ///
    /// The tag is normalized to start with `!`; an empty tag removes it.
    /// Aliases cannot be tagged and are returned unchanged.
    pub fn with_tag(self, tag: &str) -> Self {
        let tag = normalize_tag(tag);
        match self {
            Node::Scalar { anchor, value, .. } => Node::Scalar { anchor, tag, value },
            Node::Sequence { anchor, items, .. } => Node::Sequence { anchor, tag, items },
            Node::Mapping {
                anchor, entries, ..
            } => Node::Mapping {
                anchor,
                tag,
                entries,
            },
            alias @ Node::Alias { .. } => alias,
        }
    }

    /// Tag of this node, if any.
    pub fn tag(&self) -> Option<&str> {
        match self {
            Node::Scalar { tag, .. } | Node::Sequence { tag, .. } | Node::Mapping { tag, .. } => {
                tag.as_deref()
            }
            Node::Alias { .. } => None,
        }
    }

    /// Anchor defined on this node, or referenced by it for an alias.
    pub fn anchor(&self) -> Option<&str> {
        match self {
            Node::Scalar { anchor, .. }
            | Node::Sequence { anchor, .. }
            | Node::Mapping { anchor, .. } => anchor.as_deref(),
            Node::Alias { anchor } => Some(anchor),
        }
    }

    /// Check whether this node carries exactly `tag`.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tag() == Some(tag)
    }

    /// Check if this is a scalar.
    pub fn is_scalar(&self) -> bool {
        matches!(self, Node::Scalar { .. })
    }

    /// Raw text of a scalar node, `None` for anything else.
    pub fn text(&self) -> Option<&str> {
        match self {
            Node::Scalar { value, .. } => Some(value.text()),
            Node::Sequence { .. } | Node::Mapping { .. } | Node::Alias { .. } => None,
        }
    }

    /// Value stored under the first key whose text is `key`.
    pub fn get(&self, key: &str) -> Option<&Node> {
        match self {
            Node::Mapping { entries, .. } => entries
                .iter()
                .find(|(k, _)| k.text() == Some(key))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Item at `index` of a sequence node.
    pub fn at(&self, index: usize) -> Option<&Node> {
        match self {
            Node::Sequence { items, .. } => items.get(index),
            _ => None,
        }
    }

    /// Parse a single YAML document. Empty input is an empty plain scalar.
    ///
    /// # Errors
    /// - `Structural` if the input is not valid YAML or holds several documents
    pub fn parse(yaml: &str) -> Result<Self> {
        let mut documents = Self::parse_all(yaml)?;
        match documents.len() {
            0 => Ok(Node::Scalar {
                anchor: None,
                tag: None,
                value: Scalar::with_style("", ScalarStyle::Plain),
            }),
            1 => Ok(documents.remove(0)),
            n => Err(Error::Structural(format!(
                "expected a single YAML document, found {}",
                n
            ))),
        }
    }

    /// Parse every document of a multi-document YAML stream.
    pub fn parse_all(yaml: &str) -> Result<Vec<Self>> {
        let mut parser = Parser::new(yaml)?;
        let mut documents = Vec::new();
        loop {
            match parser.next()? {
                Event::StreamStart | Event::DocumentEnd => {}
                Event::DocumentStart => {
                    let root = parser.next()?;
                    documents.push(load(&mut parser, root, 0)?);
                }
                Event::StreamEnd => return Ok(documents),
                _ => {
                    return Err(Error::Structural(
                        "unexpected event between documents".to_string(),
                    ))
                }
            }
        }
    }

    /// Serialize this tree as a YAML document.
    pub fn to_yaml(&self) -> Result<String> {
        let mut emitter = Emitter::new()?;
        emitter.emit(&Event::StreamStart)?;
        emitter.emit(&Event::DocumentStart)?;
        self.emit(&mut emitter)?;
        emitter.emit(&Event::DocumentEnd)?;
        emitter.emit(&Event::StreamEnd)?;
        emitter.finish()
    }

    /// Decode this tree into a typed value with serde.
    ///
    /// Tags are visible to the destination type; plain `String` fields accept
    /// tagged scalars and receive their raw text. Aliases are expanded.
    pub fn decode<T: DeserializeOwned>(self) -> Result<T> {
        serde_yaml::from_str(&self.to_yaml()?).map_err(|e| Error::Structural(e.to_string()))
    }

    fn emit(&self, emitter: &mut Emitter) -> Result<()> {
        match self {
            Node::Scalar { anchor, tag, value } => {
                emitter.emit(&Event::Scalar(scalar_event(anchor, tag, value)))
            }
            Node::Sequence { anchor, tag, items } => {
                emitter.emit(&Event::SequenceStart(properties(anchor, tag)))?;
                for item in items {
                    item.emit(emitter)?;
                }
                emitter.emit(&Event::SequenceEnd)
            }
            Node::Mapping {
                anchor,
                tag,
                entries,
            } => {
                emitter.emit(&Event::MappingStart(properties(anchor, tag)))?;
                for (key, value) in entries {
                    key.emit(emitter)?;
                    value.emit(emitter)?;
                }
                emitter.emit(&Event::MappingEnd)
            }
            Node::Alias { anchor } => emitter.emit(&Event::Alias(anchor.clone())),
        }
    }
}

fn load(parser: &mut Parser<'_>, event: Event, depth: usize) -> Result<Node> {
    if depth > MAX_DEPTH {
        return Err(Error::Structural(format!(
            "document nests deeper than {} levels",
            MAX_DEPTH
        )));
    }
    match event {
        Event::Scalar(scalar) => Ok(Node::Scalar {
            anchor: scalar.properties.anchor,
            tag: scalar.properties.tag,
            value: Scalar::with_style(scalar.text, scalar.style),
        }),
        Event::Alias(anchor) => Ok(Node::Alias { anchor }),
        Event::SequenceStart(Properties { anchor, tag }) => {
            let mut items = Vec::new();
            loop {
                match parser.next()? {
                    Event::SequenceEnd => break,
                    event => items.push(load(parser, event, depth + 1)?),
                }
            }
            Ok(Node::Sequence { anchor, tag, items })
        }
        Event::MappingStart(Properties { anchor, tag }) => {
            let mut entries = Vec::new();
            loop {
                let key = match parser.next()? {
                    Event::MappingEnd => break,
                    event => load(parser, event, depth + 1)?,
                };
                let event = parser.next()?;
                let value = load(parser, event, depth + 1)?;
                entries.push((key, value));
            }
            Ok(Node::Mapping {
                anchor,
                tag,
                entries,
            })
        }
        _ => Err(Error::Structural(
            "unexpected event inside a document".to_string(),
        )),
    }
}

fn properties(anchor: &Option<String>, tag: &Option<String>) -> Properties {
    Properties {
        anchor: anchor.clone(),
        tag: tag.clone(),
    }
}

fn scalar_event(anchor: &Option<String>, tag: &Option<String>, value: &Scalar) -> ScalarEvent {
    // An untagged scalar may only go out plain if it reads back as the same text.
    let (plain_implicit, quoted_implicit) = match (tag, value.style) {
        (Some(_), _) => (false, false),
        (None, ScalarStyle::Plain) => (true, true),
        (None, ScalarStyle::Any) => (reads_back_as_string(&value.text), true),
        (None, _) => (false, true),
    };
    ScalarEvent {
        properties: properties(anchor, tag),
        text: value.text.clone(),
        style: value.style,
        plain_implicit,
        quoted_implicit,
    }
}

fn reads_back_as_string(text: &str) -> bool {
    matches!(serde_yaml::from_str::<Value>(text), Ok(Value::String(s)) if s == text)
}

/// Label used for a mapping key in a `NodePath`.
pub(crate) fn key_label(key: &Node) -> String {
    match key {
        Node::Scalar { value, .. } => value.text.clone(),
        Node::Alias { anchor } => format!("*{}", anchor),
        Node::Sequence { .. } | Node::Mapping { .. } => "?".to_string(),
    }
}

/// Normalize a tag to its `!`-prefixed form. Blank tags normalize to `None`.
pub(crate) fn normalize_tag(tag: &str) -> Option<String> {
    let tag = tag.trim();
    let bare = tag.trim_start_matches('!');
    if bare.is_empty() {
        None
    } else if tag.starts_with('!') {
        Some(tag.to_string())
    } else {
        Some(format!("!{}", tag))
    }
}
