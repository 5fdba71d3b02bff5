//! ASCII armor framing for age payloads.
//!
//! Armored text is a PEM-like block: a begin marker line, base64 body lines of
//! 64 columns, and an end marker line. The document engine only needs a cheap
//! prefix/suffix test plus conversion to and from the binary payload.

use std::io::{Read, Write};

use age::armor::{ArmoredReader, ArmoredWriter, Format};

use yamlcrypt_common::{Error, Result};

/// First line of an armored age file.
pub const ARMOR_BEGIN: &str = "-----BEGIN AGE ENCRYPTED FILE-----";

/// Last line of an armored age file.
pub const ARMOR_END: &str = "-----END AGE ENCRYPTED FILE-----";

/// Check whether `text`, ignoring surrounding whitespace, is framed by the
/// armor begin and end markers.
///
/// Only the framing is tested; the body is not validated.
pub fn is_armored(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.starts_with(ARMOR_BEGIN) && trimmed.ends_with(ARMOR_END)
}

/// Wrap a binary age payload in ASCII armor.
///
/// # Postconditions
/// - Output starts with `ARMOR_BEGIN` and ends with `ARMOR_END` plus a newline
pub fn armor(payload: &[u8]) -> Result<String> {
    let mut output = Vec::with_capacity(payload.len() * 4 / 3 + ARMOR_BEGIN.len() * 2 + 8);
    {
        let mut writer = ArmoredWriter::wrap_output(&mut output, Format::AsciiArmor)?;
        writer.write_all(payload)?;
        writer.finish()?;
    }

    String::from_utf8(output)
        .map_err(|e| Error::Crypto(format!("Armored output is not UTF-8: {}", e)))
}

/// Strip ASCII armor from `text`, returning the binary age payload.
///
/// Leading and trailing whitespace is ignored, so block scalars that keep a
/// trailing newline are accepted.
///
/// # Errors
/// - Missing begin or end marker
/// - Body is not valid base64 or violates the line-length rules
pub fn dearmor(text: &str) -> Result<Vec<u8>> {
    let trimmed = text.trim();
    if !is_armored(trimmed) {
        return Err(Error::Crypto("Missing armor begin or end marker".to_string()));
    }

    let framed = format!("{}\n", trimmed);
    let mut reader = ArmoredReader::new(framed.as_bytes());
    let mut payload = Vec::new();
    reader
        .read_to_end(&mut payload)
        .map_err(|e| Error::Crypto(format!("Invalid armor body: {}", e)))?;

    Ok(payload)
}
