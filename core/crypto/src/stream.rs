//! Streaming age encryption and decryption.
//!
//! Thin wrappers over `age::Encryptor` / `age::Decryptor` that work on any
//! `Read` / `Write` pair, plus byte-slice conveniences used by the key sets.

use std::io::{self, Read, Write};

use zeroize::Zeroizing;

use crate::keys::{BoxedIdentity, SharedRecipient};
use yamlcrypt_common::{Error, Result};

/// Encrypting stream bound to a non-empty recipient set.
pub struct EncryptingStream<'a> {
    recipients: &'a [SharedRecipient],
}

impl<'a> EncryptingStream<'a> {
    /// Create a new encrypting stream.
    ///
    /// # Errors
    /// - Returns error if `recipients` is empty
    pub fn new(recipients: &'a [SharedRecipient]) -> Result<Self> {
        if recipients.is_empty() {
            return Err(Error::Crypto("No recipients specified".to_string()));
        }
        Ok(Self { recipients })
    }

    /// Encrypt data from reader and write the binary age payload to writer.
    ///
    /// # Postconditions
    /// - A fresh file key is generated, so repeated calls never produce the same payload
    ///
    /// # Errors
    /// - Recipients that cannot be combined (e.g. a passphrase next to keys)
    /// - I/O errors from reader/writer
    pub fn encrypt_stream<R: Read, W: Write>(&self, mut reader: R, writer: W) -> Result<u64> {
        let encryptor = age::Encryptor::with_recipients(
            self.recipients
                .iter()
                .map(|r| r.as_ref() as &dyn age::Recipient),
        )
        .map_err(|e| Error::Crypto(format!("Cannot encrypt to recipients: {}", e)))?;

        let mut output = encryptor.wrap_output(writer)?;
        let written = io::copy(&mut reader, &mut output)?;
        output.finish()?;

        Ok(written)
    }
}

/// Decrypting stream bound to an identity set.
pub struct DecryptingStream<'a> {
    identities: &'a [BoxedIdentity],
}

impl<'a> DecryptingStream<'a> {
    /// Create a new decrypting stream.
    ///
    /// An empty identity set is accepted; every decryption will then fail with
    /// "no matching keys", which is the same outcome age reports.
    pub fn new(identities: &'a [BoxedIdentity]) -> Self {
        Self { identities }
    }

    /// Decrypt a binary age payload from reader and write plaintext to writer.
    ///
    /// # Errors
    /// - Invalid age header
    /// - No identity matches any recipient stanza
    /// - Authentication failure (tampered data)
    pub fn decrypt_stream<R: Read, W: Write>(&self, reader: R, mut writer: W) -> Result<u64> {
        let decryptor = age::Decryptor::new(reader)
            .map_err(|e| Error::Crypto(format!("Invalid age header: {}", e)))?;

        let mut plaintext = decryptor
            .decrypt(
                self.identities
                    .iter()
                    .map(|i| i.as_ref() as &dyn age::Identity),
            )
            .map_err(|e| Error::Crypto(e.to_string()))?;

        io::copy(&mut plaintext, &mut writer)
            .map_err(|e| Error::Crypto(format!("Payload decryption failed: {}", e)))
    }
}

/// Encrypt a complete byte slice to `recipients`.
pub fn encrypt_bytes(recipients: &[SharedRecipient], data: &[u8]) -> Result<Vec<u8>> {
    let stream = EncryptingStream::new(recipients)?;
    let mut output = Vec::new();
    stream.encrypt_stream(data, &mut output)?;
    Ok(output)
}

/// Decrypt a complete binary age payload with `identities`.
///
/// Partially written plaintext is zeroized if decryption fails midway.
pub fn decrypt_bytes(identities: &[BoxedIdentity], data: &[u8]) -> Result<Vec<u8>> {
    let stream = DecryptingStream::new(identities);
    let mut output = Zeroizing::new(Vec::new());
    stream.decrypt_stream(data, &mut *output)?;
    Ok(std::mem::take(&mut *output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn keypair() -> (BoxedIdentity, SharedRecipient) {
        let identity = age::x25519::Identity::generate();
        let recipient = identity.to_public();
        (Box::new(identity), Arc::new(recipient))
    }

    #[test]
    fn test_stream_encrypt_decrypt_roundtrip() {
        let (identity, recipient) = keypair();
        let plaintext = b"Hello, streaming encryption!";

        let encrypted = encrypt_bytes(&[recipient], plaintext).unwrap();
        let decrypted = decrypt_bytes(&[identity], &encrypted).unwrap();

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_stream_empty_data() {
        let (identity, recipient) = keypair();

        let encrypted = encrypt_bytes(&[recipient], b"").unwrap();
        let decrypted = decrypt_bytes(&[identity], &encrypted).unwrap();

        assert!(decrypted.is_empty());
    }

    #[test]
    fn test_stream_fresh_payload_each_time() {
        let (_, recipient) = keypair();
        let recipients = [recipient];

        let first = encrypt_bytes(&recipients, b"same").unwrap();
        let second = encrypt_bytes(&recipients, b"same").unwrap();

        assert_ne!(first, second);
    }

    #[test]
    fn test_stream_wrong_identity_fails() {
        let (_, recipient) = keypair();
        let (other_identity, _) = keypair();

        let encrypted = encrypt_bytes(&[recipient], b"Secret streaming data").unwrap();
        let result = decrypt_bytes(&[other_identity], &encrypted);

        assert!(matches!(result, Err(Error::Crypto(_))));
    }

    #[test]
    fn test_stream_any_matching_identity_decrypts() {
        let (identity, recipient) = keypair();
        let (other_identity, _) = keypair();

        let encrypted = encrypt_bytes(&[recipient], b"data").unwrap();
        let decrypted = decrypt_bytes(&[other_identity, identity], &encrypted).unwrap();

        assert_eq!(decrypted, b"data");
    }

    #[test]
    fn test_stream_no_recipients_fails() {
        assert!(EncryptingStream::new(&[]).is_err());
        assert!(encrypt_bytes(&[], b"data").is_err());
    }

    #[test]
    fn test_stream_garbage_header_fails() {
        let (identity, _) = keypair();
        let result = decrypt_bytes(&[identity], b"definitely not an age file");
        assert!(result.is_err());
    }
}
