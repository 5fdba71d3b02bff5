//! Capability traits consumed by the document engine.
//!
//! The engine never sees keys. It hands binary payloads to a `Decrypter` or an
//! `Encrypter` and gets binary payloads back; armor framing is applied by the
//! caller (see [`crate::armor`]).

use std::sync::Arc;

use yamlcrypt_common::Result;

/// Something able to open ciphertext addressed to one of its identities.
pub trait Decrypter: Send + Sync {
    /// Decrypt a binary (unarmored) payload.
    ///
    /// # Errors
    /// - Malformed payload header
    /// - No identity in the set can unwrap the file key
    /// - Payload authentication failure
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// Something able to encrypt a payload to a set of recipients.
pub trait Encrypter: Send + Sync {
    /// Number of recipients the payload would be encrypted to.
    fn recipient_count(&self) -> usize;

    /// Whether the recipient set is empty.
    ///
    /// An empty set means "leave the value in cleartext", not an error.
    fn is_empty(&self) -> bool {
        self.recipient_count() == 0
    }

    /// Encrypt `plaintext` into a binary (unarmored) payload.
    ///
    /// # Errors
    /// - The recipient set cannot be used together (e.g. a passphrase mixed with keys)
    /// - I/O failure while writing the payload
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;
}

impl<T: Decrypter + ?Sized> Decrypter for &T {
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        (**self).decrypt(ciphertext)
    }
}

impl<T: Decrypter + ?Sized> Decrypter for Arc<T> {
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        (**self).decrypt(ciphertext)
    }
}

impl<T: Encrypter + ?Sized> Encrypter for Arc<T> {
    fn recipient_count(&self) -> usize {
        (**self).recipient_count()
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        (**self).encrypt(plaintext)
    }
}
