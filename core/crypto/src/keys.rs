//! age identity and recipient sets.
//!
//! `Identities` implements [`Decrypter`] and `Recipients` implements
//! [`Encrypter`]; both are cheap to share between threads. Loading helpers
//! accept the age identity file format (one `AGE-SECRET-KEY-1…` per line) and
//! recipients files (one `age1…` per line). Blank lines and `#` comments are
//! skipped in both.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use age::secrecy::SecretString;
use tracing::debug;

use crate::capability::{Decrypter, Encrypter};
use crate::stream::{decrypt_bytes, encrypt_bytes};
use yamlcrypt_common::{Error, Result};

/// Identity stored in an [`Identities`] set.
pub type BoxedIdentity = Box<dyn age::Identity + Send + Sync>;

/// Recipient stored in a [`Recipients`] set.
pub type SharedRecipient = Arc<dyn age::Recipient + Send + Sync>;

/// Ordered set of identities used for decryption.
///
/// Every identity is tried against every recipient stanza of a payload; the
/// first one that unwraps the file key wins.
#[derive(Default)]
pub struct Identities {
    identities: Vec<BoxedIdentity>,
}

impl Identities {
    /// Create an empty identity set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an identity.
    pub fn with_identity(mut self, identity: impl age::Identity + Send + Sync + 'static) -> Self {
        self.push(identity);
        self
    }

    /// Add a passphrase identity for scrypt-encrypted payloads.
    pub fn with_passphrase(self, passphrase: impl Into<String>) -> Self {
        let passphrase = SecretString::from(passphrase.into());
        self.with_identity(age::scrypt::Identity::new(passphrase))
    }

    /// Add an identity in place.
    pub fn push(&mut self, identity: impl age::Identity + Send + Sync + 'static) {
        self.identities.push(Box::new(identity));
    }

    /// Append every identity of `other`.
    pub fn extend(&mut self, other: Identities) {
        self.identities.extend(other.identities);
    }

    /// Parse the contents of an age identity file.
    ///
    /// # Errors
    /// - Any non-comment line is not an x25519 secret key
    pub fn parse(contents: &str) -> Result<Self> {
        let identities = parse_x25519_identities(contents)?
            .into_iter()
            .map(|identity| Box::new(identity) as BoxedIdentity)
            .collect();
        Ok(Self { identities })
    }

    /// Load an age identity file from disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let identities = Self::parse(&contents)?;
        debug!("Loaded {} identities from {}", identities.len(), path.display());
        Ok(identities)
    }

    /// Number of identities in the set.
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

impl Decrypter for Identities {
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        decrypt_bytes(&self.identities, ciphertext)
    }
}

impl fmt::Debug for Identities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identities([REDACTED; {} identities])", self.identities.len())
    }
}

/// Set of recipients used for encryption.
///
/// An empty set is valid and means values are left in cleartext.
#[derive(Clone, Default)]
pub struct Recipients {
    recipients: Vec<SharedRecipient>,
}

impl Recipients {
    /// Create an empty recipient set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a recipient.
    pub fn with_recipient(mut self, recipient: impl age::Recipient + Send + Sync + 'static) -> Self {
        self.push(recipient);
        self
    }

    /// Add a passphrase recipient.
    ///
    /// age refuses to combine a passphrase with any other recipient; that
    /// surfaces as an error when encrypting, not here.
    pub fn with_passphrase(self, passphrase: impl Into<String>) -> Self {
        let passphrase = SecretString::from(passphrase.into());
        self.with_recipient(age::scrypt::Recipient::new(passphrase))
    }

    /// Add a recipient in place.
    pub fn push(&mut self, recipient: impl age::Recipient + Send + Sync + 'static) {
        self.recipients.push(Arc::new(recipient));
    }

    /// Append every recipient of `other`.
    pub fn extend(&mut self, other: Recipients) {
        self.recipients.extend(other.recipients);
    }

    /// Parse a single `age1…` recipient string.
    pub fn parse_recipient(recipient: &str) -> Result<age::x25519::Recipient> {
        age::x25519::Recipient::from_str(recipient.trim())
            .map_err(|e| Error::InvalidInput(format!("Invalid age recipient: {}", e)))
    }

    /// Parse the contents of a recipients file.
    pub fn parse(contents: &str) -> Result<Self> {
        let mut recipients = Self::new();
        for line in key_lines(contents) {
            recipients.push(Self::parse_recipient(line)?);
        }
        Ok(recipients)
    }

    /// Load a recipients file from disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let recipients = Self::parse(&contents)?;
        debug!("Loaded {} recipients from {}", recipients.len(), path.display());
        Ok(recipients)
    }

    /// Derive recipients from the contents of an age identity file.
    ///
    /// This is the public half of every key in the file, so a document
    /// encrypted to the result can be decrypted with `Identities::parse` of
    /// the same contents.
    pub fn from_identity_file(contents: &str) -> Result<Self> {
        let mut recipients = Self::new();
        for identity in parse_x25519_identities(contents)? {
            recipients.push(identity.to_public());
        }
        Ok(recipients)
    }

    /// Number of recipients in the set.
    pub fn len(&self) -> usize {
        self.recipients.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.recipients.is_empty()
    }
}

impl Encrypter for Recipients {
    fn recipient_count(&self) -> usize {
        self.recipients.len()
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        encrypt_bytes(&self.recipients, plaintext)
    }
}

impl fmt::Debug for Recipients {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Recipients({} recipients)", self.recipients.len())
    }
}

/// Lines of a key file that carry a key.
fn key_lines(contents: &str) -> impl Iterator<Item = &str> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
}

fn parse_x25519_identities(contents: &str) -> Result<Vec<age::x25519::Identity>> {
    key_lines(contents)
        .enumerate()
        .map(|(i, line)| {
            age::x25519::Identity::from_str(line).map_err(|e| {
                Error::InvalidInput(format!("Invalid age identity on key line {}: {}", i + 1, e))
            })
        })
        .collect()
}
