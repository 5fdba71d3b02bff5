//! Transparent age encryption of tagged YAML values.
//!
//! This module provides:
//! - A closed `Node` tree that keeps raw scalar text, tags and anchors
//! - `ArmoredString`, a field type that encrypts itself when serialized
//! - `Resolver`, which decrypts armored `!crypto/age` values when reading
//! - `Transformer`, which encrypts `!crypto/age` values of an existing tree
//!
//! # Architecture
//! The engine is written against the `Decrypter` / `Encrypter` capabilities
//! from `yamlcrypt-crypto` and never touches key material. Traversals consume
//! a tree and return a new one; the first failure aborts with no partial
//! result.
//!
//! # Example
//! ```no_run
//! use yamlcrypt_crypto::Identities;
//! use yamlcrypt_yaml::Resolver;
//!
//! #[derive(serde::Deserialize)]
//! struct Database {
//!     database_login: String,
//!     database_password: String,
//! }
//!
//! # fn main() -> yamlcrypt_common::Result<()> {
//! let identities = Identities::from_file("key.txt")?;
//! let yaml = std::fs::read_to_string("database.yaml")?;
//! let db: Database = Resolver::new(&identities).decode(&yaml)?;
//! # Ok(())
//! # }
//! ```

pub mod armored;
mod events;
pub mod node;
pub mod resolve;
pub mod transform;

pub use armored::ArmoredString;
pub use node::{Node, Scalar, ScalarStyle};
pub use resolve::Resolver;
pub use transform::Transformer;

use serde::de::DeserializeOwned;

use yamlcrypt_common::Result;
use yamlcrypt_crypto::{Decrypter, Encrypter};

/// Tag that marks values to encrypt and decrypt.
pub const SENTINEL_TAG: &str = "!crypto/age";

/// Resolve every `!crypto/age` value of `node` with `identities`.
pub fn resolve(node: Node, identities: &dyn Decrypter) -> Result<Node> {
    Resolver::new(identities).resolve(node)
}

/// Encrypt every `!crypto/age` value of `node` to `recipients`.
pub fn encrypt(node: Node, recipients: impl Encrypter + 'static) -> Result<Node> {
    Transformer::new(recipients).encrypt(node)
}

/// Parse `yaml`, resolve it with `identities` and decode it into `T`.
pub fn from_str<T: DeserializeOwned>(yaml: &str, identities: &dyn Decrypter) -> Result<T> {
    Resolver::new(identities).decode(yaml)
}
