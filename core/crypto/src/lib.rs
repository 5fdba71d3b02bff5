//! Cryptographic capabilities for yamlcrypt.
//!
//! This module provides:
//! - The `Decrypter` / `Encrypter` capability traits the document engine is written against
//! - age-backed identity and recipient sets implementing them
//! - ASCII armor framing of binary age payloads
//!
//! # Security Guarantees
//! - No plaintext or key material is ever logged
//! - Decrypted buffers are zeroized when a read fails midway
//! - Identity sets redact themselves in `Debug` output

pub mod armor;
pub mod capability;
pub mod keys;
pub mod stream;

pub use armor::{armor, dearmor, is_armored, ARMOR_BEGIN, ARMOR_END};
pub use capability::{Decrypter, Encrypter};
pub use keys::{Identities, Recipients};
