//! Common error types for yamlcrypt.

use thiserror::Error;

use crate::types::NodePath;

/// Top-level error type for yamlcrypt operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A sentinel value looked armored but its framing or body is malformed.
    #[error("Malformed armor at {path}: {reason}")]
    MalformedArmor { path: NodePath, reason: String },

    /// An armored sentinel value could not be decrypted.
    #[error("Decryption failed at {path}: {source}")]
    Decryption {
        path: NodePath,
        #[source]
        source: Box<Error>,
    },

    /// A sentinel value could not be encrypted.
    #[error("Encryption failed at {path}: {source}")]
    Encryption {
        path: NodePath,
        #[source]
        source: Box<Error>,
    },

    /// The document could not be parsed, encoded or decoded into a typed value.
    #[error("Structural error: {0}")]
    Structural(String),

    /// Cryptographic operation failed.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Path of the node the error is attributed to, if any.
    pub fn path(&self) -> Option<&NodePath> {
        match self {
            Error::MalformedArmor { path, .. }
            | Error::Decryption { path, .. }
            | Error::Encryption { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decryption_error_keeps_cause() {
        let path = NodePath::root().key("database_password");
        let err = Error::Decryption {
            path,
            source: Box::new(Error::Crypto("no matching keys".to_string())),
        };

        assert_eq!(
            err.to_string(),
            "Decryption failed at .database_password: Cryptographic error: no matching keys"
        );
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "Cryptographic error: no matching keys");
    }

    #[test]
    fn test_error_path() {
        let err = Error::MalformedArmor {
            path: NodePath::root().key("secrets").index(2),
            reason: "invalid base64".to_string(),
        };
        assert_eq!(err.path().unwrap().to_string(), ".secrets[2]");
        assert!(Error::Structural("bad".to_string()).path().is_none());
    }
}
