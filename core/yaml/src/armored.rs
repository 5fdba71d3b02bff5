//! Plaintext value that encrypts itself when serialized.

use std::fmt;
use std::sync::Arc;

use serde::de::{Deserialize, Deserializer};
use serde::ser::{Error as _, Serialize, Serializer};
use serde_yaml::value::{Tag, TaggedValue};
use serde_yaml::Value;
use zeroize::Zeroize;

use crate::node::{Node, Scalar, ScalarStyle};
use crate::SENTINEL_TAG;
use yamlcrypt_common::{Error, NodePath, Result};
use yamlcrypt_crypto::{armor, Encrypter, Recipients};

/// A string field that is stored encrypted in the document.
///
/// Serializing an `ArmoredString` encrypts `value` to `recipients` and emits a
/// `!crypto/age` scalar holding the armored ciphertext. With no recipients the
/// value is written in cleartext, still tagged, so a later pass can encrypt it.
///
/// Deserializing takes the scalar text as is. Pair it with
/// [`Resolver`](crate::Resolver) so armored values are decrypted first.
///
/// ```yaml
/// database_login: mylogin
/// database_password: !crypto/age |
///   -----BEGIN AGE ENCRYPTED FILE-----
///   ...
///   -----END AGE ENCRYPTED FILE-----
/// ```
#[derive(Clone)]
pub struct ArmoredString {
    /// Plaintext value.
    pub value: String,
    /// Recipients the value is encrypted to on encode.
    pub recipients: Arc<dyn Encrypter>,
}

impl ArmoredString {
    /// Create a value that will be encrypted to `recipients`.
    pub fn new(value: impl Into<String>, recipients: impl Encrypter + 'static) -> Self {
        Self::with_shared_recipients(value, Arc::new(recipients))
    }

    /// Create a value sharing an existing recipient set.
    pub fn with_shared_recipients(value: impl Into<String>, recipients: Arc<dyn Encrypter>) -> Self {
        Self {
            value: value.into(),
            recipients,
        }
    }

    /// Create a value that is written in cleartext.
    pub fn plaintext(value: impl Into<String>) -> Self {
        Self::new(value, Recipients::new())
    }

    /// Get the plaintext value.
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Take the plaintext from a scalar node.
    ///
    /// No decryption happens here; the raw scalar text, armored or not, is
    /// kept verbatim.
    ///
    /// # Errors
    /// - `Structural` if `node` is a sequence, mapping or alias
    pub fn decode(&mut self, node: &Node) -> Result<()> {
        match node.text() {
            Some(text) => {
                self.value.zeroize();
                self.value = text.to_string();
                Ok(())
            }
            None => Err(Error::Structural(
                "expected a scalar for an armored string".to_string(),
            )),
        }
    }

    /// Encode into a `!crypto/age` scalar node.
    ///
    /// # Errors
    /// - `Encryption` if the recipient set rejects the payload
    pub fn encode(&self) -> Result<Node> {
        Ok(Node::Scalar {
            anchor: None,
            tag: Some(SENTINEL_TAG.to_string()),
            value: self.seal(&NodePath::root())?,
        })
    }

    /// Scalar content for this value: the armored ciphertext, or the
    /// plaintext when there are no recipients.
    pub(crate) fn seal(&self, path: &NodePath) -> Result<Scalar> {
        if self.recipients.is_empty() {
            return Ok(Scalar::fitted(self.value.clone()));
        }
        let text = self
            .recipients
            .encrypt(self.value.as_bytes())
            .and_then(|payload| armor(&payload))
            .map_err(|e| Error::Encryption {
                path: path.clone(),
                source: Box::new(e),
            })?;
        Ok(Scalar::with_style(text, ScalarStyle::Literal))
    }
}

impl Default for ArmoredString {
    fn default() -> Self {
        Self::plaintext(String::new())
    }
}

impl Drop for ArmoredString {
    fn drop(&mut self) {
        self.value.zeroize();
    }
}

impl fmt::Display for ArmoredString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl fmt::Debug for ArmoredString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ArmoredString([REDACTED; {} bytes], {} recipients)",
            self.value.len(),
            self.recipients.recipient_count()
        )
    }
}

impl PartialEq for ArmoredString {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl From<&str> for ArmoredString {
    fn from(value: &str) -> Self {
        Self::plaintext(value)
    }
}

impl From<String> for ArmoredString {
    fn from(value: String) -> Self {
        Self::plaintext(value)
    }
}

impl Serialize for ArmoredString {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let sealed = self.seal(&NodePath::root()).map_err(S::Error::custom)?;
        TaggedValue {
            tag: Tag::new(SENTINEL_TAG),
            value: Value::String(sealed.text),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ArmoredString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        // Strings are read as the raw scalar text, whatever it would resolve to.
        let text = String::deserialize(deserializer)?;
        Ok(ArmoredString::plaintext(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use yamlcrypt_crypto::{is_armored, Identities, ARMOR_BEGIN};

    fn keys() -> (Identities, Recipients) {
        let identity = age::x25519::Identity::generate();
        let recipients = Recipients::new().with_recipient(identity.to_public());
        (Identities::new().with_identity(identity), recipients)
    }

    #[test]
    fn test_encode_without_recipients_is_plaintext() {
        let node = ArmoredString::plaintext("this is a test").encode().unwrap();

        assert!(node.has_tag(SENTINEL_TAG));
        assert_eq!(node.text(), Some("this is a test"));
    }

    #[test]
    fn test_encode_with_recipients_is_armored() {
        let (_, recipients) = keys();
        let node = ArmoredString::new("this is a test", recipients).encode().unwrap();

        assert!(node.has_tag(SENTINEL_TAG));
        let text = node.text().unwrap();
        assert!(is_armored(text));
        assert!(!text.contains("this is a test"));
    }

    #[test]
    fn test_encode_failure_is_encryption_error() {
        let key = age::x25519::Identity::generate().to_public();
        let recipients = Recipients::new()
            .with_recipient(key)
            .with_passphrase("mixing is not allowed");

        let result = ArmoredString::new("value", recipients).encode();
        assert!(matches!(result, Err(Error::Encryption { .. })));
    }

    #[test]
    fn test_decode_takes_text_verbatim() {
        let mut armored = ArmoredString::default();
        armored
            .decode(&Node::tagged_string(SENTINEL_TAG, ARMOR_BEGIN))
            .unwrap();
        assert_eq!(armored.as_str(), ARMOR_BEGIN);

        armored.decode(&Node::string("untagged")).unwrap();
        assert_eq!(armored.to_string(), "untagged");
    }

    #[test]
    fn test_decode_rejects_collections() {
        let mut armored = ArmoredString::default();
        let node = Node::parse("- a\n- b\n").unwrap();
        assert!(matches!(armored.decode(&node), Err(Error::Structural(_))));
    }

    #[test]
    fn test_serialize_emits_tag() {
        #[derive(Serialize)]
        struct Doc {
            data: ArmoredString,
        }

        let yaml = serde_yaml::to_string(&Doc {
            data: "this is a test".into(),
        })
        .unwrap();
        assert!(yaml.contains("!crypto/age"));
        assert!(yaml.contains("this is a test"));

        let node = Node::parse(&yaml).unwrap();
        let data = node.get("data").unwrap();
        assert!(data.has_tag(SENTINEL_TAG));
        assert_eq!(data.text(), Some("this is a test"));
    }

    #[test]
    fn test_serialize_encrypts_fields() {
        #[derive(Serialize)]
        struct Doc {
            login: String,
            password: ArmoredString,
        }

        let (_, recipients) = keys();
        let yaml = serde_yaml::to_string(&Doc {
            login: "service_1".to_string(),
            password: ArmoredString::new("MyDatabasePassword", recipients),
        })
        .unwrap();

        assert!(yaml.contains("login: service_1"));
        assert!(yaml.contains("!crypto/age"));
        assert!(yaml.contains(ARMOR_BEGIN));
        assert!(!yaml.contains("MyDatabasePassword"));
    }

    #[test]
    fn test_deserialize_tagged_and_plain() {
        #[derive(Deserialize)]
        struct Doc {
            tagged: ArmoredString,
            plain: ArmoredString,
        }

        let doc: Doc = serde_yaml::from_str("tagged: !crypto/age one\nplain: two\n").unwrap();
        assert_eq!(doc.tagged.as_str(), "one");
        assert_eq!(doc.plain.as_str(), "two");
    }

    #[test]
    fn test_deserialize_keeps_raw_text() {
        #[derive(Deserialize)]
        struct Doc {
            values: Vec<ArmoredString>,
        }

        let yaml = "values:\n\
                    - !crypto/age 1.50\n\
                    - !crypto/age 0x1F\n\
                    - !crypto/age 1e3\n\
                    - !crypto/age +12\n\
                    - !crypto/age True\n\
                    - !crypto/age ~\n\
                    - !crypto/age 12345678901234567890123\n\
                    - 007\n";
        let doc: Doc = serde_yaml::from_str(yaml).unwrap();
        let texts: Vec<&str> = doc.values.iter().map(ArmoredString::as_str).collect();
        assert_eq!(
            texts,
            ["1.50", "0x1F", "1e3", "+12", "True", "~", "12345678901234567890123", "007"]
        );
    }

    #[test]
    fn test_serialize_plaintext_keeps_text() {
        #[derive(Serialize)]
        struct Doc {
            pin: ArmoredString,
        }

        let yaml = serde_yaml::to_string(&Doc { pin: "1.50".into() }).unwrap();
        let node = Node::parse(&yaml).unwrap();
        let pin = node.get("pin").unwrap();
        assert!(pin.has_tag(SENTINEL_TAG));
        assert_eq!(pin.text(), Some("1.50"));
    }

    #[test]
    fn test_debug_redacts_value() {
        let armored = ArmoredString::plaintext("hunter2");
        let debug = format!("{:?}", armored);
        assert!(!debug.contains("hunter2"));
        assert_eq!(debug, "ArmoredString([REDACTED; 7 bytes], 0 recipients)");
    }
}
