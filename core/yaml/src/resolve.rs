//! Decrypt-on-read traversal.

use std::fmt;

use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use crate::node::{key_label, normalize_tag, Node, Scalar};
use crate::SENTINEL_TAG;
use yamlcrypt_common::{Error, NodePath, Result};
use yamlcrypt_crypto::{dearmor, is_armored, Decrypter};

/// Resolves armored sentinel values in a document tree.
///
/// Scalars tagged with the sentinel tag whose text is framed as age armor are
/// decrypted with the identities and replaced by a plaintext scalar carrying
/// the same tag. Everything else, including tagged scalars that are not
/// armored, is returned unchanged, so resolving twice is a no-op.
///
/// The first failure aborts the whole traversal; no partial tree is returned.
pub struct Resolver<'a> {
    identities: &'a dyn Decrypter,
    tag: String,
}

impl<'a> Resolver<'a> {
    /// Create a resolver for the `!crypto/age` tag.
    pub fn new(identities: &'a dyn Decrypter) -> Self {
        Self {
            identities,
            tag: SENTINEL_TAG.to_string(),
        }
    }

    /// Resolve a different sentinel tag.
    ///
    /// # Errors
    /// - `InvalidInput` if `tag` is blank
    pub fn with_tag(mut self, tag: &str) -> Result<Self> {
        self.tag = normalize_tag(tag)
            .ok_or_else(|| Error::InvalidInput("Sentinel tag cannot be empty".to_string()))?;
        Ok(self)
    }

    /// Sentinel tag this resolver acts on.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Resolve every sentinel value in `node`.
    ///
    /// # Errors
    /// - `MalformedArmor` if an armored value has a corrupt body
    /// - `Decryption` if no identity opens a value, or its plaintext is not UTF-8
    pub fn resolve(&self, node: Node) -> Result<Node> {
        let mut resolved = 0;
        let node = self.walk(node, &NodePath::root(), &mut resolved)?;
        debug!("Resolved {} {} values", resolved, self.tag);
        Ok(node)
    }

    /// Parse `yaml`, resolve it and decode the result into `T`.
    pub fn decode<T: DeserializeOwned>(&self, yaml: &str) -> Result<T> {
        self.decode_node(Node::parse(yaml)?)
    }

    /// Resolve `node` and decode the result into `T`.
    pub fn decode_node<T: DeserializeOwned>(&self, node: Node) -> Result<T> {
        self.resolve(node)?.decode()
    }

    /// Resolve and decode every document of a multi-document stream.
    pub fn decode_all<T: DeserializeOwned>(&self, yaml: &str) -> Result<Vec<T>> {
        Node::parse_all(yaml)?
            .into_iter()
            .map(|node| self.decode_node(node))
            .collect()
    }

    fn walk(&self, node: Node, path: &NodePath, resolved: &mut usize) -> Result<Node> {
        match node {
            Node::Sequence { anchor, tag, items } => {
                let items = items
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| self.walk(item, &path.index(i), resolved))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Node::Sequence { anchor, tag, items })
            }
            // Keys are never resolved.
            Node::Mapping {
                anchor,
                tag,
                entries,
            } => {
                let entries = entries
                    .into_iter()
                    .map(|(key, value)| {
                        let value = self.walk(value, &path.key(key_label(&key)), resolved)?;
                        Ok((key, value))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Node::Mapping {
                    anchor,
                    tag,
                    entries,
                })
            }
            Node::Scalar { anchor, tag, value } => {
                if tag.as_deref() != Some(self.tag.as_str()) || !is_armored(value.text()) {
                    return Ok(Node::Scalar { anchor, tag, value });
                }

                trace!("Decrypting {} value at {}", self.tag, path);
                let plaintext = self.decrypt(value.text(), path)?;
                *resolved += 1;

                Ok(Node::Scalar {
                    anchor,
                    tag,
                    value: Scalar::fitted(plaintext),
                })
            }
            // Aliases point at a node resolved where it is defined.
            alias @ Node::Alias { .. } => Ok(alias),
        }
    }

    fn decrypt(&self, armored: &str, path: &NodePath) -> Result<String> {
        let payload = dearmor(armored).map_err(|e| Error::MalformedArmor {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        let plaintext = self
            .identities
            .decrypt(&payload)
            .map_err(|e| Error::Decryption {
                path: path.clone(),
                source: Box::new(e),
            })?;

        String::from_utf8(plaintext).map_err(|e| Error::Decryption {
            path: path.clone(),
            source: Box::new(Error::Crypto(format!("Plaintext is not UTF-8: {}", e))),
        })
    }
}

impl fmt::Debug for Resolver<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver").field("tag", &self.tag).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ArmoredString;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use yamlcrypt_crypto::{armor, Identities, Recipients, ARMOR_BEGIN, ARMOR_END};

    fn keys() -> (Identities, Recipients) {
        let identity = age::x25519::Identity::generate();
        let recipients = Recipients::new().with_recipient(identity.to_public());
        (Identities::new().with_identity(identity), recipients)
    }

    fn sealed(value: &str, recipients: &Recipients) -> Node {
        ArmoredString::new(value, recipients.clone()).encode().unwrap()
    }

    /// Decrypter that counts calls and never succeeds.
    struct Refusing {
        calls: AtomicUsize,
    }

    impl Decrypter for Refusing {
        fn decrypt(&self, _ciphertext: &[u8]) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::Crypto("no identity matched".to_string()))
        }
    }

    #[test]
    fn test_resolve_armored_scalar() {
        let (identities, recipients) = keys();
        let node = sealed("this is a test", &recipients);

        let resolved = Resolver::new(&identities).resolve(node).unwrap();
        assert!(resolved.has_tag(SENTINEL_TAG));
        assert_eq!(resolved.text(), Some("this is a test"));
    }

    #[test]
    fn test_plaintext_sentinel_passes_through() {
        let (identities, _) = keys();
        let resolver = Resolver::new(&identities);
        let node = Node::tagged_string(SENTINEL_TAG, "already plain");

        let once = resolver.resolve(node.clone()).unwrap();
        let twice = resolver.resolve(once.clone()).unwrap();
        assert_eq!(once, node);
        assert_eq!(twice, node);
    }

    #[test]
    fn test_half_framed_sentinel_passes_through() {
        let (identities, _) = keys();
        let node = Node::tagged_string(SENTINEL_TAG, format!("{}\nYWdl", ARMOR_BEGIN));

        let resolved = Resolver::new(&identities).resolve(node.clone()).unwrap();
        assert_eq!(resolved, node);
    }

    #[test]
    fn test_non_sentinel_armored_untouched() {
        let (identities, recipients) = keys();
        let armored = sealed("secret", &recipients).text().unwrap().to_string();
        let doc = Node::mapping(vec![
            (Node::string("other"), Node::tagged_string("!other", armored.clone())),
            (Node::string("bare"), Node::string(armored)),
        ]);

        let resolved = Resolver::new(&identities).resolve(doc.clone()).unwrap();
        assert_eq!(resolved, doc);
    }

    #[test]
    fn test_corrupted_body_is_malformed_armor() {
        let (identities, _) = keys();
        let text = format!("{}\n!!!!corrupted!!!!\n{}\n", ARMOR_BEGIN, ARMOR_END);
        let doc = Node::mapping(vec![(
            Node::string("secret"),
            Node::tagged_string(SENTINEL_TAG, text),
        )]);

        let err = Resolver::new(&identities).resolve(doc).unwrap_err();
        match err {
            Error::MalformedArmor { path, .. } => assert_eq!(path.to_string(), ".secret"),
            other => panic!("expected MalformedArmor, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_armor_garbage_payload_is_decryption_error() {
        let (identities, _) = keys();
        let text = armor(b"this is not an age payload").unwrap();
        let node = Node::tagged_string(SENTINEL_TAG, text);

        let err = Resolver::new(&identities).resolve(node).unwrap_err();
        assert!(matches!(err, Error::Decryption { .. }));
    }

    #[test]
    fn test_wrong_identity_aborts_at_first_value() {
        let (_, recipients) = keys();
        let doc = Node::sequence(vec![
            Node::string("plain"),
            sealed("one", &recipients),
            sealed("two", &recipients),
            sealed("three", &recipients),
        ]);

        let refusing = Refusing {
            calls: AtomicUsize::new(0),
        };
        let err = Resolver::new(&refusing).resolve(doc).unwrap_err();

        assert_eq!(refusing.calls.load(Ordering::SeqCst), 1);
        match err {
            Error::Decryption { path, .. } => assert_eq!(path.to_string(), "[1]"),
            other => panic!("expected Decryption, got {:?}", other),
        }
    }

    #[test]
    fn test_keys_are_not_resolved() {
        let (identities, recipients) = keys();
        let key = sealed("key", &recipients);
        let doc = Node::mapping(vec![(key.clone(), sealed("value", &recipients))]);

        let resolved = Resolver::new(&identities).resolve(doc).unwrap();
        match resolved {
            Node::Mapping { entries, .. } => {
                assert_eq!(entries[0].0, key);
                assert_eq!(entries[0].1.text(), Some("value"));
            }
            other => panic!("expected mapping, got {:?}", other),
        }
    }

    #[test]
    fn test_tagged_container_is_recursed_not_transformed() {
        let (identities, recipients) = keys();
        let doc = Node::sequence(vec![sealed("inner", &recipients)]).with_tag(SENTINEL_TAG);

        let resolved = Resolver::new(&identities).resolve(doc).unwrap();
        assert!(resolved.has_tag(SENTINEL_TAG));
        assert_eq!(resolved.at(0).unwrap().text(), Some("inner"));
    }

    #[test]
    fn test_custom_tag() {
        let (identities, recipients) = keys();
        let armored = sealed("value", &recipients).with_tag("!vault");

        let default = Resolver::new(&identities).resolve(armored.clone()).unwrap();
        assert_eq!(default, armored);

        let resolver = Resolver::new(&identities).with_tag("vault").unwrap();
        assert_eq!(resolver.tag(), "!vault");
        let resolved = resolver.resolve(armored).unwrap();
        assert_eq!(resolved.text(), Some("value"));
        assert!(resolved.has_tag("!vault"));

        assert!(Resolver::new(&identities).with_tag("  ").is_err());
    }

    #[test]
    fn test_decode_typed() {
        #[derive(Deserialize)]
        struct Database {
            login: String,
            password: String,
            #[serde(default)]
            port: Option<u16>,
        }

        let (identities, recipients) = keys();
        let doc = Node::mapping(vec![
            (Node::string("login"), Node::string("service_1")),
            (Node::string("password"), sealed("MyDatabasePassword", &recipients)),
        ]);
        let yaml = doc.to_yaml().unwrap();

        let db: Database = Resolver::new(&identities).decode(&yaml).unwrap();
        assert_eq!(db.login, "service_1");
        assert_eq!(db.password, "MyDatabasePassword");
        assert!(db.port.is_none());
    }

    #[test]
    fn test_decode_type_mismatch_is_structural() {
        #[derive(Debug, Deserialize)]
        struct Port {
            #[allow(dead_code)]
            port: u16,
        }

        let (identities, _) = keys();
        let result: Result<Port> = Resolver::new(&identities).decode("port: not-a-number\n");
        assert!(matches!(result, Err(Error::Structural(_))));
    }

    #[test]
    fn test_decode_all_resolves_each_document() {
        #[derive(Deserialize)]
        struct Doc {
            data: ArmoredString,
        }

        let (identities, recipients) = keys();
        let first = Node::mapping(vec![(Node::string("data"), sealed("first", &recipients))]);
        let second = Node::mapping(vec![(Node::string("data"), sealed("1.50", &recipients))]);
        let yaml = format!("{}---\n{}", first.to_yaml().unwrap(), second.to_yaml().unwrap());

        let docs: Vec<Doc> = Resolver::new(&identities).decode_all(&yaml).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].data.as_str(), "first");
        assert_eq!(docs[1].data.as_str(), "1.50");
    }

    #[test]
    fn test_multiline_plaintext_resolves_to_block() {
        let (identities, recipients) = keys();
        let doc = Node::mapping(vec![(
            Node::string("cert"),
            sealed("line one\nline two\n", &recipients),
        )]);

        let resolved = Resolver::new(&identities).resolve(doc).unwrap();
        assert_eq!(
            resolved.to_yaml().unwrap(),
            "cert: !crypto/age |\n  line one\n  line two\n"
        );
    }

    #[test]
    fn test_aliases_pass_through() {
        let (identities, recipients) = keys();
        let armored = sealed("shared", &recipients);
        let anchored = match armored {
            Node::Scalar { tag, value, .. } => Node::Scalar {
                anchor: Some("pw".to_string()),
                tag,
                value,
            },
            other => panic!("expected scalar, got {:?}", other),
        };
        let doc = Node::mapping(vec![
            (Node::string("first"), anchored),
            (
                Node::string("second"),
                Node::Alias {
                    anchor: "pw".to_string(),
                },
            ),
        ]);

        let resolved = Resolver::new(&identities).resolve(doc).unwrap();
        assert_eq!(resolved.get("first").unwrap().anchor(), Some("pw"));
        assert_eq!(resolved.get("first").unwrap().text(), Some("shared"));
        assert_eq!(
            resolved.to_yaml().unwrap(),
            "first: &pw !crypto/age shared\nsecond: *pw\n"
        );

        #[derive(Deserialize)]
        struct Doc {
            first: String,
            second: String,
        }
        let doc: Doc = resolved.decode().unwrap();
        assert_eq!(doc.second, doc.first);
    }
}
