//! Encrypt-on-write traversal.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::armored::ArmoredString;
use crate::node::{key_label, normalize_tag, Node};
use crate::SENTINEL_TAG;
use yamlcrypt_common::{Error, NodePath, Result};
use yamlcrypt_crypto::Encrypter;

/// Encrypts sentinel values of an existing document tree.
///
/// Every scalar carrying the sentinel tag is sealed as an [`ArmoredString`]
/// to the recipients and replaced by the encoded node. This is the mirror of
/// [`Resolver`](crate::Resolver): resolving, then transforming with a new
/// recipient set re-encrypts a document without going through typed values.
///
/// The scalar text is encrypted as is. Running a transformer over a tree that
/// still holds armored values encrypts the armor a second time.
#[derive(Clone)]
pub struct Transformer {
    recipients: Arc<dyn Encrypter>,
    tag: String,
}

impl Transformer {
    /// Create a transformer for the `!crypto/age` tag.
    pub fn new(recipients: impl Encrypter + 'static) -> Self {
        Self::from_shared(Arc::new(recipients))
    }

    /// Create a transformer from a shared recipient set.
    pub fn from_shared(recipients: Arc<dyn Encrypter>) -> Self {
        Self {
            recipients,
            tag: SENTINEL_TAG.to_string(),
        }
    }

    /// Encrypt a different sentinel tag.
    ///
    /// # Errors
    /// - `InvalidInput` if `tag` is blank
    pub fn with_tag(mut self, tag: &str) -> Result<Self> {
        self.tag = normalize_tag(tag)
            .ok_or_else(|| Error::InvalidInput("Sentinel tag cannot be empty".to_string()))?;
        Ok(self)
    }

    /// Sentinel tag this transformer acts on.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Encrypt every sentinel value in `node`.
    ///
    /// With an empty recipient set the tree comes back unchanged.
    ///
    /// # Errors
    /// - `Encryption` on the first value the recipients reject
    pub fn encrypt(&self, node: Node) -> Result<Node> {
        let mut sealed = 0;
        let node = self.walk(node, &NodePath::root(), &mut sealed)?;
        debug!(
            "Encrypted {} {} values to {} recipients",
            sealed,
            self.tag,
            self.recipients.recipient_count()
        );
        Ok(node)
    }

    fn walk(&self, node: Node, path: &NodePath, sealed: &mut usize) -> Result<Node> {
        match node {
            Node::Sequence { anchor, tag, items } => {
                let items = items
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| self.walk(item, &path.index(i), sealed))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Node::Sequence { anchor, tag, items })
            }
            Node::Mapping {
                anchor,
                tag,
                entries,
            } => {
                let entries = entries
                    .into_iter()
                    .map(|(key, value)| {
                        let value = self.walk(value, &path.key(key_label(&key)), sealed)?;
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
                // No recipients: the scalar is kept with its text and style.
                if tag.as_deref() != Some(self.tag.as_str()) || self.recipients.is_empty() {
                    return Ok(Node::Scalar { anchor, tag, value });
                }

                trace!("Encrypting {} value at {}", self.tag, path);
                let armored =
                    ArmoredString::with_shared_recipients(value.text, Arc::clone(&self.recipients));
                let value = armored.seal(path)?;
                *sealed += 1;
                Ok(Node::Scalar { anchor, tag, value })
            }
            alias @ Node::Alias { .. } => Ok(alias),
        }
    }
}

impl fmt::Debug for Transformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transformer")
            .field("tag", &self.tag)
            .field("recipients", &self.recipients.recipient_count())
            .finish()
    }
}
