//! Tree nodes
//!
//! A [`Link`] is one node of the keyed link tree: its keyring derives
//! from its parent's, files carry a session key and an active revision,
//! folders carry a hash key for child-name hashing. Links handed out by
//! the store are owned snapshots; after a mutation callers re-resolve by
//! id.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::OffsetDateTime;

use crate::api::{LinkId, LinkKind, RevisionId};
use crate::crypto::{CryptoError, Keyring, SessionKey};

/// Extended-attributes timestamp layout (ISO-8601 with numeric timezone).
pub const XATTR_TIME_FORMAT: &[FormatItem<'static>] = format_description!(
    "[year]-[month]-[day]T[hour]:[minute]:[second][offset_hour sign:mandatory][offset_minute]"
);

/// Digest map key for the streaming content hash.
pub const SHA1_DIGEST: &str = "SHA1";

/// Decrypted per-revision extended attributes attached to a file link.
#[derive(Debug, Clone)]
pub struct Attributes {
    pub size: u64,
    /// Lowercase hex SHA-1 of the full plaintext.
    pub hash: String,
    pub mime_type: String,
    /// Plaintext size of every block, in order.
    pub block_sizes: Vec<u64>,
    pub modify_time: OffsetDateTime,
}

/// Wire form of the encrypted extended-attributes document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XAttrs {
    #[serde(rename = "Common")]
    pub common: XAttrsCommon,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XAttrsCommon {
    #[serde(rename = "ModificationTime")]
    pub modification_time: String,
    #[serde(rename = "Size")]
    pub size: u64,
    #[serde(rename = "BlockSizes")]
    pub block_sizes: Vec<u64>,
    #[serde(rename = "Digests")]
    pub digests: BTreeMap<String, String>,
}

impl XAttrs {
    pub fn to_json(&self) -> Result<Vec<u8>, CryptoError> {
        serde_json::to_vec(self).map_err(|err| anyhow::anyhow!("xattr encode: {}", err).into())
    }

    pub fn from_json(data: &[u8]) -> Result<Self, CryptoError> {
        serde_json::from_slice(data).map_err(|err| anyhow::anyhow!("xattr decode: {}", err).into())
    }

    /// Parse into attributes, resolving the ISO-8601 modification time.
    ///
    /// A missing `SHA1` digest entry leaves the content hash empty.
    pub fn into_attributes(self, mime_type: String) -> Result<Attributes, CryptoError> {
        let modify_time = OffsetDateTime::parse(&self.common.modification_time, XATTR_TIME_FORMAT)
            .map_err(|err| anyhow::anyhow!("invalid modification time: {}", err))?;

        Ok(Attributes {
            size: self.common.size,
            hash: self
                .common
                .digests
                .get(SHA1_DIGEST)
                .cloned()
                .unwrap_or_default(),
            mime_type,
            block_sizes: self.common.block_sizes,
            modify_time,
        })
    }
}

/// A node of the link tree.
#[derive(Debug, Clone)]
pub struct Link {
    pub(crate) id: LinkId,
    pub(crate) parent_id: Option<LinkId>,
    pub(crate) kind: LinkKind,
    pub(crate) name: String,
    /// Canonical absolute path; maintained by the store's index rebuild.
    pub(crate) path: String,
    pub(crate) name_hash: String,
    pub(crate) size: u64,
    pub(crate) create_time: i64,
    pub(crate) modify_time: i64,
    pub(crate) signature_email: String,
    pub(crate) name_signature_email: String,
    pub(crate) node_passphrase: String,
    pub(crate) node_passphrase_signature: String,
    pub(crate) keyring: Keyring,
    /// File only.
    pub(crate) revision_id: Option<RevisionId>,
    pub(crate) session_key: Option<SessionKey>,
    /// Folder only.
    pub(crate) hash_key: Option<Vec<u8>>,
    pub(crate) attrs: Option<Attributes>,
}

impl Link {
    pub fn id(&self) -> &LinkId {
        &self.id
    }

    /// The decrypted name; `/` for the root.
    pub fn name(&self) -> &str {
        if self.is_root() {
            "/"
        } else {
            &self.name
        }
    }

    /// Canonical absolute path within the share.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn parent_id(&self) -> Option<&LinkId> {
        self.parent_id.as_ref()
    }

    pub fn kind(&self) -> LinkKind {
        self.kind
    }

    pub fn is_file(&self) -> bool {
        self.kind == LinkKind::File
    }

    pub fn is_dir(&self) -> bool {
        self.kind == LinkKind::Folder
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Active revision id; `None` for folders.
    pub fn revision_id(&self) -> Option<&RevisionId> {
        self.revision_id.as_ref()
    }

    /// Content size, preferring the attribute-declared size.
    pub fn size(&self) -> u64 {
        match &self.attrs {
            Some(attrs) => attrs.size,
            None => self.size,
        }
    }

    /// Hashed name under the parent's hash key.
    pub fn name_hash(&self) -> &str {
        &self.name_hash
    }

    /// Hex SHA-1 of the content; empty when no attributes are present.
    pub fn content_hash(&self) -> &str {
        match &self.attrs {
            Some(attrs) => &attrs.hash,
            None => "",
        }
    }

    /// MIME type from the extended attributes; empty when no revision
    /// has committed attributes yet.
    pub fn mime_type(&self) -> &str {
        if self.is_dir() {
            return "inode/directory";
        }
        match &self.attrs {
            Some(attrs) => &attrs.mime_type,
            None => "",
        }
    }

    /// Per-block plaintext sizes from the extended attributes.
    pub fn block_sizes(&self) -> &[u64] {
        match &self.attrs {
            Some(attrs) => &attrs.block_sizes,
            None => &[],
        }
    }

    pub fn creation_time(&self) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(self.create_time)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }

    pub fn modification_time(&self) -> OffsetDateTime {
        match &self.attrs {
            Some(attrs) => attrs.modify_time,
            None => OffsetDateTime::from_unix_timestamp(self.modify_time)
                .unwrap_or(OffsetDateTime::UNIX_EPOCH),
        }
    }

    pub fn attributes(&self) -> Option<&Attributes> {
        self.attrs.as_ref()
    }

    /// The node keyring, derived under the parent's keyring.
    pub fn keyring(&self) -> &Keyring {
        &self.keyring
    }

    /// The decrypted session key; `None` for folders.
    pub fn session_key(&self) -> Option<&SessionKey> {
        self.session_key.as_ref()
    }

    /// The decrypted hash key; `None` for files.
    pub fn hash_key(&self) -> Option<&[u8]> {
        self.hash_key.as_deref()
    }

    /// The stored passphrase ciphertext, as the server holds it.
    pub fn node_passphrase(&self) -> &str {
        &self.node_passphrase
    }

    pub fn node_passphrase_signature(&self) -> &str {
        &self.node_passphrase_signature
    }

    pub fn signature_email(&self) -> &str {
        &self.signature_email
    }

    pub fn name_signature_email(&self) -> &str {
        &self.name_signature_email
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_xattr_time_format_roundtrip() {
        let formatted = "2024-03-01T10:20:30+0000";
        let parsed = OffsetDateTime::parse(formatted, XATTR_TIME_FORMAT).unwrap();
        assert_eq!(parsed.format(XATTR_TIME_FORMAT).unwrap(), formatted);

        // Numeric timezone offsets parse too
        let offset = OffsetDateTime::parse("2024-03-01T10:20:30-0730", XATTR_TIME_FORMAT).unwrap();
        assert_eq!(offset.offset().whole_minutes(), -450);
    }

    #[test]
    fn test_xattrs_json_roundtrip() {
        let mut digests = BTreeMap::new();
        digests.insert(SHA1_DIGEST.to_string(), "abcdef".to_string());

        let xattrs = XAttrs {
            common: XAttrsCommon {
                modification_time: "2024-03-01T10:20:30+0000".to_string(),
                size: 9,
                block_sizes: vec![4, 5],
                digests,
            },
        };

        let json = xattrs.to_json().unwrap();
        let decoded = XAttrs::from_json(&json).unwrap();
        assert_eq!(decoded.common.size, 9);
        assert_eq!(decoded.common.block_sizes, vec![4, 5]);

        let attrs = decoded.into_attributes("text/plain".to_string()).unwrap();
        assert_eq!(attrs.hash, "abcdef");
        assert_eq!(attrs.size, 9);
    }

    #[test]
    fn test_missing_sha1_digest_leaves_hash_empty() {
        let xattrs = XAttrs {
            common: XAttrsCommon {
                modification_time: "2024-03-01T10:20:30+0000".to_string(),
                size: 1,
                block_sizes: vec![1],
                digests: BTreeMap::new(),
            },
        };

        let attrs = xattrs.into_attributes("text/plain".to_string()).unwrap();
        assert_eq!(attrs.hash, "");
    }
}
