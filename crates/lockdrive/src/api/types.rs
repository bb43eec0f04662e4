//! Wire types for the drive protocol.
//!
//! These are the payloads exchanged with the remote service. All
//! cryptographic fields are armored strings; the core never sends or
//! receives plaintext names, keys or content.

use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

id_type!(VolumeId);
id_type!(ShareId);
id_type!(LinkId);
id_type!(RevisionId);
id_type!(AddressId);
id_type!(
    /// Cursor naming the next event to deliver from a share's stream.
    EventId
);

//
// IDENTITY
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteKey {
    pub id: String,
    /// Armored private key, locked under the salted key pass.
    pub private_key: String,
    pub primary: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteUser {
    pub id: String,
    pub keys: Vec<RemoteKey>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteAddress {
    pub id: AddressId,
    pub email: String,
    pub keys: Vec<RemoteKey>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeySalt {
    /// Id of the user key this salt belongs to.
    pub key_id: String,
    /// Armored salt bytes.
    pub salt: String,
}

//
// VOLUMES AND SHARES
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeState {
    Active,
    Locked,
    Deleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteVolume {
    pub id: VolumeId,
    pub share_id: ShareId,
    pub state: VolumeState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteShare {
    pub id: ShareId,
    /// Root link of the share's subtree.
    pub link_id: LinkId,
    /// Owner address; its keyring opens the share passphrase.
    pub address_id: AddressId,
    /// Armored share key, locked under the share passphrase.
    pub key: String,
    /// Share passphrase, encrypted to the owner address keyring.
    pub passphrase: String,
    /// Armored detached signature over the raw passphrase.
    pub passphrase_signature: String,
}

//
// LINKS
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    File,
    Folder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Active,
    Trashed,
    Deleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteFileProperties {
    /// Session key, encrypted to the node keyring.
    pub content_key_packet: String,
    /// Armored signature over the raw session key bytes.
    pub content_key_signature: String,
    pub active_revision_id: RevisionId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteFolderProperties {
    /// Hash key, signed-encrypted under the node keyring.
    pub node_hash_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteLink {
    pub id: LinkId,
    /// Absent for the share root.
    pub parent_id: Option<LinkId>,
    pub kind: LinkKind,
    pub state: LinkState,
    /// Name, signed-encrypted under the parent keyring.
    pub name: String,
    /// Hashed name under the parent's hash key, for server-side lookup.
    pub name_hash: String,
    pub mime_type: String,
    pub size: u64,
    pub create_time: i64,
    pub modify_time: i64,
    /// Email of the address that signed the node key material.
    pub signature_email: String,
    /// Email of the address that signed the name.
    pub name_signature_email: String,
    /// Armored node key, locked under the node passphrase.
    pub node_key: String,
    /// Node passphrase, encrypted to the parent keyring.
    pub node_passphrase: String,
    /// Armored detached signature over the raw node passphrase.
    pub node_passphrase_signature: String,
    /// Extended attributes, signed-encrypted under the node keyring.
    pub x_attrs: Option<String>,
    pub file: Option<RemoteFileProperties>,
    pub folder: Option<RemoteFolderProperties>,
}

//
// EVENTS
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkEventType {
    Create,
    Update,
    UpdateMetadata,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkEvent {
    pub event_type: LinkEventType,
    pub link: RemoteLink,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareEvents {
    pub events: Vec<LinkEvent>,
    /// Cursor for the next fetch.
    pub next_id: EventId,
    /// Set when the client has fallen too far behind and must reset its
    /// cursor from the latest event id.
    pub refresh: bool,
}

//
// REVISIONS AND BLOCKS
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteBlock {
    /// 1-based position within the revision.
    pub index: u32,
    /// Storage URL for the encrypted bytes.
    pub url: String,
    /// Bearer token for the storage URL.
    pub token: String,
    /// Base64 SHA-256 of the ciphertext.
    pub hash: String,
    /// Detached-encrypted signature over the plaintext.
    pub enc_signature: String,
    /// Email of the address that signed the block.
    pub signature_email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteRevision {
    pub id: RevisionId,
    pub blocks: Vec<RemoteBlock>,
}

//
// REQUESTS
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFileRequest {
    pub parent_id: LinkId,
    pub name: String,
    pub name_hash: String,
    pub mime_type: String,
    pub node_key: String,
    pub node_passphrase: String,
    pub node_passphrase_signature: String,
    pub content_key_packet: String,
    pub content_key_signature: String,
    /// Email of the signing address.
    pub signature_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFileResponse {
    pub id: LinkId,
    pub revision_id: RevisionId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFolderRequest {
    pub parent_id: LinkId,
    pub name: String,
    pub name_hash: String,
    pub node_key: String,
    pub node_passphrase: String,
    pub node_passphrase_signature: String,
    pub node_hash_key: String,
    pub signature_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFolderResponse {
    pub id: LinkId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRevisionResponse {
    pub id: RevisionId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRevisionRequest {
    /// Armored detached signature over the concatenated raw SHA-256
    /// digests of every uploaded block.
    pub manifest_signature: String,
    pub signature_address: String,
    /// Extended attributes, signed-encrypted under the node keyring.
    pub x_attrs: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveLinkRequest {
    pub parent_id: LinkId,
    pub name: String,
    pub name_hash: String,
    /// Hashed name under the previous parent, for server-side removal.
    pub original_name_hash: String,
    pub node_passphrase: String,
    pub node_passphrase_signature: String,
    pub signature_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockUploadInfo {
    /// 1-based, monotonically increasing within the revision.
    pub index: u32,
    /// Ciphertext size in bytes.
    pub size: u64,
    /// Base64 SHA-256 of the ciphertext.
    pub hash: String,
    /// Detached-encrypted signature over the plaintext.
    pub enc_signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockUploadRequest {
    pub address_id: AddressId,
    pub share_id: ShareId,
    pub link_id: LinkId,
    pub revision_id: RevisionId,
    pub blocks: Vec<BlockUploadInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockUploadLink {
    pub url: String,
    pub token: String,
}

//
// AUTH
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PasswordMode {
    /// Login password doubles as the mailbox password.
    Single,
    /// A separate mailbox password unlocks the keyrings.
    Two,
}

/// Session tokens returned by a successful login or refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Auth {
    pub uid: String,
    pub access_token: String,
    pub refresh_token: String,
    pub two_factor: bool,
    pub password_mode: PasswordMode,
}
