//! Filesystem-like operations
//!
//! The facade over the store, the event loop and the block streams.
//! Every operation starts by draining the event stream and re-resolving
//! its link arguments by id; a link that no longer resolves is stale
//! and the operation fails with `InvalidLink`. Mutations drain again on
//! the way out so the session immediately observes its own writes.

use std::sync::Arc;

use crate::api::{
    CreateFileRequest, CreateFolderRequest, DriveClient, MoveLinkRequest,
};
use crate::crypto;
use crate::error::{DriveError, DriveResult};
use crate::events::Events;
use crate::link::Link;
use crate::links::{clean_path, Links};
use crate::reader::FileReader;
use crate::user::{Address, User};
use crate::writer::FileWriter;

/// MIME type assigned when the filename extension is unknown.
pub const DEFAULT_MIME_TYPE: &str = "text/plain";

#[derive(Clone)]
pub struct FileSystem {
    client: Arc<dyn DriveClient>,
    user: Arc<User>,
    links: Links,
    events: Events,
}

impl FileSystem {
    pub(crate) fn new(
        client: Arc<dyn DriveClient>,
        user: Arc<User>,
        links: Links,
        events: Events,
    ) -> Self {
        Self {
            client,
            user,
            links,
            events,
        }
    }

    /// Open a verified reader over a file's active revision.
    pub async fn download(&self, link: &Link) -> DriveResult<FileReader> {
        self.events.trigger_update().await;

        let link = self
            .links
            .link_from_id(link.id())
            .ok_or(DriveError::InvalidLink)?;
        if !link.is_file() {
            return Err(DriveError::InvalidLinkType);
        }

        let share = self.links.share();
        let revision_id = link
            .revision_id()
            .cloned()
            .ok_or(DriveError::InvalidLinkType)?;

        let revision = self
            .client
            .get_revision(share.id(), link.id(), &revision_id)
            .await?;

        tracing::debug!(link = %link.id(), blocks = revision.blocks.len(), "download started");
        Ok(FileReader::new(
            self.client.clone(),
            self.user.clone(),
            link,
            revision.blocks,
        ))
    }

    /// Open a writer for `parent/name`.
    ///
    /// Creates a new file when the path is free, otherwise opens a new
    /// revision on the existing link.
    pub async fn upload(&self, parent: &Link, name: &str) -> DriveResult<FileWriter> {
        self.events.trigger_update().await;

        let parent = self
            .links
            .link_from_id(parent.id())
            .ok_or(DriveError::InvalidLink)?;

        let share = self.links.share();
        let owner = self.owner()?;

        let path = clean_path(&format!("{}/{}", parent.path(), name));
        match self.links.link_from_path(&path) {
            None => {
                let (link_id, revision_id, keyring, session_key) =
                    self.create_file(&parent, name).await?;

                Ok(FileWriter::new(
                    self.client.clone(),
                    self.events.clone(),
                    share,
                    owner,
                    parent.id().clone(),
                    link_id,
                    revision_id,
                    true,
                    keyring,
                    session_key,
                ))
            }
            Some(link) => {
                let response = self
                    .client
                    .create_revision(share.id(), link.id())
                    .await?;

                let session_key = link
                    .session_key()
                    .cloned()
                    .ok_or(DriveError::InvalidLinkType)?;

                Ok(FileWriter::new(
                    self.client.clone(),
                    self.events.clone(),
                    share,
                    owner,
                    parent.id().clone(),
                    link.id().clone(),
                    response.id,
                    false,
                    link.keyring().clone(),
                    session_key,
                ))
            }
        }
    }

    /// Move a link under a new parent with a new name.
    ///
    /// The node passphrase is re-encrypted from the old parent's keyring
    /// to the new parent's; its signature is preserved.
    pub async fn move_link(
        &self,
        link: &Link,
        new_parent: &Link,
        name: &str,
    ) -> DriveResult<()> {
        self.events.trigger_update().await;

        let link = self
            .links
            .link_from_id(link.id())
            .ok_or(DriveError::InvalidLink)?;
        let new_parent = self
            .links
            .link_from_id(new_parent.id())
            .ok_or(DriveError::InvalidLink)?;
        let src_parent = link
            .parent_id()
            .and_then(|id| self.links.link_from_id(id))
            .ok_or(DriveError::InvalidLink)?;

        let share = self.links.share();
        let owner = self.owner()?;

        let hash_key = new_parent.hash_key().ok_or(DriveError::InvalidLinkType)?;

        let request = MoveLinkRequest {
            parent_id: new_parent.id().clone(),
            name: crypto::encrypt_signed(
                name.as_bytes(),
                new_parent.keyring(),
                owner.keyring(),
            )?,
            name_hash: crypto::hash_name(hash_key, name),
            original_name_hash: link.name_hash().to_string(),
            node_passphrase: crypto::reencrypt_passphrase(
                src_parent.keyring(),
                new_parent.keyring(),
                link.node_passphrase(),
            )?,
            node_passphrase_signature: link.node_passphrase_signature().to_string(),
            signature_address: owner.email().to_string(),
        };

        self.client
            .move_link(share.id(), link.id(), request)
            .await?;

        tracing::debug!(link = %link.id(), to = %new_parent.id(), "link moved");
        self.events.trigger_update().await;
        Ok(())
    }

    /// Trash a link as a child of its parent.
    pub async fn delete(&self, link: &Link) -> DriveResult<()> {
        self.events.trigger_update().await;

        let link = self
            .links
            .link_from_id(link.id())
            .ok_or(DriveError::InvalidLink)?;
        let parent_id = link.parent_id().ok_or(DriveError::InvalidLink)?;

        let share = self.links.share();
        self.client
            .trash_children(share.id(), parent_id, std::slice::from_ref(link.id()))
            .await?;

        tracing::debug!(link = %link.id(), "link trashed");
        self.events.trigger_update().await;
        Ok(())
    }

    /// Create a folder under `parent`.
    pub async fn create_dir(&self, parent: &Link, name: &str) -> DriveResult<()> {
        self.events.trigger_update().await;

        let parent = self
            .links
            .link_from_id(parent.id())
            .ok_or(DriveError::InvalidLink)?;

        let path = clean_path(&format!("{}/{}", parent.path(), name));
        if self.links.link_from_path(&path).is_some() {
            return Err(DriveError::AlreadyExists);
        }

        let share = self.links.share();
        let owner = self.owner()?;
        let parent_hash_key = parent.hash_key().ok_or(DriveError::InvalidLinkType)?;

        let node_keys = crypto::generate_node_keys(parent.keyring(), owner.keyring())?;
        let keyring = crypto::unlock_node_key(
            parent.keyring(),
            owner.keyring(),
            &node_keys.key,
            &node_keys.passphrase,
            &node_keys.signature,
        )?;

        // The folder's hash key is sealed and signed by its own node key.
        let hash_key = crypto::random_bytes::<32>();
        let node_hash_key = crypto::encrypt_signed(&hash_key, &keyring, &keyring)?;

        let request = CreateFolderRequest {
            parent_id: parent.id().clone(),
            name: crypto::encrypt_signed(name.as_bytes(), parent.keyring(), owner.keyring())?,
            name_hash: crypto::hash_name(parent_hash_key, name),
            node_key: node_keys.key,
            node_passphrase: node_keys.passphrase,
            node_passphrase_signature: node_keys.signature,
            node_hash_key,
            signature_address: owner.email().to_string(),
        };

        let response = self.client.create_folder(share.id(), request).await?;

        tracing::debug!(link = %response.id, name, "folder created");
        self.events.trigger_update().await;
        Ok(())
    }

    /// Create a new file and derive its key material.
    async fn create_file(
        &self,
        parent: &Link,
        name: &str,
    ) -> DriveResult<(
        crate::api::LinkId,
        crate::api::RevisionId,
        crate::crypto::Keyring,
        crate::crypto::SessionKey,
    )> {
        let share = self.links.share();
        let owner = self.owner()?;
        let parent_hash_key = parent.hash_key().ok_or(DriveError::InvalidLinkType)?;

        let node_keys = crypto::generate_node_keys(parent.keyring(), owner.keyring())?;
        let keyring = crypto::unlock_node_key(
            parent.keyring(),
            owner.keyring(),
            &node_keys.key,
            &node_keys.passphrase,
            &node_keys.signature,
        )?;

        let session_key = crypto::SessionKey::generate();
        let (content_key_packet, content_key_signature) =
            crypto::wrap_session_key(&session_key, &keyring)?;

        let request = CreateFileRequest {
            parent_id: parent.id().clone(),
            name: crypto::encrypt_signed(name.as_bytes(), parent.keyring(), owner.keyring())?,
            name_hash: crypto::hash_name(parent_hash_key, name),
            mime_type: mime_from_name(name),
            node_key: node_keys.key,
            node_passphrase: node_keys.passphrase,
            node_passphrase_signature: node_keys.signature,
            content_key_packet,
            content_key_signature,
            signature_address: owner.email().to_string(),
        };

        let response = self.client.create_file(share.id(), request).await?;

        tracing::debug!(link = %response.id, name, "file created");
        Ok((response.id, response.revision_id, keyring, session_key))
    }

    /// Resolve the share's owner address.
    fn owner(&self) -> DriveResult<Address> {
        let share = self.links.share();
        self.user
            .address_from_id(share.address_id())
            .cloned()
            .ok_or(DriveError::ShareAddressNotFound)
    }
}

/// Pick a MIME type from a filename extension, defaulting to text/plain.
fn mime_from_name(name: &str) -> String {
    std::path::Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(|ext| mime_guess::from_ext(ext).first())
        .map(|mime| mime.essence_str().to_string())
        .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_mime_from_name() {
        assert_eq!(mime_from_name("photo.png"), "image/png");
        assert_eq!(mime_from_name("data.json"), "application/json");
        assert_eq!(mime_from_name("notes.txt"), "text/plain");
        // No extension falls back to text/plain
        assert_eq!(mime_from_name("README"), "text/plain");
        assert_eq!(mime_from_name("archive.unknownext"), "text/plain");
    }
}
