//! Streaming uploads
//!
//! [`FileWriter`] chunks a byte stream into fixed-size blocks, encrypts
//! and signs each against the file's session key and the owner address,
//! uploads them as they fill, and commits the revision on
//! [`FileWriter::finish`] with a manifest signature and encrypted
//! extended attributes. Nothing buffers more than one block; the content
//! hash streams over the plaintext as it is written.
//!
//! Any failure mid-stream triggers a compensating server call (deleting
//! the freshly created link, or abandoning the new revision) and the
//! original error is surfaced.

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use sha1::{Digest as _, Sha1};
use sha2::Sha256;
use time::OffsetDateTime;

use crate::api::{
    BlockUploadInfo, BlockUploadRequest, CommitRevisionRequest, DriveClient, LinkId, RevisionId,
};
use crate::crypto::{self, Keyring, SessionKey};
use crate::error::{DriveError, DriveResult};
use crate::events::Events;
use crate::link::{XAttrs, XAttrsCommon, SHA1_DIGEST, XATTR_TIME_FORMAT};
use crate::share::Share;
use crate::user::Address;

/// Fixed plaintext block size: 4 MiB.
pub const BLOCK_SIZE: usize = 4 * 1024 * 1024;

/// Streaming writer for a new revision of a file.
pub struct FileWriter {
    client: Arc<dyn DriveClient>,
    events: Events,
    share: Share,
    owner: Address,

    parent_id: LinkId,
    link_id: LinkId,
    revision_id: RevisionId,
    new_file: bool,

    keyring: Keyring,
    session_key: SessionKey,

    buffer: Vec<u8>,
    blocks_uploaded: u32,
    block_sizes: Vec<u64>,
    block_hashes: Vec<u8>,

    content_size: u64,
    content_hash: Sha1,
}

impl FileWriter {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        client: Arc<dyn DriveClient>,
        events: Events,
        share: Share,
        owner: Address,
        parent_id: LinkId,
        link_id: LinkId,
        revision_id: RevisionId,
        new_file: bool,
        keyring: Keyring,
        session_key: SessionKey,
    ) -> Self {
        Self {
            client,
            events,
            share,
            owner,
            parent_id,
            link_id,
            revision_id,
            new_file,
            keyring,
            session_key,
            buffer: Vec::with_capacity(BLOCK_SIZE),
            blocks_uploaded: 0,
            block_sizes: Vec::new(),
            block_hashes: Vec::new(),
            content_size: 0,
            content_hash: Sha1::new(),
        }
    }

    /// Total plaintext bytes written so far.
    pub fn size(&self) -> u64 {
        self.content_size
    }

    /// Lowercase hex SHA-1 of everything written so far.
    pub fn content_hash(&self) -> String {
        hex::encode(self.content_hash.clone().finalize())
    }

    /// The link this writer commits into.
    pub fn link_id(&self) -> &LinkId {
        &self.link_id
    }

    /// Append bytes to the stream, uploading each block as it fills.
    pub async fn write(&mut self, data: &[u8]) -> DriveResult<usize> {
        self.content_size += data.len() as u64;
        self.content_hash.update(data);

        let mut remaining = data;
        while !remaining.is_empty() {
            let take = (BLOCK_SIZE - self.buffer.len()).min(remaining.len());
            self.buffer.extend_from_slice(&remaining[..take]);
            remaining = &remaining[take..];

            if self.buffer.len() == BLOCK_SIZE {
                if let Err(err) = self.upload_current_block().await {
                    return Err(self.handle_error(err).await);
                }
            }
        }

        Ok(data.len())
    }

    /// Upload the trailing block, sign the manifest and commit.
    ///
    /// A zero-length stream still commits exactly one empty block.
    pub async fn finish(mut self) -> DriveResult<()> {
        // A block boundary already flushed everything; only upload the
        // remainder, or a single empty block for the empty stream.
        if !self.buffer.is_empty() || self.blocks_uploaded == 0 {
            if let Err(err) = self.upload_current_block().await {
                return Err(self.handle_error(err).await);
            }
        }

        match self.commit().await {
            Ok(()) => {
                tracing::debug!(
                    link = %self.link_id,
                    revision = %self.revision_id,
                    size = self.content_size,
                    blocks = self.blocks_uploaded,
                    "revision committed"
                );
                // Make the new revision visible to this session.
                self.events.trigger_update().await;
                Ok(())
            }
            Err(err) => Err(self.handle_error(err).await),
        }
    }

    async fn upload_current_block(&mut self) -> DriveResult<()> {
        let data = std::mem::replace(&mut self.buffer, Vec::with_capacity(BLOCK_SIZE));

        let encrypted = self.session_key.encrypt(&data)?;
        let signature = self
            .owner
            .keyring()
            .sign_detached_encrypted(&data, &self.keyring)?;

        let digest = Sha256::digest(&encrypted);
        let hash = BASE64.encode(digest);

        let request = BlockUploadRequest {
            address_id: self.owner.id().clone(),
            share_id: self.share.id().clone(),
            link_id: self.link_id.clone(),
            revision_id: self.revision_id.clone(),
            blocks: vec![BlockUploadInfo {
                index: self.blocks_uploaded + 1,
                size: encrypted.len() as u64,
                hash,
                enc_signature: signature,
            }],
        };

        let upload_links = self.client.request_block_upload(request).await?;
        if upload_links.len() != 1 {
            return Err(DriveError::UnexpectedUploadLinks);
        }
        let upload = &upload_links[0];

        self.client
            .upload_block(&upload.url, &upload.token, Bytes::from(encrypted))
            .await?;

        self.blocks_uploaded += 1;
        self.block_sizes.push(data.len() as u64);
        self.block_hashes.extend_from_slice(&digest);
        Ok(())
    }

    async fn commit(&mut self) -> DriveResult<()> {
        let manifest_signature = self.owner.keyring().sign_detached(&self.block_hashes)?;

        let modification_time = OffsetDateTime::now_utc()
            .format(XATTR_TIME_FORMAT)
            .map_err(|err| {
                DriveError::Crypto(anyhow::anyhow!("time format: {}", err).into())
            })?;

        let mut digests = BTreeMap::new();
        digests.insert(SHA1_DIGEST.to_string(), self.content_hash());

        let xattrs = XAttrs {
            common: XAttrsCommon {
                modification_time,
                size: self.content_size,
                block_sizes: self.block_sizes.clone(),
                digests,
            },
        };

        let x_attrs =
            crypto::encrypt_signed(&xattrs.to_json()?, &self.keyring, self.owner.keyring())?;

        self.client
            .commit_revision(
                self.share.id(),
                &self.link_id,
                &self.revision_id,
                CommitRevisionRequest {
                    manifest_signature,
                    signature_address: self.owner.email().to_string(),
                    x_attrs,
                },
            )
            .await?;

        Ok(())
    }

    /// Compensate on the server and surface the original error.
    ///
    /// The compensating call's own failure is ignored; the tree stays
    /// consistent either way because the draft never became visible.
    async fn handle_error(&mut self, err: DriveError) -> DriveError {
        let result = if self.new_file {
            self.client
                .delete_children(
                    self.share.id(),
                    &self.parent_id,
                    std::slice::from_ref(&self.link_id),
                )
                .await
        } else {
            self.client
                .delete_revision(self.share.id(), &self.link_id, &self.revision_id)
                .await
        };

        if let Err(compensation) = result {
            tracing::debug!(error = %compensation, "upload compensation failed");
        }

        err
    }
}
