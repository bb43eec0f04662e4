//! Verified streaming reads
//!
//! [`FileReader`] exposes byte-oriented sequential reads plus seeking
//! over a revision's encrypted blocks. Blocks are fetched lazily on the
//! first byte needed and verified before any plaintext is handed out;
//! only one decrypted block is retained at a time, bounding memory at a
//! block plus incidental buffers.

use std::io::SeekFrom;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sha2::{Digest as _, Sha256};

use crate::api::{DriveClient, RemoteBlock};
use crate::error::{DriveError, DriveResult};
use crate::link::Link;
use crate::user::User;

/// Sequential, seekable reader over a file's active revision.
pub struct FileReader {
    client: Arc<dyn DriveClient>,
    user: Arc<User>,
    link: Link,
    blocks: Vec<RemoteBlock>,

    block_index: Option<usize>,
    block_offset: u64,
    block_data: Vec<u8>,

    stream_offset: i64,
}

impl FileReader {
    pub(crate) fn new(
        client: Arc<dyn DriveClient>,
        user: Arc<User>,
        link: Link,
        blocks: Vec<RemoteBlock>,
    ) -> Self {
        Self {
            client,
            user,
            link,
            blocks,
            block_index: None,
            block_offset: 0,
            block_data: Vec::new(),
            stream_offset: 0,
        }
    }

    /// Logical stream size: the sum of the declared block sizes.
    pub fn size(&self) -> u64 {
        self.link.block_sizes().iter().sum()
    }

    /// Read into `buffer` from the current stream offset.
    ///
    /// Returns the number of bytes read; `Ok(0)` signals end-of-stream.
    /// A single call never crosses a block boundary; callers loop.
    pub async fn read(&mut self, buffer: &mut [u8]) -> DriveResult<usize> {
        if buffer.is_empty() {
            return Ok(0);
        }

        if !self.update_current_block().await? {
            return Ok(0);
        }

        let within = (self.stream_offset as u64 - self.block_offset) as usize;
        let available = self.block_data.len().saturating_sub(within);
        let n = available.min(buffer.len());

        buffer[..n].copy_from_slice(&self.block_data[within..within + n]);
        self.stream_offset += n as i64;
        Ok(n)
    }

    /// Read everything from the current offset to the end of the stream.
    pub async fn read_to_end(&mut self) -> DriveResult<Vec<u8>> {
        let mut out = Vec::new();
        let mut buffer = vec![0u8; 64 * 1024];
        loop {
            let n = self.read(&mut buffer).await?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&buffer[..n]);
        }
    }

    /// Reposition the stream offset.
    ///
    /// Seeking past the end is allowed and reads end-of-stream; a
    /// negative resulting offset is `InvalidSeek`.
    pub fn seek(&mut self, pos: SeekFrom) -> DriveResult<u64> {
        let abs = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(offset) => self.stream_offset + offset,
            SeekFrom::End(offset) => self.size() as i64 + offset,
        };

        if abs < 0 {
            return Err(DriveError::InvalidSeek);
        }

        self.stream_offset = abs;
        Ok(abs as u64)
    }

    /// Current stream offset.
    pub fn offset(&self) -> u64 {
        self.stream_offset.max(0) as u64
    }

    /// Drop cached plaintext and the block list.
    pub fn close(&mut self) {
        self.block_index = None;
        self.block_data = Vec::new();
        self.blocks = Vec::new();
        self.stream_offset = 0;
    }

    /// Make sure the block containing the current offset is cached.
    ///
    /// Returns `false` at end-of-stream.
    async fn update_current_block(&mut self) -> DriveResult<bool> {
        if self.stream_offset < 0 {
            return Err(DriveError::OutOfRange);
        }
        let offset = self.stream_offset as u64;

        // Locate the block whose half-open range holds the offset.
        let mut index = None;
        let mut current = 0u64;
        for (i, size) in self.link.block_sizes().iter().enumerate() {
            if offset >= current && offset < current + size {
                index = Some(i);
                break;
            }
            current += size;
        }

        let Some(index) = index else {
            return Ok(false);
        };

        if self.block_index == Some(index) && !self.block_data.is_empty() {
            return Ok(true);
        }

        let block = self
            .blocks
            .get(index)
            .ok_or(DriveError::OutOfRange)?
            .clone();
        let plaintext = self.fetch_block(&block).await?;

        self.block_index = Some(index);
        self.block_offset = current;
        self.block_data = plaintext;
        Ok(true)
    }

    /// Download, verify and decrypt one block.
    ///
    /// Order matters: the ciphertext digest is checked before
    /// decryption, and the signature before any plaintext is retained.
    async fn fetch_block(&self, block: &RemoteBlock) -> DriveResult<Vec<u8>> {
        let address = self
            .user
            .address_from_email(&block.signature_email)
            .ok_or(DriveError::BlockAddressNotFound)?;

        tracing::debug!(index = block.index, "fetching block");
        let encrypted = self.client.get_block(&block.url, &block.token).await?;

        let digest = Sha256::digest(&encrypted);
        if BASE64.encode(digest) != block.hash {
            return Err(DriveError::BlockVerification);
        }

        let session_key = self
            .link
            .session_key()
            .ok_or(DriveError::InvalidLinkType)?;
        let plaintext = session_key.decrypt(&encrypted)?;

        address
            .keyring()
            .verify_detached_encrypted(&plaintext, &block.enc_signature, self.link.keyring())
            .map_err(|_| DriveError::BlockVerification)?;

        Ok(plaintext)
    }
}
