//! Transport collaborator contract
//!
//! The core consumes the remote drive service through the narrow
//! [`DriveClient`] trait and never talks HTTP itself. Authentication is
//! entirely the transport's business: the core passes opaque URLs and
//! tokens through, and learns about credential refreshes via
//! [`AuthObserver`]. Tests plug in the in-memory
//! [`TestServer`](crate::testkit::TestServer).

mod types;

pub use types::*;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

/// Errors produced by the transport collaborator.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("remote status {code}: {message}")]
    Status { code: u16, message: String },
    #[error("not authenticated")]
    Unauthenticated,
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ClientError {
    /// Shorthand for a remote error response.
    pub fn status(code: u16, message: impl Into<String>) -> Self {
        Self::Status {
            code,
            message: message.into(),
        }
    }
}

/// Callbacks fired by the transport when credentials change.
///
/// `tokens_updated` fires whenever the access/refresh token pair is
/// rotated; `tokens_expired` fires on de-auth.
pub trait AuthObserver: Send + Sync {
    fn tokens_updated(&self, auth: &Auth);
    fn tokens_expired(&self);
}

/// Protocol operations required by the core.
///
/// One method per remote operation; implementations own retries at the
/// HTTP layer, token refresh and connection pooling. All methods take
/// `&self` and implementations must be usable behind an `Arc`.
#[async_trait]
pub trait DriveClient: Send + Sync {
    //
    // IDENTITY
    //

    async fn get_user(&self) -> Result<RemoteUser, ClientError>;

    async fn get_addresses(&self) -> Result<Vec<RemoteAddress>, ClientError>;

    async fn get_key_salts(&self) -> Result<Vec<KeySalt>, ClientError>;

    async fn submit_two_factor(&self, code: &str) -> Result<(), ClientError>;

    /// Register the observer notified on token refresh and expiry.
    fn set_auth_observer(&self, observer: Arc<dyn AuthObserver>);

    //
    // TREE
    //

    async fn list_volumes(&self) -> Result<Vec<RemoteVolume>, ClientError>;

    async fn get_share(&self, share_id: &ShareId) -> Result<RemoteShare, ClientError>;

    async fn get_link(
        &self,
        share_id: &ShareId,
        link_id: &LinkId,
    ) -> Result<RemoteLink, ClientError>;

    /// List the children of a folder. `show_all` includes non-active
    /// links.
    async fn list_children(
        &self,
        share_id: &ShareId,
        link_id: &LinkId,
        show_all: bool,
    ) -> Result<Vec<RemoteLink>, ClientError>;

    //
    // EVENTS
    //

    async fn latest_event_id(&self, share_id: &ShareId) -> Result<EventId, ClientError>;

    async fn share_events(
        &self,
        share_id: &ShareId,
        cursor: &EventId,
    ) -> Result<ShareEvents, ClientError>;

    //
    // MUTATIONS
    //

    async fn create_file(
        &self,
        share_id: &ShareId,
        request: CreateFileRequest,
    ) -> Result<CreateFileResponse, ClientError>;

    async fn create_folder(
        &self,
        share_id: &ShareId,
        request: CreateFolderRequest,
    ) -> Result<CreateFolderResponse, ClientError>;

    async fn create_revision(
        &self,
        share_id: &ShareId,
        link_id: &LinkId,
    ) -> Result<CreateRevisionResponse, ClientError>;

    async fn commit_revision(
        &self,
        share_id: &ShareId,
        link_id: &LinkId,
        revision_id: &RevisionId,
        request: CommitRevisionRequest,
    ) -> Result<(), ClientError>;

    async fn move_link(
        &self,
        share_id: &ShareId,
        link_id: &LinkId,
        request: MoveLinkRequest,
    ) -> Result<(), ClientError>;

    async fn trash_children(
        &self,
        share_id: &ShareId,
        parent_id: &LinkId,
        link_ids: &[LinkId],
    ) -> Result<(), ClientError>;

    async fn delete_children(
        &self,
        share_id: &ShareId,
        parent_id: &LinkId,
        link_ids: &[LinkId],
    ) -> Result<(), ClientError>;

    async fn delete_revision(
        &self,
        share_id: &ShareId,
        link_id: &LinkId,
        revision_id: &RevisionId,
    ) -> Result<(), ClientError>;

    //
    // BLOCKS
    //

    async fn request_block_upload(
        &self,
        request: BlockUploadRequest,
    ) -> Result<Vec<BlockUploadLink>, ClientError>;

    async fn upload_block(&self, url: &str, token: &str, data: Bytes)
        -> Result<(), ClientError>;

    /// Fetch a revision descriptor including every block.
    async fn get_revision(
        &self,
        share_id: &ShareId,
        link_id: &LinkId,
        revision_id: &RevisionId,
    ) -> Result<RemoteRevision, ClientError>;

    async fn get_block(&self, url: &str, token: &str) -> Result<Bytes, ClientError>;
}

/// Entry point for establishing an authenticated client.
///
/// `login` performs the credential exchange and returns the client plus
/// the auth state the application inspects for second-factor and
/// password-mode requirements; `restore` rebuilds a client from persisted
/// tokens without touching credentials.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<(Arc<dyn DriveClient>, Auth), ClientError>;

    fn restore(&self, uid: &str, access_token: &str, refresh_token: &str)
        -> Arc<dyn DriveClient>;
}
