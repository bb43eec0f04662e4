use crate::api::ClientError;
use crate::crypto::CryptoError;

pub type DriveResult<T> = Result<T, DriveError>;

/// Errors surfaced by the drive client.
///
/// Credential errors come back synchronously from login. Tree
/// inconsistencies show up as [`DriveError::InvalidLink`] on the next
/// operation after a drain. Integrity failures surface as
/// [`DriveError::BlockVerification`] and are never silently recovered.
#[derive(Debug, thiserror::Error)]
pub enum DriveError {
    #[error("username/password missing")]
    UsernamePasswordMissing,

    #[error("2fa token missing")]
    TwoFactorTokenMissing,

    #[error("mailbox password missing")]
    MailboxPasswordMissing,

    #[error("failed to unlock keyring")]
    KeyringUnlock,

    #[error("main volume not found")]
    MainVolumeNotFound,

    #[error("share address not found")]
    ShareAddressNotFound,

    #[error("signature address not found")]
    SignatureAddressNotFound,

    #[error("name signature address not found")]
    NameSignatureAddressNotFound,

    #[error("invalid link")]
    InvalidLink,

    #[error("invalid link type, expected file")]
    InvalidLinkType,

    #[error("file or folder already exists")]
    AlreadyExists,

    #[error("out of range read")]
    OutOfRange,

    #[error("block signature address not found")]
    BlockAddressNotFound,

    #[error("block verification failed")]
    BlockVerification,

    #[error("invalid seek operation")]
    InvalidSeek,

    #[error("unexpected number of block upload links")]
    UnexpectedUploadLinks,

    #[error("transport error: {0}")]
    Transport(#[from] ClientError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}
