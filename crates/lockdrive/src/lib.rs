//! # lockdrive
//!
//! Client library for an end-to-end encrypted cloud drive. The session
//! authenticates a user, materializes the encrypted file tree of the
//! primary volume into an in-memory store, keeps it reconciled against
//! the server's event stream, and exposes filesystem-like operations
//! whose reads and writes are encrypted, signed and verified per block.
//!
//! The moving parts, in dependency order:
//!
//! - [`application`]: login flows and the four persisted tokens
//! - [`user`]: the unlocked identity and its signing addresses
//! - [`links`]: the keyed link tree, indexed by id and path
//! - [`events`]: the background reconciliation loop
//! - [`reader`] / [`writer`]: verified block-oriented streaming
//! - [`filesystem`]: the facade combining all of the above
//!
//! The HTTP transport and the service's key formats stay behind the
//! [`api`] and [`crypto`] seams; [`testkit`] provides an in-memory
//! service for tests.

pub mod api;
pub mod application;
pub mod config;
pub mod crypto;
pub mod error;
pub mod events;
pub mod filesystem;
pub mod link;
pub mod links;
pub mod reader;
pub mod session;
pub mod share;
pub mod testkit;
pub mod user;
pub mod volume;
pub mod writer;

mod limiter;

pub mod prelude {
    pub use crate::api::{DriveClient, LinkId, LinkKind, ShareId};
    pub use crate::application::{Application, Credentials, Tokens};
    pub use crate::config::DriveConfig;
    pub use crate::error::{DriveError, DriveResult};
    pub use crate::filesystem::FileSystem;
    pub use crate::link::Link;
    pub use crate::links::Links;
    pub use crate::reader::FileReader;
    pub use crate::session::Session;
    pub use crate::writer::{FileWriter, BLOCK_SIZE};
}
