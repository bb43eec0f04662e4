//! In-process test harness
//!
//! [`TestServer`] is a complete in-memory drive service: it seeds an
//! account with real (locked) key material, implements the transport
//! contract over that state, and can fabricate remote changes so tests
//! can exercise event reconciliation without external infrastructure.
//!
//! ```rust,ignore
//! use lockdrive::testkit::TestServer;
//!
//! #[tokio::test]
//! async fn test_roundtrip() {
//!     let server = TestServer::new();
//!     let application = server.application();
//!     application
//!         .login_with_credentials(&server.credentials())
//!         .await
//!         .unwrap();
//!     let session = Session::open(&application, DriveConfig::default())
//!         .await
//!         .unwrap();
//!     // ...
//! }
//! ```

mod server;

pub use server::{TestServer, TestServerOptions};
