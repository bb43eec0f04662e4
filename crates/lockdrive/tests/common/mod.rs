//! Shared test utilities for drive integration tests
#![allow(dead_code)]

use lockdrive::link::Link;
use lockdrive::prelude::*;
use lockdrive::testkit::TestServer;

/// Log in against a fresh test server and open a session.
pub async fn setup_session() -> (TestServer, Session) {
    let server = TestServer::new();
    let application = server.application();
    application
        .login_with_credentials(&server.credentials())
        .await
        .unwrap();

    let session = Session::open(&application, DriveConfig::default())
        .await
        .unwrap();

    (server, session)
}

/// Upload `content` as `parent/name` and wait for the post-commit drain.
pub async fn write_file(session: &Session, parent: &Link, name: &str, content: &[u8]) {
    let mut writer = session.filesystem().upload(parent, name).await.unwrap();
    writer.write(content).await.unwrap();
    writer.finish().await.unwrap();
}

/// Download a file and read it back in full.
pub async fn read_file(session: &Session, link: &Link) -> Vec<u8> {
    let mut reader = session.filesystem().download(link).await.unwrap();
    reader.read_to_end().await.unwrap()
}
