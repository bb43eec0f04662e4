//! Integration tests for the filesystem facade

mod common;

use std::io::SeekFrom;

use sha1::{Digest as _, Sha1};

use lockdrive::error::DriveError;
use lockdrive::prelude::*;

#[tokio::test]
async fn test_create_dir() {
    let (_server, session) = common::setup_session().await;
    let root = session.links().root().unwrap();

    session.filesystem().create_dir(&root, "docs").await.unwrap();

    let docs = session.links().link_from_path("/docs").unwrap();
    assert!(docs.is_dir());
    assert_eq!(docs.parent_id(), Some(root.id()));
    assert_eq!(docs.path(), "/docs");

    let children = session.links().children_of(docs.id()).unwrap();
    assert!(children.is_empty());

    session.close();
}

#[tokio::test]
async fn test_create_dir_already_exists() {
    let (_server, session) = common::setup_session().await;
    let root = session.links().root().unwrap();

    session.filesystem().create_dir(&root, "docs").await.unwrap();
    let before = session.links().len();

    let result = session.filesystem().create_dir(&root, "docs").await;
    assert!(matches!(result, Err(DriveError::AlreadyExists)));

    // Tree unchanged
    assert_eq!(session.links().len(), before);

    session.close();
}

#[tokio::test]
async fn test_upload_nine_mib() {
    let (_server, session) = common::setup_session().await;
    let root = session.links().root().unwrap();

    session.filesystem().create_dir(&root, "docs").await.unwrap();
    let docs = session.links().link_from_path("/docs").unwrap();

    let content = vec![0x41u8; 9 * 1024 * 1024];
    common::write_file(&session, &docs, "a.txt", &content).await;

    let link = session.links().link_from_path("/docs/a.txt").unwrap();
    assert!(link.is_file());
    assert_eq!(link.block_sizes(), &[4_194_304, 4_194_304, 1_048_576]);
    assert_eq!(link.size(), content.len() as u64);

    let expected = hex::encode(Sha1::digest(&content));
    assert_eq!(link.content_hash(), expected);

    session.close();
}

#[tokio::test]
async fn test_download_with_seek() {
    let (_server, session) = common::setup_session().await;
    let root = session.links().root().unwrap();

    session.filesystem().create_dir(&root, "docs").await.unwrap();
    let docs = session.links().link_from_path("/docs").unwrap();

    let content = vec![0x41u8; 9 * 1024 * 1024];
    common::write_file(&session, &docs, "a.txt", &content).await;

    let link = session.links().link_from_path("/docs/a.txt").unwrap();
    let mut reader = session.filesystem().download(&link).await.unwrap();

    reader.seek(SeekFrom::Start(5_000_000)).unwrap();

    let mut buffer = vec![0u8; 100];
    let mut read = 0;
    while read < buffer.len() {
        let n = reader.read(&mut buffer[read..]).await.unwrap();
        assert_ne!(n, 0, "unexpected end of stream");
        read += n;
    }

    assert_eq!(buffer, vec![0x41u8; 100]);
    assert_eq!(reader.offset(), 5_000_100);

    session.close();
}

#[tokio::test]
async fn test_move_to_root() {
    let (_server, session) = common::setup_session().await;
    let root = session.links().root().unwrap();

    session.filesystem().create_dir(&root, "docs").await.unwrap();
    let docs = session.links().link_from_path("/docs").unwrap();
    common::write_file(&session, &docs, "a.txt", b"contents").await;

    let link = session.links().link_from_path("/docs/a.txt").unwrap();
    session
        .filesystem()
        .move_link(&link, &root, "a.txt")
        .await
        .unwrap();

    assert!(session.links().link_from_path("/docs/a.txt").is_none());
    let moved = session.links().link_from_path("/a.txt").unwrap();
    assert_eq!(moved.id(), link.id());

    // Content survives the move
    assert_eq!(common::read_file(&session, &moved).await, b"contents");

    session.close();
}

#[tokio::test]
async fn test_move_and_inverse_move_restores_path() {
    let (_server, session) = common::setup_session().await;
    let root = session.links().root().unwrap();

    session.filesystem().create_dir(&root, "docs").await.unwrap();
    let docs = session.links().link_from_path("/docs").unwrap();
    common::write_file(&session, &docs, "a.txt", b"contents").await;

    let link = session.links().link_from_path("/docs/a.txt").unwrap();
    session
        .filesystem()
        .move_link(&link, &root, "a.txt")
        .await
        .unwrap();

    let moved = session.links().link_from_path("/a.txt").unwrap();
    let docs = session.links().link_from_path("/docs").unwrap();
    session
        .filesystem()
        .move_link(&moved, &docs, "a.txt")
        .await
        .unwrap();

    let restored = session.links().link_from_path("/docs/a.txt").unwrap();
    assert_eq!(restored.id(), link.id());

    session.close();
}

#[tokio::test]
async fn test_move_folder_carries_subtree() {
    let (_server, session) = common::setup_session().await;
    let root = session.links().root().unwrap();

    session.filesystem().create_dir(&root, "docs").await.unwrap();
    let docs = session.links().link_from_path("/docs").unwrap();
    common::write_file(&session, &docs, "a.txt", b"inner").await;

    session
        .filesystem()
        .create_dir(&root, "archive")
        .await
        .unwrap();
    let archive = session.links().link_from_path("/archive").unwrap();

    let docs = session.links().link_from_path("/docs").unwrap();
    session
        .filesystem()
        .move_link(&docs, &archive, "docs")
        .await
        .unwrap();

    // The subtree follows its root
    assert!(session.links().link_from_path("/docs").is_none());
    assert!(session.links().link_from_path("/docs/a.txt").is_none());
    assert!(session.links().link_from_path("/archive/docs").is_some());

    let inner = session
        .links()
        .link_from_path("/archive/docs/a.txt")
        .unwrap();
    assert_eq!(common::read_file(&session, &inner).await, b"inner");

    session.close();
}

#[tokio::test]
async fn test_delete() {
    let (_server, session) = common::setup_session().await;
    let root = session.links().root().unwrap();

    session.filesystem().create_dir(&root, "docs").await.unwrap();
    let docs = session.links().link_from_path("/docs").unwrap();
    common::write_file(&session, &docs, "a.txt", b"bye").await;

    let link = session.links().link_from_path("/docs/a.txt").unwrap();
    session.filesystem().delete(&link).await.unwrap();

    assert!(session.links().link_from_path("/docs/a.txt").is_none());
    assert!(session.links().link_from_id(link.id()).is_none());

    session.close();
}

#[tokio::test]
async fn test_delete_folder_removes_subtree_from_both_indexes() {
    let (_server, session) = common::setup_session().await;
    let root = session.links().root().unwrap();

    session.filesystem().create_dir(&root, "docs").await.unwrap();
    let docs = session.links().link_from_path("/docs").unwrap();
    common::write_file(&session, &docs, "a.txt", b"inner").await;

    let file = session.links().link_from_path("/docs/a.txt").unwrap();
    session.filesystem().delete(&docs).await.unwrap();

    assert!(session.links().link_from_path("/docs").is_none());
    assert!(session.links().link_from_path("/docs/a.txt").is_none());
    assert!(session.links().link_from_id(docs.id()).is_none());
    assert!(session.links().link_from_id(file.id()).is_none());

    session.close();
}

#[tokio::test]
async fn test_download_rejects_folder() {
    let (_server, session) = common::setup_session().await;
    let root = session.links().root().unwrap();

    session.filesystem().create_dir(&root, "docs").await.unwrap();
    let docs = session.links().link_from_path("/docs").unwrap();

    let result = session.filesystem().download(&docs).await;
    assert!(matches!(result, Err(DriveError::InvalidLinkType)));

    session.close();
}

#[tokio::test]
async fn test_stale_link_is_invalid() {
    let (_server, session) = common::setup_session().await;
    let root = session.links().root().unwrap();

    session.filesystem().create_dir(&root, "docs").await.unwrap();
    let docs = session.links().link_from_path("/docs").unwrap();
    common::write_file(&session, &docs, "a.txt", b"x").await;

    let link = session.links().link_from_path("/docs/a.txt").unwrap();
    session.filesystem().delete(&link).await.unwrap();

    // The caller-held snapshot no longer resolves
    let result = session.filesystem().download(&link).await;
    assert!(matches!(result, Err(DriveError::InvalidLink)));

    session.close();
}

#[tokio::test]
async fn test_block_verification_failure() {
    let (server, session) = common::setup_session().await;
    let root = session.links().root().unwrap();

    common::write_file(&session, &root, "a.bin", &vec![7u8; 1024]).await;
    let link = session.links().link_from_path("/a.bin").unwrap();

    server.corrupt_block(link.id());

    let mut reader = session.filesystem().download(&link).await.unwrap();
    let mut buffer = vec![0u8; 64];
    let result = reader.read(&mut buffer).await;
    assert!(matches!(result, Err(DriveError::BlockVerification)));

    session.close();
}

#[tokio::test]
async fn test_upload_rollback_on_failure() {
    let (server, session) = common::setup_session().await;
    let root = session.links().root().unwrap();

    let mut writer = session
        .filesystem()
        .upload(&root, "doomed.bin")
        .await
        .unwrap();

    server.fail_next_block_upload();
    let result = writer.write(&vec![1u8; BLOCK_SIZE]).await;
    assert!(result.is_err());

    // The compensating delete removed the draft link server-side; the
    // next drain clears it from the tree as well.
    session.events().trigger_update().await;
    assert!(session.links().link_from_path("/doomed.bin").is_none());

    session.close();
}
