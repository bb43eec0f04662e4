//! Write-then-read roundtrips and stream boundary behavior

mod common;

use std::io::SeekFrom;

use sha1::{Digest as _, Sha1};

use lockdrive::error::DriveError;
use lockdrive::prelude::*;

#[tokio::test]
async fn test_roundtrip_odd_length_chunked_writes() {
    let (_server, session) = common::setup_session().await;
    let root = session.links().root().unwrap();

    // Just over two blocks, written in awkward chunk sizes
    let content: Vec<u8> = (0..(2 * BLOCK_SIZE + 12_345))
        .map(|i| (i % 251) as u8)
        .collect();

    let mut writer = session.filesystem().upload(&root, "data.bin").await.unwrap();
    for chunk in content.chunks(1_000_003) {
        writer.write(chunk).await.unwrap();
    }
    assert_eq!(writer.size(), content.len() as u64);
    writer.finish().await.unwrap();

    let link = session.links().link_from_path("/data.bin").unwrap();
    assert_eq!(link.block_sizes().len(), 3);
    assert_eq!(
        link.block_sizes().iter().sum::<u64>(),
        content.len() as u64
    );
    assert_eq!(link.content_hash(), hex::encode(Sha1::digest(&content)));

    assert_eq!(common::read_file(&session, &link).await, content);

    session.close();
}

#[tokio::test]
async fn test_empty_file_is_one_block()  {
    let (_server, session) = common::setup_session().await;
    let root = session.links().root().unwrap();

    common::write_file(&session, &root, "empty.txt", b"").await;

    let link = session.links().link_from_path("/empty.txt").unwrap();
    assert_eq!(link.block_sizes(), &[0]);
    assert_eq!(link.size(), 0);
    assert_eq!(link.content_hash(), hex::encode(Sha1::digest(b"")));

    assert_eq!(common::read_file(&session, &link).await, b"");

    session.close();
}

#[tokio::test]
async fn test_exact_block_multiple_has_no_trailing_block() {
    let (_server, session) = common::setup_session().await;
    let root = session.links().root().unwrap();

    let content = vec![3u8; BLOCK_SIZE];
    common::write_file(&session, &root, "exact.bin", &content).await;

    let link = session.links().link_from_path("/exact.bin").unwrap();
    assert_eq!(link.block_sizes(), &[BLOCK_SIZE as u64]);

    assert_eq!(common::read_file(&session, &link).await, content);

    session.close();
}

#[tokio::test]
async fn test_new_revision_replaces_content() {
    let (_server, session) = common::setup_session().await;
    let root = session.links().root().unwrap();

    common::write_file(&session, &root, "a.txt", b"first revision").await;
    let first = session.links().link_from_path("/a.txt").unwrap();

    common::write_file(&session, &root, "a.txt", b"second revision").await;
    let second = session.links().link_from_path("/a.txt").unwrap();

    // Same link, new revision
    assert_eq!(first.id(), second.id());
    assert_ne!(first.revision_id(), second.revision_id());
    assert_eq!(common::read_file(&session, &second).await, b"second revision");

    session.close();
}

#[tokio::test]
async fn test_mime_type_from_extension() {
    let (_server, session) = common::setup_session().await;
    let root = session.links().root().unwrap();

    common::write_file(&session, &root, "image.png", b"not really a png").await;
    common::write_file(&session, &root, "README", b"plain").await;

    let png = session.links().link_from_path("/image.png").unwrap();
    assert_eq!(png.mime_type(), "image/png");

    // No extension falls back to text/plain
    let readme = session.links().link_from_path("/README").unwrap();
    assert_eq!(readme.mime_type(), "text/plain");

    session.close();
}

#[tokio::test]
async fn test_seek_boundaries() {
    let (_server, session) = common::setup_session().await;
    let root = session.links().root().unwrap();

    common::write_file(&session, &root, "small.bin", &[1, 2, 3, 4, 5]).await;
    let link = session.links().link_from_path("/small.bin").unwrap();
    let mut reader = session.filesystem().download(&link).await.unwrap();

    let mut buffer = [0u8; 8];

    // Offset equal to size: end of stream, not an error
    reader.seek(SeekFrom::Start(5)).unwrap();
    assert_eq!(reader.read(&mut buffer).await.unwrap(), 0);

    // Past the end: still end of stream
    reader.seek(SeekFrom::Start(100)).unwrap();
    assert_eq!(reader.read(&mut buffer).await.unwrap(), 0);

    // Negative target: invalid seek
    assert!(matches!(
        reader.seek(SeekFrom::Current(-200)),
        Err(DriveError::InvalidSeek)
    ));

    // End-relative seek reads the tail
    reader.seek(SeekFrom::End(-2)).unwrap();
    assert_eq!(reader.read(&mut buffer).await.unwrap(), 2);
    assert_eq!(&buffer[..2], &[4, 5]);

    reader.close();
    session.close();
}

#[tokio::test]
async fn test_sequential_reads_cross_blocks() {
    let (_server, session) = common::setup_session().await;
    let root = session.links().root().unwrap();

    let content: Vec<u8> = (0..(BLOCK_SIZE + 100)).map(|i| (i % 7) as u8).collect();
    common::write_file(&session, &root, "two.bin", &content).await;

    let link = session.links().link_from_path("/two.bin").unwrap();
    let mut reader = session.filesystem().download(&link).await.unwrap();
    assert_eq!(reader.size(), content.len() as u64);

    // Start just before the block boundary and read across it
    reader.seek(SeekFrom::Start((BLOCK_SIZE - 10) as u64)).unwrap();
    let tail = reader.read_to_end().await.unwrap();
    assert_eq!(tail.len(), 110);
    assert_eq!(tail.as_slice(), &content[BLOCK_SIZE - 10..]);

    session.close();
}
