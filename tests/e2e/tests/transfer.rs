//! Copies and moves between mountpoints served by different adapters

mod common;

use anyhow::Result;
use common::*;
use mountvfs::adapter::DiskAdapter;
use mountvfs::config::MountConfig as ServiceMount;
use mountvfs::events::ChangeEvent;
use mountvfs::VfsError;
use std::sync::Arc;

/// Harness with `local:` on the stock disk adapter and `remote:` on a
/// second disk adapter instance, so every transfer between them streams
async fn two_adapters() -> Result<TestHarness> {
    let harness = TestHarness::with_fixtures(
        |b| b.add_mount(MountConfig::disk("local", "local")),
        |root| {
            create_file(&root.join("local/song.mp3"), &pattern(70_000))?;
            create_file_str(&root.join("local/album/track1.txt"), "one")?;
            create_file_str(&root.join("local/album/disc2/track2.txt"), "two")?;
            std::fs::create_dir_all(root.join("remote"))?;
            Ok(())
        },
    )
    .await?;

    harness
        .fs()
        .register_adapter("disk2", Arc::new(DiskAdapter::new()));
    let remote_root = harness.root().join("remote").to_string_lossy().into_owned();
    harness
        .fs()
        .mount(&ServiceMount::new("remote", "disk2", Some(remote_root.as_str())))
        .await?;
    Ok(harness)
}

#[tokio::test]
async fn test_cross_adapter_tree_copy() -> Result<()> {
    let harness = two_adapters().await?;
    let user = harness.user("alice", &[]);

    harness.fs().copy(&user, "local:/album", "remote:/album").await?;
    harness.fs().copy(&user, "local:/song.mp3", "remote:/song.mp3").await?;

    let remote = harness.root().join("remote");
    assert_file_content_str(&remote.join("album/track1.txt"), "one");
    assert_file_content_str(&remote.join("album/disc2/track2.txt"), "two");
    assert_file_content(&remote.join("song.mp3"), &pattern(70_000));
    assert_file_exists(&harness.root().join("local/song.mp3"));

    harness.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn test_cross_adapter_rename_moves() -> Result<()> {
    let harness = two_adapters().await?;
    let user = harness.user("alice", &[]);
    let mut events = harness.fs().subscribe(user.clone());

    harness.fs().rename(&user, "local:/song.mp3", "remote:/moved.mp3").await?;

    assert_not_exists(&harness.root().join("local/song.mp3"));
    assert_file_content(&harness.root().join("remote/moved.mp3"), &pattern(70_000));

    // Both sides' listings changed
    let mut seen = Vec::new();
    while let Some(event) = events.try_recv() {
        if let ChangeEvent::DirectoryChanged { path } = event {
            seen.push(path);
        }
    }
    assert!(seen.contains(&"local:/".to_string()), "{:?}", seen);
    assert!(seen.contains(&"remote:/".to_string()), "{:?}", seen);

    harness.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn test_failed_destination_write_keeps_source() -> Result<()> {
    let harness = two_adapters().await?;
    let user = harness.user("alice", &[]);

    // A regular file where the destination expects a directory
    create_file_str(&harness.root().join("remote/blocker"), "in the way")?;

    let result = harness
        .fs()
        .rename(&user, "local:/song.mp3", "remote:/blocker/song.mp3")
        .await;
    assert!(result.is_err(), "rename should fail, got {:?}", result);
    assert!(!matches!(result, Err(VfsError::SourceRetained { .. })));

    assert_file_content(&harness.root().join("local/song.mp3"), &pattern(70_000));
    assert!(harness.fs().exists(&user, "local:/song.mp3").await?);

    harness.cleanup().await?;
    Ok(())
}
