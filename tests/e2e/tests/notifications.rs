//! Change delivery on per-user roots

mod common;

use anyhow::Result;
use common::*;
use mountvfs::adapter::WatchEventKind;
use mountvfs::events::{ChangeEvent, Subscription};
use mountvfs::request::{WriteOptions, WriteUpload};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

async fn home_harness() -> Result<TestHarness> {
    TestHarness::with_fixtures(
        |b| b.add_mount(MountConfig::disk("home", "home/{username}").watch()),
        |root| {
            std::fs::create_dir_all(root.join("home/alice"))?;
            std::fs::create_dir_all(root.join("home/bob"))?;
            Ok(())
        },
    )
    .await
}

/// Receive until `accept` matches, failing after `WAIT`
async fn expect_event<F>(sub: &mut Subscription, accept: F) -> Result<ChangeEvent>
where
    F: Fn(&ChangeEvent) -> bool,
{
    within(WAIT, async {
        loop {
            match sub.recv().await {
                Some(event) if accept(&event) => return Some(event),
                Some(_) => continue,
                None => return None,
            }
        }
    })
    .await?
    .ok_or_else(|| anyhow::anyhow!("notifier closed"))
}

#[tokio::test]
async fn test_post_mutation_event_reaches_owner_only() -> Result<()> {
    let harness = home_harness().await?;
    assert!(harness.fs().is_watching("home"));

    let alice = harness.user("alice", &["users"]);
    let bob = harness.user("bob", &["users"]);
    let mut alice_events = harness.fs().subscribe(alice.clone());
    let mut bob_events = harness.fs().subscribe(bob.clone());

    harness
        .fs()
        .writefile(
            &alice,
            WriteUpload {
                path: "home:/notes.txt".to_string(),
                options: WriteOptions::default(),
                upload: body(b"alice's notes"),
            },
        )
        .await?;
    assert_file_exists(&harness.root().join("home/alice/notes.txt"));
    assert_not_exists(&harness.root().join("home/bob/notes.txt"));

    let event = expect_event(&mut alice_events, |e| {
        matches!(e, ChangeEvent::DirectoryChanged { .. })
    })
    .await?;
    assert_eq!(event.path(), "home:/");

    // Give the watcher time to deliver anything it picked up
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(bob_events.try_recv().is_none());

    harness.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn test_watcher_event_reaches_owner_only() -> Result<()> {
    let harness = home_harness().await?;
    let alice = harness.user("alice", &["users"]);
    let bob = harness.user("bob", &["users"]);
    let mut alice_events = harness.fs().subscribe(alice);
    let mut bob_events = harness.fs().subscribe(bob);
    let mut monitor = harness.fs().notifier().monitor();

    // Written behind the service's back, only the watcher sees it
    create_file_str(&harness.root().join("home/alice/direct.txt"), "hello")?;

    let is_direct = |e: &ChangeEvent| {
        matches!(
            e,
            ChangeEvent::Watch { path, event: WatchEventKind::Add | WatchEventKind::Change }
                if path == "home:/direct.txt"
        )
    };
    expect_event(&mut alice_events, is_direct).await?;
    expect_event(&mut monitor, is_direct).await?;

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(bob_events.try_recv().is_none());

    harness.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn test_unmount_stops_watching() -> Result<()> {
    let harness = home_harness().await?;
    assert!(harness.fs().is_watching("home"));

    harness.fs().unmount("home").await?;
    assert!(!harness.fs().is_watching("home"));
    assert_eq!(harness.fs().count(), 0);

    let mut monitor = harness.fs().notifier().monitor();
    create_file_str(&harness.root().join("home/alice/late.txt"), "late")?;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(monitor.try_recv().is_none());

    harness.cleanup().await?;
    Ok(())
}
