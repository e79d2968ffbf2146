//! Core file operations through a configured service

mod common;

use anyhow::Result;
use common::*;
use mountvfs::client::{ListOptions, SortDirection, SortField};
use mountvfs::request::{MkdirOptions, ReadOptions, WriteOptions, WriteUpload};
use mountvfs::VfsError;

fn upload(path: &str, content: &[u8]) -> WriteUpload {
    WriteUpload {
        path: path.to_string(),
        options: WriteOptions::default(),
        upload: body(content),
    }
}

#[tokio::test]
async fn test_resolution_by_prefix() -> Result<()> {
    let harness = TestHarness::with_config(|b| {
        b.add_mount(MountConfig::disk("docs", "docs"))
            .add_mount(MountConfig::disk("media", "media"))
    })
    .await?;

    let (mount, path) = harness.fs().resolve("media:/photos/a.jpg")?;
    assert_eq!(mount.name, "media");
    assert_eq!(path.to_string(), "media:/photos/a.jpg");

    let (mount, _) = harness.fs().resolve("docs:/")?;
    assert_eq!(mount.name, "docs");

    match harness.fs().resolve("music:/song.mp3") {
        Err(VfsError::MountpointNotFound(name)) => assert_eq!(name, "music"),
        other => panic!("expected MountpointNotFound, got {:?}", other),
    }
    assert!(matches!(
        harness.fs().resolve("no-colon"),
        Err(VfsError::PathFormatInvalid(_))
    ));

    harness.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn test_write_then_read_round_trip() -> Result<()> {
    let harness = TestHarness::with_config(|b| b.add_mount(MountConfig::disk("data", "data"))).await?;
    let user = harness.user("alice", &["users"]);
    let content = pattern(256 * 1024);

    let written = harness
        .fs()
        .writefile(
            &user,
            WriteUpload {
                path: "data:/blob.bin".to_string(),
                options: WriteOptions::default(),
                upload: chunked_body(&content, 8192),
            },
        )
        .await?;
    assert_eq!(written.size, content.len() as u64);
    assert_eq!(written.filename, "blob.bin");

    let response = harness
        .fs()
        .readfile(&user, "data:/blob.bin", &ReadOptions::default())
        .await?;
    assert_eq!(response.status, 200);
    assert_eq!(
        response.header("Content-Length"),
        Some(content.len().to_string().as_str())
    );
    assert_eq!(collect_body(response.body).await?, content);

    assert_file_content(&harness.root().join("data/blob.bin"), &content);

    harness.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn test_overwrite_off_keeps_existing_file() -> Result<()> {
    let harness = TestHarness::with_config(|b| b.add_mount(MountConfig::disk("data", "data"))).await?;
    let user = harness.user("alice", &[]);
    create_file_str(&harness.root().join("data/keep.txt"), "original")?;

    let result = harness
        .fs()
        .writefile(
            &user,
            WriteUpload {
                path: "data:/keep.txt".to_string(),
                options: WriteOptions { overwrite: false },
                upload: body(b"replacement"),
            },
        )
        .await;
    assert!(matches!(result, Err(VfsError::AlreadyExists(_))));
    assert_file_content_str(&harness.root().join("data/keep.txt"), "original");

    harness.fs().writefile(&user, upload("data:/keep.txt", b"replacement")).await?;
    assert_file_content_str(&harness.root().join("data/keep.txt"), "replacement");

    harness.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn test_upload_limit() -> Result<()> {
    let harness = TestHarness::with_config(|b| {
        b.max_upload_size("1KB")
            .add_mount(MountConfig::disk("data", "data"))
    })
    .await?;
    let user = harness.user("alice", &[]);

    let result = harness
        .fs()
        .writefile(
            &user,
            WriteUpload {
                path: "data:/big.bin".to_string(),
                options: WriteOptions::default(),
                upload: chunked_body(&pattern(4096), 512),
            },
        )
        .await;
    match result {
        Err(e @ VfsError::FileTooLarge) => assert_eq!(e.status_code(), 413),
        other => panic!("expected FileTooLarge, got {:?}", other),
    }
    assert_not_exists(&harness.root().join("data/big.bin"));

    harness.fs().writefile(&user, upload("data:/small.bin", &pattern(1024))).await?;
    assert_file_exists(&harness.root().join("data/small.bin"));

    harness.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn test_mkdir_ensure() -> Result<()> {
    let harness = TestHarness::with_config(|b| b.add_mount(MountConfig::disk("data", "data"))).await?;
    let user = harness.user("alice", &[]);
    let ensure = MkdirOptions { ensure: true };
    let plain = MkdirOptions::default();

    harness.fs().mkdir(&user, "data:/a/b/c", &ensure).await?;
    harness.fs().mkdir(&user, "data:/a/b/c", &ensure).await?;
    assert_dir_exists(&harness.root().join("data/a/b/c"));

    harness.fs().mkdir(&user, "data:/single", &plain).await?;
    let second = harness.fs().mkdir(&user, "data:/single", &plain).await;
    assert!(matches!(second, Err(VfsError::AlreadyExists(_))));

    harness.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn test_listing_order_and_dotfiles() -> Result<()> {
    let harness = TestHarness::with_fixtures(
        |b| b.add_mount(MountConfig::disk("data", "data")),
        |root| {
            let data = root.join("data");
            create_file(&data.join("aaa.txt"), &pattern(10))?;
            create_file(&data.join("big.bin"), &pattern(5000))?;
            create_file_str(&data.join(".hidden"), "x")?;
            std::fs::create_dir_all(data.join("zdir"))?;
            std::fs::create_dir_all(data.join("Bdir"))?;
            Ok(())
        },
    )
    .await?;
    let client = harness.client(harness.user("alice", &[]));

    let by_name = client.readdir("data:/", &ListOptions::default()).await?;
    assert_listing(&by_name, &["Bdir", "zdir", "aaa.txt", "big.bin"]);

    // Directories stay first even when sorting by size, descending
    let by_size = client
        .readdir(
            "data:/",
            &ListOptions {
                sort: SortField::Size,
                direction: SortDirection::Desc,
                ..Default::default()
            },
        )
        .await?;
    assert_listing(&by_size, &["zdir", "Bdir", "big.bin", "aaa.txt"]);
    assert_eq!(by_size[2].human_size.as_deref(), Some("4.9 KB"));

    let with_hidden = client
        .readdir(
            "data:/",
            &ListOptions {
                show_hidden: true,
                ..Default::default()
            },
        )
        .await?;
    assert_listing(&with_hidden, &["Bdir", "zdir", ".hidden", "aaa.txt", "big.bin"]);

    let nested = client.readdir("data:/zdir", &ListOptions::default()).await?;
    assert_listing(&nested, &[".."]);
    assert_eq!(nested[0].path, "data:/");

    harness.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn test_range_read() -> Result<()> {
    let harness = TestHarness::with_fixtures(
        |b| b.add_mount(MountConfig::disk("data", "data")),
        |root| Ok(create_file(&root.join("data/k.bin"), &pattern(1000))?),
    )
    .await?;
    let user = harness.user("alice", &[]);

    let response = harness
        .fs()
        .readfile(
            &user,
            "data:/k.bin",
            &ReadOptions {
                range: Some("bytes=0-99".to_string()),
                download: false,
            },
        )
        .await?;
    assert_eq!(response.status, 206);
    assert_eq!(response.header("Content-Range"), Some("bytes 0-99/1000"));
    assert_eq!(response.header("Content-Length"), Some("100"));
    assert_eq!(response.header("Accept-Ranges"), Some("bytes"));
    let bytes = collect_body(response.body).await?;
    assert_eq!(bytes, pattern(1000)[..100].to_vec());

    let tail = harness
        .fs()
        .readfile(
            &user,
            "data:/k.bin",
            &ReadOptions {
                range: Some("bytes=900-".to_string()),
                download: true,
            },
        )
        .await?;
    assert_eq!(tail.header("Content-Range"), Some("bytes 900-999/1000"));
    assert!(tail
        .header("Content-Disposition")
        .is_some_and(|v| v.starts_with("attachment")));
    assert_eq!(collect_body(tail.body).await?.len(), 100);

    let beyond = harness
        .fs()
        .readfile(
            &user,
            "data:/k.bin",
            &ReadOptions {
                range: Some("bytes=2000-3000".to_string()),
                download: false,
            },
        )
        .await;
    match beyond {
        Err(e) => assert_eq!(e.status_code(), 416),
        Ok(r) => panic!("expected 416, got {:?}", r),
    }

    harness.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn test_read_only_to_writable_copy() -> Result<()> {
    let harness = TestHarness::with_fixtures(
        |b| {
            b.add_mount(MountConfig::disk("A", "srv/a").read_only())
                .add_mount(MountConfig::disk("B", "srv/b"))
        },
        |root| Ok(create_file_str(&root.join("srv/a/x.txt"), "from a")?),
    )
    .await?;
    let user = harness.user("alice", &[]);

    harness.fs().copy(&user, "A:/x.txt", "B:/x.txt").await?;
    assert_file_content_str(&harness.root().join("srv/b/x.txt"), "from a");

    assert_permission_denied(harness.fs().copy(&user, "B:/x.txt", "A:/y.txt").await);
    assert_not_exists(&harness.root().join("srv/a/y.txt"));

    harness.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn test_search_and_touch() -> Result<()> {
    let harness = TestHarness::with_fixtures(
        |b| {
            b.add_mount(MountConfig::disk("docs", "docs"))
                .add_mount(MountConfig::disk("private", "private").not_searchable())
        },
        |root| {
            create_file_str(&root.join("docs/reports/Q1-report.txt"), "q1")?;
            create_file_str(&root.join("docs/notes.md"), "n")?;
            create_file_str(&root.join("private/report-secret.txt"), "s")?;
            Ok(())
        },
    )
    .await?;
    let client = harness.client(harness.user("alice", &[]));

    let found = client.search("report", None).await?;
    let paths: Vec<&str> = found.iter().map(|f| f.path.as_str()).collect();
    assert!(paths.contains(&"docs:/reports/Q1-report.txt"), "{:?}", paths);
    assert!(!paths.iter().any(|p| p.starts_with("private:")), "{:?}", paths);

    client.touch("docs:/fresh.txt").await?;
    assert!(client.exists("docs:/fresh.txt").await?);
    assert_eq!(client.stat("docs:/fresh.txt").await?.size, 0);

    harness.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn test_unlink_directory_and_root() -> Result<()> {
    let harness = TestHarness::with_fixtures(
        |b| b.add_mount(MountConfig::disk("data", "data")),
        |root| Ok(create_file_str(&root.join("data/tree/leaf/file.txt"), "x")?),
    )
    .await?;
    let user = harness.user("alice", &[]);

    harness.fs().unlink(&user, "data:/tree").await?;
    assert_not_exists(&harness.root().join("data/tree"));

    let root = harness.fs().unlink(&user, "data:/").await;
    assert!(matches!(root, Err(VfsError::InvalidArgument(_))));
    assert_dir_exists(&harness.root().join("data"));

    assert_not_found(harness.fs().stat(&user, "data:/tree").await);

    harness.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn test_registry_catalog() -> Result<()> {
    let catalog = tempfile::NamedTempFile::new()?;
    std::fs::write(
        catalog.path(),
        serde_json::to_vec(&serde_json::json!([
            {"name": "editor", "title": "Editor", "category": "office"},
            {"name": "paint", "title": "Paint", "category": "graphics", "version": "2.1"}
        ]))?,
    )?;
    let catalog_path = catalog.path().to_path_buf();

    let harness = TestHarness::with_config(|b| {
        b.catalog(catalog_path)
            .add_mount(MountConfig::registry("apps"))
            .add_mount(MountConfig::disk("data", "data"))
    })
    .await?;
    let user = harness.user("alice", &[]);

    let mut names: Vec<String> = harness
        .fs()
        .readdir(&user, "apps:/")
        .await?
        .into_iter()
        .map(|e| e.filename)
        .collect();
    names.sort();
    assert_eq!(names, vec!["editor", "paint"]);

    // No range support, so the whole manifest comes back
    let response = harness
        .fs()
        .readfile(
            &user,
            "apps:/paint",
            &ReadOptions {
                range: Some("bytes=0-3".to_string()),
                download: false,
            },
        )
        .await?;
    assert_eq!(response.status, 200);
    assert_eq!(response.header("Accept-Ranges"), Some("none"));
    let manifest: serde_json::Value = serde_json::from_slice(&collect_body(response.body).await?)?;
    assert_eq!(manifest["version"], "2.1");

    harness.fs().copy(&user, "apps:/editor", "data:/editor.json").await?;
    assert_file_exists(&harness.root().join("data/editor.json"));
    assert_permission_denied(harness.fs().unlink(&user, "apps:/editor").await);

    harness.cleanup().await?;
    Ok(())
}
