pub mod disk;
pub mod null;
pub mod registry;

use std::any::Any;
use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{stream, Stream};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::auth::User;
use crate::error::{Result, VfsError};
use crate::mountpoint::Mountpoint;
use crate::path::VfsPath;
use crate::request::ByteRange;
use crate::template::Segments;

pub use disk::DiskAdapter;
pub use null::NullAdapter;
pub use registry::{PackageCatalog, PackageManifest, RegistryAdapter};

/// Byte stream used for file bodies in both directions
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Timestamps and permission bits attached to a descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    pub mtime: Option<DateTime<Utc>>,
    pub ctime: Option<DateTime<Utc>>,
    pub mode: Option<u32>,
}

/// Canonical file record exchanged with callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    pub path: String,
    pub filename: String,
    pub is_directory: bool,
    pub is_file: bool,
    /// None for directories
    pub mime: Option<String>,
    pub size: u64,
    pub stat: FileStat,
    /// Human readable size, attached by listing post-processing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_size: Option<String>,
}

impl FileDescriptor {
    pub fn file(path: &VfsPath, size: u64, stat: FileStat) -> Self {
        let filename = path.basename().to_string();
        Self {
            path: path.to_string(),
            mime: Some(crate::mime::from_filename(&filename).to_string()),
            filename,
            is_directory: false,
            is_file: true,
            size,
            stat,
            human_size: None,
        }
    }

    pub fn directory(path: &VfsPath, stat: FileStat) -> Self {
        Self {
            path: path.to_string(),
            filename: path.basename().to_string(),
            is_directory: true,
            is_file: false,
            mime: None,
            size: 0,
            stat,
            human_size: None,
        }
    }

    /// Entry whose metadata could not be read
    pub fn placeholder(path: &VfsPath, is_directory: bool) -> Self {
        if is_directory {
            Self::directory(path, FileStat::default())
        } else {
            Self::file(path, 0, FileStat::default())
        }
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }
}

/// Per-mountpoint feature flags, fetched once and cached
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Listings come back already sorted
    pub sort: bool,
    /// Listings can be paged
    pub pagination: bool,
    /// Byte-range reads
    pub ranges: bool,
    /// Recursive search
    pub search: bool,
    /// Change watching
    pub watch: bool,
    /// Direct download URLs
    pub url: bool,
}

/// Where an operation lands: mountpoint, caller and path
#[derive(Debug, Clone)]
pub struct Location {
    pub mount: Arc<Mountpoint>,
    pub user: User,
    pub path: VfsPath,
}

impl Location {
    pub fn new(mount: Arc<Mountpoint>, user: User, path: VfsPath) -> Self {
        Self { mount, user, path }
    }

    /// Same mountpoint and caller, another path
    pub fn at(&self, path: VfsPath) -> Self {
        Self {
            mount: self.mount.clone(),
            user: self.user.clone(),
            path,
        }
    }
}

/// Change kinds reported by watchers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WatchEventKind {
    #[serde(rename = "add")]
    Add,
    #[serde(rename = "addDir")]
    AddDir,
    #[serde(rename = "change")]
    Change,
    #[serde(rename = "unlink")]
    Unlink,
    #[serde(rename = "unlinkDir")]
    UnlinkDir,
}

/// One observed change under a watched root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    /// Dynamic root values the changed path was found under
    pub segments: Segments,
    /// Path relative to the resolved root, `/`-rooted
    pub relative: String,
    pub kind: WatchEventKind,
}

pub type WatchCallback = Arc<dyn Fn(WatchEvent) + Send + Sync>;

/// Running watcher. Closing it stops the OS watcher and waits for the
/// event task to finish.
pub struct WatchHandle {
    _guard: Box<dyn Any + Send>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl WatchHandle {
    pub fn new(guard: impl Any + Send, shutdown: oneshot::Sender<()>, task: JoinHandle<()>) -> Self {
        Self {
            _guard: Box::new(guard),
            shutdown: Some(shutdown),
            task: Some(task),
        }
    }

    pub async fn close(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                debug!("watch task ended abnormally: {}", e);
            }
        }
    }
}

/// Storage backend contract.
///
/// Adapter instances are shared by every mountpoint configured with their
/// id; per-mount state (root template, attributes) travels in the
/// [`Location`]. Every method has a default body that behaves like the null
/// adapter: queries come back empty or false and mutations do nothing, so
/// a partial adapter never breaks dispatch.
#[async_trait]
pub trait Adapter: Send + Sync {
    async fn capabilities(&self, _mount: &Mountpoint) -> Result<Capabilities> {
        Ok(Capabilities::default())
    }

    async fn readdir(&self, _at: &Location) -> Result<Vec<FileDescriptor>> {
        Ok(Vec::new())
    }

    /// Stream a file, or only `range` of it
    async fn readfile(&self, _at: &Location, _range: Option<ByteRange>) -> Result<ByteStream> {
        Ok(Box::pin(stream::empty()))
    }

    /// Write a stream to a file, returning the number of bytes written
    async fn writefile(&self, _at: &Location, _data: ByteStream) -> Result<u64> {
        Ok(0)
    }

    /// Native copy. Only called when both sides use this adapter instance.
    async fn copy(&self, _from: &Location, _to: &Location) -> Result<()> {
        Ok(())
    }

    /// Native rename. Only called when both sides use this adapter instance.
    async fn rename(&self, _from: &Location, _to: &Location) -> Result<()> {
        Ok(())
    }

    async fn mkdir(&self, _at: &Location, _ensure: bool) -> Result<()> {
        Ok(())
    }

    async fn unlink(&self, _at: &Location) -> Result<()> {
        Ok(())
    }

    async fn exists(&self, _at: &Location) -> Result<bool> {
        Ok(false)
    }

    async fn stat(&self, at: &Location) -> Result<FileDescriptor> {
        Err(VfsError::NotFound(at.path.to_string()))
    }

    /// Direct URL for the file, if the backend can serve one
    async fn url(&self, _at: &Location) -> Result<Option<String>> {
        Ok(None)
    }

    async fn search(&self, _at: &Location, _pattern: &str) -> Result<Vec<FileDescriptor>> {
        Ok(Vec::new())
    }

    async fn touch(&self, _at: &Location) -> Result<()> {
        Ok(())
    }

    async fn watch(
        &self,
        _mount: &Arc<Mountpoint>,
        _callback: WatchCallback,
    ) -> Result<Option<WatchHandle>> {
        Ok(None)
    }

    /// Called before a mountpoint using this adapter is registered
    async fn mount(&self, _mount: &Mountpoint) -> Result<()> {
        Ok(())
    }

    /// Called after a mountpoint's watcher is closed, before it is removed
    async fn unmount(&self, _mount: &Mountpoint) -> Result<()> {
        Ok(())
    }
}

/// Identity of adapter instances, the basis for choosing native vs streamed
/// copy/rename.
pub fn same_adapter(a: &Arc<dyn Adapter>, b: &Arc<dyn Adapter>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Adapter id → instance
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<String, Arc<dyn Adapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: impl Into<String>, adapter: Arc<dyn Adapter>) {
        self.adapters.insert(id.into(), adapter);
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn Adapter>> {
        self.adapters
            .get(id)
            .cloned()
            .ok_or_else(|| VfsError::AdapterUnsupported(id.to_string()))
    }

    pub fn ids(&self) -> Vec<String> {
        self.adapters.keys().cloned().collect()
    }
}
