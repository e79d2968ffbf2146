//! Disk adapter
//!
//! Serves mountpoints backed by a directory on the local disk. The directory
//! comes from the mountpoint's root template, resolved per request so that
//! `{root}/home/{username}` maps every caller onto their own tree.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use globset::{GlobBuilder, GlobMatcher};
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, trace, warn};

use crate::adapter::{
    Adapter, ByteStream, Capabilities, FileDescriptor, FileStat, Location, WatchCallback,
    WatchEvent, WatchEventKind, WatchHandle,
};
use crate::error::{Result, VfsError};
use crate::mountpoint::Mountpoint;
use crate::path::VfsPath;
use crate::request::ByteRange;
use crate::template::RootTemplate;

/// Default window in which repeated watcher events for one path are dropped
pub const DEFAULT_WATCH_DEBOUNCE: Duration = Duration::from_millis(100);

/// Adapter for directories on the local disk
#[derive(Debug, Clone)]
pub struct DiskAdapter {
    debounce: Duration,
}

impl Default for DiskAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl DiskAdapter {
    pub fn new() -> Self {
        Self {
            debounce: DEFAULT_WATCH_DEBOUNCE,
        }
    }

    pub fn with_debounce(debounce: Duration) -> Self {
        Self { debounce }
    }

    fn template(mount: &Mountpoint) -> Result<&RootTemplate> {
        mount.template.as_ref().ok_or_else(|| {
            VfsError::Config(format!("Mountpoint {} has no root directory", mount.name))
        })
    }

    /// Real directory backing the mount root for this caller
    fn root(at: &Location) -> Result<PathBuf> {
        Self::template(&at.mount)?.resolve(&at.user)
    }

    /// Real path for a location. VFS paths are normalized on parse, so
    /// joining cannot climb out of the root.
    fn real_path(at: &Location) -> Result<PathBuf> {
        let root = Self::root(at)?;
        let relative = at.path.relative();
        Ok(if relative.is_empty() {
            root
        } else {
            root.join(relative)
        })
    }

    async fn describe(path: &VfsPath, real: &Path) -> Result<FileDescriptor> {
        let meta = fs::metadata(real)
            .await
            .map_err(|e| VfsError::from_io(e, path.to_string()))?;
        Ok(descriptor_from_metadata(path, &meta))
    }

    async fn copy_dir(from: &Path, to: &Path) -> std::io::Result<()> {
        let mut pending = vec![(from.to_path_buf(), to.to_path_buf())];
        while let Some((src, dst)) = pending.pop() {
            fs::create_dir_all(&dst).await?;
            let mut dir = fs::read_dir(&src).await?;
            while let Some(entry) = dir.next_entry().await? {
                let target = dst.join(entry.file_name());
                if entry.file_type().await?.is_dir() {
                    pending.push((entry.path(), target));
                } else {
                    fs::copy(entry.path(), &target).await?;
                }
            }
        }
        Ok(())
    }

    async fn walk(
        root: &Path,
        base: &VfsPath,
        matcher: &GlobMatcher,
    ) -> std::io::Result<Vec<FileDescriptor>> {
        let mut results = Vec::new();
        let mut pending = vec![(root.to_path_buf(), base.clone())];

        while let Some((dir_path, vfs_dir)) = pending.pop() {
            let mut dir = fs::read_dir(&dir_path).await?;
            while let Some(entry) = dir.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                let child = vfs_dir.join(&name);
                let meta = entry.metadata().await?;

                if matcher.is_match(&name) {
                    results.push(descriptor_from_metadata(&child, &meta));
                }
                if meta.is_dir() {
                    pending.push((entry.path(), child));
                }
            }
        }

        Ok(results)
    }
}

/// Build a descriptor from filesystem metadata
fn descriptor_from_metadata(path: &VfsPath, meta: &std::fs::Metadata) -> FileDescriptor {
    let stat = FileStat {
        mtime: meta.modified().ok().map(DateTime::<Utc>::from),
        ctime: meta.created().ok().map(DateTime::<Utc>::from),
        mode: file_mode(meta),
    };
    if meta.is_dir() {
        FileDescriptor::directory(path, stat)
    } else {
        FileDescriptor::file(path, meta.len(), stat)
    }
}

#[cfg(unix)]
fn file_mode(meta: &std::fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(meta.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn file_mode(_meta: &std::fs::Metadata) -> Option<u32> {
    None
}

/// Turn a search pattern into a case-insensitive filename glob.
/// Plain text matches anywhere in the name.
fn search_matcher(pattern: &str) -> Result<GlobMatcher> {
    let pattern = pattern.trim();
    let glob = if pattern.contains(['*', '?', '[', '{']) {
        pattern.to_string()
    } else {
        format!("*{}*", pattern)
    };
    GlobBuilder::new(&glob)
        .case_insensitive(true)
        .literal_separator(true)
        .build()
        .map(|g| g.compile_matcher())
        .map_err(|e| VfsError::InvalidArgument(format!("Bad search pattern '{}': {}", pattern, e)))
}

/// Queue a raw change for the debounce task. Returns false if it was dropped.
fn forward(tx: &mpsc::Sender<(PathBuf, WatchEventKind)>, change: (PathBuf, WatchEventKind)) -> bool {
    match tx.try_send(change) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full((path, kind))) => {
            warn!(?kind, path = %path.display(), "watch queue full, dropping event");
            false
        }
        // Task stopped; the watcher is about to be dropped
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

/// Hidden sibling an upload is staged in before it replaces `target`
fn partial_path(target: &Path) -> PathBuf {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let id = NEXT.fetch_add(1, Ordering::Relaxed);
    target.with_file_name(format!(".{}.{}-{}.part", name, std::process::id(), id))
}

/// Map a raw notify event onto watcher change kinds
fn classify(event: &Event) -> Vec<(PathBuf, WatchEventKind)> {
    let added = |p: &PathBuf| {
        if p.is_dir() {
            WatchEventKind::AddDir
        } else {
            WatchEventKind::Add
        }
    };

    match &event.kind {
        EventKind::Create(CreateKind::Folder) => event
            .paths
            .iter()
            .map(|p| (p.clone(), WatchEventKind::AddDir))
            .collect(),
        EventKind::Create(CreateKind::File) => event
            .paths
            .iter()
            .map(|p| (p.clone(), WatchEventKind::Add))
            .collect(),
        EventKind::Create(_) => event.paths.iter().map(|p| (p.clone(), added(p))).collect(),
        EventKind::Remove(RemoveKind::Folder) => event
            .paths
            .iter()
            .map(|p| (p.clone(), WatchEventKind::UnlinkDir))
            .collect(),
        EventKind::Remove(_) => event
            .paths
            .iter()
            .map(|p| (p.clone(), WatchEventKind::Unlink))
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => event
            .paths
            .iter()
            .map(|p| (p.clone(), WatchEventKind::Unlink))
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            event.paths.iter().map(|p| (p.clone(), added(p))).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut out = Vec::new();
            if let Some(from) = event.paths.first() {
                out.push((from.clone(), WatchEventKind::Unlink));
            }
            if let Some(to) = event.paths.get(1) {
                out.push((to.clone(), added(to)));
            }
            out
        }
        EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => event
            .paths
            .iter()
            .map(|p| (p.clone(), WatchEventKind::Change))
            .collect(),
        _ => Vec::new(),
    }
}

#[async_trait]
impl Adapter for DiskAdapter {
    async fn capabilities(&self, _mount: &Mountpoint) -> Result<Capabilities> {
        Ok(Capabilities {
            sort: false,
            pagination: false,
            ranges: true,
            search: true,
            watch: true,
            url: false,
        })
    }

    async fn mount(&self, mount: &Mountpoint) -> Result<()> {
        let template = Self::template(mount)?;
        debug!(mount = %mount.name, root = template.source(), "disk mount");
        Ok(())
    }

    async fn readdir(&self, at: &Location) -> Result<Vec<FileDescriptor>> {
        let real = Self::real_path(at)?;
        trace!("readdir: path={} real={:?}", at.path, real);

        let mut dir = fs::read_dir(&real)
            .await
            .map_err(|e| VfsError::from_io(e, at.path.to_string()))?;

        let mut entries = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| VfsError::from_io(e, at.path.to_string()))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            let child = at.path.join(&name);

            // Follow symlinks like a regular stat would
            match fs::metadata(entry.path()).await {
                Ok(meta) => entries.push(descriptor_from_metadata(&child, &meta)),
                Err(e) => {
                    warn!("readdir: could not stat {}: {}", child, e);
                    let is_dir = entry
                        .file_type()
                        .await
                        .map(|t| t.is_dir())
                        .unwrap_or(false);
                    entries.push(FileDescriptor::placeholder(&child, is_dir));
                }
            }
        }

        Ok(entries)
    }

    async fn readfile(&self, at: &Location, range: Option<ByteRange>) -> Result<ByteStream> {
        let real = Self::real_path(at)?;
        trace!("readfile: path={} real={:?} range={:?}", at.path, real, range);

        let mut file = fs::File::open(&real)
            .await
            .map_err(|e| VfsError::from_io(e, at.path.to_string()))?;

        let meta = file.metadata().await?;
        if meta.is_dir() {
            return Err(VfsError::IsADirectory(at.path.to_string()));
        }

        let stream = match range {
            Some(range) => {
                file.seek(std::io::SeekFrom::Start(range.start)).await?;
                ReaderStream::new(file.take(range.length())).boxed()
            }
            None => ReaderStream::new(file).boxed(),
        };

        Ok(Box::pin(stream.map(|chunk| chunk.map_err(VfsError::Io))))
    }

    async fn writefile(&self, at: &Location, mut data: ByteStream) -> Result<u64> {
        let real = Self::real_path(at)?;
        debug!("writefile: path={} real={:?}", at.path, real);

        if let Ok(meta) = fs::metadata(&real).await {
            if meta.is_dir() {
                return Err(VfsError::IsADirectory(at.path.to_string()));
            }
        }

        // Stream into a sibling and swap it in, so a failed upload never
        // touches the existing file
        let partial = partial_path(&real);
        let mut file = fs::File::create(&partial)
            .await
            .map_err(|e| VfsError::from_io(e, at.path.to_string()))?;

        let mut written = 0u64;
        let result: Result<()> = async {
            while let Some(chunk) = data.next().await {
                let chunk = chunk?;
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&partial, &real)
                .await
                .map_err(|e| VfsError::from_io(e, at.path.to_string()))
        }
        .await;

        if let Err(e) = result {
            if let Err(cleanup) = fs::remove_file(&partial).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    warn!("writefile: could not remove partial {:?}: {}", partial, cleanup);
                }
            }
            return Err(e);
        }

        Ok(written)
    }

    async fn copy(&self, from: &Location, to: &Location) -> Result<()> {
        let src = Self::real_path(from)?;
        let dst = Self::real_path(to)?;
        debug!("copy: {} -> {} ({:?} -> {:?})", from.path, to.path, src, dst);

        let meta = fs::metadata(&src)
            .await
            .map_err(|e| VfsError::from_io(e, from.path.to_string()))?;

        if meta.is_dir() {
            // Mounts can overlap on disk even when their VFS paths do not
            if dst.starts_with(&src) {
                return Err(VfsError::InvalidArgument(format!(
                    "Cannot copy {} into itself at {}",
                    from.path, to.path
                )));
            }
            Self::copy_dir(&src, &dst)
                .await
                .map_err(|e| VfsError::from_io(e, to.path.to_string()))
        } else {
            fs::copy(&src, &dst)
                .await
                .map(|_| ())
                .map_err(|e| VfsError::from_io(e, to.path.to_string()))
        }
    }

    async fn rename(&self, from: &Location, to: &Location) -> Result<()> {
        let src = Self::real_path(from)?;
        let dst = Self::real_path(to)?;
        debug!("rename: {} -> {} ({:?} -> {:?})", from.path, to.path, src, dst);

        fs::rename(&src, &dst)
            .await
            .map_err(|e| VfsError::from_io(e, from.path.to_string()))
    }

    async fn mkdir(&self, at: &Location, ensure: bool) -> Result<()> {
        let real = Self::real_path(at)?;
        debug!("mkdir: path={} ensure={}", at.path, ensure);

        let result = if ensure {
            fs::create_dir_all(&real).await
        } else {
            fs::create_dir(&real).await
        };
        result.map_err(|e| VfsError::from_io(e, at.path.to_string()))
    }

    async fn unlink(&self, at: &Location) -> Result<()> {
        let real = Self::real_path(at)?;
        debug!("unlink: path={} real={:?}", at.path, real);

        let meta = fs::symlink_metadata(&real)
            .await
            .map_err(|e| VfsError::from_io(e, at.path.to_string()))?;

        let result = if meta.is_dir() {
            fs::remove_dir_all(&real).await
        } else {
            fs::remove_file(&real).await
        };
        result.map_err(|e| VfsError::from_io(e, at.path.to_string()))
    }

    async fn exists(&self, at: &Location) -> Result<bool> {
        let real = Self::real_path(at)?;
        Ok(fs::try_exists(&real).await.unwrap_or(false))
    }

    async fn stat(&self, at: &Location) -> Result<FileDescriptor> {
        let real = Self::real_path(at)?;
        trace!("stat: path={} real={:?}", at.path, real);
        Self::describe(&at.path, &real).await
    }

    async fn search(&self, at: &Location, pattern: &str) -> Result<Vec<FileDescriptor>> {
        let real = Self::real_path(at)?;
        let matcher = search_matcher(pattern)?;
        debug!("search: root={} pattern={:?}", at.path, pattern);

        match Self::walk(&real, &at.path, &matcher).await {
            Ok(results) => Ok(results),
            Err(e) => {
                warn!("search under {} failed, returning no results: {}", at.path, e);
                Ok(Vec::new())
            }
        }
    }

    async fn touch(&self, at: &Location) -> Result<()> {
        let real = Self::real_path(at)?;
        debug!("touch: path={} real={:?}", at.path, real);

        let path = at.path.to_string();
        tokio::task::spawn_blocking(move || {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&real)?;
            file.set_modified(SystemTime::now())
        })
        .await
        .map_err(|e| VfsError::Io(std::io::Error::other(e)))?
        .map_err(|e| VfsError::from_io(e, path))
    }

    async fn watch(
        &self,
        mount: &Arc<Mountpoint>,
        callback: WatchCallback,
    ) -> Result<Option<WatchHandle>> {
        let template = Self::template(mount)?;
        let base = template.static_base();
        let matcher = template.matcher()?;

        let (tx, mut rx) = mpsc::channel::<(PathBuf, WatchEventKind)>(1024);

        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| match result {
                Ok(event) => {
                    for change in classify(&event) {
                        forward(&tx, change);
                    }
                }
                Err(e) => warn!("watch error: {}", e),
            },
            notify::Config::default(),
        )
        .map_err(|e| VfsError::Io(std::io::Error::other(e)))?;

        watcher
            .watch(&base, RecursiveMode::Recursive)
            .map_err(|e| VfsError::Io(std::io::Error::other(e)))?;

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let debounce = self.debounce;
        let name = mount.name.clone();

        let task = tokio::spawn(async move {
            let mut recent: HashMap<(PathBuf, WatchEventKind), Instant> = HashMap::new();

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        debug!(mount = %name, "watcher shutting down");
                        break;
                    }
                    Some((path, kind)) = rx.recv() => {
                        let now = Instant::now();
                        let key = (path, kind);
                        if let Some(last) = recent.get(&key) {
                            if now.duration_since(*last) < debounce {
                                continue;
                            }
                        }
                        recent.retain(|_, seen| now.duration_since(*seen) < debounce);
                        recent.insert(key.clone(), now);

                        let (path, kind) = key;
                        let Some((segments, relative)) = matcher.split(&path.to_string_lossy()) else {
                            continue;
                        };
                        trace!(mount = %name, ?kind, relative = %relative, "watch event");
                        callback(WatchEvent { segments, relative, kind });
                    }
                    else => break,
                }
            }
        });

        info!(mount = %mount.name, base = %base.display(), pattern = %template.wildcard(), "watcher started");
        Ok(Some(WatchHandle::new(watcher, shutdown_tx, task)))
    }
}
