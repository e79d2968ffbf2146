//! Client-side proxy over a [`Filesystem`]
//!
//! Used by file dialogs and applications. It looks up the current user
//! through a [`UserProvider`] for every call, post-processes listings, and
//! emits optimistic refresh hints after mutations. Hints travel on their own
//! channel, separate from the server's change events; they are best-effort
//! and may arrive before or after the authoritative event.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::adapter::{ByteStream, Capabilities, FileDescriptor, FileStat};
use crate::auth::{User, UserProvider};
use crate::config::MountConfig;
use crate::error::Result;
use crate::events::Subscription;
use crate::filesystem::Filesystem;
use crate::mountpoint::MountInfo;
use crate::path::VfsPath;
use crate::request::{FileResponse, MkdirOptions, ReadOptions, WriteOptions, WriteUpload};
use crate::size::format_size;

const HINT_CAPACITY: usize = 256;

/// A file given either as a bare path or as a descriptor
#[derive(Debug, Clone)]
pub enum FileRef {
    Path(String),
    Descriptor(FileDescriptor),
}

impl FileRef {
    pub fn path(&self) -> &str {
        match self {
            FileRef::Path(p) => p,
            FileRef::Descriptor(d) => &d.path,
        }
    }

    /// Descriptor for this reference. Bare paths become placeholders; a
    /// trailing `/` marks a directory.
    pub fn into_descriptor(self) -> Result<FileDescriptor> {
        match self {
            FileRef::Descriptor(d) => Ok(d),
            FileRef::Path(p) => {
                let is_dir = p.ends_with('/');
                let path = VfsPath::parse(&p)?;
                Ok(FileDescriptor::placeholder(&path, is_dir || path.is_root()))
            }
        }
    }
}

impl From<&str> for FileRef {
    fn from(p: &str) -> Self {
        FileRef::Path(p.to_string())
    }
}

impl From<String> for FileRef {
    fn from(p: String) -> Self {
        FileRef::Path(p)
    }
}

impl From<FileDescriptor> for FileRef {
    fn from(d: FileDescriptor) -> Self {
        FileRef::Descriptor(d)
    }
}

impl From<&FileDescriptor> for FileRef {
    fn from(d: &FileDescriptor) -> Self {
        FileRef::Descriptor(d.clone())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortField {
    #[default]
    Filename,
    Size,
    Mtime,
    Mime,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

pub type EntryFilter = Arc<dyn Fn(&FileDescriptor) -> bool + Send + Sync>;

/// Listing post-processing
#[derive(Clone, Default)]
pub struct ListOptions {
    pub sort: SortField,
    pub direction: SortDirection,
    /// Include dot-prefixed entries
    pub show_hidden: bool,
    /// Keep only entries this returns true for
    pub filter: Option<EntryFilter>,
}

impl fmt::Debug for ListOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListOptions")
            .field("sort", &self.sort)
            .field("direction", &self.direction)
            .field("show_hidden", &self.show_hidden)
            .field("filter", &self.filter.is_some())
            .finish()
    }
}

fn compare(a: &FileDescriptor, b: &FileDescriptor, field: SortField) -> Ordering {
    let by_name = || a.filename.to_lowercase().cmp(&b.filename.to_lowercase());
    match field {
        SortField::Filename => by_name(),
        SortField::Size => a.size.cmp(&b.size).then_with(by_name),
        SortField::Mtime => a.stat.mtime.cmp(&b.stat.mtime).then_with(by_name),
        SortField::Mime => a.mime.cmp(&b.mime).then_with(by_name),
    }
}

/// Sort, filter and decorate a raw listing of `dir`
pub fn process_listing(
    dir: &VfsPath,
    entries: Vec<FileDescriptor>,
    options: &ListOptions,
) -> Vec<FileDescriptor> {
    let (mut dirs, mut files): (Vec<_>, Vec<_>) = entries
        .into_iter()
        .filter(|e| options.show_hidden || !e.filename.starts_with('.'))
        .filter(|e| options.filter.as_ref().map_or(true, |keep| keep(e)))
        .partition(|e| e.is_directory);

    for list in [&mut dirs, &mut files] {
        list.sort_by(|a, b| {
            let ord = compare(a, b, options.sort);
            match options.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        });
    }

    for file in &mut files {
        file.human_size = Some(format_size(file.size));
    }

    let mut out = Vec::with_capacity(dirs.len() + files.len() + 1);
    if !dir.is_root() {
        let mut parent = FileDescriptor::directory(&dir.parent(), FileStat::default());
        parent.filename = "..".to_string();
        out.push(parent);
    }
    out.extend(dirs);
    out.extend(files);
    out
}

/// What a download resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Download {
    /// The adapter serves the file directly
    Link(String),
    /// Content fetched through the service
    Blob {
        filename: String,
        mime: String,
        data: Bytes,
    },
}

/// Optimistic local refresh hint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeHint {
    /// Directory whose listing is probably stale
    pub path: String,
}

pub struct Client {
    fs: Arc<Filesystem>,
    users: Arc<dyn UserProvider>,
    hints: broadcast::Sender<ChangeHint>,
}

impl Client {
    pub fn new(fs: Arc<Filesystem>, users: Arc<dyn UserProvider>) -> Self {
        let (hints, _) = broadcast::channel(HINT_CAPACITY);
        Self { fs, users, hints }
    }

    async fn user(&self) -> Result<User> {
        self.users.current_user().await
    }

    fn hint(&self, path: &str) {
        let parent = match VfsPath::parse(path) {
            Ok(p) => p.parent().to_string(),
            Err(_) => return,
        };
        debug!("hint: {} changed", parent);
        let _ = self.hints.send(ChangeHint { path: parent });
    }

    /// Optimistic refresh hints for mutations made through this client
    pub fn hints(&self) -> broadcast::Receiver<ChangeHint> {
        self.hints.subscribe()
    }

    /// Authoritative change events for the current user
    pub async fn subscribe(&self) -> Result<Subscription> {
        Ok(self.fs.subscribe(self.user().await?))
    }

    pub async fn mountpoints(&self) -> Result<Vec<MountInfo>> {
        Ok(self.fs.mountpoints(&self.user().await?))
    }

    pub async fn mount(&self, config: &MountConfig) -> Result<MountInfo> {
        let mount = self.fs.mount(config).await?;
        Ok(MountInfo::from(mount.as_ref()))
    }

    pub async fn unmount(&self, name: &str) -> Result<()> {
        self.fs.unmount(name).await
    }

    pub async fn capabilities(&self, file: impl Into<FileRef>) -> Result<Capabilities> {
        let file = file.into();
        self.fs.capabilities(&self.user().await?, file.path()).await
    }

    pub async fn readdir(
        &self,
        dir: impl Into<FileRef>,
        options: &ListOptions,
    ) -> Result<Vec<FileDescriptor>> {
        let dir = dir.into();
        let path = VfsPath::parse(dir.path())?;
        let entries = self.fs.readdir(&self.user().await?, dir.path()).await?;
        Ok(process_listing(&path, entries, options))
    }

    pub async fn readfile(
        &self,
        file: impl Into<FileRef>,
        options: &ReadOptions,
    ) -> Result<FileResponse> {
        let file = file.into();
        self.fs
            .readfile(&self.user().await?, file.path(), options)
            .await
    }

    pub async fn writefile(
        &self,
        file: impl Into<FileRef>,
        data: ByteStream,
        options: WriteOptions,
    ) -> Result<FileDescriptor> {
        let file = file.into();
        let upload = WriteUpload {
            path: file.path().to_string(),
            options,
            upload: data,
        };
        let written = self.fs.writefile(&self.user().await?, upload).await?;
        self.hint(file.path());
        Ok(written)
    }

    pub async fn copy(&self, from: impl Into<FileRef>, to: impl Into<FileRef>) -> Result<()> {
        let (from, to) = (from.into(), to.into());
        self.fs
            .copy(&self.user().await?, from.path(), to.path())
            .await?;
        self.hint(to.path());
        Ok(())
    }

    pub async fn rename(&self, from: impl Into<FileRef>, to: impl Into<FileRef>) -> Result<()> {
        let (from, to) = (from.into(), to.into());
        self.fs
            .rename(&self.user().await?, from.path(), to.path())
            .await?;
        self.hint(from.path());
        self.hint(to.path());
        Ok(())
    }

    pub async fn mkdir(&self, dir: impl Into<FileRef>, ensure: bool) -> Result<()> {
        let dir = dir.into();
        self.fs
            .mkdir(&self.user().await?, dir.path(), &MkdirOptions { ensure })
            .await?;
        self.hint(dir.path());
        Ok(())
    }

    pub async fn unlink(&self, file: impl Into<FileRef>) -> Result<()> {
        let file = file.into();
        self.fs.unlink(&self.user().await?, file.path()).await?;
        self.hint(file.path());
        Ok(())
    }

    pub async fn touch(&self, file: impl Into<FileRef>) -> Result<()> {
        let file = file.into();
        self.fs.touch(&self.user().await?, file.path()).await?;
        self.hint(file.path());
        Ok(())
    }

    pub async fn exists(&self, file: impl Into<FileRef>) -> Result<bool> {
        let file = file.into();
        self.fs.exists(&self.user().await?, file.path()).await
    }

    pub async fn stat(&self, file: impl Into<FileRef>) -> Result<FileDescriptor> {
        let file = file.into();
        self.fs.stat(&self.user().await?, file.path()).await
    }

    pub async fn url(&self, file: impl Into<FileRef>) -> Result<Option<String>> {
        let file = file.into();
        self.fs.url(&self.user().await?, file.path()).await
    }

    /// Direct link when the adapter offers one, otherwise the whole content
    pub async fn download(&self, file: impl Into<FileRef>) -> Result<Download> {
        let file = file.into();
        let user = self.user().await?;

        if self.fs.capabilities(&user, file.path()).await?.url {
            if let Some(url) = self.fs.url(&user, file.path()).await? {
                return Ok(Download::Link(url));
            }
        }

        let options = ReadOptions {
            range: None,
            download: true,
        };
        let response = self.fs.readfile(&user, file.path(), &options).await?;
        let mime = response
            .header("Content-Type")
            .unwrap_or(crate::mime::DEFAULT_MIME)
            .to_string();

        let mut data = BytesMut::new();
        let mut body = response.body;
        while let Some(chunk) = body.next().await {
            data.extend_from_slice(&chunk?);
        }

        let filename = VfsPath::parse(file.path())?.basename().to_string();
        Ok(Download::Blob {
            filename,
            mime,
            data: data.freeze(),
        })
    }

    /// Search under `root`, or across every searchable mountpoint
    pub async fn search(&self, pattern: &str, root: Option<&str>) -> Result<Vec<FileDescriptor>> {
        let user = self.user().await?;
        if let Some(root) = root {
            return self.fs.search(&user, root, pattern).await;
        }

        let mut results = Vec::new();
        for mount in self.fs.mountpoints(&user) {
            if !mount.searchable {
                continue;
            }
            match self.fs.search(&user, &mount.root, pattern).await {
                Ok(found) => results.extend(found),
                Err(e) => warn!("search in {} failed: {}", mount.root, e),
            }
        }
        Ok(results)
    }
}
