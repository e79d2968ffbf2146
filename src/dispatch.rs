//! Request dispatch
//!
//! Every operation resolves its mountpoint(s), authorizes the caller and
//! only then touches an adapter. Group checks come first, then the
//! read-only check for the side being written. Successful mutations publish
//! a `DirectoryChanged` event for each affected parent directory.

use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use tracing::{debug, trace};

use crate::adapter::{same_adapter, Adapter, ByteStream, Capabilities, FileDescriptor, Location};
use crate::auth::User;
use crate::error::{Result, VfsError};
use crate::events::ChangeEvent;
use crate::filesystem::Filesystem;
use crate::mime::DEFAULT_MIME;
use crate::request::{
    content_disposition, ByteRange, FileResponse, MkdirOptions, Method, ReadOptions, Request,
    RequestEnvelope, Response, WriteOptions, WriteUpload,
};
use crate::transfer::Transfer;

/// Cap a stream at `max` bytes, failing with `FileTooLarge` past it
fn limit_stream(mut inner: ByteStream, max: u64) -> ByteStream {
    Box::pin(async_stream::try_stream! {
        let mut total = 0u64;
        while let Some(chunk) = inner.next().await {
            let chunk = chunk?;
            total += chunk.len() as u64;
            if total > max {
                Err::<(), _>(VfsError::FileTooLarge)?;
            }
            yield chunk;
        }
    })
}

fn json<T: Serialize>(value: &T) -> Result<Response> {
    serde_json::to_value(value)
        .map(Response::Json)
        .map_err(|e| VfsError::Io(std::io::Error::other(e)))
}

impl Filesystem {
    /// Resolve and authorize one side of an operation.
    ///
    /// `writes` marks the side that gets modified and is subject to the
    /// read-only check.
    fn prepare(
        &self,
        user: &User,
        path: &str,
        method: Method,
        writes: bool,
    ) -> Result<(Location, Arc<dyn Adapter>)> {
        let (mount, path) = self.resolve(path)?;
        mount.authorize(user, method)?;
        if writes {
            mount.check_writable(method)?;
        }
        let adapter = self.adapter_for(&mount)?;
        debug!(user = %user.username, method = method.as_str(), path = %path, "authorized");
        Ok((Location::new(mount, user.clone(), path), adapter))
    }

    /// Refuse to copy or move a path onto itself or into its own subtree
    fn check_not_nested(src: &Location, dst: &Location) -> Result<()> {
        if src.path.contains(&dst.path) {
            return Err(VfsError::InvalidArgument(format!(
                "Cannot place {} inside itself at {}",
                src.path, dst.path
            )));
        }
        Ok(())
    }

    /// Tell sessions that the directory holding `at` changed
    fn notify_parent(&self, at: &Location) {
        let segments = at
            .mount
            .template
            .as_ref()
            .map(|t| t.segments_for(&at.user))
            .unwrap_or_default();
        self.notifier.publish(
            ChangeEvent::DirectoryChanged {
                path: at.path.parent().to_string(),
            },
            segments,
        );
    }

    pub async fn capabilities(&self, user: &User, path: &str) -> Result<Capabilities> {
        let (at, _) = self.prepare(user, path, Method::Capabilities, false)?;
        self.capabilities_of(&at.mount).await
    }

    pub async fn readdir(&self, user: &User, path: &str) -> Result<Vec<FileDescriptor>> {
        let (at, adapter) = self.prepare(user, path, Method::Readdir, false)?;
        trace!("readdir {}", at.path);
        adapter.readdir(&at).await
    }

    /// Stream a file, honoring a `Range` header when the adapter supports it
    pub async fn readfile(
        &self,
        user: &User,
        path: &str,
        options: &ReadOptions,
    ) -> Result<FileResponse> {
        let (at, adapter) = self.prepare(user, path, Method::Readfile, false)?;
        let stat = adapter.stat(&at).await?;
        if stat.is_directory {
            return Err(VfsError::IsADirectory(at.path.to_string()));
        }
        let caps = self.capabilities_of(&at.mount).await?;

        let mut headers = vec![(
            "Content-Type".to_string(),
            stat.mime.clone().unwrap_or_else(|| DEFAULT_MIME.to_string()),
        )];
        headers.push((
            "Accept-Ranges".to_string(),
            if caps.ranges { "bytes" } else { "none" }.to_string(),
        ));

        let range = match options.range.as_deref() {
            Some(header) if caps.ranges => ByteRange::parse(header, stat.size)?,
            _ => None,
        };

        let (status, body) = match range {
            Some(range) => {
                trace!("readfile {} range {:?}", at.path, range);
                headers.push(("Content-Range".to_string(), range.content_range(stat.size)));
                headers.push(("Content-Length".to_string(), range.length().to_string()));
                (206, adapter.readfile(&at, Some(range)).await?)
            }
            None => {
                headers.push(("Content-Length".to_string(), stat.size.to_string()));
                (200, adapter.readfile(&at, None).await?)
            }
        };

        if options.download {
            headers.push((
                "Content-Disposition".to_string(),
                content_disposition(&stat.filename),
            ));
        }

        Ok(FileResponse {
            status,
            headers,
            body,
        })
    }

    /// Write an upload, replacing an existing file unless `overwrite` is off
    pub async fn writefile(&self, user: &User, upload: WriteUpload) -> Result<FileDescriptor> {
        let WriteUpload {
            path,
            options,
            upload,
        } = upload;
        let (at, adapter) = self.prepare(user, &path, Method::Writefile, true)?;
        self.check_write_target(&at, adapter.as_ref(), &options).await?;

        let body = match self.options.max_upload_size {
            Some(max) => limit_stream(upload, max),
            None => upload,
        };
        let written = adapter.writefile(&at, body).await?;
        debug!("writefile {} ({} bytes)", at.path, written);
        self.notify_parent(&at);

        match adapter.stat(&at).await {
            Ok(descriptor) => Ok(descriptor),
            Err(_) => Ok(FileDescriptor::file(&at.path, written, Default::default())),
        }
    }

    async fn check_write_target(
        &self,
        at: &Location,
        adapter: &dyn Adapter,
        options: &WriteOptions,
    ) -> Result<()> {
        if !adapter.exists(at).await? {
            return Ok(());
        }
        let existing = adapter.stat(at).await?;
        if existing.is_directory {
            return Err(VfsError::IsADirectory(at.path.to_string()));
        }
        if !options.overwrite {
            return Err(VfsError::AlreadyExists(at.path.to_string()));
        }
        Ok(())
    }

    /// Copy a file or directory, across mountpoints if needed
    pub async fn copy(&self, user: &User, from: &str, to: &str) -> Result<()> {
        let (src, src_adapter) = self.prepare(user, from, Method::Copy, false)?;
        let (dst, dst_adapter) = self.prepare(user, to, Method::Copy, true)?;
        Self::check_not_nested(&src, &dst)?;

        if same_adapter(&src_adapter, &dst_adapter) {
            debug!("copy {} -> {} (native)", src.path, dst.path);
            src_adapter.copy(&src, &dst).await?;
        } else {
            debug!("copy {} -> {} (streamed)", src.path, dst.path);
            Transfer::new(&src_adapter, &dst_adapter)
                .copy(&src, &dst)
                .await?;
        }

        self.notify_parent(&dst);
        Ok(())
    }

    /// Move a file or directory. Both sides must be writable.
    pub async fn rename(&self, user: &User, from: &str, to: &str) -> Result<()> {
        let (src, src_adapter) = self.prepare(user, from, Method::Rename, true)?;
        let (dst, dst_adapter) = self.prepare(user, to, Method::Rename, true)?;
        Self::check_not_nested(&src, &dst)?;

        if same_adapter(&src_adapter, &dst_adapter) {
            debug!("rename {} -> {} (native)", src.path, dst.path);
            src_adapter.rename(&src, &dst).await?;
        } else {
            debug!("rename {} -> {} (streamed)", src.path, dst.path);
            let result = Transfer::new(&src_adapter, &dst_adapter)
                .rename(&src, &dst)
                .await;
            if let Err(VfsError::SourceRetained { .. }) = &result {
                // The destination was written; listings on that side changed
                self.notify_parent(&dst);
            }
            result?;
        }

        self.notify_parent(&src);
        if src.path.parent() != dst.path.parent() {
            self.notify_parent(&dst);
        }
        Ok(())
    }

    pub async fn mkdir(&self, user: &User, path: &str, options: &MkdirOptions) -> Result<()> {
        let (at, adapter) = self.prepare(user, path, Method::Mkdir, true)?;
        adapter.mkdir(&at, options.ensure).await?;
        self.notify_parent(&at);
        Ok(())
    }

    pub async fn unlink(&self, user: &User, path: &str) -> Result<()> {
        let (at, adapter) = self.prepare(user, path, Method::Unlink, true)?;
        if at.path.is_root() {
            return Err(VfsError::InvalidArgument(format!(
                "Refusing to remove mountpoint root {}",
                at.path
            )));
        }
        adapter.unlink(&at).await?;
        self.notify_parent(&at);
        Ok(())
    }

    pub async fn exists(&self, user: &User, path: &str) -> Result<bool> {
        let (at, adapter) = self.prepare(user, path, Method::Exists, false)?;
        adapter.exists(&at).await
    }

    pub async fn stat(&self, user: &User, path: &str) -> Result<FileDescriptor> {
        let (at, adapter) = self.prepare(user, path, Method::Stat, false)?;
        adapter.stat(&at).await
    }

    pub async fn url(&self, user: &User, path: &str) -> Result<Option<String>> {
        let (at, adapter) = self.prepare(user, path, Method::Url, false)?;
        adapter.url(&at).await
    }

    pub async fn search(
        &self,
        user: &User,
        root: &str,
        pattern: &str,
    ) -> Result<Vec<FileDescriptor>> {
        let (at, adapter) = self.prepare(user, root, Method::Search, false)?;
        adapter.search(&at, pattern).await
    }

    pub async fn touch(&self, user: &User, path: &str) -> Result<()> {
        let (at, adapter) = self.prepare(user, path, Method::Touch, true)?;
        adapter.touch(&at).await?;
        self.notify_parent(&at);
        Ok(())
    }

    /// Transport entry point for every method except `writefile`
    pub async fn handle(&self, envelope: RequestEnvelope) -> Result<Response> {
        let RequestEnvelope { request, user } = envelope;
        trace!(user = %user.username, method = request.method().as_str(), "handle");

        match request {
            Request::Capabilities { path } => json(&self.capabilities(&user, &path).await?),
            Request::Readdir { path } => json(&self.readdir(&user, &path).await?),
            Request::Readfile { path, options } => {
                Ok(Response::File(self.readfile(&user, &path, &options).await?))
            }
            Request::Copy { from, to } => {
                self.copy(&user, &from, &to).await?;
                json(&true)
            }
            Request::Rename { from, to } => {
                self.rename(&user, &from, &to).await?;
                json(&true)
            }
            Request::Mkdir { path, options } => {
                self.mkdir(&user, &path, &options).await?;
                json(&true)
            }
            Request::Unlink { path } => {
                self.unlink(&user, &path).await?;
                json(&true)
            }
            Request::Exists { path } => json(&self.exists(&user, &path).await?),
            Request::Stat { path } => json(&self.stat(&user, &path).await?),
            Request::Url { path } => json(&self.url(&user, &path).await?),
            Request::Search { root, pattern } => {
                json(&self.search(&user, &root, &pattern).await?)
            }
            Request::Touch { path } => {
                self.touch(&user, &path).await?;
                json(&true)
            }
        }
    }

    /// Transport entry point for multipart `writefile`
    pub async fn handle_upload(&self, user: &User, upload: WriteUpload) -> Result<Response> {
        json(&self.writefile(user, upload).await?)
    }
}
