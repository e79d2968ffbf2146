//! Copy and move between mountpoints backed by different adapter instances.
//!
//! Nothing native can span two adapters, so the source is read as a stream
//! and written to the destination. A move deletes the source only after
//! every write succeeded; if that delete then fails the data exists twice
//! and the caller gets [`VfsError::SourceRetained`].

use std::sync::Arc;

use tracing::{debug, warn};

use crate::adapter::{Adapter, Location};
use crate::error::{Result, VfsError};

/// A pair of adapters data is streamed between
pub struct Transfer<'a> {
    source: &'a Arc<dyn Adapter>,
    target: &'a Arc<dyn Adapter>,
}

impl<'a> Transfer<'a> {
    pub fn new(source: &'a Arc<dyn Adapter>, target: &'a Arc<dyn Adapter>) -> Self {
        Self { source, target }
    }

    /// Stream `from` to `to`, recursing into directories
    pub async fn copy(&self, from: &Location, to: &Location) -> Result<u64> {
        let mut pending = vec![(from.clone(), to.clone())];
        let mut total = 0u64;

        while let Some((src, dst)) = pending.pop() {
            let stat = self.source.stat(&src).await?;

            if stat.is_directory {
                debug!("transfer: mkdir {} for {}", dst.path, src.path);
                self.target.mkdir(&dst, true).await?;
                for entry in self.source.readdir(&src).await? {
                    let name = entry.filename.as_str();
                    pending.push((src.at(src.path.join(name)), dst.at(dst.path.join(name))));
                }
            } else {
                debug!("transfer: stream {} -> {}", src.path, dst.path);
                let body = self.source.readfile(&src, None).await?;
                total += self.target.writefile(&dst, body).await?;
            }
        }

        Ok(total)
    }

    /// Copy, then delete the source
    pub async fn rename(&self, from: &Location, to: &Location) -> Result<u64> {
        let written = self.copy(from, to).await?;

        if let Err(e) = self.source.unlink(from).await {
            warn!(
                "Moved {} to {} but could not remove the source: {}",
                from.path, to.path, e
            );
            return Err(VfsError::SourceRetained {
                from: from.path.to_string(),
                to: to.path.to_string(),
                reason: e.to_string(),
            });
        }

        Ok(written)
    }
}
