//! Registry adapter
//!
//! A synthetic, read-only mount listing the installed application catalog.
//! Each package shows up as a file named after the package whose content is
//! its manifest.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::adapter::{Adapter, ByteStream, Capabilities, FileDescriptor, FileStat, Location};
use crate::error::{Result, VfsError};
use crate::mountpoint::Mountpoint;
use crate::path::VfsPath;
use crate::request::ByteRange;

pub const MANIFEST_MIME: &str = "application/x-package-manifest";

/// Metadata for one installed application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// Installed application catalog
#[derive(Debug, Clone, Default)]
pub struct PackageCatalog {
    packages: Vec<PackageManifest>,
}

impl PackageCatalog {
    pub fn new(packages: Vec<PackageManifest>) -> Self {
        Self { packages }
    }

    /// Load a JSON array of manifests
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            VfsError::Config(format!("Failed to read catalog {}: {}", path.display(), e))
        })?;
        let packages: Vec<PackageManifest> = serde_json::from_str(&content).map_err(|e| {
            VfsError::Config(format!("Failed to parse catalog {}: {}", path.display(), e))
        })?;
        debug!("Loaded {} packages from {:?}", packages.len(), path);
        Ok(Self::new(packages))
    }

    pub fn get(&self, name: &str) -> Option<&PackageManifest> {
        self.packages.iter().find(|p| p.name == name)
    }

    pub fn packages(&self) -> &[PackageManifest] {
        &self.packages
    }
}

pub struct RegistryAdapter {
    catalog: Arc<PackageCatalog>,
}

impl RegistryAdapter {
    pub fn new(catalog: Arc<PackageCatalog>) -> Self {
        Self { catalog }
    }

    fn manifest_bytes(manifest: &PackageManifest) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(manifest)
            .map_err(|e| VfsError::Io(std::io::Error::other(e)))
    }

    fn describe(path: &VfsPath, manifest: &PackageManifest) -> Result<FileDescriptor> {
        let size = Self::manifest_bytes(manifest)?.len() as u64;
        Ok(FileDescriptor::file(path, size, FileStat::default()).with_mime(MANIFEST_MIME))
    }

    /// Package addressed by a path; only direct children of the root exist
    fn lookup(&self, path: &VfsPath) -> Option<&PackageManifest> {
        let name = path.relative();
        if name.is_empty() || name.contains('/') {
            return None;
        }
        self.catalog.get(name)
    }
}

#[async_trait]
impl Adapter for RegistryAdapter {
    async fn capabilities(&self, _mount: &Mountpoint) -> Result<Capabilities> {
        Ok(Capabilities {
            sort: false,
            pagination: false,
            ranges: false,
            search: false,
            watch: false,
            url: false,
        })
    }

    async fn mount(&self, mount: &Mountpoint) -> Result<()> {
        if !mount.attributes.read_only {
            return Err(VfsError::Config(format!(
                "Registry mountpoint {} must be read-only",
                mount.name
            )));
        }
        Ok(())
    }

    async fn readdir(&self, at: &Location) -> Result<Vec<FileDescriptor>> {
        trace!("registry readdir: {}", at.path);
        if !at.path.is_root() {
            return match self.lookup(&at.path) {
                Some(_) => Err(VfsError::NotADirectory(at.path.to_string())),
                None => Err(VfsError::NotFound(at.path.to_string())),
            };
        }
        self.catalog
            .packages()
            .iter()
            .map(|manifest| Self::describe(&at.path.join(&manifest.name), manifest))
            .collect()
    }

    async fn readfile(&self, at: &Location, _range: Option<ByteRange>) -> Result<ByteStream> {
        let manifest = self
            .lookup(&at.path)
            .ok_or_else(|| VfsError::NotFound(at.path.to_string()))?;
        let body = Bytes::from(Self::manifest_bytes(manifest)?);
        Ok(Box::pin(stream::iter(vec![Ok(body)])))
    }

    async fn exists(&self, at: &Location) -> Result<bool> {
        Ok(at.path.is_root() || self.lookup(&at.path).is_some())
    }

    async fn stat(&self, at: &Location) -> Result<FileDescriptor> {
        if at.path.is_root() {
            return Ok(FileDescriptor::directory(&at.path, FileStat::default()));
        }
        let manifest = self
            .lookup(&at.path)
            .ok_or_else(|| VfsError::NotFound(at.path.to_string()))?;
        Self::describe(&at.path, manifest)
    }
}
