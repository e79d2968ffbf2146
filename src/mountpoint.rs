//! Mountpoints and the registry that resolves paths to them

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::User;
use crate::error::{Result, VfsError};
use crate::path::VfsPath;
use crate::request::Method;
use crate::template::RootTemplate;

/// Per-mountpoint access and behaviour flags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MountAttributes {
    /// Reject every mutating operation
    pub read_only: bool,
    /// Groups required for any access
    pub groups: Vec<String>,
    /// Require every listed group (true) or just one (false)
    pub strict_groups: bool,
    /// Include in cross-mount searches
    pub searchable: bool,
    /// Open a change watcher on mount
    pub watch: bool,
    /// Backed by storage local to this host
    pub local: bool,
    /// Per-method group requirements replacing `groups`
    pub method_groups: HashMap<String, Vec<String>>,
}

impl Default for MountAttributes {
    fn default() -> Self {
        Self {
            read_only: false,
            groups: Vec::new(),
            strict_groups: true,
            searchable: true,
            watch: false,
            local: true,
            method_groups: HashMap::new(),
        }
    }
}

/// A named storage backend exposed under `name:/`
#[derive(Debug)]
pub struct Mountpoint {
    pub name: String,
    pub label: String,
    /// Adapter id this mountpoint dispatches to
    pub adapter: String,
    pub attributes: MountAttributes,
    /// Parsed root template (disk-like adapters)
    pub template: Option<RootTemplate>,
    mounted: AtomicBool,
}

impl Mountpoint {
    pub fn new(
        name: impl Into<String>,
        adapter: impl Into<String>,
        attributes: MountAttributes,
        template: Option<RootTemplate>,
    ) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            adapter: adapter.into(),
            attributes,
            template,
            mounted: AtomicBool::new(false),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// VFS root of this mountpoint, e.g. `home:/`
    pub fn root(&self) -> String {
        format!("{}:/", self.name)
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    pub(crate) fn set_mounted(&self, mounted: bool) {
        self.mounted.store(mounted, Ordering::SeqCst);
    }

    /// Groups the caller must hold for `method`
    pub fn required_groups(&self, method: Method) -> &[String] {
        self.attributes
            .method_groups
            .get(method.as_str())
            .unwrap_or(&self.attributes.groups)
    }

    /// Group check, performed before any adapter call
    pub fn authorize(&self, user: &User, method: Method) -> Result<()> {
        let required = self.required_groups(method);
        if user.satisfies(required, self.attributes.strict_groups) {
            return Ok(());
        }
        debug!(
            mount = %self.name,
            user = %user.username,
            method = method.as_str(),
            "group requirement not met"
        );
        Err(VfsError::PermissionDenied(format!(
            "{} on {} requires groups {:?}",
            method.as_str(),
            self.root(),
            required
        )))
    }

    /// Read-only check for the writing side of an operation
    pub fn check_writable(&self, method: Method) -> Result<()> {
        if self.attributes.read_only {
            return Err(VfsError::PermissionDenied(format!(
                "{} on read-only mountpoint {}",
                method.as_str(),
                self.root()
            )));
        }
        Ok(())
    }
}

/// Public view of a mountpoint for listings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountInfo {
    pub name: String,
    pub label: String,
    pub root: String,
    pub adapter: String,
    pub read_only: bool,
    pub searchable: bool,
    pub local: bool,
    pub mounted: bool,
}

impl From<&Mountpoint> for MountInfo {
    fn from(m: &Mountpoint) -> Self {
        Self {
            name: m.name.clone(),
            label: m.label.clone(),
            root: m.root(),
            adapter: m.adapter.clone(),
            read_only: m.attributes.read_only,
            searchable: m.attributes.searchable,
            local: m.attributes.local,
            mounted: m.is_mounted(),
        }
    }
}

/// Ordered set of mounted mountpoints.
///
/// Mutation is rare (boot, admin mount/unmount), lookups happen on every request.
#[derive(Debug, Default)]
pub struct MountRegistry {
    mounts: RwLock<Vec<Arc<Mountpoint>>>,
}

impl MountRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a mountpoint. The first registration of a name wins.
    pub fn insert(&self, mount: Arc<Mountpoint>) -> Result<()> {
        let mut mounts = self.mounts.write();
        if mounts.iter().any(|m| m.name == mount.name) {
            return Err(VfsError::MountpointAlreadyMounted(mount.name.clone()));
        }
        mount.set_mounted(true);
        mounts.push(mount);
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Result<Arc<Mountpoint>> {
        let mut mounts = self.mounts.write();
        let pos = mounts
            .iter()
            .position(|m| m.name == name)
            .ok_or_else(|| VfsError::MountpointNotMounted(name.to_string()))?;
        let mount = mounts.remove(pos);
        mount.set_mounted(false);
        Ok(mount)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.mounts.read().iter().any(|m| m.name == name)
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<Mountpoint>> {
        self.mounts
            .read()
            .iter()
            .find(|m| m.name == name)
            .cloned()
            .ok_or_else(|| VfsError::MountpointNotFound(name.to_string()))
    }

    /// Parse a VFS path and find the mountpoint that owns it
    pub fn resolve(&self, path: &str) -> Result<(Arc<Mountpoint>, VfsPath)> {
        let parsed = VfsPath::parse(path)?;
        let mount = self.lookup(&parsed.mount)?;
        Ok((mount, parsed))
    }

    pub fn list(&self) -> Vec<Arc<Mountpoint>> {
        self.mounts.read().clone()
    }

    pub fn len(&self) -> usize {
        self.mounts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.mounts.read().is_empty()
    }
}
