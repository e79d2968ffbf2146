//! Filesystem service and mount lifecycle

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::adapter::disk::DEFAULT_WATCH_DEBOUNCE;
use crate::adapter::{
    Adapter, AdapterRegistry, Capabilities, DiskAdapter, NullAdapter, PackageCatalog,
    RegistryAdapter, WatchCallback, WatchHandle,
};
use crate::auth::User;
use crate::config::{Config, MountConfig};
use crate::error::{Result, VfsError};
use crate::events::{ChangeEvent, ChangeNotifier, Subscription};
use crate::mountpoint::{MountInfo, MountRegistry, Mountpoint};
use crate::path::{is_valid_mount_name, VfsPath};
use crate::request::Method;
use crate::template::RootTemplate;

/// Process-wide settings for a [`Filesystem`]
#[derive(Debug, Clone)]
pub struct FilesystemOptions {
    /// Static root template tokens (`{root}` and friends)
    pub vars: HashMap<String, String>,
    /// Largest accepted upload in bytes
    pub max_upload_size: Option<u64>,
    pub watch_debounce: Duration,
}

impl Default for FilesystemOptions {
    fn default() -> Self {
        let mut vars = HashMap::new();
        if let Ok(cwd) = std::env::current_dir() {
            vars.insert("root".to_string(), cwd.to_string_lossy().into_owned());
        }
        Self {
            vars,
            max_upload_size: None,
            watch_debounce: DEFAULT_WATCH_DEBOUNCE,
        }
    }
}

/// The VFS: mounted mountpoints, their adapters, cached capabilities and the
/// change bus. Constructed once and shared by reference.
pub struct Filesystem {
    pub(crate) options: FilesystemOptions,
    adapters: RwLock<AdapterRegistry>,
    mounts: MountRegistry,
    capabilities: DashMap<String, Capabilities>,
    watchers: Mutex<HashMap<String, WatchHandle>>,
    pub(crate) notifier: ChangeNotifier,
}

impl Filesystem {
    /// Service with the `disk` and `null` adapters registered
    pub fn new(options: FilesystemOptions) -> Self {
        let mut adapters = AdapterRegistry::new();
        adapters.register(
            "disk",
            Arc::new(DiskAdapter::with_debounce(options.watch_debounce)),
        );
        adapters.register("null", Arc::new(NullAdapter));

        Self {
            options,
            adapters: RwLock::new(adapters),
            mounts: MountRegistry::new(),
            capabilities: DashMap::new(),
            watchers: Mutex::new(HashMap::new()),
            notifier: ChangeNotifier::default(),
        }
    }

    /// Build from resolved configuration. Mounts are not mounted yet.
    pub fn from_config(config: &Config) -> Result<Self> {
        let fs = Self::new(FilesystemOptions {
            vars: config.vars.clone(),
            max_upload_size: config.limits.max_upload_size,
            watch_debounce: config.watch.debounce,
        });

        if let Some(path) = &config.catalog {
            let catalog = PackageCatalog::from_file(path)?;
            fs.register_adapter("registry", Arc::new(RegistryAdapter::new(Arc::new(catalog))));
        }

        Ok(fs)
    }

    /// Add or replace an adapter. Existing mountpoints keep the instance
    /// they resolve on their next call.
    pub fn register_adapter(&self, id: impl Into<String>, adapter: Arc<dyn Adapter>) {
        let id = id.into();
        debug!("Registering adapter {}", id);
        self.adapters.write().register(id, adapter);
    }

    pub fn adapter(&self, id: &str) -> Result<Arc<dyn Adapter>> {
        self.adapters.read().get(id)
    }

    pub(crate) fn adapter_for(&self, mount: &Mountpoint) -> Result<Arc<dyn Adapter>> {
        self.adapter(&mount.adapter)
    }

    /// Mount a configured mountpoint
    pub async fn mount(&self, config: &MountConfig) -> Result<Arc<Mountpoint>> {
        info!("Mounting {}:/ ({})", config.name, config.adapter);

        if !is_valid_mount_name(&config.name) {
            return Err(VfsError::Config(format!("Invalid mount name: {:?}", config.name)));
        }
        let adapter = self.adapter(&config.adapter)?;
        if self.mounts.contains(&config.name) {
            return Err(VfsError::MountpointAlreadyMounted(config.name.clone()));
        }

        let template = config
            .root
            .as_deref()
            .map(|root| RootTemplate::parse(root, &self.options.vars))
            .transpose()?;

        let mount = Arc::new(
            Mountpoint::new(
                config.name.clone(),
                config.adapter.clone(),
                config.attributes.clone(),
                template,
            )
            .with_label(config.label.clone()),
        );

        adapter.mount(&mount).await?;

        // Opened before the mount is visible, so no request sees it unwatched
        let watcher = if mount.attributes.watch {
            self.open_watch(&mount, adapter.as_ref()).await
        } else {
            None
        };

        if let Err(e) = self.mounts.insert(mount.clone()) {
            // Lost a race with a concurrent mount of the same name
            if let Some(handle) = watcher {
                handle.close().await;
            }
            if let Err(undo) = adapter.unmount(&mount).await {
                warn!("Undoing mount hook for {} failed: {}", mount.name, undo);
            }
            return Err(e);
        }

        if let Some(handle) = watcher {
            self.adopt_watcher(&mount, handle).await;
        }

        info!("Mounted {}", mount.root());
        Ok(mount)
    }

    async fn open_watch(&self, mount: &Arc<Mountpoint>, adapter: &dyn Adapter) -> Option<WatchHandle> {
        let notifier = self.notifier.clone();
        let name = mount.name.clone();
        let callback: WatchCallback = Arc::new(move |event| {
            let path = VfsPath::new(name.clone(), &event.relative);
            notifier.publish(
                ChangeEvent::Watch {
                    path: path.to_string(),
                    event: event.kind,
                },
                event.segments,
            );
        });

        match adapter.watch(mount, callback).await {
            Ok(Some(handle)) => Some(handle),
            Ok(None) => {
                debug!("Adapter for {} does not watch", mount.name);
                None
            }
            Err(e) => {
                warn!("Failed to start watcher for {}: {}", mount.name, e);
                None
            }
        }
    }

    /// Record a watcher for `mount`, or close it if the mount was torn down
    /// in the meantime. Checked under the watchers lock that `unmount` takes.
    async fn adopt_watcher(&self, mount: &Arc<Mountpoint>, handle: WatchHandle) {
        let stale = {
            let mut watchers = self.watchers.lock();
            if mount.is_mounted() {
                watchers.insert(mount.name.clone(), handle);
                None
            } else {
                Some(handle)
            }
        };
        if let Some(handle) = stale {
            debug!("{} was unmounted while its watcher started", mount.name);
            handle.close().await;
        }
    }

    /// Unmount by name. The watcher is closed and awaited first.
    pub async fn unmount(&self, name: &str) -> Result<()> {
        if !self.mounts.contains(name) {
            return Err(VfsError::MountpointNotMounted(name.to_string()));
        }
        info!("Unmounting {}:/", name);

        let (mount, watcher) = {
            let mut watchers = self.watchers.lock();
            let mount = self.mounts.lookup(name)?;
            mount.set_mounted(false);
            (mount, watchers.remove(name))
        };
        if let Some(handle) = watcher {
            handle.close().await;
        }

        match self.adapter_for(&mount) {
            Ok(adapter) => {
                if let Err(e) = adapter.unmount(&mount).await {
                    warn!("Unmount hook for {} failed: {}", name, e);
                }
            }
            Err(e) => warn!("No adapter for {} on unmount: {}", name, e),
        }

        self.invalidate_capabilities(name);
        self.mounts.remove(name)?;
        Ok(())
    }

    pub async fn unmount_all(&self) {
        info!("Unmounting all mountpoints");
        for mount in self.mounts.list() {
            if let Err(e) = self.unmount(&mount.name).await {
                warn!("Failed to unmount {}: {}", mount.name, e);
            }
        }
    }

    /// Mountpoints the user may access
    pub fn mountpoints(&self, user: &User) -> Vec<MountInfo> {
        self.mounts
            .list()
            .iter()
            .filter(|m| m.authorize(user, Method::Readdir).is_ok())
            .map(|m| MountInfo::from(m.as_ref()))
            .collect()
    }

    /// Parse a path and find its mountpoint
    pub fn resolve(&self, path: &str) -> Result<(Arc<Mountpoint>, VfsPath)> {
        self.mounts.resolve(path)
    }

    pub fn count(&self) -> usize {
        self.mounts.len()
    }

    pub fn is_watching(&self, name: &str) -> bool {
        self.watchers.lock().contains_key(name)
    }

    /// Capabilities of a mountpoint, fetched from the adapter once
    pub async fn capabilities_of(&self, mount: &Mountpoint) -> Result<Capabilities> {
        if let Some(caps) = self.capabilities.get(&mount.name) {
            return Ok(*caps);
        }
        let caps = self.adapter_for(mount)?.capabilities(mount).await?;
        debug!("Capabilities for {}: {:?}", mount.name, caps);
        self.capabilities.insert(mount.name.clone(), caps);
        Ok(caps)
    }

    /// Drop the cached capabilities of a mountpoint
    pub fn invalidate_capabilities(&self, name: &str) {
        self.capabilities.remove(name);
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    /// Open a change session for `user`
    pub fn subscribe(&self, user: User) -> Subscription {
        self.notifier.connect(user)
    }
}

impl std::fmt::Debug for Filesystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filesystem")
            .field("adapters", &self.adapters.read().ids())
            .field("mounts", &self.mounts.len())
            .field("watchers", &self.watchers.lock().len())
            .finish_non_exhaustive()
    }
}
