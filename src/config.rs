//! Configuration parsing and structures

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::adapter::disk::DEFAULT_WATCH_DEBOUNCE;
use crate::error::VfsError;
use crate::mountpoint::MountAttributes;
use crate::path::is_valid_mount_name;
use crate::request::Method;
use crate::size::parse_size;
use crate::template::RootTemplate;

// =============================================================================
// Raw Config (Deserialized from YAML)
// =============================================================================

/// Raw configuration as deserialized from YAML.
/// This is converted to `Config` via `resolve()`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Static root template tokens
    #[serde(default)]
    pub vars: HashMap<String, String>,

    #[serde(default)]
    pub limits: RawLimits,

    #[serde(default)]
    pub watch: WatchConfig,

    /// JSON file listing installed application manifests
    pub catalog: Option<PathBuf>,

    /// Attribute defaults applied to every mount
    #[serde(default)]
    pub defaults: MountDefaults,

    /// Mountpoints, in registration order
    pub mounts: Vec<RawMountConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawLimits {
    /// Largest accepted upload, e.g. "100MB"
    pub max_upload_size: Option<String>,
}

/// Mount attribute defaults section
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MountDefaults {
    pub adapter: Option<String>,
    pub groups: Option<Vec<String>>,
    pub strict_groups: Option<bool>,
    pub searchable: Option<bool>,
    pub watch: Option<bool>,
    pub read_only: Option<bool>,
}

/// Raw mount configuration before resolution
#[derive(Debug, Clone, Deserialize)]
pub struct RawMountConfig {
    /// Name used as the path prefix (`name:/...`)
    pub name: String,

    /// Display label, defaults to the name
    pub label: Option<String>,

    /// Adapter id (inherits from defaults, then `disk`)
    pub adapter: Option<String>,

    /// Root template for disk-backed mounts, e.g. `{root}/home/{username}`
    pub root: Option<String>,

    /// Attribute overrides
    #[serde(default)]
    pub attributes: RawMountAttributes,

    /// Per-method group requirements
    #[serde(default)]
    pub method_groups: HashMap<String, Vec<String>>,
}

/// Mount-level attributes - all optional, missing values inherit from defaults
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMountAttributes {
    pub read_only: Option<bool>,
    pub groups: Option<Vec<String>>,
    pub strict_groups: Option<bool>,
    pub searchable: Option<bool>,
    pub watch: Option<bool>,
    pub local: Option<bool>,
}

// =============================================================================
// Resolved Config (Ready for use)
// =============================================================================

/// Top-level configuration (resolved from RawConfig)
#[derive(Debug, Clone)]
pub struct Config {
    pub logging: LoggingConfig,

    /// Static template tokens, `root` always present
    pub vars: HashMap<String, String>,

    pub limits: Limits,

    pub watch: WatchConfig,

    pub catalog: Option<PathBuf>,

    /// Mountpoints (fully resolved)
    pub mounts: Vec<MountConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Watcher tuning
#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    /// Repeated events for one path inside this window are dropped
    #[serde(with = "humantime_serde", default = "default_debounce")]
    pub debounce: Duration,
}

fn default_debounce() -> Duration {
    DEFAULT_WATCH_DEBOUNCE
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce: default_debounce(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Limits {
    pub max_upload_size: Option<u64>,
}

/// Mountpoint configuration (resolved)
#[derive(Debug, Clone)]
pub struct MountConfig {
    pub name: String,
    pub label: String,
    pub adapter: String,
    pub root: Option<String>,
    pub attributes: MountAttributes,
}

impl MountConfig {
    /// Minimal mount with default attributes
    pub fn new(name: impl Into<String>, adapter: impl Into<String>, root: Option<&str>) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            adapter: adapter.into(),
            root: root.map(str::to_string),
            attributes: MountAttributes::default(),
        }
    }

    pub fn with_attributes(mut self, attributes: MountAttributes) -> Self {
        self.attributes = attributes;
        self
    }
}

// =============================================================================
// Resolution Logic
// =============================================================================

impl RawConfig {
    /// Resolve raw config into final config by merging mount overrides with defaults
    pub fn resolve(self) -> Result<Config, ConfigError> {
        let RawConfig {
            logging,
            mut vars,
            limits,
            watch,
            catalog,
            defaults,
            mounts,
        } = self;

        if !vars.contains_key("root") {
            let cwd = std::env::current_dir()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_else(|_| ".".to_string());
            vars.insert("root".to_string(), cwd);
        }

        let max_upload_size = match &limits.max_upload_size {
            Some(raw) => Some(parse_size(raw).ok_or_else(|| {
                ConfigError::ValidationError(format!("Invalid max_upload_size: {:?}", raw))
            })?),
            None => None,
        };

        let mounts = mounts
            .into_iter()
            .map(|raw| Self::resolve_mount(&defaults, raw))
            .collect();

        Ok(Config {
            logging,
            vars,
            limits: Limits { max_upload_size },
            watch,
            catalog,
            mounts,
        })
    }

    fn resolve_mount(defaults: &MountDefaults, raw: RawMountConfig) -> MountConfig {
        let base = MountAttributes::default();
        let attrs = raw.attributes;

        let adapter = raw
            .adapter
            .or_else(|| defaults.adapter.clone())
            .unwrap_or_else(|| "disk".to_string());

        // The registry is synthetic; it is read-only unless someone insists
        let read_only_fallback = adapter == "registry" || base.read_only;

        let attributes = MountAttributes {
            read_only: attrs
                .read_only
                .or(defaults.read_only)
                .unwrap_or(read_only_fallback),
            groups: attrs
                .groups
                .or_else(|| defaults.groups.clone())
                .unwrap_or(base.groups),
            strict_groups: attrs
                .strict_groups
                .or(defaults.strict_groups)
                .unwrap_or(base.strict_groups),
            searchable: attrs
                .searchable
                .or(defaults.searchable)
                .unwrap_or(base.searchable),
            watch: attrs.watch.or(defaults.watch).unwrap_or(base.watch),
            local: attrs.local.unwrap_or(base.local),
            method_groups: raw.method_groups,
        };

        MountConfig {
            label: raw.label.unwrap_or_else(|| raw.name.clone()),
            name: raw.name,
            adapter,
            root: raw.root,
            attributes,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(path.clone(), e.to_string()))?;

        Self::from_str(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        raw.resolve()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mounts.is_empty() {
            return Err(ConfigError::ValidationError(
                "At least one mount point is required".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for mount in &self.mounts {
            if !is_valid_mount_name(&mount.name) {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid mount name: {:?}",
                    mount.name
                )));
            }
            if !names.insert(&mount.name) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate mount name: {}",
                    mount.name
                )));
            }

            for method in mount.attributes.method_groups.keys() {
                if method.parse::<Method>().is_err() {
                    return Err(ConfigError::ValidationError(format!(
                        "Mount {}: unknown method {:?} in method_groups",
                        mount.name, method
                    )));
                }
            }

            match (mount.adapter.as_str(), &mount.root) {
                ("disk", None) => {
                    return Err(ConfigError::ValidationError(format!(
                        "Mount {} uses the disk adapter but has no root",
                        mount.name
                    )));
                }
                ("registry", _) if self.catalog.is_none() => {
                    return Err(ConfigError::ValidationError(format!(
                        "Mount {} uses the registry adapter but no catalog is configured",
                        mount.name
                    )));
                }
                _ => {}
            }

            if let Some(root) = &mount.root {
                RootTemplate::parse(root, &self.vars).map_err(|e| {
                    ConfigError::ValidationError(format!("Mount {}: {}", mount.name, e))
                })?;
            }
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadError(PathBuf, String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for VfsError {
    fn from(e: ConfigError) -> Self {
        VfsError::Config(e.to_string())
    }
}
