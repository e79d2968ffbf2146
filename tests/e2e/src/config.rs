//! Configuration builder for e2e tests
//!
//! Generates YAML configuration files in the format `mountvfs` expects.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Mount attribute overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttributesConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strict_groups: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub searchable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watch: Option<bool>,
}

/// Mount point configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountConfig {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adapter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    #[serde(default)]
    pub attributes: AttributesConfig,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub method_groups: HashMap<String, Vec<String>>,
}

impl MountConfig {
    /// Disk mount rooted at `{root}/<subdir>`
    pub fn disk(name: &str, subdir: &str) -> Self {
        Self {
            name: name.to_string(),
            label: None,
            adapter: None,
            root: Some(format!("{{root}}/{}", subdir)),
            attributes: AttributesConfig::default(),
            method_groups: HashMap::new(),
        }
    }

    /// Read-only mount over the installed application catalog
    pub fn registry(name: &str) -> Self {
        Self {
            name: name.to_string(),
            label: None,
            adapter: Some("registry".to_string()),
            root: None,
            attributes: AttributesConfig::default(),
            method_groups: HashMap::new(),
        }
    }

    pub fn adapter(mut self, adapter: &str) -> Self {
        self.adapter = Some(adapter.to_string());
        self
    }

    pub fn read_only(mut self) -> Self {
        self.attributes.read_only = Some(true);
        self
    }

    pub fn watch(mut self) -> Self {
        self.attributes.watch = Some(true);
        self
    }

    pub fn groups(mut self, groups: &[&str], strict: bool) -> Self {
        self.attributes.groups = Some(groups.iter().map(|g| g.to_string()).collect());
        self.attributes.strict_groups = Some(strict);
        self
    }

    pub fn method_groups(mut self, method: &str, groups: &[&str]) -> Self {
        self.method_groups.insert(
            method.to_string(),
            groups.iter().map(|g| g.to_string()).collect(),
        );
        self
    }

    pub fn not_searchable(mut self) -> Self {
        self.attributes.searchable = Some(false);
        self
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "debug".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_upload_size: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    pub debounce: String,
}

/// Complete test configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestConfig {
    pub logging: LoggingConfig,
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watch: Option<WatchConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog: Option<PathBuf>,
    pub mounts: Vec<MountConfig>,
}

impl TestConfig {
    /// Serialize to YAML
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Write config to a file
    pub fn write_to(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_yaml()?)?;
        Ok(())
    }
}

/// Builder for test configurations
#[derive(Debug, Default)]
pub struct TestConfigBuilder {
    config: TestConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn logging_level(mut self, level: &str) -> Self {
        self.config.logging.level = level.to_string();
        self
    }

    pub fn var(mut self, name: &str, value: &str) -> Self {
        self.config.vars.insert(name.to_string(), value.to_string());
        self
    }

    pub fn max_upload_size(mut self, size: &str) -> Self {
        self.config.limits.max_upload_size = Some(size.to_string());
        self
    }

    pub fn watch_debounce(mut self, debounce: &str) -> Self {
        self.config.watch = Some(WatchConfig {
            debounce: debounce.to_string(),
        });
        self
    }

    pub fn catalog(mut self, path: PathBuf) -> Self {
        self.config.catalog = Some(path);
        self
    }

    pub fn add_mount(mut self, mount: MountConfig) -> Self {
        self.config.mounts.push(mount);
        self
    }

    pub fn build(self) -> TestConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_is_accepted_by_the_service() {
        let config = TestConfigBuilder::new()
            .var("root", "/srv")
            .max_upload_size("1MB")
            .add_mount(MountConfig::disk("home", "home/{username}").watch())
            .add_mount(
                MountConfig::disk("shared", "shared")
                    .groups(&["staff"], false)
                    .method_groups("unlink", &["admin"]),
            )
            .build();

        let yaml = config.to_yaml().unwrap();
        let parsed = mountvfs::config::Config::from_str(&yaml).unwrap();
        parsed.validate().unwrap();

        assert_eq!(parsed.mounts[0].root.as_deref(), Some("{root}/home/{username}"));
        assert!(parsed.mounts[0].attributes.watch);
        assert!(!parsed.mounts[1].attributes.strict_groups);
        assert_eq!(parsed.limits.max_upload_size, Some(1024 * 1024));
    }
}
