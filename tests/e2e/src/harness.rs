//! Test harness for e2e tests
//!
//! Provides a high-level API for setting up and tearing down test environments.
//! Every harness gets its own temporary directory which is substituted for
//! `{root}` in the mount templates, so tests can run in parallel.
//!
//! ```ignore
//! let harness = TestHarness::with_config(|builder| {
//!     builder.add_mount(MountConfig::disk("home", "home/{username}"))
//! })
//! .await?;
//! // ... test code ...
//! harness.cleanup().await?;
//! ```

use crate::config::{TestConfig, TestConfigBuilder};
use anyhow::{Context, Result};
use mountvfs::auth::{StaticUserProvider, User};
use mountvfs::client::Client;
use mountvfs::config::Config;
use mountvfs::Filesystem;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Initialize logging for tests (call once per test run)
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

/// Directories under `{root}` that must exist before mounting
fn static_dirs(root: &Path, template: &str) -> Option<PathBuf> {
    let relative = template.strip_prefix("{root}")?;
    let mut dir = root.to_path_buf();
    for part in relative.split('/').filter(|p| !p.is_empty()) {
        if part.contains('{') {
            break;
        }
        dir.push(part);
    }
    Some(dir)
}

/// One configured and mounted service instance
pub struct TestHarness {
    temp_dir: TempDir,
    config: Config,
    fs: Arc<Filesystem>,
}

impl TestHarness {
    /// Create a harness from a configuration built by `configure`.
    ///
    /// The `root` var always points at the harness temp directory.
    pub async fn with_config<F>(configure: F) -> Result<Self>
    where
        F: FnOnce(TestConfigBuilder) -> TestConfigBuilder,
    {
        Self::with_fixtures(configure, |_| Ok(())).await
    }

    /// Like `with_config`, running `setup` against the `{root}` directory
    /// before anything is mounted
    pub async fn with_fixtures<F, S>(configure: F, setup: S) -> Result<Self>
    where
        F: FnOnce(TestConfigBuilder) -> TestConfigBuilder,
        S: FnOnce(&Path) -> Result<()>,
    {
        init_logging();

        let temp_dir = TempDir::new().context("Failed to create temp dir")?;
        let root = temp_dir.path().join("data");
        std::fs::create_dir_all(&root)?;

        let builder = TestConfigBuilder::new()
            .logging_level("debug")
            .watch_debounce("20ms");
        let test_config: TestConfig = configure(builder)
            .var("root", &root.to_string_lossy())
            .build();

        for mount in &test_config.mounts {
            if let Some(dir) = mount.root.as_deref().and_then(|t| static_dirs(&root, t)) {
                std::fs::create_dir_all(&dir)
                    .with_context(|| format!("Failed to create {}", dir.display()))?;
            }
        }

        setup(&root)?;

        let config_path = temp_dir.path().join("config.yaml");
        test_config.write_to(&config_path)?;
        debug!("Config written to {:?}", config_path);

        let config = Config::from_file(&config_path).context("Failed to load config")?;
        config.validate().context("Invalid config")?;

        let fs = Arc::new(Filesystem::from_config(&config)?);
        for mount in &config.mounts {
            fs.mount(mount)
                .await
                .with_context(|| format!("Failed to mount {}", mount.name))?;
        }
        info!("Harness ready with {} mountpoint(s)", fs.count());

        Ok(Self {
            temp_dir,
            config,
            fs,
        })
    }

    pub fn fs(&self) -> &Arc<Filesystem> {
        &self.fs
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Directory substituted for `{root}`
    pub fn root(&self) -> PathBuf {
        self.temp_dir.path().join("data")
    }

    /// Scratch space outside every mount
    pub fn scratch(&self) -> PathBuf {
        self.temp_dir.path().to_path_buf()
    }

    /// Real directory `relative` under `{root}`, created if missing
    pub fn dir(&self, relative: &str) -> Result<PathBuf> {
        let dir = self.root().join(relative);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    pub fn user(&self, username: &str, groups: &[&str]) -> User {
        User::new(username, groups)
    }

    /// Client bound to a fixed user
    pub fn client(&self, user: User) -> Client {
        Client::new(self.fs.clone(), Arc::new(StaticUserProvider::new(user)))
    }

    /// Unmount everything and drop the temp directory
    pub async fn cleanup(self) -> Result<()> {
        self.fs.unmount_all().await;
        info!("Harness cleaned up");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_dirs() {
        let root = Path::new("/tmp/x");
        assert_eq!(
            static_dirs(root, "{root}/home/{username}/files"),
            Some(PathBuf::from("/tmp/x/home"))
        );
        assert_eq!(static_dirs(root, "{root}/shared"), Some(PathBuf::from("/tmp/x/shared")));
        assert_eq!(static_dirs(root, "/elsewhere"), None);
    }
}
