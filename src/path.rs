//! `name:/path` parsing
//!
//! Every VFS path names its mountpoint in a prefix: `home:/Documents/a.txt`
//! lives on the `home` mountpoint at `/Documents/a.txt`. Mount names are
//! case-sensitive and limited to word characters and `-`.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VfsError};

/// Mount path grammar: a name, one or more colons, then the remainder
static MOUNT_PATH_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([\w-]+):+(.*)$").unwrap());

/// Mount names on their own
static MOUNT_NAME_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\w-]+$").unwrap());

/// A parsed VFS path
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VfsPath {
    /// Mountpoint name (the prefix before `:`)
    pub mount: String,
    /// `/`-rooted path inside the mountpoint
    pub path: String,
}

impl VfsPath {
    /// Parse `name:/path`, failing with `PathFormatInvalid` when the prefix is missing
    pub fn parse(input: &str) -> Result<Self> {
        let caps = MOUNT_PATH_PATTERN
            .captures(input)
            .ok_or_else(|| VfsError::PathFormatInvalid(input.to_string()))?;

        let mount = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let rest = caps.get(2).map(|m| m.as_str()).unwrap_or_default();

        Ok(Self {
            mount: mount.to_string(),
            path: normalize(rest),
        })
    }

    pub fn new(mount: impl Into<String>, path: &str) -> Self {
        Self {
            mount: mount.into(),
            path: normalize(path),
        }
    }

    /// Root of the mountpoint this path lives on
    pub fn root(&self) -> Self {
        Self::new(self.mount.clone(), "/")
    }

    pub fn is_root(&self) -> bool {
        self.path == "/"
    }

    /// Parent directory. The root is its own parent.
    pub fn parent(&self) -> Self {
        let parent = match self.path.rfind('/') {
            Some(0) | None => "/",
            Some(idx) => &self.path[..idx],
        };
        Self::new(self.mount.clone(), parent)
    }

    /// Last path component, empty for the root
    pub fn basename(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or_default()
    }

    pub fn join(&self, name: &str) -> Self {
        let joined = if self.is_root() {
            format!("/{}", name)
        } else {
            format!("{}/{}", self.path, name)
        };
        Self::new(self.mount.clone(), &joined)
    }

    /// Path relative to the mount root, without a leading slash
    pub fn relative(&self) -> &str {
        self.path.trim_start_matches('/')
    }

    /// Whether `other` is this path or lives underneath it
    pub fn contains(&self, other: &VfsPath) -> bool {
        self.mount == other.mount
            && (self.is_root()
                || other.path == self.path
                || other.path.starts_with(&format!("{}/", self.path)))
    }
}

impl fmt::Display for VfsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.mount, self.path)
    }
}

/// Check a bare mountpoint name against the grammar
pub fn is_valid_mount_name(name: &str) -> bool {
    MOUNT_NAME_PATTERN.is_match(name)
}

/// Normalize a mount-relative path: collapse separators, resolve `.` and `..`
/// without escaping the root, strip trailing slashes.
pub fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}
