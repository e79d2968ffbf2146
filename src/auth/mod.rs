//! Identity abstractions for request authorization
//!
//! The VFS never authenticates anyone itself. It asks a `UserProvider` for
//! the caller's identity and checks mountpoint group requirements against it.

pub mod static_user;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use static_user::StaticUserProvider;

/// The caller of a VFS operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

impl User {
    pub fn new(username: impl Into<String>, groups: &[&str]) -> Self {
        Self {
            username: username.into(),
            groups: groups.iter().map(|g| g.to_string()).collect(),
        }
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }

    /// Check the user against a required group list.
    ///
    /// With `strict` every group must be held, otherwise one is enough.
    /// An empty requirement always passes.
    pub fn satisfies(&self, required: &[String], strict: bool) -> bool {
        if required.is_empty() {
            return true;
        }
        if strict {
            required.iter().all(|g| self.in_group(g))
        } else {
            required.iter().any(|g| self.in_group(g))
        }
    }
}

/// Source of the current user, supplied by the session/auth service.
#[async_trait]
pub trait UserProvider: Send + Sync {
    async fn current_user(&self) -> Result<User>;
}
