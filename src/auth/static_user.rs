//! Fixed identity provider.
//!
//! Returns the same user for every call. Used by the daemon for local
//! single-user setups and throughout the tests.

use async_trait::async_trait;

use super::{User, UserProvider};
use crate::error::Result;

/// A user provider that always returns one identity.
pub struct StaticUserProvider {
    user: User,
}

impl StaticUserProvider {
    pub fn new(user: User) -> Self {
        Self { user }
    }
}

#[async_trait]
impl UserProvider for StaticUserProvider {
    async fn current_user(&self) -> Result<User> {
        Ok(self.user.clone())
    }
}
