//! mountvfs: a virtual filesystem over pluggable storage adapters
//!
//! Storage backends are exposed as named mountpoints and addressed with
//! `name:/path`. One uniform file API (list, read, write, copy, rename,
//! delete, stat, search, touch, watch) is dispatched to whichever adapter
//! backs the mountpoint, with group based access control and read-only
//! flags enforced before any adapter is touched.
//!
//! # Architecture
//!
//! - **Adapters**: storage backends implementing the [`adapter::Adapter`]
//!   trait. `disk` serves templated directories on the local disk,
//!   `registry` lists the installed application catalog, `null` does nothing.
//! - **Filesystem**: the service object. Owns the mount registry, the adapter
//!   registry, the capability cache, watchers and the change bus.
//! - **Dispatch**: resolves, authorizes and runs each operation, streaming
//!   cross-adapter copies and moves through [`transfer::Transfer`].
//! - **Events**: post-mutation and watcher changes, delivered only to
//!   sessions whose user matches the dynamic root segments.
//! - **Client**: listing post-processing, download fallback and optimistic
//!   refresh hints for UI consumers.
//!
//! # Example
//!
//! ```no_run
//! use mountvfs::auth::User;
//! use mountvfs::config::Config;
//! use mountvfs::Filesystem;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_file(&"config.yaml".into())?;
//! config.validate()?;
//!
//! let fs = Filesystem::from_config(&config)?;
//! for mount in &config.mounts {
//!     fs.mount(mount).await?;
//! }
//!
//! let alice = User::new("alice", &["users"]);
//! for entry in fs.readdir(&alice, "home:/").await? {
//!     println!("{}", entry.path);
//! }
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod auth;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod filesystem;
pub mod mime;
pub mod mountpoint;
pub mod path;
pub mod request;
pub mod size;
pub mod template;
pub mod transfer;

pub use error::{Result, VfsError};
pub use filesystem::{Filesystem, FilesystemOptions};
