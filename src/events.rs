//! Change notifications pushed to connected sessions.
//!
//! Two producers feed the same bus: the dispatcher after a successful
//! mutation, and mountpoint watchers when the backing store changes. Each
//! message carries the dynamic root segments it was produced under
//! (e.g. `username=alice`); a session only sees messages whose segments all
//! match its own user. Messages with no segments reach every session.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{trace, warn};

use crate::adapter::WatchEventKind;
use crate::auth::User;
use crate::template::Segments;

pub const DEFAULT_CAPACITY: usize = 1024;

/// Authoritative server-side change
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChangeEvent {
    /// A mutation through the dispatcher changed this directory's content
    DirectoryChanged { path: String },
    /// A watcher saw this path change in the backing store
    Watch { path: String, event: WatchEventKind },
}

impl ChangeEvent {
    pub fn path(&self) -> &str {
        match self {
            ChangeEvent::DirectoryChanged { path } | ChangeEvent::Watch { path, .. } => path,
        }
    }
}

#[derive(Debug, Clone)]
struct ChangeMessage {
    event: ChangeEvent,
    segments: Segments,
}

/// Whether a session's user may see a change produced under `segments`
pub fn user_matches(user: &User, segments: &Segments) -> bool {
    segments
        .iter()
        .all(|(var, value)| var.value_for(user) == value.as_str())
}

#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    tx: broadcast::Sender<ChangeMessage>,
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ChangeNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. Returns the number of connected sessions, before
    /// per-session filtering.
    pub fn publish(&self, event: ChangeEvent, segments: Segments) -> usize {
        trace!(path = event.path(), ?segments, "publish change");
        self.tx
            .send(ChangeMessage { event, segments })
            .unwrap_or(0)
    }

    /// Open a session for `user`
    pub fn connect(&self, user: User) -> Subscription {
        Subscription {
            user: Some(user),
            rx: self.tx.subscribe(),
        }
    }

    /// Unfiltered subscription for the service itself
    pub fn monitor(&self) -> Subscription {
        Subscription {
            user: None,
            rx: self.tx.subscribe(),
        }
    }

    pub fn session_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// One connected session's view of the bus
pub struct Subscription {
    user: Option<User>,
    rx: broadcast::Receiver<ChangeMessage>,
}

impl Subscription {
    /// Session owner, None for a monitor
    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    fn visible(&self, msg: &ChangeMessage) -> bool {
        self.user
            .as_ref()
            .map_or(true, |user| user_matches(user, &msg.segments))
    }

    fn username(&self) -> &str {
        self.user.as_ref().map_or("*", |u| u.username.as_str())
    }

    /// Next event visible to this session. None once the notifier is gone.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.recv().await {
                Ok(msg) => {
                    if self.visible(&msg) {
                        return Some(msg.event);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(user = self.username(), lagged = n, "change subscription lagged behind");
                }
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv)
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(msg) => {
                    if self.visible(&msg) {
                        return Some(msg.event);
                    }
                }
                Err(broadcast::error::TryRecvError::Empty)
                | Err(broadcast::error::TryRecvError::Closed) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(user = self.username(), lagged = n, "change subscription lagged behind");
                }
            }
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("user", &self.username())
            .finish_non_exhaustive()
    }
}
