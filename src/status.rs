//! Migration lifecycle status and its broadcast stream
//!
//! # Status Flow
//!
//! ```text
//! New
//!  ↓
//! Running ──→ Succeeded
//!    └──────→ Failed
//! ```
//!
//! A finished engine can be run again, which re-enters `Running`.
//!
//! # Stream Semantics
//!
//! - Single writer (the engine), any number of subscribers
//! - A new subscriber immediately receives the latest status, then every
//!   status published after it subscribed
//! - No history replay: earlier values are not delivered
//! - Dropped subscribers are pruned on the next publish

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use strum::{Display, EnumIter, EnumString};

/// Lifecycle state of a migration engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[derive(Display, EnumString, EnumIter)]
pub enum MigrationStatus {
    /// No run has started yet
    #[default]
    New,
    /// A run is in progress
    Running,
    /// The last run finished without error (terminal)
    Succeeded,
    /// The last run stopped on an error or cancellation (terminal)
    Failed,
}

impl MigrationStatus {
    /// Returns true for `Succeeded` and `Failed`
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

#[derive(Debug)]
struct StreamState {
    latest: MigrationStatus,
    subscribers: Vec<Sender<MigrationStatus>>,
}

/// Broadcast of `MigrationStatus` values with replay of the latest one.
///
/// Clones share the same stream.
#[derive(Debug, Clone)]
pub struct StatusStream {
    state: Arc<Mutex<StreamState>>,
}

impl Default for StatusStream {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusStream {
    /// Create a stream whose latest value is `New`
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(StreamState {
                latest: MigrationStatus::New,
                subscribers: Vec::new(),
            })),
        }
    }

    // A panic while holding the lock cannot leave the state half-written:
    // every critical section is a single assignment or a push/retain.
    fn lock(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Most recently published status
    pub fn latest(&self) -> MigrationStatus {
        self.lock().latest
    }

    /// Attach a subscriber. It receives the latest status first.
    pub fn subscribe(&self) -> StatusSubscription {
        let (tx, rx) = mpsc::channel();
        let mut state = self.lock();
        // Receiver is alive, send cannot fail
        let _ = tx.send(state.latest);
        state.subscribers.push(tx);
        StatusSubscription { rx }
    }

    /// Number of subscribers that were still attached at the last publish
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Publish a new status to every subscriber.
    pub(crate) fn publish(&self, status: MigrationStatus) {
        let mut state = self.lock();
        state.latest = status;
        state.subscribers.retain(|tx| tx.send(status).is_ok());
        tracing::debug!(%status, subscribers = state.subscribers.len(), "Published migration status");
    }
}

/// Receiving end of a `StatusStream` subscription.
#[derive(Debug)]
pub struct StatusSubscription {
    rx: Receiver<MigrationStatus>,
}

impl StatusSubscription {
    /// Next status, if one is already waiting
    pub fn try_next(&self) -> Option<MigrationStatus> {
        match self.rx.try_recv() {
            Ok(status) => Some(status),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Wait up to `timeout` for the next status
    pub fn next_timeout(&self, timeout: Duration) -> Option<MigrationStatus> {
        match self.rx.recv_timeout(timeout) {
            Ok(status) => Some(status),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Every status received so far, without blocking
    pub fn drain(&self) -> Vec<MigrationStatus> {
        self.rx.try_iter().collect()
    }
}
