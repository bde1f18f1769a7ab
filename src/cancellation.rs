//! Cooperative cancellation shared between the caller, the engine and collaborators.

use crate::error::Cancelled;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cloneable stop signal.
///
/// All clones observe the same flag. Once cancelled it stays cancelled.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
}

impl Cancellation {
    /// Create a signal that has not been cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that the current run stop as soon as possible
    pub fn cancel(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            tracing::debug!("Cancellation requested");
        }
    }

    /// Returns true once `cancel` has been called on any clone
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Returns `Err(Cancelled)` if cancellation was requested.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}
