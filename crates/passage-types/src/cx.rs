//! Cooperative cancellation context.
//!
//! A [`Cx`] is handed to every long-running operation the engine starts
//! (transport dispatch, in particular). Cancelling the context is a request,
//! not a preemption: holders observe it at their next checkpoint and resolve
//! the operation as cancelled rather than failed.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Error returned by [`Cx::checkpoint`] once the context is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("operation cancelled")
    }
}

impl std::error::Error for Cancelled {}

/// Shared cancellation flag for one visit.
///
/// Clones observe the same flag, so the engine keeps one clone while the
/// transport holds another; cancelling either side is visible to both.
#[derive(Debug, Clone, Default)]
pub struct Cx {
    flag: Arc<AtomicBool>,
}

impl Cx {
    /// A fresh, uncancelled context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Return `Err(Cancelled)` once cancellation has been requested.
    pub fn checkpoint(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}
