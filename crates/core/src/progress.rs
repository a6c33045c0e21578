//! Cooperative progress reporting and cancellation
//!
//! Long sweeps report a monotonically increasing counter and poll
//! [`Progress::is_cancelled`] once per processed cell (or once per row for
//! per-cell passes). Implementations must be cheap and thread-safe since
//! row-parallel passes call them from worker threads.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Progress sink and cancellation check polled by long-running operations.
pub trait Progress: Sync {
    /// Report that `done` of `total` units of work are finished.
    fn set_progress(&self, _done: usize, _total: usize) {}

    /// Whether the caller asked the operation to stop.
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Progress sink that ignores updates and never cancels.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl Progress for NoProgress {}

/// Shared cancellation flag with a progress counter.
///
/// A token can be cancelled from another thread, or armed to cancel
/// itself once the counter passes a limit.
#[derive(Debug, Default)]
pub struct CancelToken {
    cancelled: AtomicBool,
    done: AtomicUsize,
    limit: Option<usize>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token that reports cancellation once `limit` units are done.
    pub fn after(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Last reported progress counter.
    pub fn done(&self) -> usize {
        self.done.load(Ordering::Relaxed)
    }
}

impl Progress for CancelToken {
    fn set_progress(&self, done: usize, _total: usize) {
        self.done.fetch_max(done, Ordering::Relaxed);
    }

    fn is_cancelled(&self) -> bool {
        if self.cancelled.load(Ordering::Relaxed) {
            return true;
        }
        match self.limit {
            Some(limit) => self.done() >= limit,
            None => false,
        }
    }
}

impl<P: Progress + ?Sized> Progress for &P {
    fn set_progress(&self, done: usize, total: usize) {
        (**self).set_progress(done, total)
    }

    fn is_cancelled(&self) -> bool {
        (**self).is_cancelled()
    }
}
