//! Cancellation tokens for directory walks.
//!
//! Each walk is tagged with a version. Starting a newer walk for the same key
//! bumps the version, and the older walk notices on its next check and stops.
//!
//! ## Sparse Checking
//!
//! Walk loops over large directories use `is_cancelled_sparse()`, which only
//! reads the atomic every `CANCEL_CHECK_INTERVAL` iterations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// How often long-running loops should check whether execution was cancelled.
/// Using a power of 2 allows efficient modulo via bitwise AND.
pub const CANCEL_CHECK_INTERVAL: usize = 0x400; // 1,024

/// Tracks the active walk version for one key.
#[derive(Debug, Default, Clone)]
pub struct WalkVersionTracker {
    active_version: Arc<AtomicU64>,
}

impl WalkVersionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the active version and returns a token for it.
    ///
    /// Tokens handed out earlier report cancellation from now on.
    pub fn next_token(&self) -> CancellationToken {
        let version = self.active_version.fetch_add(1, Ordering::SeqCst) + 1;
        CancellationToken {
            active_version: Some(self.active_version.clone()),
            version,
        }
    }

    /// Cancels every outstanding token without starting a new walk.
    pub fn cancel_all(&self) {
        self.active_version.fetch_add(1, Ordering::SeqCst);
    }

    pub fn current_version(&self) -> u64 {
        self.active_version.load(Ordering::SeqCst)
    }
}

/// A cancellation token for terminating a walk early.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    /// `None` for tokens that can never be cancelled.
    active_version: Option<Arc<AtomicU64>>,
    version: u64,
}

impl CancellationToken {
    /// Creates a cancellation token that is never cancelled.
    pub fn noop() -> Self {
        Self::default()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns `Some(())` if still active, `None` if cancelled, so callers can
    /// bail out with `?`.
    #[inline]
    pub fn is_cancelled(&self) -> Option<()> {
        match &self.active_version {
            Some(active) if active.load(Ordering::Relaxed) != self.version => None,
            _ => Some(()),
        }
    }

    /// Sparse cancellation check - only checks every `CANCEL_CHECK_INTERVAL` iterations.
    #[inline]
    pub fn is_cancelled_sparse(&self, counter: usize) -> Option<()> {
        if counter & (CANCEL_CHECK_INTERVAL - 1) == 0 {
            self.is_cancelled()
        } else {
            Some(())
        }
    }
}
