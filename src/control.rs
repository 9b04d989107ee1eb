//! Cooperative cancellation and progress reporting.
//!
//! Long-running loops (the O(N²) distance computation, the N-1 merge loop,
//! the k-means iteration loop) poll a shared [`CancelToken`] once per outer
//! iteration, so a cancellation request is honored within a bounded latency
//! rather than only at step boundaries.
//!
//! Progress flows through an explicit channel handed to the coordinator:
//! the engine pushes [`ProgressEvent`]s, it never reaches into caller
//! state. All per-axis steps share one monotonically increasing
//! `{current, max}` scale so a single progress indicator can span the
//! whole run.

use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;

/// Shared flag used to request cancellation of a running clustering task.
///
/// Clones share the same underlying flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation has been requested.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Check for cancellation and bail out with [`Error::Cancelled`].
    /// Call this once per outer loop iteration.
    #[inline]
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// A progress update pushed by a running clustering task.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Monotonically increasing position on the run-wide progress scale.
    Tick {
        /// Units of work completed so far across all steps.
        current: usize,
        /// Total units of work for the whole run.
        max: usize,
    },
    /// Human-readable status line ("Clustering started.", ...).
    Status(String),
}

/// Per-run handle bundling the cancellation flag with the progress channel.
///
/// `offset` positions the current step on the run-wide scale; the
/// coordinator advances it as steps complete, so per-step ticks starting
/// at zero still produce one monotonic sequence.
#[derive(Debug, Clone)]
pub struct RunControl {
    cancel: CancelToken,
    progress: Option<Sender<ProgressEvent>>,
    offset: usize,
    max: usize,
}

impl RunControl {
    /// Control handle with a progress channel. `max` is the total number
    /// of work units across all steps of the run.
    pub fn new(cancel: CancelToken, progress: Option<Sender<ProgressEvent>>, max: usize) -> Self {
        Self {
            cancel,
            progress,
            offset: 0,
            max,
        }
    }

    /// Control handle that reports nothing and can only be cancelled
    /// through `cancel`. Useful for tests and synchronous callers.
    pub fn detached(cancel: CancelToken) -> Self {
        Self::new(cancel, None, 0)
    }

    /// The shared cancellation token.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// See [`CancelToken::checkpoint`].
    #[inline]
    pub fn checkpoint(&self) -> Result<()> {
        self.cancel.checkpoint()
    }

    /// Advance the run-wide offset after a step completed `units` of work.
    pub fn advance(&mut self, units: usize) {
        self.offset += units;
    }

    /// Report progress within the current step. Never blocks; a dropped
    /// receiver is ignored.
    pub fn tick(&self, current: usize) {
        if let Some(tx) = &self.progress {
            let _ = tx.send(ProgressEvent::Tick {
                current: self.offset + current,
                max: self.max,
            });
        }
    }

    /// Push a status line to the observer.
    pub fn status(&self, text: impl Into<String>) {
        if let Some(tx) = &self.progress {
            let _ = tx.send(ProgressEvent::Status(text.into()));
        }
    }
}
