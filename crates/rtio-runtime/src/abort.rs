//! Stop conditions for open-ended test loops.
//!
//! Routines consult a [`StopCondition`] once at the top of every outer
//! iteration, never in the middle of a block. The [`AbortFlag`] is also
//! polled by the pacing wait, which runs before any event of the iteration
//! is emitted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Predicate checked before each outer iteration.
pub trait StopCondition {
    /// Returns true when the loop must not start another iteration.
    fn should_stop(&mut self) -> bool;
}

impl<F: FnMut() -> bool> StopCondition for F {
    fn should_stop(&mut self) -> bool {
        self()
    }
}

/// Shared abort request, settable from any thread.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag {
    requested: Arc<AtomicBool>,
}

impl AbortFlag {
    /// Create a cleared flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request abort.
    pub fn request(&self) {
        self.requested.store(true, Ordering::Relaxed);
    }

    /// Check whether abort was requested.
    #[inline]
    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Relaxed)
    }

    /// Clear a previous request.
    pub fn clear(&self) {
        self.requested.store(false, Ordering::Relaxed);
    }
}

impl StopCondition for AbortFlag {
    fn should_stop(&mut self) -> bool {
        self.is_requested()
    }
}

/// Allows a fixed number of iterations.
#[derive(Debug, Clone, Copy)]
pub struct IterationLimit {
    remaining: u64,
}

impl IterationLimit {
    /// Allow `iterations` iterations.
    #[must_use]
    pub fn new(iterations: u64) -> Self {
        Self {
            remaining: iterations,
        }
    }
}

impl StopCondition for IterationLimit {
    fn should_stop(&mut self) -> bool {
        if self.remaining == 0 {
            return true;
        }
        self.remaining -= 1;
        false
    }
}
