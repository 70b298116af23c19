//! Completion fences
//!
//! A fence is signalled exactly once by whoever owns the operation it tracks
//! (here: the migration engine moving a buffer object). Any number of threads
//! may block on it. Blocking callers must not hold any lock the signaller
//! could need.
//!
//! There is no way to abandon a wait: the only thing that ends it is the
//! signal.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use super::lock::relax;

/// One-shot completion signal
#[derive(Debug, Default)]
pub struct Fence {
    signaled: AtomicBool,
    waiters: AtomicU32,
}

impl Fence {
    /// Create an unsignalled fence
    pub const fn new() -> Self {
        Self {
            signaled: AtomicBool::new(false),
            waiters: AtomicU32::new(0),
        }
    }

    /// Create a fence that is already signalled
    pub const fn signaled() -> Self {
        Self {
            signaled: AtomicBool::new(true),
            waiters: AtomicU32::new(0),
        }
    }

    /// Check whether the fence has been signalled
    pub fn is_signaled(&self) -> bool {
        self.signaled.load(Ordering::Acquire)
    }

    /// Signal completion, releasing every waiter.
    ///
    /// Writes made before this call are visible to waiters once they return.
    pub fn signal(&self) {
        self.signaled.store(true, Ordering::Release);
    }

    /// Number of threads currently blocked on the fence
    pub fn waiters(&self) -> u32 {
        self.waiters.load(Ordering::Acquire)
    }

    /// Block until the fence is signalled
    pub fn wait(&self) {
        self.waiters.fetch_add(1, Ordering::AcqRel);
        while !self.is_signaled() {
            relax();
        }
        self.waiters.fetch_sub(1, Ordering::AcqRel);
    }
}
