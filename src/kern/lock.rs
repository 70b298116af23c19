//! Locking Primitives
//!
//! Provides:
//! - Simple spin locks for short critical sections
//! - RAII guards that release on every exit path
//! - A back-off hint for code that polls shared state

use core::sync::atomic::{AtomicBool, Ordering};

// ============================================================================
// Back-off
// ============================================================================

/// Give up the CPU briefly while polling.
///
/// Host builds yield the thread so pollers make progress on busy runners;
/// bare-metal builds issue the processor spin hint.
#[inline]
pub fn relax() {
    #[cfg(any(test, feature = "std"))]
    std::thread::yield_now();

    #[cfg(not(any(test, feature = "std")))]
    core::hint::spin_loop();
}

// ============================================================================
// Simple Lock (Spin Lock)
// ============================================================================

/// A simple spin lock
///
/// This is the basic locking primitive. It spins waiting for the lock
/// to become available. Should only be used for very short critical sections.
#[repr(C)]
pub struct SimpleLock {
    lock_data: AtomicBool,
}

impl core::fmt::Debug for SimpleLock {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SimpleLock")
            .field("locked", &self.is_locked())
            .finish()
    }
}

impl SimpleLock {
    /// Create a new unlocked simple lock
    pub const fn new() -> Self {
        Self {
            lock_data: AtomicBool::new(false),
        }
    }

    /// Acquire the lock, spinning until available
    pub fn lock(&self) {
        while self
            .lock_data
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.lock_data.load(Ordering::Relaxed) {
                relax();
            }
        }
    }

    /// Release the lock
    pub fn unlock(&self) {
        self.lock_data.store(false, Ordering::Release);
    }

    /// Try to acquire the lock without blocking
    pub fn try_lock(&self) -> bool {
        self.lock_data
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Check if the lock is held
    pub fn is_locked(&self) -> bool {
        self.lock_data.load(Ordering::Relaxed)
    }
}

impl Default for SimpleLock {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Lock Guard Types
// ============================================================================

/// RAII guard for simple lock
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct SimpleLockGuard<'a> {
    lock: &'a SimpleLock,
}

impl<'a> SimpleLockGuard<'a> {
    /// Acquire `lock`, spinning until available
    pub fn new(lock: &'a SimpleLock) -> Self {
        lock.lock();
        Self { lock }
    }

    /// Acquire `lock` only if it is free
    pub fn try_new(lock: &'a SimpleLock) -> Option<Self> {
        if lock.try_lock() {
            Some(Self { lock })
        } else {
            None
        }
    }
}

impl<'a> Drop for SimpleLockGuard<'a> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}
