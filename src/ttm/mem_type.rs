//! Memory-Type Manager
//!
//! One manager per backing class. Its I/O gate serializes bus-mapping setup
//! for every object of that class. Managers whose driver can reserve bus
//! space without shared state run on the fast path and skip the gate.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::kern::lock::{SimpleLock, SimpleLockGuard};
use crate::ttm::placement::MemType;
use crate::vm::prot::CacheMode;

/// Per-class manager
#[derive(Debug)]
pub struct MemTypeManager {
    mem_type: MemType,

    /// Skip the I/O gate
    io_reserve_fastpath: bool,

    /// Gate held while bus mappings are established
    io_lock: SimpleLock,

    /// Live VM bus reservations of this class
    io_reserved: AtomicU32,
}

/// Holds a manager's I/O gate until dropped
#[must_use = "the gate is released as soon as the guard is dropped"]
pub struct MemIoGuard<'a> {
    _lock: Option<SimpleLockGuard<'a>>,
}

impl MemTypeManager {
    pub const fn new(mem_type: MemType, io_reserve_fastpath: bool) -> Self {
        Self {
            mem_type,
            io_reserve_fastpath,
            io_lock: SimpleLock::new(),
            io_reserved: AtomicU32::new(0),
        }
    }

    pub fn mem_type(&self) -> MemType {
        self.mem_type
    }

    /// Cache mode for objects of this class that do not choose one
    pub fn default_cache(&self) -> CacheMode {
        self.mem_type.default_cache()
    }

    /// Take the I/O gate (a no-op on the fast path)
    pub fn io_lock(&self) -> MemIoGuard<'_> {
        if self.io_reserve_fastpath {
            return MemIoGuard { _lock: None };
        }
        MemIoGuard {
            _lock: Some(SimpleLockGuard::new(&self.io_lock)),
        }
    }

    /// Whether some thread holds the gate
    pub fn is_io_locked(&self) -> bool {
        self.io_lock.is_locked()
    }

    pub fn uses_fastpath(&self) -> bool {
        self.io_reserve_fastpath
    }

    /// Number of objects of this class with a live VM bus reservation
    pub fn io_reserved(&self) -> u32 {
        self.io_reserved.load(Ordering::Acquire)
    }

    pub(crate) fn note_io_reserved(&self) {
        self.io_reserved.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn note_io_freed(&self) {
        self.io_reserved.fetch_sub(1, Ordering::AcqRel);
    }
}
