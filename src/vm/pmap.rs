//! Physical Map (pmap) - Page Table Boundary
//!
//! The fault handler never touches hardware page tables directly. It goes
//! through [`PhysMap`], the narrow interface the surrounding VM framework
//! provides:
//!
//! - `enter`: Install a mapping from a virtual page to a physical page
//! - `update`: Make every mapping entered so far visible (TLB shootdown)
//!
//! [`Pmap`] is a software implementation that records mappings in a table.
//! It backs the [`crate::vm::VmSpace`] framework and the tests.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use spin::Mutex;

use crate::config::PAGE_MASK;
use crate::vm::prot::PageAttrs;

// ============================================================================
// Boundary
// ============================================================================

/// Pmap errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PmapError {
    /// Page-table memory could not be allocated
    NoResources,
    /// Address is not page aligned or outside the map
    InvalidAddress,
}

/// Page-table operations used by the fault path
pub trait PhysMap: Sync {
    /// Install or replace the mapping for one virtual page.
    ///
    /// May fail; the caller decides what to do with mappings already
    /// entered.
    fn enter(&self, va: u64, pa: u64, attrs: PageAttrs) -> Result<(), PmapError>;

    /// Synchronize all mappings entered since the last update
    fn update(&self);
}

// ============================================================================
// Software Pmap
// ============================================================================

/// A recorded mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    /// Physical address of the page
    pub pa: u64,
    /// Protection and cache attributes
    pub attrs: PageAttrs,
}

/// Statistics for a pmap
#[derive(Debug, Default)]
pub struct PmapStats {
    /// Number of resident mappings
    pub resident_count: AtomicU32,
    /// Number of successful enter calls
    pub enter_count: AtomicU64,
}

impl PmapStats {
    pub fn resident(&self) -> u32 {
        self.resident_count.load(Ordering::Relaxed)
    }

    pub fn enters(&self) -> u64 {
        self.enter_count.load(Ordering::Relaxed)
    }
}

/// Table-backed physical map
#[derive(Debug, Default)]
pub struct Pmap {
    /// virt_page -> mapping
    mappings: Mutex<BTreeMap<u64, Mapping>>,

    /// Mappings entered but not yet synchronized
    pending: AtomicU32,

    /// Number of update calls
    generation: AtomicU64,

    /// Statistics
    pub stats: PmapStats,
}

impl Pmap {
    /// Create an empty pmap
    pub fn new() -> Self {
        Self::default()
    }

    /// Physical address backing `va`, if mapped
    pub fn extract(&self, va: u64) -> Option<u64> {
        let page = va & !PAGE_MASK;
        self.mappings
            .lock()
            .get(&page)
            .map(|m| m.pa + (va & PAGE_MASK))
    }

    /// Full mapping record for the page containing `va`
    pub fn lookup(&self, va: u64) -> Option<Mapping> {
        self.mappings.lock().get(&(va & !PAGE_MASK)).copied()
    }

    /// Remove every mapping in `[start, end)`, returning how many were removed
    pub fn remove_range(&self, start: u64, end: u64) -> usize {
        let mut mappings = self.mappings.lock();
        let doomed: Vec<u64> = mappings.range(start..end).map(|(&va, _)| va).collect();
        for va in doomed.iter() {
            mappings.remove(va);
        }
        let removed = doomed.len();
        self.stats
            .resident_count
            .fetch_sub(removed as u32, Ordering::Relaxed);
        removed
    }

    /// Mappings entered but not yet synchronized
    pub fn pending(&self) -> u32 {
        self.pending.load(Ordering::Acquire)
    }

    /// Number of synchronizations performed
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Number of resident mappings
    pub fn resident(&self) -> u32 {
        self.stats.resident()
    }
}

impl PhysMap for Pmap {
    fn enter(&self, va: u64, pa: u64, attrs: PageAttrs) -> Result<(), PmapError> {
        if va & PAGE_MASK != 0 || pa & PAGE_MASK != 0 {
            return Err(PmapError::InvalidAddress);
        }

        let previous = self.mappings.lock().insert(va, Mapping { pa, attrs });
        if previous.is_none() {
            self.stats.resident_count.fetch_add(1, Ordering::Relaxed);
        }
        self.stats.enter_count.fetch_add(1, Ordering::Relaxed);
        self.pending.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn update(&self) {
        self.pending.store(0, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}
