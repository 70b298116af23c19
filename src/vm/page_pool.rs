//! Physical page pool
//!
//! A bounded free list of physical page frames. Drivers use it to back the
//! system-memory pages of buffer objects when the fault path asks for
//! population.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};
use spin::Mutex;

use crate::config::{PAGE_MASK, PAGE_SHIFT};

/// A physical page frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysPage(u64);

impl PhysPage {
    /// Page frame from its frame number
    pub const fn from_pfn(pfn: u64) -> Self {
        Self(pfn)
    }

    /// Page frame containing a physical address
    pub const fn containing(addr: u64) -> Self {
        Self(addr >> PAGE_SHIFT)
    }

    /// Frame number
    pub const fn pfn(&self) -> u64 {
        self.0
    }

    /// Physical address of the first byte
    pub const fn addr(&self) -> u64 {
        self.0 << PAGE_SHIFT
    }
}

/// Page pool state
#[derive(Debug)]
pub struct PagePool {
    /// Free frame numbers, lowest last so allocation walks upward
    free: Mutex<Vec<u64>>,

    /// Total frames managed
    page_count: usize,

    /// Free frame count
    free_count: AtomicU32,
}

impl PagePool {
    /// Create a pool over the physical range `[start_addr, end_addr)`
    pub fn new(start_addr: u64, end_addr: u64) -> Self {
        assert!(start_addr & PAGE_MASK == 0, "pool start must be page aligned");
        let start_pfn = start_addr >> PAGE_SHIFT;
        let end_pfn = end_addr >> PAGE_SHIFT;
        let free: Vec<u64> = (start_pfn..end_pfn).rev().collect();
        let page_count = free.len();

        Self {
            free: Mutex::new(free),
            page_count,
            free_count: AtomicU32::new(page_count as u32),
        }
    }

    /// Allocate one frame
    pub fn alloc(&self) -> Option<PhysPage> {
        let pfn = self.free.lock().pop()?;
        self.free_count.fetch_sub(1, Ordering::SeqCst);
        Some(PhysPage::from_pfn(pfn))
    }

    /// Allocate `count` frames, or none at all
    pub fn alloc_batch(&self, count: usize) -> Option<Vec<PhysPage>> {
        let mut free = self.free.lock();
        if free.len() < count {
            return None;
        }
        let split = free.len() - count;
        let batch: Vec<PhysPage> = free
            .drain(split..)
            .rev()
            .map(PhysPage::from_pfn)
            .collect();
        self.free_count.fetch_sub(count as u32, Ordering::SeqCst);
        Some(batch)
    }

    /// Return a frame to the pool
    pub fn free(&self, page: PhysPage) {
        self.free.lock().push(page.pfn());
        self.free_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Total frames managed
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Frames currently free
    pub fn free_count(&self) -> u32 {
        self.free_count.load(Ordering::SeqCst)
    }
}
