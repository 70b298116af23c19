//! VM Space - Address Space Framework
//!
//! A process address space holding buffer object mappings. It plays the part
//! of the surrounding VM framework for the fault handler:
//!
//! - `mmap`: resolve an offset-space request to an object and map it at a
//!   free virtual range
//! - `fault`: look up the entry, check access, build the fault window and
//!   drive the handler until it stops asking for a restart
//! - `munmap`: tear down mappings and drop the object reference
//!
//! The entry table is read-locked for the duration of a fault. The handler
//! releases that lock itself before it waits for anything.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::{RwLock, RwLockReadGuard};
use thiserror::Error;

use crate::config::{bytes_to_pages, trunc_page, MAX_FAULT_PAGES, PAGE_MASK, PAGE_SIZE};
use crate::error::VmError;
use crate::ttm::bo_vm::{
    bo_fault, bo_mmap_object, FaultInfo, FaultLocks, FaultStatus, MapEntry, PageSlot,
};
use crate::ttm::device::{BoDevice, Credentials};
use crate::vm::pmap::{PhysMap, Pmap};
use crate::vm::prot::VmProt;

/// Address space errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// Empty, unaligned or out-of-bounds range
    #[error("invalid address range")]
    InvalidRange,

    /// No free virtual range is large enough
    #[error("no free virtual range")]
    NoSpace,

    /// No mapping covers the address
    #[error("address {0:#x} not mapped")]
    NotMapped(u64),

    /// The mapping does not allow the requested access
    #[error("protection failure at {0:#x}")]
    ProtectionFailure(u64),

    /// The buffer object layer failed
    #[error(transparent)]
    Object(#[from] VmError),
}

type EntryTable = BTreeMap<u64, MapEntry>;

/// Read lock on the entry table, handed to the fault handler to release
struct EntryLock<'a> {
    guard: Option<RwLockReadGuard<'a, EntryTable>>,
}

impl FaultLocks for EntryLock<'_> {
    fn unlock_all(&mut self) {
        self.guard = None;
    }
}

/// A process address space
pub struct VmSpace {
    device: Arc<BoDevice>,
    pmap: Pmap,

    /// Map entries (ordered by start address)
    entries: RwLock<EntryTable>,

    /// Minimum address
    min_offset: u64,

    /// Maximum address
    max_offset: u64,

    /// Handler restarts seen by this space
    restarts: AtomicU64,
}

impl VmSpace {
    /// Create an address space over `[min, max)` for objects of `device`
    pub fn new(device: Arc<BoDevice>, min: u64, max: u64) -> Self {
        Self {
            device,
            pmap: Pmap::new(),
            entries: RwLock::new(BTreeMap::new()),
            min_offset: min,
            max_offset: max,
            restarts: AtomicU64::new(0),
        }
    }

    pub fn pmap(&self) -> &Pmap {
        &self.pmap
    }

    pub fn entry_count(&self) -> usize {
        self.entries.read().len()
    }

    /// Number of times a fault had to be re-driven
    pub fn restarts(&self) -> u64 {
        self.restarts.load(Ordering::Relaxed)
    }

    /// Copy of the entry covering `addr`
    pub fn lookup(&self, addr: u64) -> Option<MapEntry> {
        let entries = self.entries.read();
        find_entry(&entries, addr).cloned()
    }

    /// Map `len` bytes of the device offset space at `offset`, shared.
    ///
    /// Returns the virtual address of the new mapping.
    pub fn mmap(&self, offset: u64, len: u64, prot: VmProt, cred: &Credentials) -> Result<u64, MapError> {
        self.map_object(offset, len, prot, cred, false)
    }

    /// Map privately; faults on such mappings are refused
    pub fn mmap_private(
        &self,
        offset: u64,
        len: u64,
        prot: VmProt,
        cred: &Credentials,
    ) -> Result<u64, MapError> {
        self.map_object(offset, len, prot, cred, true)
    }

    fn map_object(
        &self,
        offset: u64,
        len: u64,
        prot: VmProt,
        cred: &Credentials,
        copy_on_write: bool,
    ) -> Result<u64, MapError> {
        if len == 0 || len & PAGE_MASK != 0 {
            return Err(MapError::InvalidRange);
        }

        let target = bo_mmap_object(&self.device, offset, len, prot, cred)?;

        let mut entries = self.entries.write();
        let start = find_space(&entries, self.min_offset, self.max_offset, len)
            .ok_or(MapError::NoSpace)?;
        log::debug!(
            "vm: mapped bo {} at {:#x}+{:#x}",
            target.object.id().0,
            start,
            len
        );
        entries.insert(
            start,
            MapEntry {
                start,
                end: start + len,
                offset: target.offset,
                protection: prot,
                copy_on_write,
                object: target.object,
            },
        );
        Ok(start)
    }

    /// Remove the mapping starting at `start`
    pub fn munmap(&self, start: u64) -> Result<(), MapError> {
        let entry = self
            .entries
            .write()
            .remove(&start)
            .ok_or(MapError::NotMapped(start))?;
        self.pmap.remove_range(entry.start, entry.end);
        self.pmap.update();
        Ok(())
    }

    /// Resolve a fault at `vaddr` for `access`.
    ///
    /// Re-drives the handler for as long as it asks for a restart; every
    /// round starts from a fresh lookup.
    pub fn fault(&self, vaddr: u64, access: VmProt) -> Result<(), MapError> {
        let va = trunc_page(vaddr);
        loop {
            let guard = self.entries.read();
            let entry = find_entry(&guard, va)
                .cloned()
                .ok_or(MapError::NotMapped(vaddr))?;
            if !entry.protection.contains(access) {
                return Err(MapError::ProtectionFailure(vaddr));
            }

            let window = self.fault_window(&entry, va);
            let mut locks = EntryLock { guard: Some(guard) };
            let status = bo_fault(
                FaultInfo {
                    entry: &entry,
                    pmap: &self.pmap,
                    locks: &mut locks,
                },
                va,
                &window,
            )?;

            match status {
                FaultStatus::Mapped => return Ok(()),
                FaultStatus::Restart => {
                    self.restarts.fetch_add(1, Ordering::Relaxed);
                    log::trace!("vm: fault at {:#x} restarted", va);
                }
            }
        }
    }

    /// Pages to hand the handler: the faulting page plus following pages
    /// up to the configured window, clipped to the entry. Pages already
    /// mapped are left alone.
    fn fault_window(
        &self,
        entry: &MapEntry,
        va: u64,
    ) -> heapless::Vec<PageSlot, MAX_FAULT_PAGES> {
        let left = bytes_to_pages(entry.end - va) as usize;
        let npages = self.device.config().fault_window().min(left);

        let mut window = heapless::Vec::new();
        for i in 0..npages {
            let page_va = va + (i * PAGE_SIZE) as u64;
            let slot = if i > 0 && self.pmap.extract(page_va).is_some() {
                PageSlot::DontCare
            } else {
                PageSlot::Wanted
            };
            // npages never exceeds MAX_FAULT_PAGES
            let _ = window.push(slot);
        }
        window
    }
}

fn find_entry(entries: &EntryTable, addr: u64) -> Option<&MapEntry> {
    entries
        .range(..=addr)
        .next_back()
        .map(|(_, entry)| entry)
        .filter(|entry| addr < entry.end)
}

/// First-fit search for `size` bytes in `[min, max)`
fn find_space(entries: &EntryTable, min: u64, max: u64, size: u64) -> Option<u64> {
    let mut prev_end = min;
    for entry in entries.values() {
        if prev_end + size <= entry.start {
            return Some(prev_end);
        }
        prev_end = prev_end.max(entry.end);
    }
    if prev_end + size <= max {
        Some(prev_end)
    } else {
        None
    }
}
