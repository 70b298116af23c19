//! Buffer object placement
//!
//! A buffer object lives either in host RAM (an array of system pages that
//! may not have been allocated yet) or behind a device I/O aperture (a
//! contiguous bus range). Only the migration engine moves an object between
//! the two, and only while holding the object's reservation.

use alloc::vec;
use alloc::vec::Vec;

use crate::config::pages_to_bytes;
use crate::vm::page_pool::{PagePool, PhysPage};
use crate::vm::prot::CacheMode;

/// Number of memory types a device manages
pub const MEM_TYPE_COUNT: usize = 2;

/// Backing class of a placement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemType {
    /// Host RAM pages
    System,
    /// Device memory reached through a bus aperture
    Aperture,
}

impl MemType {
    /// Index into per-device manager tables
    pub const fn index(self) -> usize {
        match self {
            MemType::System => 0,
            MemType::Aperture => 1,
        }
    }

    /// Cache mode used when the object does not ask for one
    pub const fn default_cache(self) -> CacheMode {
        match self {
            MemType::System => CacheMode::Cached,
            MemType::Aperture => CacheMode::WriteCombined,
        }
    }
}

/// Bus window of an aperture-resident object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusRegion {
    /// Bus address of the aperture
    pub base: u64,
    /// Byte offset of the object inside the aperture
    pub offset: u64,
    /// Length of the object's window in bytes
    pub length: u64,
}

impl BusRegion {
    pub const fn new(base: u64, offset: u64, length: u64) -> Self {
        Self { base, offset, length }
    }

    /// Bus address where the object starts
    pub const fn start(&self) -> u64 {
        self.base + self.offset
    }
}

/// Why system pages could not be populated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopulateError;

/// System page array of a buffer object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtPages {
    pages: Vec<Option<PhysPage>>,
}

impl TtPages {
    /// Unpopulated array of `npages` pages
    pub fn new(npages: usize) -> Self {
        Self {
            pages: vec![None; npages],
        }
    }

    /// Fully populated array
    pub fn from_pages(pages: Vec<PhysPage>) -> Self {
        Self {
            pages: pages.into_iter().map(Some).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Whether every page has a backing frame
    pub fn is_populated(&self) -> bool {
        self.pages.iter().all(Option::is_some)
    }

    /// Backing frame of page `index`
    pub fn page(&self, index: usize) -> Option<PhysPage> {
        self.pages.get(index).copied().flatten()
    }

    /// Back every missing page from `pool`.
    ///
    /// Either every page ends up backed or the array is left as it was.
    pub fn populate_from(&mut self, pool: &PagePool) -> Result<(), PopulateError> {
        let missing = self.pages.iter().filter(|p| p.is_none()).count();
        if missing == 0 {
            return Ok(());
        }

        let mut batch = pool.alloc_batch(missing).ok_or(PopulateError)?.into_iter();
        for slot in self.pages.iter_mut().filter(|p| p.is_none()) {
            *slot = batch.next();
        }
        Ok(())
    }

    /// Give every backed page back to `pool`
    pub fn unpopulate(&mut self, pool: &PagePool) {
        for slot in self.pages.iter_mut() {
            if let Some(page) = slot.take() {
                pool.free(page);
            }
        }
    }
}

/// Where a buffer object's data currently lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Host RAM, populated on demand
    System { tt: TtPages },
    /// Device memory behind a bus aperture
    Aperture { bus: BusRegion },
}

impl Placement {
    /// Unpopulated system placement for `npages` pages
    pub fn system(npages: usize) -> Self {
        Placement::System {
            tt: TtPages::new(npages),
        }
    }

    /// Aperture placement
    pub fn aperture(base: u64, offset: u64, npages: usize) -> Self {
        Placement::Aperture {
            bus: BusRegion::new(base, offset, pages_to_bytes(npages as u64)),
        }
    }

    /// Backing class of this placement
    pub fn mem_type(&self) -> MemType {
        match self {
            Placement::System { .. } => MemType::System,
            Placement::Aperture { .. } => MemType::Aperture,
        }
    }

    /// Whether the placement has room for every page of an `npages`-page
    /// object
    pub fn covers(&self, npages: u64) -> bool {
        match self {
            Placement::System { tt } => tt.len() as u64 >= npages,
            Placement::Aperture { bus } => bus.length >= pages_to_bytes(npages),
        }
    }

    /// Bus window, for aperture placements
    pub fn bus(&self) -> Option<&BusRegion> {
        match self {
            Placement::Aperture { bus } => Some(bus),
            Placement::System { .. } => None,
        }
    }
}
