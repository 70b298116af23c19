//! Buffer object device
//!
//! The device ties together the range index, one memory-type manager per
//! backing class, and the driver callbacks the fault path consults.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::config::DeviceConfig;
use crate::error::{IoFailure, Result, VmError};
use crate::ttm::buffer_object::{BoFlags, BoId, BoState, BufferObject};
use crate::ttm::mem_type::{MemIoGuard, MemTypeManager};
use crate::ttm::placement::{
    BusRegion, MemType, Placement, PopulateError, TtPages, MEM_TYPE_COUNT,
};
use crate::ttm::range_index::{RangeError, RangeIndex};
use crate::vm::prot::{CacheMode, VmProt};

// ============================================================================
// Driver Callbacks
// ============================================================================

/// Driver answer to a fault notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultNotify {
    /// Go ahead with the fault
    Proceed,
    /// Drop everything and retry the fault later
    Restart,
    /// Abort the fault
    Refuse,
}

/// The bus window could not be reserved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoReserveError;

/// Who is asking to map an object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials {
    /// Identity of the opened device file
    pub file_id: u64,
    /// User on whose behalf the mapping is made
    pub uid: u32,
}

/// Hooks a device driver supplies to the VM path
pub trait BoDriver: Send + Sync {
    /// Back every page of a system placement. On success every page of
    /// `tt` must resolve to a frame.
    fn populate(&self, bo: &BufferObject, tt: &mut TtPages) -> core::result::Result<(), PopulateError>;

    /// Release the backing pages of a system placement
    fn unpopulate(&self, _tt: &mut TtPages) {}

    /// Establish the device-side mapping CPU faults go through
    fn io_mem_reserve(
        &self,
        _mem_type: MemType,
        _bus: Option<&BusRegion>,
    ) -> core::result::Result<(), IoReserveError> {
        Ok(())
    }

    /// Tear down what `io_mem_reserve` set up
    fn io_mem_free(&self, _mem_type: MemType, _bus: Option<&BusRegion>) {}

    /// Page frame number of an aperture page, when the driver does not use
    /// the linear bus window
    fn io_mem_pfn(&self, _bo: &BufferObject, _page: u64) -> Option<u64> {
        None
    }

    /// Called with the object reserved before each fault
    fn fault_reserve_notify(&self, _bo: &BufferObject) -> FaultNotify {
        FaultNotify::Proceed
    }

    /// Decide whether `cred` may map `bo` with `prot`. Drivers that do not
    /// implement this refuse every mapping.
    fn verify_access(&self, _bo: &BufferObject, _cred: &Credentials, _prot: VmProt) -> Result<()> {
        Err(VmError::PermissionDenied)
    }
}

// ============================================================================
// Creation Parameters
// ============================================================================

/// Description of an object to create
#[derive(Debug, Clone)]
pub struct BoDesc {
    pub size_pages: u64,
    pub placement: Placement,
    pub flags: BoFlags,
    pub cache: Option<CacheMode>,
    /// Fixed first page in the offset space; allocated when unset
    pub start: Option<u64>,
}

impl BoDesc {
    /// Unpopulated system-memory object
    pub fn system(size_pages: u64) -> Self {
        Self {
            size_pages,
            placement: Placement::system(size_pages as usize),
            flags: BoFlags::empty(),
            cache: None,
            start: None,
        }
    }

    /// Aperture-resident object at `offset` bytes into the aperture at `base`
    pub fn aperture(size_pages: u64, base: u64, offset: u64) -> Self {
        Self {
            size_pages,
            placement: Placement::aperture(base, offset, size_pages as usize),
            flags: BoFlags::empty(),
            cache: None,
            start: None,
        }
    }

    /// Register the object at a fixed page of the offset space
    pub fn at(mut self, start: u64) -> Self {
        self.start = Some(start);
        self
    }

    pub fn with_flags(mut self, flags: BoFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_cache(mut self, cache: CacheMode) -> Self {
        self.cache = Some(cache);
        self
    }
}

// ============================================================================
// Device
// ============================================================================

/// A device managing buffer objects
pub struct BoDevice {
    config: DeviceConfig,
    index: RangeIndex<BufferObject>,
    managers: [MemTypeManager; MEM_TYPE_COUNT],
    driver: Arc<dyn BoDriver>,
    next_id: AtomicU64,
}

impl BoDevice {
    /// Create a device
    pub fn new(config: DeviceConfig, driver: Arc<dyn BoDriver>) -> Arc<Self> {
        Arc::new(Self {
            config,
            index: RangeIndex::new(config.offset_start, config.offset_pages),
            managers: [
                MemTypeManager::new(MemType::System, config.io_reserve_fastpath),
                MemTypeManager::new(MemType::Aperture, config.io_reserve_fastpath),
            ],
            driver,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn driver(&self) -> &dyn BoDriver {
        &*self.driver
    }

    pub fn index(&self) -> &RangeIndex<BufferObject> {
        &self.index
    }

    /// Manager of a backing class
    pub fn manager(&self, mem_type: MemType) -> &MemTypeManager {
        &self.managers[mem_type.index()]
    }

    /// Create an object and publish it in the range index.
    ///
    /// Publishing is the last step: no lookup can see a half-built object.
    pub fn create_bo(self: &Arc<Self>, desc: BoDesc) -> Result<Arc<BufferObject>> {
        if desc.size_pages == 0 {
            return Err(VmError::InvalidArgument("zero-sized buffer object"));
        }
        if !desc.placement.covers(desc.size_pages) {
            return Err(VmError::InvalidArgument("placement smaller than buffer object"));
        }

        let start = match desc.start {
            Some(start) => self.index.reserve_at(start, desc.size_pages).map(|()| start),
            None => self.index.allocate(desc.size_pages),
        }
        .map_err(range_error)?;

        let id = BoId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let bo = Arc::new(BufferObject::new(
            id,
            Arc::clone(self),
            start,
            desc.size_pages,
            desc.flags,
            BoState::new(desc.placement, desc.cache),
        ));
        self.index.publish(start, &bo);

        log::debug!(
            "bo {}: created, pages {:#x}+{}",
            id.0,
            start,
            desc.size_pages
        );
        Ok(bo)
    }

    /// Find the object covering a page range and take a reference.
    ///
    /// Objects already retired by the destroy path are not returned.
    pub fn lookup(&self, start: u64, npages: u64) -> Option<Arc<BufferObject>> {
        self.index
            .lookup(start, npages)
            .filter(|bo| !bo.is_dead())
    }

    /// Make sure the bus mapping for the object's current placement exists.
    ///
    /// The caller proves it holds the manager's gate by passing the guard.
    pub(crate) fn io_mem_reserve_vm(
        &self,
        _gate: &MemIoGuard<'_>,
        state: &mut BoState,
    ) -> core::result::Result<(), IoFailure> {
        if state.io_reserved_vm {
            return Ok(());
        }

        let mem_type = state.placement.mem_type();
        self.driver
            .io_mem_reserve(mem_type, state.placement.bus())
            .map_err(|_| IoFailure::BusReserve)?;
        state.io_reserved_vm = true;
        self.manager(mem_type).note_io_reserved();
        Ok(())
    }

    /// Release the bus mapping, if one is live
    pub(crate) fn io_mem_free_vm(&self, state: &mut BoState) {
        if !state.io_reserved_vm {
            return;
        }

        let mem_type = state.placement.mem_type();
        let man = self.manager(mem_type);
        let _gate = man.io_lock();
        self.driver.io_mem_free(mem_type, state.placement.bus());
        state.io_reserved_vm = false;
        man.note_io_freed();
    }
}

fn range_error(err: RangeError) -> VmError {
    log::warn!("offset space: {}", err);
    match err {
        RangeError::Empty => VmError::InvalidArgument("empty range"),
        RangeError::OutOfBounds { .. } => VmError::InvalidArgument("range outside offset space"),
        RangeError::Overlap { .. } => VmError::InvalidArgument("range already in use"),
        RangeError::NoSpace(_) => VmError::InvalidArgument("offset space exhausted"),
    }
}
