//! Buffer Object
//!
//! A buffer object is a device-usable allocation whose pages can be mapped
//! into processes on demand. Its placement, cache mode and bus-mapping state
//! live behind the reservation; the `moving` flag and its completion fence
//! live outside it so a fault can take a cheap look before reserving.
//!
//! ## Lifetime
//!
//! Objects are shared through `Arc`. The range index holds only a weak
//! handle, so once the last strong reference is dropped lookups stop finding
//! the object; `Drop` then releases its bus reservation and backing pages and
//! removes its range from the index before the memory is freed.
//!
//! ## Migration boundary
//!
//! The migration engine changes placement with [`BufferObject::begin_move`]
//! while holding the reservation. That raises `moving` and publishes a fence.
//! When the data has landed the engine calls [`MoveTicket::complete`], which
//! clears `moving` (release store, under the fence slot lock) and only then
//! signals the fence. Faults load `moving` with acquire ordering, so a fault
//! that sees it clear also sees the final placement.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};
use spin::Mutex;

use crate::kern::fence::Fence;
use crate::ttm::device::BoDevice;
use crate::ttm::placement::{MemType, Placement};
use crate::ttm::reservation::{
    Reservation, ReservationGuard, StaleReservation, TryReserve,
};
use crate::vm::prot::CacheMode;

// ============================================================================
// Identifiers and Flags
// ============================================================================

/// Buffer object identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BoId(pub u64);

/// Buffer object flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BoFlags(u32);

impl BoFlags {
    /// Imported from another driver through an opaque handle; its pages
    /// are not ours to map
    pub const FOREIGN: Self = Self(0x0001);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl core::ops::BitOr for BoFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

// ============================================================================
// Reserved State
// ============================================================================

/// State only touched while holding the object's reservation
#[derive(Debug)]
pub struct BoState {
    /// Where the data currently lives
    pub placement: Placement,

    /// Cache mode requested for CPU mappings; the memory type decides when
    /// unset
    pub cache: Option<CacheMode>,

    /// The driver has set up the bus mapping used by CPU faults
    pub(crate) io_reserved_vm: bool,
}

impl BoState {
    pub(crate) fn new(placement: Placement, cache: Option<CacheMode>) -> Self {
        Self {
            placement,
            cache,
            io_reserved_vm: false,
        }
    }

    /// Whether a VM bus reservation is live
    pub fn io_reserved_vm(&self) -> bool {
        self.io_reserved_vm
    }

    /// Cache mode CPU mappings are installed with
    pub fn effective_cache(&self) -> CacheMode {
        self.cache
            .unwrap_or_else(|| self.placement.mem_type().default_cache())
    }
}

// ============================================================================
// Buffer Object
// ============================================================================

/// A mappable buffer object
pub struct BufferObject {
    id: BoId,
    device: Arc<BoDevice>,
    size_pages: u64,
    flags: BoFlags,

    /// First page of this object's range in the offset space
    node_start: u64,

    resv: Reservation<BoState>,

    /// Set while a migration is in flight
    moving: AtomicBool,

    /// Completion of the in-flight migration; the short lock around it is
    /// also what orders `moving` updates
    move_fence: Mutex<Option<Arc<Fence>>>,
}

impl core::fmt::Debug for BufferObject {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BufferObject")
            .field("id", &self.id)
            .field("size_pages", &self.size_pages)
            .field("node_start", &self.node_start)
            .field("flags", &self.flags)
            .field("moving", &self.is_moving())
            .field("reserved", &self.resv.is_reserved())
            .finish()
    }
}

impl BufferObject {
    pub(crate) fn new(
        id: BoId,
        device: Arc<BoDevice>,
        node_start: u64,
        size_pages: u64,
        flags: BoFlags,
        state: BoState,
    ) -> Self {
        Self {
            id,
            device,
            size_pages,
            flags,
            node_start,
            resv: Reservation::new(state),
            moving: AtomicBool::new(false),
            move_fence: Mutex::new(None),
        }
    }

    pub fn id(&self) -> BoId {
        self.id
    }

    pub fn device(&self) -> &Arc<BoDevice> {
        &self.device
    }

    /// Number of pages in the object
    pub fn size_pages(&self) -> u64 {
        self.size_pages
    }

    pub fn flags(&self) -> BoFlags {
        self.flags
    }

    /// Imported through a foreign handle and not locally mappable
    pub fn is_foreign(&self) -> bool {
        self.flags.contains(BoFlags::FOREIGN)
    }

    /// First page of the object's range in the offset space
    pub fn node_start(&self) -> u64 {
        self.node_start
    }

    /// Byte offset to pass to mmap for this object
    pub fn mmap_offset(&self) -> u64 {
        crate::config::pages_to_bytes(self.node_start)
    }

    // ------------------------------------------------------------------------
    // Reservation
    // ------------------------------------------------------------------------

    /// Attempt to reserve without blocking
    pub fn try_reserve(&self) -> TryReserve<'_, BoState> {
        self.resv.try_reserve()
    }

    /// Reserve, waiting as long as necessary.
    ///
    /// For the migration engine and driver paths; never call this while
    /// holding address-space locks.
    pub fn reserve(&self) -> Result<ReservationGuard<'_, BoState>, StaleReservation> {
        self.resv.reserve()
    }

    /// Block until the reservation is free. The caller must hold no locks.
    pub fn wait_unreserved(&self) {
        self.resv.wait_unreserved();
    }

    pub fn is_reserved(&self) -> bool {
        self.resv.is_reserved()
    }

    /// Whether the destroy path has retired the reservation
    pub fn is_dead(&self) -> bool {
        self.resv.is_dead()
    }

    /// Retire the object: from now on every reservation attempt is stale.
    ///
    /// Waits for the current holder, if any. Existing references stay valid
    /// until dropped.
    pub fn mark_dead(&self) {
        if let Ok(guard) = self.resv.reserve() {
            log::debug!("bo {}: marked dead", self.id.0);
            guard.mark_dead();
        }
    }

    // ------------------------------------------------------------------------
    // Migration
    // ------------------------------------------------------------------------

    /// Whether a migration is in flight. A hint unless re-checked under
    /// the reservation.
    pub fn is_moving(&self) -> bool {
        self.moving.load(Ordering::Acquire)
    }

    /// Fence of the in-flight migration, if `moving` is set
    pub(crate) fn pending_move(&self) -> Option<Arc<Fence>> {
        let slot = self.move_fence.lock();
        if self.moving.load(Ordering::Acquire) {
            slot.clone()
        } else {
            None
        }
    }

    /// Switch the object to `placement` and mark it moving until the
    /// returned ticket completes.
    ///
    /// Any VM bus reservation for the old placement is released. The new
    /// placement must cover the whole object.
    pub fn begin_move(
        self: &Arc<Self>,
        state: &mut ReservationGuard<'_, BoState>,
        placement: Placement,
    ) -> MoveTicket {
        assert!(
            placement.covers(self.size_pages),
            "placement smaller than bo {}",
            self.id.0
        );
        self.device.io_mem_free_vm(state);

        let old = core::mem::replace(&mut state.placement, placement);
        let fence = Arc::new(Fence::new());
        {
            let mut slot = self.move_fence.lock();
            *slot = Some(Arc::clone(&fence));
            self.moving.store(true, Ordering::Release);
        }

        log::debug!(
            "bo {}: moving {:?} -> {:?}",
            self.id.0,
            old.mem_type(),
            state.placement.mem_type()
        );

        MoveTicket {
            bo: Arc::clone(self),
            fence,
            old: Some(old),
            completed: false,
        }
    }

    fn finish_move(&self, fence: &Arc<Fence>) {
        {
            let mut slot = self.move_fence.lock();
            let ours = slot.as_ref().is_some_and(|f| Arc::ptr_eq(f, fence));
            if ours {
                self.moving.store(false, Ordering::Release);
                *slot = None;
            }
        }
        fence.signal();
    }

    /// Memory type of the current placement; reserves briefly
    pub fn mem_type(&self) -> Result<MemType, StaleReservation> {
        Ok(self.reserve()?.placement.mem_type())
    }
}

impl Drop for BufferObject {
    fn drop(&mut self) {
        let device = Arc::clone(&self.device);
        let state = self.resv.get_mut();
        device.io_mem_free_vm(state);
        if let Placement::System { tt } = &mut state.placement {
            device.driver().unpopulate(tt);
        }
        device.index().remove(self.node_start);
        log::trace!("bo {}: destroyed", self.id.0);
    }
}

// ============================================================================
// Move Ticket
// ============================================================================

/// Handle the migration engine holds for an in-flight move.
///
/// Dropping the ticket completes the move.
pub struct MoveTicket {
    bo: Arc<BufferObject>,
    fence: Arc<Fence>,
    old: Option<Placement>,
    completed: bool,
}

impl MoveTicket {
    /// Fence faults wait on
    pub fn fence(&self) -> &Arc<Fence> {
        &self.fence
    }

    /// The placement the object moved away from
    pub fn old_placement(&self) -> Option<&Placement> {
        self.old.as_ref()
    }

    /// Mark the move finished: clear `moving`, then signal the fence.
    /// Returns the old placement for the engine to release.
    pub fn complete(mut self) -> Option<Placement> {
        self.completed = true;
        self.bo.finish_move(&self.fence);
        self.old.take()
    }
}

impl Drop for MoveTicket {
    fn drop(&mut self) {
        if !self.completed {
            self.bo.finish_move(&self.fence);
        }
    }
}
