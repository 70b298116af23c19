//! Buffer Object VM - Fault Handler and Mmap Resolver
//!
//! Maps a buffer object's pages into a process the first time they are
//! touched. The handler is entered by the VM framework with its address-space
//! locks held and is responsible for releasing them on every return path.
//!
//! ## Fault Sequence
//!
//! 1. Refuse copy-on-write entries
//! 2. Try to reserve the object; if it is busy, drop every lock, wait for the
//!    holder, and restart
//! 3. Refuse objects imported through a foreign handle
//! 4. Let the driver veto or restart the fault
//! 5. If a migration is in flight, drop every lock, wait for its fence, and
//!    restart
//! 6. Establish the bus mapping under the memory-type gate
//! 7. Choose the addressing mode from the placement, populating system
//!    pages on demand
//! 8. Compute mapping attributes
//! 9. Enter a mapping per requested page, stopping at the first failure
//! 10. Synchronize whatever was entered and release everything
//!
//! A restart is not an error. The framework re-drives the fault from the top;
//! entering the same page again replaces the mapping rather than adding one.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::config::{bytes_to_pages, pages_to_bytes, PAGE_MASK, PAGE_SHIFT, PAGE_SIZE};
use crate::error::{IoFailure, Result, VmError};
use crate::ttm::buffer_object::BufferObject;
use crate::ttm::device::{BoDevice, BoDriver, Credentials, FaultNotify};
use crate::ttm::placement::{Placement, TtPages};
use crate::ttm::reservation::TryReserve;
use crate::vm::pmap::PhysMap;
use crate::vm::prot::{PageAttrs, VmProt};

// ============================================================================
// Fault Result
// ============================================================================

/// Successful outcomes of a fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultStatus {
    /// Every requested page is mapped
    Mapped,
    /// All locks were dropped; the framework must re-drive the fault
    Restart,
}

/// One page of the fault window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSlot {
    /// Map this page
    Wanted,
    /// Leave this page alone
    DontCare,
}

// ============================================================================
// Framework Boundary
// ============================================================================

/// The part of a mapping the handler needs
#[derive(Debug, Clone)]
pub struct MapEntry {
    /// First virtual address of the mapping
    pub start: u64,
    /// One past the last virtual address
    pub end: u64,
    /// Byte offset into the object where the mapping begins
    pub offset: u64,
    /// Rights negotiated at mmap time
    pub protection: VmProt,
    /// Private copy-on-write mapping
    pub copy_on_write: bool,
    /// The mapped object; the entry owns one reference
    pub object: Arc<BufferObject>,
}

/// Locks the framework holds when it enters the handler
pub trait FaultLocks {
    /// Release every address-space lock held for this fault
    fn unlock_all(&mut self);
}

/// Everything a fault needs from the framework
pub struct FaultInfo<'a> {
    pub entry: &'a MapEntry,
    pub pmap: &'a dyn PhysMap,
    pub locks: &'a mut dyn FaultLocks,
}

/// Releases the framework's locks exactly once, at the latest when dropped
struct Upstream<'a> {
    locks: &'a mut dyn FaultLocks,
    held: bool,
}

impl<'a> Upstream<'a> {
    fn new(locks: &'a mut dyn FaultLocks) -> Self {
        Self { locks, held: true }
    }

    fn release(&mut self) {
        if self.held {
            self.held = false;
            self.locks.unlock_all();
        }
    }
}

impl Drop for Upstream<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

// ============================================================================
// Fault Statistics
// ============================================================================

/// Global fault statistics
static FAULT_STATS: FaultStats = FaultStats::new();

/// Fault statistics counters
pub struct FaultStats {
    /// Faults entered
    pub total: AtomicU64,
    /// Pages mapped
    pub mapped: AtomicU64,
    /// Faults that returned the restart signal
    pub restarts: AtomicU64,
    /// Restarts caused by an in-flight migration
    pub idle_waits: AtomicU64,
    /// On-demand populations of system pages
    pub populates: AtomicU64,
    /// Faults that failed
    pub failures: AtomicU64,
}

impl FaultStats {
    pub const fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            mapped: AtomicU64::new(0),
            restarts: AtomicU64::new(0),
            idle_waits: AtomicU64::new(0),
            populates: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot of `(total, mapped, restarts, idle_waits, populates, failures)`
    pub fn snapshot(&self) -> [u64; 6] {
        [
            self.total.load(Ordering::Relaxed),
            self.mapped.load(Ordering::Relaxed),
            self.restarts.load(Ordering::Relaxed),
            self.idle_waits.load(Ordering::Relaxed),
            self.populates.load(Ordering::Relaxed),
            self.failures.load(Ordering::Relaxed),
        ]
    }
}

/// Get fault statistics
pub fn stats() -> &'static FaultStats {
    &FAULT_STATS
}

fn fail(bo: &BufferObject, err: VmError) -> VmError {
    FaultStats::incr(&FAULT_STATS.failures);
    log::debug!("bo {}: fault failed: {}", bo.id().0, err);
    err
}

fn restart() -> Result<FaultStatus> {
    FaultStats::incr(&FAULT_STATS.restarts);
    Ok(FaultStatus::Restart)
}

// ============================================================================
// Addressing
// ============================================================================

/// How requested pages resolve to physical addresses
enum Addressing<'a> {
    /// Linear window through the bus aperture
    Bus { base: u64, length: u64 },
    /// Host pages indexed by page number
    Pages(&'a TtPages),
}

impl Addressing<'_> {
    fn resolve(&self, driver: &dyn BoDriver, bo: &BufferObject, page: u64) -> Option<u64> {
        match self {
            Addressing::Pages(tt) => tt.page(page as usize).map(|p| p.addr()),
            Addressing::Bus { base, length } => {
                debug_assert!(
                    pages_to_bytes(page) < *length,
                    "page {} outside the bus window",
                    page
                );
                match driver.io_mem_pfn(bo, page) {
                    Some(pfn) => Some(pfn << PAGE_SHIFT),
                    None => Some(base + pages_to_bytes(page)),
                }
            }
        }
    }
}

// ============================================================================
// Fault Handler
// ============================================================================

/// Handle a fault on `pages.len()` pages starting at `vaddr` in a buffer
/// object mapping.
///
/// The framework's locks are released before this returns, whatever the
/// outcome.
pub fn bo_fault(fi: FaultInfo<'_>, vaddr: u64, pages: &[PageSlot]) -> Result<FaultStatus> {
    let FaultInfo { entry, pmap, locks } = fi;
    let mut upstream = Upstream::new(locks);
    let bo = &*entry.object;
    let device = bo.device();
    let driver = device.driver();

    FaultStats::incr(&FAULT_STATS.total);

    if entry.copy_on_write {
        return Err(fail(bo, IoFailure::CopyOnWrite.into()));
    }

    if pages.is_empty() {
        return Ok(FaultStatus::Mapped);
    }

    let mut state = match bo.try_reserve() {
        TryReserve::Acquired(guard) => guard,
        TryReserve::Busy => {
            upstream.release();
            bo.wait_unreserved();
            return restart();
        }
        TryReserve::Stale => {
            return Err(fail(
                bo,
                VmError::NotFound {
                    start: bo.node_start(),
                    npages: bo.size_pages(),
                },
            ));
        }
    };

    if bo.is_foreign() {
        return Err(fail(bo, VmError::InvalidArgument("foreign buffer object")));
    }

    match driver.fault_reserve_notify(bo) {
        FaultNotify::Proceed => {}
        FaultNotify::Restart => {
            drop(state);
            upstream.release();
            return restart();
        }
        FaultNotify::Refuse => return Err(fail(bo, IoFailure::DriverVeto.into())),
    }

    if let Some(fence) = bo.pending_move() {
        drop(state);
        upstream.release();
        FaultStats::incr(&FAULT_STATS.idle_waits);
        fence.wait();
        return restart();
    }

    {
        let man = device.manager(state.placement.mem_type());
        let gate = man.io_lock();
        device
            .io_mem_reserve_vm(&gate, &mut state)
            .map_err(|e| fail(bo, e.into()))?;
    }

    if let Placement::System { tt } = &mut state.placement {
        if !tt.is_populated() {
            FaultStats::incr(&FAULT_STATS.populates);
            driver
                .populate(bo, tt)
                .map_err(|_| fail(bo, IoFailure::Populate.into()))?;
        }
    }

    let addressing = match &state.placement {
        Placement::System { tt } => Addressing::Pages(tt),
        Placement::Aperture { bus } => Addressing::Bus {
            base: bus.start(),
            length: bus.length,
        },
    };

    let attrs = PageAttrs::new(entry.protection, state.effective_cache());

    assert!(vaddr & PAGE_MASK == 0, "unaligned fault address {:#x}", vaddr);
    assert!(entry.offset & PAGE_MASK == 0, "unaligned entry offset");
    assert!(
        entry.start <= vaddr && vaddr + pages_to_bytes(pages.len() as u64) <= entry.end,
        "fault window outside its map entry"
    );
    let startpage = bytes_to_pages(entry.offset + (vaddr - entry.start));
    assert!(
        startpage + pages.len() as u64 <= bo.size_pages(),
        "fault window beyond buffer object"
    );

    let mut result = Ok(FaultStatus::Mapped);
    let mut entered = 0u64;
    for (i, slot) in pages.iter().enumerate() {
        if *slot == PageSlot::DontCare {
            continue;
        }

        let page = startpage + i as u64;
        let va = vaddr + (i * PAGE_SIZE) as u64;
        let installed = addressing
            .resolve(driver, bo, page)
            .ok_or(IoFailure::Populate)
            .and_then(|pa| {
                pmap.enter(va, pa, attrs)
                    .map_err(|_| IoFailure::MapInstall { page })
            });
        if let Err(e) = installed {
            result = Err(fail(bo, e.into()));
            break;
        }
        entered += 1;
    }

    // Whatever made it in must be visible before anyone retries
    pmap.update();
    FAULT_STATS.mapped.fetch_add(entered, Ordering::Relaxed);

    drop(state);
    upstream.release();
    result
}

// ============================================================================
// Mmap Resolver
// ============================================================================

/// Object and in-object offset an mmap request resolves to
#[derive(Debug, Clone)]
pub struct MmapTarget {
    /// The object; ownership of this reference passes to the caller
    pub object: Arc<BufferObject>,
    /// Byte offset inside the object
    pub offset: u64,
}

/// Resolve an mmap of `size` bytes at `offset` in the device's offset space.
///
/// `offset` and `size` come from the caller and must be page aligned;
/// anything else is `InvalidArgument`.
pub fn bo_mmap_object(
    device: &BoDevice,
    offset: u64,
    size: u64,
    prot: VmProt,
    cred: &Credentials,
) -> Result<MmapTarget> {
    if offset & PAGE_MASK != 0 || size & PAGE_MASK != 0 {
        return Err(VmError::InvalidArgument("unaligned mmap request"));
    }

    let startpage = bytes_to_pages(offset);
    let npages = bytes_to_pages(size);
    let object = device
        .lookup(startpage, npages)
        .ok_or(VmError::NotFound {
            start: startpage,
            npages,
        })?;
    debug_assert!(object.node_start() <= startpage);

    // An early return drops the looked-up reference
    device.driver().verify_access(&object, cred, prot)?;

    let offset = offset - object.mmap_offset();
    log::trace!(
        "bo {}: mmap resolved, offset {:#x}",
        object.id().0,
        offset
    );
    Ok(MmapTarget { object, offset })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kern::fence::Fence;
    use crate::ttm::device::BoDesc;
    use crate::ttm::testing::{device, device_with, TestDriver, TestLocks};
    use crate::vm::pmap::Pmap;
    use crate::vm::prot::CacheMode;

    const VA: u64 = 0x4000_0000;

    fn entry_for(bo: &Arc<BufferObject>, offset_pages: u64, npages: u64) -> MapEntry {
        MapEntry {
            start: VA,
            end: VA + pages_to_bytes(npages),
            offset: pages_to_bytes(offset_pages),
            protection: VmProt::DEFAULT,
            copy_on_write: false,
            object: Arc::clone(bo),
        }
    }

    fn fault(
        entry: &MapEntry,
        pmap: &Pmap,
        locks: &mut TestLocks,
        vaddr: u64,
        pages: &[PageSlot],
    ) -> Result<FaultStatus> {
        locks.lock();
        bo_fault(
            FaultInfo {
                entry,
                pmap,
                locks,
            },
            vaddr,
            pages,
        )
    }

    #[test]
    fn test_system_fault_populates_and_maps() {
        let (dev, drv) = device();
        let bo = dev.create_bo(BoDesc::system(16).at(100)).unwrap();
        let target = bo_mmap_object(
            &dev,
            pages_to_bytes(102),
            pages_to_bytes(1),
            VmProt::DEFAULT,
            &drv.cred(),
        )
        .unwrap();
        assert_eq!(target.offset, pages_to_bytes(2));

        let entry = entry_for(&target.object, 2, 1);
        let pmap = Pmap::new();
        let mut locks = TestLocks::default();
        let status = fault(&entry, &pmap, &mut locks, VA, &[PageSlot::Wanted]).unwrap();

        assert_eq!(status, FaultStatus::Mapped);
        assert_eq!(drv.populates(), 1);
        assert_eq!(pmap.resident(), 1);
        assert_eq!(pmap.pending(), 0);
        assert!(!locks.held);
        assert_eq!(locks.releases, 1);

        let state = bo.reserve().unwrap();
        let Placement::System { tt } = &state.placement else {
            panic!("object left system memory");
        };
        assert_eq!(pmap.extract(VA), Some(tt.page(2).unwrap().addr()));
        assert_eq!(pmap.lookup(VA).unwrap().attrs.cache, CacheMode::Cached);
        assert!(state.io_reserved_vm());
    }

    #[test]
    fn test_aperture_fault_uses_bus_window() {
        let (dev, _drv) = device();
        let bo = dev
            .create_bo(BoDesc::aperture(4, 0xe000_0000, 0x10_0000))
            .unwrap();
        let entry = entry_for(&bo, 0, 4);
        let pmap = Pmap::new();
        let mut locks = TestLocks::default();
        let window = [PageSlot::Wanted, PageSlot::DontCare, PageSlot::Wanted];

        assert_eq!(
            fault(&entry, &pmap, &mut locks, VA, &window),
            Ok(FaultStatus::Mapped)
        );
        assert_eq!(pmap.extract(VA), Some(0xe010_0000));
        assert_eq!(pmap.extract(VA + 0x1000), None);
        assert_eq!(pmap.extract(VA + 0x2000), Some(0xe010_2000));
        assert_eq!(
            pmap.lookup(VA).unwrap().attrs.cache,
            CacheMode::WriteCombined
        );
    }

    #[test]
    fn test_driver_pfn_override() {
        let drv = TestDriver::new();
        drv.set_pfn_base(Some(0x9_0000));
        let (dev, _drv) = device_with(drv);
        let bo = dev.create_bo(BoDesc::aperture(2, 0xe000_0000, 0)).unwrap();
        let entry = entry_for(&bo, 0, 2);
        let pmap = Pmap::new();
        let mut locks = TestLocks::default();

        fault(&entry, &pmap, &mut locks, VA + 0x1000, &[PageSlot::Wanted]).unwrap();
        assert_eq!(pmap.extract(VA + 0x1000), Some(0x9_0001 << PAGE_SHIFT));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "outside the bus window")]
    fn test_bus_page_past_window_asserts() {
        let (dev, drv) = device();
        let bo = dev.create_bo(BoDesc::aperture(4, 0xe000_0000, 0)).unwrap();
        let addressing = Addressing::Bus {
            base: 0xe000_0000,
            length: PAGE_SIZE as u64,
        };
        let _ = addressing.resolve(&*drv, &bo, 3);
    }

    #[test]
    fn test_zero_pages_is_noop() {
        let (dev, drv) = device();
        let bo = dev.create_bo(BoDesc::system(4)).unwrap();
        let entry = entry_for(&bo, 0, 4);
        let pmap = Pmap::new();
        let mut locks = TestLocks::default();

        assert_eq!(fault(&entry, &pmap, &mut locks, VA, &[]), Ok(FaultStatus::Mapped));
        assert_eq!(drv.populates(), 0);
        assert_eq!(pmap.generation(), 0);
        assert!(!locks.held);
    }

    #[test]
    fn test_copy_on_write_rejected() {
        let (dev, _drv) = device();
        let bo = dev.create_bo(BoDesc::system(4)).unwrap();
        let mut entry = entry_for(&bo, 0, 4);
        entry.copy_on_write = true;
        let pmap = Pmap::new();
        let mut locks = TestLocks::default();

        assert_eq!(
            fault(&entry, &pmap, &mut locks, VA, &[PageSlot::Wanted]),
            Err(VmError::Io(IoFailure::CopyOnWrite))
        );
        assert!(!locks.held);
        assert!(!bo.is_reserved());
    }

    #[test]
    fn test_busy_restarts_without_touching_placement() {
        let (dev, drv) = device();
        let bo = dev.create_bo(BoDesc::system(4)).unwrap();
        let entry = entry_for(&bo, 0, 4);
        let pmap = Pmap::new();

        let holder = bo.reserve().unwrap();
        let mut locks = TestLocks::default();
        let released = Arc::clone(&locks.released);

        // The holder lets go only once the fault has dropped upstream locks
        let status = std::thread::scope(|s| {
            s.spawn(move || {
                while !released.load(core::sync::atomic::Ordering::Acquire) {
                    crate::kern::lock::relax();
                }
                drop(holder);
            });
            fault(&entry, &pmap, &mut locks, VA, &[PageSlot::Wanted])
        });

        assert_eq!(status, Ok(FaultStatus::Restart));
        assert_eq!(locks.releases, 1);
        assert!(!locks.held);
        assert_eq!(drv.populates(), 0);
        assert_eq!(pmap.resident(), 0);
        assert_eq!(pmap.generation(), 0);

        // The retry goes through
        assert_eq!(
            fault(&entry, &pmap, &mut locks, VA, &[PageSlot::Wanted]),
            Ok(FaultStatus::Mapped)
        );
    }

    #[test]
    fn test_moving_waits_then_restarts() {
        let (dev, drv) = device();
        let bo = dev.create_bo(BoDesc::system(4)).unwrap();
        let entry = entry_for(&bo, 0, 4);
        let pmap = Pmap::new();
        let mut locks = TestLocks::default();

        let ticket = {
            let mut state = bo.reserve().unwrap();
            bo.begin_move(&mut state, Placement::system(4))
        };
        assert!(bo.is_moving());
        let fence: Arc<Fence> = Arc::clone(ticket.fence());

        let status = std::thread::scope(|s| {
            s.spawn(|| {
                while fence.waiters() == 0 {
                    crate::kern::lock::relax();
                }
                ticket.complete();
            });
            fault(&entry, &pmap, &mut locks, VA, &[PageSlot::Wanted])
        });

        assert_eq!(status, Ok(FaultStatus::Restart));
        assert_eq!(pmap.resident(), 0);
        assert_eq!(drv.populates(), 0);
        assert!(!locks.held);
        assert!(!bo.is_moving());

        assert_eq!(
            fault(&entry, &pmap, &mut locks, VA, &[PageSlot::Wanted]),
            Ok(FaultStatus::Mapped)
        );
        assert_eq!(pmap.resident(), 1);
    }

    #[test]
    fn test_every_move_waiter_restarts() {
        let (dev, _drv) = device();
        let bo = dev.create_bo(BoDesc::system(4)).unwrap();
        let entry = entry_for(&bo, 0, 4);
        let pmap = Pmap::new();

        let ticket = {
            let mut state = bo.reserve().unwrap();
            bo.begin_move(&mut state, Placement::system(4))
        };
        let fence: Arc<Fence> = Arc::clone(ticket.fence());

        let statuses = std::thread::scope(|s| {
            let faulters: alloc::vec::Vec<_> = (0..2u64)
                .map(|i| {
                    let (entry, pmap) = (&entry, &pmap);
                    s.spawn(move || {
                        let mut locks = TestLocks::default();
                        let va = VA + pages_to_bytes(i);
                        fault(entry, pmap, &mut locks, va, &[PageSlot::Wanted])
                    })
                })
                .collect();
            while fence.waiters() < 2 {
                crate::kern::lock::relax();
            }
            // The engine abandons the move; the ticket still completes it
            drop(ticket);
            faulters
                .into_iter()
                .map(|f| f.join().unwrap())
                .collect::<alloc::vec::Vec<_>>()
        });

        assert!(statuses
            .iter()
            .all(|status| *status == Ok(FaultStatus::Restart)));
        assert_eq!(pmap.resident(), 0);
        assert!(!bo.is_moving());

        // Nothing sticks to the object: the next fault maps
        let mut locks = TestLocks::default();
        assert_eq!(
            fault(&entry, &pmap, &mut locks, VA, &[PageSlot::Wanted]),
            Ok(FaultStatus::Mapped)
        );
    }

    #[test]
    fn test_foreign_object_rejected() {
        let (dev, _drv) = device();
        let bo = dev
            .create_bo(BoDesc::system(4).with_flags(crate::ttm::BoFlags::FOREIGN))
            .unwrap();
        let entry = entry_for(&bo, 0, 4);
        let pmap = Pmap::new();
        let mut locks = TestLocks::default();

        assert!(matches!(
            fault(&entry, &pmap, &mut locks, VA, &[PageSlot::Wanted]),
            Err(VmError::InvalidArgument(_))
        ));
        assert!(!bo.is_reserved());
        assert!(!locks.held);
    }

    #[test]
    fn test_driver_notify_outcomes() {
        let (dev, drv) = device();
        let bo = dev.create_bo(BoDesc::system(4)).unwrap();
        let entry = entry_for(&bo, 0, 4);
        let pmap = Pmap::new();
        let mut locks = TestLocks::default();

        drv.set_notify(FaultNotify::Refuse);
        assert_eq!(
            fault(&entry, &pmap, &mut locks, VA, &[PageSlot::Wanted]),
            Err(VmError::Io(IoFailure::DriverVeto))
        );

        drv.set_notify(FaultNotify::Restart);
        assert_eq!(
            fault(&entry, &pmap, &mut locks, VA, &[PageSlot::Wanted]),
            Ok(FaultStatus::Restart)
        );
        assert!(!bo.is_reserved());
        assert_eq!(pmap.resident(), 0);
        assert_eq!(locks.releases, 2);
    }

    #[test]
    fn test_bus_reserve_failure_is_io() {
        let drv = TestDriver::new();
        drv.fail_io_reserve(true);
        let (dev, _drv) = device_with(drv);
        let bo = dev.create_bo(BoDesc::aperture(1, 0xe000_0000, 0)).unwrap();
        let entry = entry_for(&bo, 0, 1);
        let pmap = Pmap::new();
        let mut locks = TestLocks::default();

        assert_eq!(
            fault(&entry, &pmap, &mut locks, VA, &[PageSlot::Wanted]),
            Err(VmError::Io(IoFailure::BusReserve))
        );
        assert!(!dev.manager(crate::ttm::MemType::Aperture).is_io_locked());
    }

    #[test]
    fn test_populate_failure_is_io() {
        let drv = TestDriver::new();
        drv.fail_populate(true);
        let (dev, _drv) = device_with(drv);
        let bo = dev.create_bo(BoDesc::system(2)).unwrap();
        let entry = entry_for(&bo, 0, 2);
        let pmap = Pmap::new();
        let mut locks = TestLocks::default();

        assert_eq!(
            fault(&entry, &pmap, &mut locks, VA, &[PageSlot::Wanted]),
            Err(VmError::Io(IoFailure::Populate))
        );
        assert_eq!(pmap.resident(), 0);
    }

    #[test]
    fn test_stale_object_not_found() {
        let (dev, _drv) = device();
        let bo = dev.create_bo(BoDesc::system(2)).unwrap();
        let entry = entry_for(&bo, 0, 2);
        bo.mark_dead();
        let pmap = Pmap::new();
        let mut locks = TestLocks::default();

        assert!(matches!(
            fault(&entry, &pmap, &mut locks, VA, &[PageSlot::Wanted]),
            Err(VmError::NotFound { .. })
        ));
        assert!(!locks.held);
    }

    #[test]
    #[should_panic(expected = "beyond buffer object")]
    fn test_window_beyond_object_asserts() {
        let (dev, _drv) = device();
        let bo = dev.create_bo(BoDesc::system(2)).unwrap();
        // Entry deliberately longer than the object
        let entry = entry_for(&bo, 0, 4);
        let pmap = Pmap::new();
        let mut locks = TestLocks::default();
        let _ = fault(&entry, &pmap, &mut locks, VA + 0x1000, &[PageSlot::Wanted; 2]);
    }

    #[test]
    fn test_mmap_resolver_errors() {
        let (dev, drv) = device();
        let bo = dev.create_bo(BoDesc::system(4).at(100)).unwrap();

        assert!(matches!(
            bo_mmap_object(&dev, pages_to_bytes(200), 0x1000, VmProt::READ, &drv.cred()),
            Err(VmError::NotFound { start: 200, npages: 1 })
        ));
        assert!(matches!(
            bo_mmap_object(&dev, 0x123, 0x1000, VmProt::READ, &drv.cred()),
            Err(VmError::InvalidArgument(_))
        ));
        assert!(matches!(
            bo_mmap_object(&dev, pages_to_bytes(100), 0x1001, VmProt::READ, &drv.cred()),
            Err(VmError::InvalidArgument(_))
        ));

        drv.set_allow(false);
        assert_eq!(
            bo_mmap_object(&dev, pages_to_bytes(100), 0x1000, VmProt::READ, &drv.cred())
                .err(),
            Some(VmError::PermissionDenied)
        );
        // The failed resolve did not leak a reference
        assert_eq!(Arc::strong_count(&bo), 1);
    }

    #[test]
    fn test_mmap_range_must_fit_object() {
        let (dev, drv) = device();
        let _bo = dev.create_bo(BoDesc::system(4).at(100)).unwrap();
        let resolve = |page| {
            bo_mmap_object(&dev, pages_to_bytes(page), pages_to_bytes(4), VmProt::READ, &drv.cred())
        };
        assert!(resolve(100).is_ok());
        assert!(resolve(101).is_err());
    }
}
