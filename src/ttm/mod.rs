//! Buffer Objects
//!
//! Device-usable memory objects whose pages are mapped into processes on
//! first touch. The pieces:
//!
//! - `range_index`: mmap offset space mapping page ranges to objects
//! - `reservation`: try-or-back-off lock over an object's placement
//! - `placement`: where an object's data lives (system pages or aperture)
//! - `mem_type`: per-class gate serializing bus-mapping setup
//! - `buffer_object`: the object itself and its migration boundary
//! - `device`: the device tying index, managers and driver together
//! - `bo_vm`: fault handler and mmap resolver

pub mod bo_vm;
pub mod buffer_object;
pub mod device;
pub mod mem_type;
pub mod placement;
pub mod range_index;
pub mod reservation;

pub use bo_vm::{
    bo_fault, bo_mmap_object, stats, FaultInfo, FaultLocks, FaultStats, FaultStatus, MapEntry,
    MmapTarget, PageSlot,
};
pub use buffer_object::{BoFlags, BoId, BoState, BufferObject, MoveTicket};
pub use device::{BoDesc, BoDevice, BoDriver, Credentials, FaultNotify, IoReserveError};
pub use mem_type::{MemIoGuard, MemTypeManager};
pub use placement::{BusRegion, MemType, Placement, PopulateError, TtPages};
pub use range_index::{RangeError, RangeIndex};
pub use reservation::{Reservation, ReservationGuard, StaleReservation, TryReserve};
