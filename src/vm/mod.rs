//! Virtual memory boundary
//!
//! The pieces of the surrounding VM system the buffer object fault path
//! talks to: protection and cache attributes, the page-table interface, a
//! physical page pool, and the address-space framework that drives faults.

pub mod page_pool;
pub mod pmap;
pub mod prot;
pub mod vm_map;

pub use page_pool::{PagePool, PhysPage};
pub use pmap::{Mapping, PhysMap, Pmap, PmapError, PmapStats};
pub use prot::{CacheMode, PageAttrs, VmProt};
pub use vm_map::{MapError, VmSpace};
