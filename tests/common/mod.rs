//! Shared doubles for the integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use ttm_vm::config::PAGE_SIZE;
use ttm_vm::ttm::{
    BoDevice, BoDriver, BufferObject, Credentials, FaultLocks, PopulateError, TtPages,
};
use ttm_vm::vm::{PagePool, VmProt};
use ttm_vm::{DeviceConfig, Result};

pub const POOL_BASE: u64 = 0x2000_0000;
pub const POOL_PAGES: u64 = 512;
pub const APERTURE_BASE: u64 = 0xe000_0000;
pub const VA_MIN: u64 = 0x4000_0000;
pub const VA_MAX: u64 = 0x8000_0000;

/// Driver that backs system placements from a page pool and allows every
/// mapping
pub struct PoolDriver {
    pub pool: PagePool,
    populates: AtomicU32,
}

impl PoolDriver {
    pub fn new() -> Self {
        Self {
            pool: PagePool::new(POOL_BASE, POOL_BASE + POOL_PAGES * PAGE_SIZE as u64),
            populates: AtomicU32::new(0),
        }
    }

    pub fn populates(&self) -> u32 {
        self.populates.load(Ordering::SeqCst)
    }
}

impl BoDriver for PoolDriver {
    fn populate(
        &self,
        _bo: &BufferObject,
        tt: &mut TtPages,
    ) -> core::result::Result<(), PopulateError> {
        self.populates.fetch_add(1, Ordering::SeqCst);
        tt.populate_from(&self.pool)
    }

    fn unpopulate(&self, tt: &mut TtPages) {
        tt.unpopulate(&self.pool);
    }

    fn verify_access(&self, _bo: &BufferObject, _cred: &Credentials, _prot: VmProt) -> Result<()> {
        Ok(())
    }
}

pub fn cred() -> Credentials {
    Credentials { file_id: 3, uid: 1000 }
}

/// Device whose offset space starts at page 0
pub fn device(prefault_pages: usize) -> (Arc<BoDevice>, Arc<PoolDriver>) {
    let driver = Arc::new(PoolDriver::new());
    let config = DeviceConfig {
        prefault_pages,
        ..DeviceConfig::with_offset_space(0, 1 << 20)
    };
    let dev = BoDevice::new(config, Arc::clone(&driver) as Arc<dyn BoDriver>);
    (dev, driver)
}

/// Upstream locks for driving the handler directly
pub struct Upstream {
    pub held: bool,
    pub releases: u32,
    released: Arc<AtomicBool>,
}

impl Upstream {
    pub fn locked() -> Self {
        Self {
            held: true,
            releases: 0,
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn relock(&mut self) {
        self.held = true;
        self.released.store(false, Ordering::Release);
    }

    /// Flag raised when the handler releases the locks
    pub fn released_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.released)
    }
}

impl FaultLocks for Upstream {
    fn unlock_all(&mut self) {
        assert!(self.held, "upstream locks released twice");
        self.held = false;
        self.releases += 1;
        self.released.store(true, Ordering::Release);
    }
}
