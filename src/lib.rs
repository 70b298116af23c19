//! ttm_vm - Demand-paging fault path for graphics buffer objects
//!
//! This crate maps device buffer objects into process address spaces lazily:
//! an mmap request is resolved to an object through the mmap offset space,
//! and pages are installed the first time the process touches them. The
//! fault path cooperates with a migration engine that may be moving the same
//! object between system memory and a device aperture.

#![no_std]
// Many kernel types have specialized initialization that doesn't fit Default
#![allow(clippy::new_without_default)]
// Driver callbacks return unit errors for simple failure indication
#![allow(clippy::result_unit_err)]

extern crate alloc;

#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod config;
pub mod console;
pub mod error;
pub mod kern;
pub mod logging;
pub mod ttm;
pub mod vm;

pub use config::DeviceConfig;
pub use error::{IoFailure, Result, VmError};

/// Crate version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Crate name
pub const NAME: &str = "ttm_vm";

/// Initialize the library: install the logger and apply the configured
/// log level
pub fn init(config: &DeviceConfig) {
    logging::init();
    logging::set_level(config.log_level);
    log::info!("{} {} initialized", NAME, VERSION);
}
