//! Error taxonomy for the buffer-object VM path
//!
//! The restart signal is deliberately absent: it is a control outcome carried
//! by [`crate::ttm::FaultStatus`], not a failure.

use thiserror::Error;

/// Result type for buffer-object VM operations
pub type Result<T> = core::result::Result<T, VmError>;

/// No such object (`ENOENT`)
pub const ENOENT: i32 = 2;
/// I/O failure (`EIO`)
pub const EIO: i32 = 5;
/// Operation not permitted (`EPERM`)
pub const EPERM: i32 = 1;
/// Invalid argument (`EINVAL`)
pub const EINVAL: i32 = 22;

/// Errors surfaced to the fault-dispatch or mmap framework
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// Nothing is registered at this page range, or it is being torn down
    #[error("no buffer object covers pages {start:#x}+{npages}")]
    NotFound { start: u64, npages: u64 },

    /// The driver refused access to the object
    #[error("access to buffer object denied")]
    PermissionDenied,

    /// The object or request cannot be mapped this way
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Backing storage or mapping setup failed
    #[error("I/O failure: {0}")]
    Io(#[from] IoFailure),
}

/// Causes of an I/O-class failure
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoFailure {
    /// Copy-on-write mappings of buffer objects are not supported
    #[error("copy-on-write mapping of a buffer object")]
    CopyOnWrite,

    /// The driver could not establish the bus mapping
    #[error("bus mapping reservation failed")]
    BusReserve,

    /// The driver vetoed the fault
    #[error("driver refused the fault")]
    DriverVeto,

    /// Backing pages could not be allocated
    #[error("backing page population failed")]
    Populate,

    /// Installing the mapping for a page failed
    #[error("mapping install failed at page {page}")]
    MapInstall { page: u64 },
}

impl VmError {
    /// Classic errno for the mmap/fault framework
    pub fn errno(&self) -> i32 {
        match self {
            VmError::NotFound { .. } => ENOENT,
            VmError::PermissionDenied => EPERM,
            VmError::InvalidArgument(_) => EINVAL,
            VmError::Io(_) => EIO,
        }
    }
}
