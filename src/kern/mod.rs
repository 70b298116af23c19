//! Kern subsystem - locking and wait primitives

pub mod fence;
pub mod lock;

pub use fence::Fence;
pub use lock::{relax, SimpleLock, SimpleLockGuard};
