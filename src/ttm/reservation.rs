//! Reservation Protocol
//!
//! Every buffer object carries a reservation: the lock that serializes its
//! placement and migration state. Fault handlers run beneath address-space
//! locks that the migration engine may itself need, so they never block on a
//! reservation. They try once; on failure they drop every upstream lock,
//! wait with [`Reservation::wait_unreserved`], and restart the whole fault.
//!
//! A reservation can also be *dead*: the object is being destroyed and will
//! never be reservable again.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU8, Ordering};

use crate::kern::lock::relax;

const UNRESERVED: u8 = 0;
const RESERVED: u8 = 1;
const DEAD: u8 = 2;

/// The object behind the reservation is being destroyed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaleReservation;

/// Outcome of a non-blocking reservation attempt
#[must_use]
pub enum TryReserve<'a, T> {
    /// The caller now owns the reservation
    Acquired(ReservationGuard<'a, T>),
    /// Held by someone else
    Busy,
    /// The object is being destroyed
    Stale,
}

impl<'a, T> TryReserve<'a, T> {
    pub fn is_acquired(&self) -> bool {
        matches!(self, TryReserve::Acquired(_))
    }
}

/// A lock guarding `T` with try-or-back-off acquisition
pub struct Reservation<T> {
    state: AtomicU8,
    data: UnsafeCell<T>,
}

// Access to `data` is only handed out through a guard, and at most one guard
// exists at a time.
unsafe impl<T: Send> Send for Reservation<T> {}
unsafe impl<T: Send> Sync for Reservation<T> {}

impl<T> Reservation<T> {
    /// Create an unreserved reservation around `data`
    pub const fn new(data: T) -> Self {
        Self {
            state: AtomicU8::new(UNRESERVED),
            data: UnsafeCell::new(data),
        }
    }

    /// Attempt to reserve without blocking
    pub fn try_reserve(&self) -> TryReserve<'_, T> {
        match self.state.compare_exchange(
            UNRESERVED,
            RESERVED,
            Ordering::Acquire,
            Ordering::Acquire,
        ) {
            Ok(_) => TryReserve::Acquired(ReservationGuard {
                reservation: self,
                release_as: UNRESERVED,
            }),
            Err(DEAD) => TryReserve::Stale,
            Err(_) => TryReserve::Busy,
        }
    }

    /// Reserve, waiting as long as necessary.
    ///
    /// Must not be called from a fault handler holding address-space locks.
    pub fn reserve(&self) -> Result<ReservationGuard<'_, T>, StaleReservation> {
        loop {
            match self.try_reserve() {
                TryReserve::Acquired(guard) => return Ok(guard),
                TryReserve::Stale => return Err(StaleReservation),
                TryReserve::Busy => self.wait_unreserved(),
            }
        }
    }

    /// Block until the reservation is no longer held.
    ///
    /// Takes nothing and decides nothing: the caller must hold no other
    /// locks and must retry its whole operation afterwards.
    pub fn wait_unreserved(&self) {
        while self.state.load(Ordering::Acquire) == RESERVED {
            relax();
        }
    }

    /// Whether someone currently holds the reservation
    pub fn is_reserved(&self) -> bool {
        self.state.load(Ordering::Acquire) == RESERVED
    }

    /// Whether the reservation was released as dead
    pub fn is_dead(&self) -> bool {
        self.state.load(Ordering::Acquire) == DEAD
    }

    /// Exclusive access without locking, for teardown
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

/// Proof of holding a reservation; releases it on drop
#[must_use = "the reservation is released as soon as the guard is dropped"]
pub struct ReservationGuard<'a, T> {
    reservation: &'a Reservation<T>,
    release_as: u8,
}

impl<'a, T> ReservationGuard<'a, T> {
    /// Release the reservation so that it can never be taken again
    pub fn mark_dead(mut self) {
        self.release_as = DEAD;
    }
}

impl<'a, T> core::ops::Deref for ReservationGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard is the only path to `data` while it lives
        unsafe { &*self.reservation.data.get() }
    }
}

impl<'a, T> core::ops::DerefMut for ReservationGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: as above, and `&mut self` makes this access unique
        unsafe { &mut *self.reservation.data.get() }
    }
}

impl<'a, T> Drop for ReservationGuard<'a, T> {
    fn drop(&mut self) {
        self.reservation
            .state
            .store(self.release_as, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::sync::Arc;
    use core::sync::atomic::AtomicBool;

    #[test]
    fn test_try_reserve_busy() {
        let resv = Reservation::new(5u32);
        let guard = match resv.try_reserve() {
            TryReserve::Acquired(g) => g,
            _ => panic!("fresh reservation must be acquirable"),
        };
        assert!(resv.is_reserved());
        assert!(matches!(resv.try_reserve(), TryReserve::Busy));
        drop(guard);
        assert!(resv.try_reserve().is_acquired());
    }

    #[test]
    fn test_guard_gives_access() {
        let resv = Reservation::new(5u32);
        {
            let mut guard = resv.reserve().unwrap();
            *guard += 1;
        }
        assert_eq!(*resv.reserve().unwrap(), 6);
    }

    #[test]
    fn test_dead_is_stale() {
        let resv = Reservation::new(());
        resv.reserve().unwrap().mark_dead();
        assert!(resv.is_dead());
        assert!(matches!(resv.try_reserve(), TryReserve::Stale));
        assert_eq!(resv.reserve().err(), Some(StaleReservation));
        // A dead reservation is not "reserved": waiters fall through
        resv.wait_unreserved();
    }

    #[test]
    fn test_wait_unreserved_blocks_until_release() {
        let resv = Arc::new(Reservation::new(()));
        let released = Arc::new(AtomicBool::new(false));
        let guard = resv.reserve().unwrap();

        let waiter = {
            let resv = Arc::clone(&resv);
            let released = Arc::clone(&released);
            std::thread::spawn(move || {
                resv.wait_unreserved();
                released.load(Ordering::Acquire)
            })
        };

        std::thread::sleep(std::time::Duration::from_millis(10));
        released.store(true, Ordering::Release);
        drop(guard);
        assert!(waiter.join().unwrap());
    }
}
