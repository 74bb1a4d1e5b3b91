//! Non-blocking permit gate.

use crate::outcome::Rejection;
use crate::rail::BackPressure;
use std::sync::atomic::{AtomicU64, Ordering};

/// A fixed-capacity permit counter with a typed rejection reason.
///
/// Acquire never blocks and never queues: when `in_use + permits` would
/// exceed the capacity, the configured reason is returned and nothing is
/// reserved.
///
/// ```
/// use railguard::{PermitGate, RejectionClass};
///
/// let reasons = RejectionClass::builder().reason("max-concurrency").build();
/// let gate = PermitGate::new(2, reasons.reason("max-concurrency").unwrap());
///
/// assert!(gate.try_acquire(2).is_ok());
/// assert_eq!(gate.try_acquire(1).unwrap_err().token(), "max-concurrency");
/// gate.release(2);
/// assert!(gate.try_acquire(1).is_ok());
/// ```
pub struct PermitGate {
    max: u64,
    in_use: AtomicU64,
    reason: Rejection,
}

impl PermitGate {
    /// Creates a gate admitting at most `max` permits at once.
    ///
    /// # Panics
    ///
    /// Panics if `max` is zero.
    pub fn new(max: u64, reason: Rejection) -> Self {
        assert!(max > 0, "a permit gate needs a non-zero capacity");
        Self {
            max,
            in_use: AtomicU64::new(0),
            reason,
        }
    }

    /// Attempts to reserve `permits` permits.
    pub fn try_acquire(&self, permits: u64) -> Result<(), Rejection> {
        let mut current = self.in_use.load(Ordering::Relaxed);
        loop {
            match current.checked_add(permits) {
                Some(total) if total <= self.max => {}
                _ => return Err(self.reason),
            }
            match self.in_use.compare_exchange_weak(
                current,
                current + permits,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(()),
                Err(observed) => current = observed,
            }
        }
    }

    /// Hands `permits` permits back.
    pub fn release(&self, permits: u64) {
        let previous = self.in_use.fetch_sub(permits, Ordering::AcqRel);
        debug_assert!(
            previous >= permits,
            "permit gate released below zero ({previous} - {permits})"
        );
    }

    /// Permits currently reserved.
    pub fn in_use(&self) -> u64 {
        self.in_use.load(Ordering::Acquire)
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    /// Permits still available.
    pub fn remaining(&self) -> u64 {
        self.max.saturating_sub(self.in_use())
    }

    /// The reason handed out on rejection.
    pub fn rejection_reason(&self) -> Rejection {
        self.reason
    }
}

impl BackPressure for PermitGate {
    fn try_acquire(&self, permits: u64, _now_nanos: u64) -> Result<(), Rejection> {
        PermitGate::try_acquire(self, permits)
    }

    fn release(&self, permits: u64) {
        PermitGate::release(self, permits)
    }
}
