//! Rolling per-slot counters bucketed by time window.
//!
//! A [`RollingCounts`] keeps, for each slot (an outcome or rejection-reason
//! index), a ring of `buckets` buckets of `bucket_width` nanoseconds each.
//! Writes are lock-free; a bucket is recycled lazily the first time a write
//! lands in a newer window that maps onto it. Reads aggregate over a trailing
//! interval and are wait-free approximate snapshots: a reader may miss a
//! write that is racing it, but never observes a negative delta and never
//! double-counts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Each bucket packs `(window_tag << 32) | count` into one atomic word.
///
/// The tag is the low 32 bits of the absolute window index, so recycling a
/// bucket is a single CAS that swaps both the tag and the count; there is no
/// torn moment where a stale count sits under a fresh tag.
const COUNT_MASK: u64 = 0xFFFF_FFFF;

fn pack(window: u64, count: u64) -> u64 {
    (window & COUNT_MASK) << 32 | (count & COUNT_MASK)
}

fn unpack(word: u64) -> (u64, u64) {
    (word >> 32, word & COUNT_MASK)
}

/// Sequence comparison over 32-bit window tags, robust to wraparound.
fn tag_is_newer(a: u64, b: u64) -> bool {
    a.wrapping_sub(b) & COUNT_MASK < 0x8000_0000
}

/// Rolling counters: one ring of time buckets per slot.
pub struct RollingCounts {
    slots: usize,
    buckets: usize,
    width_nanos: u64,
    cells: Box<[AtomicU64]>,
}

impl RollingCounts {
    /// Default ring geometry: 64 buckets of 100ms, a 6.4s horizon.
    pub const DEFAULT_BUCKETS: usize = 64;
    pub const DEFAULT_BUCKET_WIDTH: Duration = Duration::from_millis(100);

    /// Creates a counter with `slots` independent slots and the given ring
    /// geometry.
    ///
    /// # Panics
    ///
    /// Panics if `slots` or `buckets` is zero, or `bucket_width` is zero.
    pub fn new(slots: usize, buckets: usize, bucket_width: Duration) -> Self {
        assert!(slots > 0, "RollingCounts requires at least one slot");
        assert!(buckets > 0, "RollingCounts requires at least one bucket");
        let width_nanos = bucket_width.as_nanos() as u64;
        assert!(width_nanos > 0, "bucket width must be non-zero");

        let mut cells = Vec::with_capacity(slots * buckets);
        // Tag 0 never matches window tag 0 + count 0 ambiguity: an all-zero
        // word reads as window 0 with count 0, which aggregates to nothing.
        cells.resize_with(slots * buckets, || AtomicU64::new(0));

        Self {
            slots,
            buckets,
            width_nanos,
            cells: cells.into_boxed_slice(),
        }
    }

    /// Creates a counter with the default ring geometry.
    pub fn with_default_window(slots: usize) -> Self {
        Self::new(slots, Self::DEFAULT_BUCKETS, Self::DEFAULT_BUCKET_WIDTH)
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    pub fn buckets(&self) -> usize {
        self.buckets
    }

    pub fn bucket_width(&self) -> Duration {
        Duration::from_nanos(self.width_nanos)
    }

    /// Total horizon covered by the ring.
    pub fn horizon(&self) -> Duration {
        Duration::from_nanos(self.width_nanos * self.buckets as u64)
    }

    /// Adds `n` to `slot` in the bucket containing `now_nanos`.
    ///
    /// Writes into a bucket whose window has passed out of the ring recycle
    /// it; writes carrying a timestamp older than the bucket's current window
    /// are dropped (the ring no longer covers them).
    pub fn add(&self, slot: usize, n: u64, now_nanos: u64) {
        debug_assert!(slot < self.slots, "slot {slot} out of range");
        let window = now_nanos / self.width_nanos;
        let cell = &self.cells[slot * self.buckets + (window as usize % self.buckets)];
        let tag = window & COUNT_MASK;

        let mut current = cell.load(Ordering::Acquire);
        loop {
            let (cur_tag, cur_count) = unpack(current);
            let next = if cur_tag == tag {
                pack(tag, cur_count.saturating_add(n))
            } else if tag_is_newer(tag, cur_tag) {
                // This position was last written in an older window; the
                // newer window takes the bucket over.
                pack(tag, n)
            } else {
                // The ring has already moved past this write's window.
                return;
            };
            match cell.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    /// Sums `slot` over the trailing interval `[now - trailing, now]`.
    ///
    /// The sum includes every bucket whose window intersects the interval,
    /// clamped to the ring's horizon.
    pub fn count(&self, slot: usize, trailing: Duration, now_nanos: u64) -> u64 {
        debug_assert!(slot < self.slots, "slot {slot} out of range");
        let hi = now_nanos / self.width_nanos;
        let trailing_nanos = trailing.as_nanos() as u64;
        let lo = now_nanos.saturating_sub(trailing_nanos) / self.width_nanos;
        let lo = lo.max(hi.saturating_sub(self.buckets as u64 - 1));

        let mut total = 0u64;
        for window in lo..=hi {
            let cell = &self.cells[slot * self.buckets + (window as usize % self.buckets)];
            let (tag, count) = unpack(cell.load(Ordering::Acquire));
            if tag == window & COUNT_MASK {
                total += count;
            }
        }
        total
    }

    /// Takes a snapshot of every slot over the trailing interval.
    pub fn snapshot(&self, trailing: Duration, now_nanos: u64) -> CountsSnapshot {
        let per_slot: Vec<u64> = (0..self.slots)
            .map(|slot| self.count(slot, trailing, now_nanos))
            .collect();
        let total = per_slot.iter().sum();
        CountsSnapshot { per_slot, total }
    }
}

/// A point-in-time aggregation of every slot over a trailing interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountsSnapshot {
    per_slot: Vec<u64>,
    total: u64,
}

impl CountsSnapshot {
    pub fn slot(&self, index: usize) -> u64 {
        self.per_slot[index]
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.per_slot.iter().copied()
    }
}
