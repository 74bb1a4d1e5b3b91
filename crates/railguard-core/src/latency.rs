//! Per-slot latency recording with percentile queries.

use hdrhistogram::Histogram;
use parking_lot::Mutex;

/// Records latencies per slot (one histogram per outcome index).
///
/// Capacity is fixed at construction: values above the highest trackable
/// nanos are clamped rather than rejected.
pub struct LatencyRecorder {
    histograms: Vec<Mutex<Histogram<u64>>>,
    highest_trackable_nanos: u64,
    significant_digits: u8,
}

impl LatencyRecorder {
    /// One hour in nanos; latencies above this are clamped.
    pub const DEFAULT_HIGHEST_TRACKABLE: u64 = 3_600_000_000_000;
    pub const DEFAULT_SIGNIFICANT_DIGITS: u8 = 2;

    /// Creates a recorder with `slots` histograms.
    ///
    /// # Panics
    ///
    /// Panics if `slots` is zero or the histogram bounds are invalid
    /// (`significant_digits` must be 0..=5, `highest_trackable_nanos >= 2`).
    pub fn new(slots: usize, highest_trackable_nanos: u64, significant_digits: u8) -> Self {
        assert!(slots > 0, "LatencyRecorder requires at least one slot");
        let histograms = (0..slots)
            .map(|_| {
                let histogram =
                    Histogram::new_with_bounds(1, highest_trackable_nanos, significant_digits)
                        .unwrap_or_else(|e| panic!("invalid latency histogram bounds: {e}"));
                Mutex::new(histogram)
            })
            .collect();
        Self {
            histograms,
            highest_trackable_nanos,
            significant_digits,
        }
    }

    /// Creates a recorder with the default capacity (1h, 2 significant digits).
    pub fn with_defaults(slots: usize) -> Self {
        Self::new(
            slots,
            Self::DEFAULT_HIGHEST_TRACKABLE,
            Self::DEFAULT_SIGNIFICANT_DIGITS,
        )
    }

    pub fn slots(&self) -> usize {
        self.histograms.len()
    }

    pub fn highest_trackable_nanos(&self) -> u64 {
        self.highest_trackable_nanos
    }

    pub fn significant_digits(&self) -> u8 {
        self.significant_digits
    }

    /// Records a latency for `slot`, clamping to the trackable range.
    pub fn record(&self, slot: usize, latency_nanos: u64) {
        debug_assert!(slot < self.histograms.len(), "slot {slot} out of range");
        self.histograms[slot].lock().saturating_record(latency_nanos);
    }

    /// The latency value at `quantile` (0.0..=1.0) for `slot`.
    pub fn value_at_quantile(&self, slot: usize, quantile: f64) -> u64 {
        self.histograms[slot].lock().value_at_quantile(quantile)
    }

    /// Highest recorded latency for `slot`.
    pub fn max(&self, slot: usize) -> u64 {
        self.histograms[slot].lock().max()
    }

    /// Number of recorded samples for `slot`.
    pub fn count(&self, slot: usize) -> u64 {
        self.histograms[slot].lock().len()
    }

    /// Takes a consistent snapshot of `slot`.
    pub fn snapshot(&self, slot: usize) -> LatencySnapshot {
        let histogram = self.histograms[slot].lock();
        LatencySnapshot {
            count: histogram.len(),
            max: histogram.max(),
            mean: histogram.mean(),
            p50: histogram.value_at_quantile(0.50),
            p90: histogram.value_at_quantile(0.90),
            p99: histogram.value_at_quantile(0.99),
            p999: histogram.value_at_quantile(0.999),
        }
    }
}

/// A point-in-time view of one slot's latency distribution, in nanos.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencySnapshot {
    pub count: u64,
    pub max: u64,
    pub mean: f64,
    pub p50: u64,
    pub p90: u64,
    pub p99: u64,
    pub p999: u64,
}
