//! Property tests for the rolling counters.
//!
//! Invariants tested:
//! - a trailing read covering every write equals the written sum
//! - counts are monotone while the window is active
//! - writes never bleed across slots

use proptest::prelude::*;
use railguard_core::RollingCounts;
use std::time::Duration;

const MS: u64 = 1_000_000;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: reading back over the full window returns exactly what was
    /// written.
    #[test]
    fn reads_cover_all_writes_in_window(
        writes in prop::collection::vec((0usize..3, 1u64..=10, 0u64..=900), 1..=64),
    ) {
        let counts = RollingCounts::new(3, 10, Duration::from_millis(100));
        let mut expected = [0u64; 3];

        for (slot, n, at_ms) in writes {
            counts.add(slot, n, at_ms * MS);
            expected[slot] += n;
        }

        // All writes landed inside [0, 900ms]; a 1s read at t=900ms covers
        // every bucket of the ring.
        for (slot, total) in expected.iter().enumerate() {
            prop_assert_eq!(
                counts.count(slot, Duration::from_millis(1000), 900 * MS),
                *total
            );
        }
    }

    /// Property: within one active window, successive reads never decrease.
    #[test]
    fn counts_are_monotone(increments in prop::collection::vec(1u64..=5, 1..=100)) {
        let counts = RollingCounts::new(1, 8, Duration::from_millis(100));
        let mut last = 0;
        for n in increments {
            counts.add(0, n, 50 * MS);
            let now = counts.count(0, Duration::from_millis(100), 50 * MS);
            prop_assert!(now >= last);
            last = now;
        }
    }

    /// Property: slots are independent.
    #[test]
    fn slots_do_not_bleed(slot_a in 0usize..4, slot_b in 0usize..4, n in 1u64..=100) {
        prop_assume!(slot_a != slot_b);
        let counts = RollingCounts::new(4, 8, Duration::from_millis(100));
        counts.add(slot_a, n, 10 * MS);
        prop_assert_eq!(counts.count(slot_a, Duration::from_millis(500), 20 * MS), n);
        prop_assert_eq!(counts.count(slot_b, Duration::from_millis(500), 20 * MS), 0);
    }
}
