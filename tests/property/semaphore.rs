//! Property tests for the permit gate.
//!
//! Invariants tested:
//! - `in_use` never exceeds the configured capacity
//! - acquire followed by release is an identity
//! - after all admitted permits are released, `in_use` is zero

use proptest::prelude::*;
use railguard::{PermitGate, RejectionClass};
use std::sync::Arc;

fn gate(max: u64) -> PermitGate {
    let reasons = RejectionClass::builder().reason("max-concurrency").build();
    PermitGate::new(max, reasons.reason("max-concurrency").unwrap())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: an arbitrary acquire/release schedule conserves permits.
    #[test]
    fn permits_are_conserved(
        max in 1u64..=64,
        requests in prop::collection::vec(1u64..=8, 1..=64),
    ) {
        let gate = gate(max);
        let mut held: Vec<u64> = Vec::new();

        for request in requests {
            match gate.try_acquire(request) {
                Ok(()) => {
                    held.push(request);
                    prop_assert!(gate.in_use() <= max);
                }
                Err(reason) => {
                    prop_assert_eq!(reason.token(), "max-concurrency");
                    // A rejection reserves nothing.
                    prop_assert_eq!(gate.in_use(), held.iter().sum::<u64>());
                }
            }
        }

        prop_assert_eq!(gate.in_use(), held.iter().sum::<u64>());
        for permits in held.drain(..) {
            gate.release(permits);
        }
        prop_assert_eq!(gate.in_use(), 0);
    }

    /// Property: acquire(n) then release(n) restores the pre-state.
    #[test]
    fn acquire_release_is_identity(max in 1u64..=128, n in 1u64..=128) {
        let gate = gate(max);
        let before = gate.in_use();
        if gate.try_acquire(n).is_ok() {
            gate.release(n);
        }
        prop_assert_eq!(gate.in_use(), before);
    }

    /// Property: capacity minus one admits exactly one more single permit.
    #[test]
    fn boundary_admits_exactly_one(max in 2u64..=64) {
        let gate = gate(max);
        prop_assert!(gate.try_acquire(max - 1).is_ok());
        prop_assert!(gate.try_acquire(1).is_ok());
        prop_assert!(gate.try_acquire(1).is_err());
    }

    /// Property: concurrent single-permit churn never oversubscribes and
    /// always drains to zero.
    #[test]
    fn concurrent_churn_conserves(max in 1u64..=8, iterations in 10usize..=200) {
        let gate = Arc::new(gate(max));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let gate = Arc::clone(&gate);
                std::thread::spawn(move || {
                    for _ in 0..iterations {
                        if gate.try_acquire(1).is_ok() {
                            assert!(gate.in_use() <= max);
                            gate.release(1);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        prop_assert_eq!(gate.in_use(), 0);
    }
}
