use railguard::{BackPressure, GuardRail, PermitGate, RejectionClass, ResultClass};
use std::sync::Arc;
use std::time::Duration;

const MS: u64 = 1_000_000;

fn classes() -> (ResultClass, RejectionClass) {
    let results = ResultClass::builder()
        .success("success")
        .failure("error")
        .build();
    let reasons = RejectionClass::builder().reason("max-concurrency").build();
    (results, reasons)
}

fn rail_with_gate(max: u64) -> (GuardRail, Arc<PermitGate>) {
    let (results, reasons) = classes();
    let gate = Arc::new(PermitGate::new(
        max,
        reasons.reason("max-concurrency").unwrap(),
    ));
    let rail = GuardRail::builder("acquire-release", results, reasons)
        .add_back_pressure("permits", Arc::clone(&gate) as Arc<dyn BackPressure>)
        .build();
    (rail, gate)
}

/// A rail with one semaphore (max=5) admits, fills, rejects, and recovers as
/// permits come back.
#[test]
fn concurrency_rejection_sequence() {
    let (rail, gate) = rail_with_gate(5);

    let first = rail.acquire(1, 100).unwrap();
    assert_eq!(first.permits, 1);
    assert_eq!(first.start_nanos, 100);

    let second = rail.acquire(4, 150).unwrap();
    assert_eq!(second.permits, 4);
    assert_eq!(second.start_nanos, 150);

    let rejected = rail.acquire(1, 200).unwrap_err();
    assert_eq!(rejected.token(), "max-concurrency");

    rail.release_raw_permits(1);
    let after_release = rail.acquire(1, 500).unwrap();
    assert_eq!(after_release.permits, 1);
    assert_eq!(after_release.start_nanos, 500);

    assert_eq!(gate.in_use(), 5);
}

/// acquire(n) followed by release_raw(n) leaves the semaphore where it was.
#[test]
fn acquire_release_raw_round_trip() {
    let (rail, gate) = rail_with_gate(8);
    let before = gate.in_use();

    let grant = rail.acquire(3, 100).unwrap();
    assert_eq!(gate.in_use(), before + 3);
    rail.release_raw_permits(grant.permits);

    assert_eq!(gate.in_use(), before);
}

/// A release-with-result increments exactly one counter bucket by one.
#[test]
fn release_with_result_counts_exactly_once() {
    let (rail, _gate) = rail_with_gate(4);
    let success = rail.result_class().outcome("success").unwrap();
    let error = rail.result_class().outcome("error").unwrap();

    let grant = rail.acquire(1, 100 * MS).unwrap();
    rail.release_with_result(grant.permits, success, grant.start_nanos, 150 * MS);

    let trailing = Duration::from_secs(5);
    let snapshot = rail.result_counts().snapshot(trailing, 200 * MS);
    assert_eq!(snapshot.slot(success.index()), 1);
    assert_eq!(snapshot.slot(error.index()), 0);
    assert_eq!(snapshot.total(), 1);
}

/// A rejected acquire reserves nothing and records only the rejection.
#[test]
fn rejected_acquire_is_exclusive() {
    let (rail, gate) = rail_with_gate(1);
    let full = rail.rejected_class().reason("max-concurrency").unwrap();

    rail.acquire(1, 100 * MS).unwrap();
    assert!(rail.acquire(1, 110 * MS).is_err());
    assert!(rail.acquire(1, 120 * MS).is_err());

    let trailing = Duration::from_secs(5);
    assert_eq!(
        rail.rejected_counts().count(full.index(), trailing, 130 * MS),
        2
    );
    assert_eq!(rail.result_counts().snapshot(trailing, 130 * MS).total(), 0);
    assert_eq!(gate.in_use(), 1);
}

/// release_without_result hands permits back without touching any counter.
#[test]
fn release_without_result_is_metric_less() {
    let (rail, gate) = rail_with_gate(2);

    let grant = rail.acquire(2, 100 * MS).unwrap();
    rail.release_without_result(grant.permits, 150 * MS);

    assert_eq!(gate.in_use(), 0);
    let trailing = Duration::from_secs(5);
    assert_eq!(rail.result_counts().snapshot(trailing, 200 * MS).total(), 0);
}

/// Multiple grants release independently; permits are conserved overall.
#[test]
fn interleaved_grants_conserve_permits() {
    let (rail, gate) = rail_with_gate(10);
    let success = rail.result_class().outcome("success").unwrap();
    let error = rail.result_class().outcome("error").unwrap();

    let a = rail.acquire(2, 100).unwrap();
    let b = rail.acquire(3, 110).unwrap();
    let c = rail.acquire(5, 120).unwrap();
    assert_eq!(gate.in_use(), 10);

    rail.release_with_result(b.permits, error, b.start_nanos, 200);
    assert_eq!(gate.in_use(), 7);
    rail.release_with_result(a.permits, success, a.start_nanos, 210);
    rail.release_without_result(c.permits, 220);
    assert_eq!(gate.in_use(), 0);
}
