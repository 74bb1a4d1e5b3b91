use railguard::{
    BackPressure, CircuitBreaker, CircuitState, GuardRail, PermitGate, RejectionClass, ResultClass,
};
use railguard_core::RollingCounts;
use std::sync::Arc;
use std::time::Duration;

const MS: u64 = 1_000_000;

struct Harness {
    rail: GuardRail,
    breaker: Arc<CircuitBreaker>,
}

fn harness() -> Harness {
    let results = ResultClass::builder()
        .success("success")
        .failure("error")
        .build();
    let reasons = RejectionClass::builder()
        .reason("max-concurrency")
        .reason("circuit-open")
        .build();
    let counts = Arc::new(RollingCounts::new(
        results.len(),
        64,
        Duration::from_millis(100),
    ));

    let breaker = Arc::new(
        CircuitBreaker::builder("db-breaker", reasons.reason("circuit-open").unwrap())
            .trailing_period(Duration::from_millis(1000))
            .failure_threshold(5)
            .backoff(Duration::from_millis(1000))
            .health_source(Arc::clone(&counts), &results)
            .build(),
    );

    let rail = GuardRail::builder("db", results, reasons.clone())
        .result_counts(counts)
        .add_back_pressure("breaker", Arc::clone(&breaker) as Arc<dyn BackPressure>)
        .add_back_pressure(
            "permits",
            Arc::new(PermitGate::new(
                16,
                reasons.reason("max-concurrency").unwrap(),
            )),
        )
        .build();

    Harness { rail, breaker }
}

fn fail_once(h: &Harness, acquire_at: u64, release_at: u64) {
    let error = h.rail.result_class().outcome("error").unwrap();
    let grant = h.rail.acquire(1, acquire_at).unwrap();
    h.rail
        .release_with_result(grant.permits, error, grant.start_nanos, release_at);
}

/// Five failures inside the trailing period leave the rail admitting; the
/// sixth trips the breaker and the next acquire reports circuit-open.
#[test]
fn rail_reports_circuit_open_after_the_threshold() {
    let h = harness();

    for i in 0..5 {
        fail_once(&h, (100 + 2 * i) * MS, (101 + 2 * i) * MS);
    }
    assert_eq!(h.breaker.state(), CircuitState::Closed);
    assert!(h.rail.acquire(1, 120 * MS).is_ok());
    h.rail.release_without_result(1, 121 * MS);

    fail_once(&h, 130 * MS, 131 * MS);
    assert_eq!(h.breaker.state(), CircuitState::Open);

    let rejected = h.rail.acquire(1, 140 * MS).unwrap_err();
    assert_eq!(rejected.token(), "circuit-open");
}

/// A successful probe through the rail closes the breaker again.
#[test]
fn rail_probe_recovers_the_circuit() {
    let h = harness();
    let success = h.rail.result_class().outcome("success").unwrap();

    for i in 0..6 {
        fail_once(&h, (100 + i) * MS, (100 + i) * MS + 500_000);
    }
    assert_eq!(h.breaker.state(), CircuitState::Open);
    assert!(h.rail.acquire(1, 200 * MS).is_err());

    // Backoff expires relative to the sixth failure's release.
    let probe = h.rail.acquire(1, 1_200 * MS).unwrap();
    assert_eq!(h.breaker.state(), CircuitState::HalfOpen);
    // Only the probe is admitted while half-open.
    assert!(h.rail.acquire(1, 1_210 * MS).is_err());

    h.rail
        .release_with_result(probe.permits, success, probe.start_nanos, 1_250 * MS);
    assert_eq!(h.breaker.state(), CircuitState::Closed);
    assert!(h.rail.acquire(1, 1_300 * MS).is_ok());
}

/// A breaker rejection never leaks permits from gates that admitted before
/// it.
#[test]
fn breaker_rejection_preserves_permit_conservation() {
    let results = ResultClass::builder()
        .success("success")
        .failure("error")
        .build();
    let reasons = RejectionClass::builder()
        .reason("max-concurrency")
        .reason("circuit-open")
        .build();
    let counts = Arc::new(RollingCounts::with_default_window(results.len()));
    let gate = Arc::new(PermitGate::new(
        4,
        reasons.reason("max-concurrency").unwrap(),
    ));
    let breaker = Arc::new(
        CircuitBreaker::builder("late-breaker", reasons.reason("circuit-open").unwrap())
            .health_source(Arc::clone(&counts), &results)
            .build(),
    );

    // Permit gate first, breaker second: a breaker rejection must roll the
    // permits back.
    let rail = GuardRail::builder("ordered", results, reasons)
        .result_counts(counts)
        .add_back_pressure("permits", Arc::clone(&gate) as Arc<dyn BackPressure>)
        .add_back_pressure("breaker", Arc::clone(&breaker) as Arc<dyn BackPressure>)
        .build();

    breaker.force_open(100 * MS);
    assert!(rail.acquire(2, 150 * MS).is_err());
    assert_eq!(gate.in_use(), 0);
}

/// Raw releases do not feed the breaker's health.
#[test]
fn raw_release_never_notifies_the_breaker() {
    let h = harness();

    for _ in 0..20 {
        let grant = h.rail.acquire(1, 100 * MS).unwrap();
        h.rail.release_raw_permits(grant.permits);
    }

    // Nothing was recorded, so the breaker has nothing to trip on.
    assert_eq!(h.breaker.health(200 * MS).total, 0);
    assert_eq!(h.breaker.state(), CircuitState::Closed);
}
