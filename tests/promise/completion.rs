use railguard::{
    BackPressure, GuardRail, PermitGate, Promise, RejectionClass, ResultClass,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const MS: u64 = 1_000_000;

fn rail_with_gate(max: u64) -> (GuardRail, Arc<PermitGate>) {
    let results = ResultClass::builder()
        .success("success")
        .failure("error")
        .build();
    let reasons = RejectionClass::builder().reason("max-concurrency").build();
    let gate = Arc::new(PermitGate::new(
        max,
        reasons.reason("max-concurrency").unwrap(),
    ));
    let rail = GuardRail::builder("promise-it", results, reasons)
        .add_back_pressure("permits", Arc::clone(&gate) as Arc<dyn BackPressure>)
        .build();
    (rail, gate)
}

/// Completing a rail-bound promise releases the permits and records the
/// outcome exactly once; re-completions change nothing.
#[test]
fn completion_releases_permits_exactly_once() {
    let (rail, gate) = rail_with_gate(4);
    let success = rail.result_class().outcome("success").unwrap();

    let promise: Promise<u32> = rail.acquire_promise(1, 100 * MS).unwrap();
    assert_eq!(gate.in_use(), 1);

    assert!(promise.complete(success, 7).unwrap());
    assert_eq!(gate.in_use(), 0);

    // The loser is a no-op: no double release, no extra count.
    assert!(!promise.complete(success, 8).unwrap());
    assert_eq!(gate.in_use(), 0);
    let trailing = Duration::from_secs(10);
    let now = rail.clock().now_nanos();
    assert_eq!(
        rail.result_counts().count(success.index(), trailing, now),
        1
    );
}

/// Completing with an outcome outside the rail's result class raises
/// synchronously and leaves the rail untouched.
#[test]
fn invalid_result_raises_with_the_expected_message() {
    let (rail, gate) = rail_with_gate(4);
    let foreign = ResultClass::builder().failure("wrong").build();
    let wrong = foreign.outcome("wrong").unwrap();

    let promise: Promise<()> = rail.acquire_promise(1, 100 * MS).unwrap();
    let err = promise.complete(wrong, ()).unwrap_err();

    assert_eq!(
        err.to_string(),
        "Invalid result 'wrong'; Valid results are [success, error]"
    );
    // The failed completion must not have released or recorded anything.
    assert_eq!(gate.in_use(), 1);
    assert!(promise.future().is_pending());
}

/// Waiters parked on the future wake when any racing writer lands.
#[test]
fn blocked_readers_wake_on_completion() {
    let (rail, _gate) = rail_with_gate(4);
    let error = rail.result_class().outcome("error").unwrap();

    let promise: Promise<String> = rail.acquire_promise(1, 100 * MS).unwrap();
    let future = promise.future();

    let readers: Vec<_> = (0..3)
        .map(|_| {
            let future = future.clone();
            std::thread::spawn(move || future.await_done())
        })
        .collect();

    std::thread::sleep(Duration::from_millis(20));
    promise
        .complete_error(error, "downstream broke".into())
        .unwrap();

    for reader in readers {
        assert_eq!(reader.join().unwrap(), Some(error));
    }
    assert!(future.is_failure());
    assert!(future
        .error()
        .unwrap()
        .to_string()
        .contains("downstream broke"));
}

/// on_complete observations are delivered exactly once across racing
/// writers and late registrations.
#[test]
fn exactly_one_observation_per_promise() {
    let (rail, _gate) = rail_with_gate(16);
    let success = rail.result_class().outcome("success").unwrap();

    for _ in 0..20 {
        let promise: Promise<usize> = rail.acquire_promise(1, 100 * MS).unwrap();
        let future = promise.future();
        let observed = Arc::new(AtomicUsize::new(0));
        let o = Arc::clone(&observed);
        future.on_complete(move |_, _| {
            o.fetch_add(1, Ordering::SeqCst);
        });

        let writers: Vec<_> = (0..4)
            .map(|i| {
                let promise = promise.clone();
                std::thread::spawn(move || promise.complete(success, i).unwrap())
            })
            .collect();
        let wins: usize = writers
            .into_iter()
            .map(|w| usize::from(w.join().unwrap()))
            .sum();

        assert_eq!(wins, 1);
        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }
}

/// Completables bound to a rail behave like single-writer promises.
#[test]
fn completable_releases_on_its_single_write() {
    let (rail, gate) = rail_with_gate(2);
    let success = rail.result_class().outcome("success").unwrap();

    let mut completable = rail.acquire_completable::<&'static str>(2, 100 * MS).unwrap();
    let future = completable.future();
    assert_eq!(gate.in_use(), 2);

    assert!(completable.complete(success, "done").unwrap());
    assert_eq!(gate.in_use(), 0);
    assert_eq!(future.value(), Some(&"done"));
}

/// A rejected acquire surfaces as an already-rejected promise future.
#[test]
fn rejected_acquires_surface_on_the_future_view() {
    let (rail, _gate) = rail_with_gate(1);
    let _held: Promise<()> = rail.acquire_promise(1, 100 * MS).unwrap();

    let rejected = rail.acquire_promise::<()>(1, 110 * MS).unwrap_err();
    assert_eq!(rejected.token(), "max-concurrency");
}
