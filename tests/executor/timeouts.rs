use super::guarded_rail;
use railguard::{Action, ActionError, Executor, ThreadPoolExecutor, TimeoutService};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

/// Two executors can share one timeout service; shutting one executor down
/// leaves the shared service running for the other.
#[test]
fn shared_timeout_service_outlives_one_executor() {
    let timeouts = Arc::new(TimeoutService::start());
    let (rail, gate) = guarded_rail(8);

    let first = ThreadPoolExecutor::builder("shared-a")
        .pool_size(1)
        .timeout_service(Arc::clone(&timeouts))
        .build();
    let second = ThreadPoolExecutor::builder("shared-b")
        .pool_size(1)
        .timeout_service(Arc::clone(&timeouts))
        .build();

    first.shutdown();

    // The surviving executor still gets its deadlines fired.
    let (latch_tx, latch_rx) = mpsc::channel::<()>();
    let future = second.submit(
        &rail,
        Action::new(move || {
            latch_rx.recv().ok();
            Ok::<_, ActionError>(())
        }),
        Some(Duration::from_millis(30)),
    );

    assert_eq!(future.await_done().unwrap().token(), "timeout");
    latch_tx.send(()).unwrap();
    second.shutdown();
    timeouts.shutdown();
    assert_eq!(gate.in_use(), 0);
}

/// A generous deadline never beats a fast action: the natural completion
/// wins and the later firing is a no-op.
#[test]
fn completed_work_wins_against_its_deadline() {
    let (rail, gate) = guarded_rail(8);
    let executor = ThreadPoolExecutor::builder("fast").pool_size(2).build();

    let future = executor.submit(
        &rail,
        Action::new(|| Ok::<_, ActionError>("quick")),
        Some(Duration::from_millis(30)),
    );

    assert_eq!(future.await_done().unwrap().token(), "success");
    // Let the deadline pass; the completion must not change.
    std::thread::sleep(Duration::from_millis(60));
    assert_eq!(future.outcome().unwrap().token(), "success");
    assert!(!future.is_cancelled());
    assert_eq!(gate.in_use(), 0);
    executor.shutdown();
}

/// A deadline of zero is already expired at arming time and fires on the
/// next tick.
#[test]
fn zero_timeout_cancels_promptly() {
    let (rail, gate) = guarded_rail(8);
    let executor = ThreadPoolExecutor::builder("instant").pool_size(1).build();
    let (latch_tx, latch_rx) = mpsc::channel::<()>();

    let future = executor.submit(
        &rail,
        Action::new(move || {
            latch_rx.recv().ok();
            Ok::<_, ActionError>(())
        }),
        Some(Duration::ZERO),
    );

    assert_eq!(future.await_done().unwrap().token(), "timeout");
    latch_tx.send(()).unwrap();
    executor.shutdown();
    assert_eq!(gate.in_use(), 0);
}
