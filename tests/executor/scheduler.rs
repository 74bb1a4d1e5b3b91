use super::guarded_rail;
use railguard::{Action, ActionError, Executor, SchedulerLoop};
use std::sync::mpsc;
use std::time::{Duration, Instant};

/// With both queues empty a cycle reports that it did nothing, and permit
/// state is untouched.
#[test]
fn empty_cycle_returns_false_with_no_side_effects() {
    let (_rail, gate) = guarded_rail(4);
    let scheduler = SchedulerLoop::builder("empty-cycle")
        .pool_size(2)
        .new_unstarted();

    assert!(!scheduler.run_once());
    assert!(!scheduler.run_once());
    assert_eq!(gate.in_use(), 0);
    scheduler.shutdown();
}

/// A started scheduler carries a submission through worker execution,
/// coordinator delivery, and rail release.
#[test]
fn coordinator_delivers_completions() {
    let (rail, gate) = guarded_rail(8);
    let scheduler = SchedulerLoop::builder("delivery").pool_size(2).start();

    let ok = scheduler.submit(&rail, Action::new(|| Ok::<_, ActionError>(40 + 2)), None);
    let failed = scheduler.submit(
        &rail,
        Action::new(|| Err::<u32, _>(ActionError::from("nope"))),
        None,
    );

    assert!(ok.await_done_for(Duration::from_secs(5)));
    assert!(failed.await_done_for(Duration::from_secs(5)));
    assert_eq!(ok.outcome().unwrap().token(), "success");
    assert_eq!(ok.value(), Some(&42));
    assert_eq!(failed.outcome().unwrap().token(), "error");

    scheduler.shutdown();
    assert_eq!(gate.in_use(), 0);

    let now = rail.clock().now_nanos();
    let trailing = Duration::from_secs(5);
    let success = rail.result_class().outcome("success").unwrap();
    let error = rail.result_class().outcome("error").unwrap();
    assert_eq!(rail.result_counts().count(success.index(), trailing, now), 1);
    assert_eq!(rail.result_counts().count(error.index(), trailing, now), 1);
}

/// The coordinator fires deadlines from its sorted map and the cancel wins
/// against the still-blocked action.
#[test]
fn coordinator_fires_timeouts() {
    let (rail, gate) = guarded_rail(8);
    let scheduler = SchedulerLoop::builder("deadlines").pool_size(2).start();
    let (latch_tx, latch_rx) = mpsc::channel::<()>();

    let future = scheduler.submit(
        &rail,
        Action::new(move || {
            latch_rx.recv().ok();
            Ok::<_, ActionError>(())
        }),
        Some(Duration::from_millis(40)),
    );

    assert!(
        future.await_done_for(Duration::from_secs(5)),
        "timeout never fired"
    );
    assert_eq!(future.outcome().unwrap().token(), "timeout");
    assert!(future.is_cancelled());
    // The cancel released the permit even though the action is still
    // blocked.
    assert_eq!(gate.in_use(), 0);

    latch_tx.send(()).unwrap();
    scheduler.shutdown();
    assert_eq!(future.outcome().unwrap().token(), "timeout");
}

/// Submissions racing a shutdown either complete or reject; none leak
/// permits.
#[test]
fn shutdown_drains_and_rejects_late_submissions() {
    let (rail, gate) = guarded_rail(64);
    let scheduler = SchedulerLoop::builder("drain").pool_size(4).start();

    let futures: Vec<_> = (0..32)
        .map(|i| {
            scheduler.submit(
                &rail,
                Action::new(move || {
                    std::thread::sleep(Duration::from_millis(1));
                    Ok::<_, ActionError>(i)
                }),
                None,
            )
        })
        .collect();

    scheduler.shutdown();

    for future in &futures {
        assert_eq!(future.outcome().unwrap().token(), "success");
    }
    assert_eq!(gate.in_use(), 0);

    let late = scheduler.submit(&rail, Action::new(|| Ok::<_, ActionError>(0)), None);
    assert!(late.rejected_reason().unwrap().is_shutdown());
}

/// Hand-driven cycles process at most pool_size submissions each.
#[test]
fn cycles_are_bounded_by_pool_size() {
    let (rail, _gate) = guarded_rail(16);
    let scheduler = SchedulerLoop::builder("bounded")
        .pool_size(2)
        .new_unstarted();

    let futures: Vec<_> = (0..6usize)
        .map(|i| scheduler.submit(&rail, Action::new(move || Ok::<_, ActionError>(i)), None))
        .collect();

    // Six submissions at pool_size 2 need three dispatch cycles, plus
    // return cycles; drive until everything lands.
    let deadline = Instant::now() + Duration::from_secs(5);
    while futures.iter().any(|f| f.is_pending()) {
        assert!(Instant::now() < deadline, "scheduler never drained");
        scheduler.run_once();
        std::thread::yield_now();
    }

    for (i, future) in futures.iter().enumerate() {
        assert_eq!(future.value(), Some(&i));
    }
    scheduler.shutdown();
}
