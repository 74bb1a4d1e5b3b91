//! Single-threaded coordinator over lock-free submission and return queues.
//!
//! Where the thread-pool executor lets workers complete promises directly,
//! the scheduler loop funnels everything through one coordinator: workers
//! only run the raw action and park the result on the return queue; the
//! coordinator delivers completions, fires timeouts from a sorted deadline
//! map, and backs off progressively when idle.

use crate::error::ActionError;
use crate::executor::{Action, Executor};
use crate::pool::{Job, WorkerPool};
use crate::promise::Promise;
use crate::rail::GuardRail;
use crate::task::CancellableTask;
use crate::{RailFuture, RejectedReason};
use crossbeam_queue::SegQueue;
use parking_lot::Mutex;
use railguard_core::{Clock, SystemClock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{JoinHandle, Thread};
use std::time::Duration;

/// Cycles of doing nothing before the coordinator stops busy-spinning.
const SPIN_CYCLES: u32 = 64;
/// Cycles of doing nothing before yielding gives way to parking.
const YIELD_CYCLES: u32 = 256;
/// How long an idle coordinator parks per cycle.
const PARK_INTERVAL: Duration = Duration::from_micros(200);

/// A task as the coordinator sees it: run on a worker, delivered and
/// cancelled on the coordinator.
trait ScheduledUnit: Send + Sync + 'static {
    fn run_action(&self);
    fn deliver(&self);
    fn cancel_timed_out(&self);
}

struct ScheduledTask<T> {
    task: CancellableTask<T>,
    pending: Mutex<Option<Result<T, ActionError>>>,
}

impl<T: Send + 'static> ScheduledUnit for ScheduledTask<T> {
    fn run_action(&self) {
        if let Some(action) = self.task.begin() {
            *self.pending.lock() = Some(CancellableTask::run_action(action));
        }
    }

    fn deliver(&self) {
        if let Some(result) = self.pending.lock().take() {
            let _ = self.task.deliver(result);
        }
    }

    fn cancel_timed_out(&self) {
        let _ = self.task.cancel_timed_out();
    }
}

struct Submission {
    handle: u64,
    deadline_nanos: Option<u64>,
    unit: Arc<dyn ScheduledUnit>,
}

struct Tracked {
    deadline_nanos: Option<u64>,
    unit: Arc<dyn ScheduledUnit>,
}

/// Coordinator-private bookkeeping. Only the driving thread locks it, once
/// per cycle.
#[derive(Default)]
struct CoordState {
    deadlines: BTreeMap<(u64, u64), ()>,
    tasks: HashMap<u64, Tracked>,
}

struct SchedulerShared {
    to_schedule: SegQueue<Submission>,
    to_return: SegQueue<u64>,
    state: Mutex<CoordState>,
    pool: WorkerPool,
    pool_size: usize,
    clock: Arc<dyn Clock>,
    shut_down: AtomicBool,
    handle_seq: AtomicU64,
    driver: Mutex<Option<Thread>>,
}

impl SchedulerShared {
    fn unpark_driver(&self) {
        if let Some(thread) = self.driver.lock().as_ref() {
            thread.unpark();
        }
    }

    /// One coordinator cycle; returns whether any step did work.
    fn run_once(self: &Arc<Self>) -> bool {
        let mut state = self.state.lock();
        let mut did_work = false;

        // 1. Drain submissions: record bookkeeping, hand the action to a
        //    worker that parks its result on the return queue.
        for _ in 0..self.pool_size {
            let Some(submission) = self.to_schedule.pop() else {
                break;
            };
            did_work = true;

            if let Some(deadline) = submission.deadline_nanos {
                state.deadlines.insert((deadline, submission.handle), ());
            }
            state.tasks.insert(
                submission.handle,
                Tracked {
                    deadline_nanos: submission.deadline_nanos,
                    unit: Arc::clone(&submission.unit),
                },
            );

            let shared = Arc::clone(self);
            let handle = submission.handle;
            let unit = submission.unit;
            let job: Job = Box::new(move || {
                unit.run_action();
                shared.to_return.push(handle);
                shared.unpark_driver();
            });
            if let Err(job) = self.pool.spawn(job) {
                // Pool already closed (shutdown race): run inline so the
                // return still lands and bookkeeping drains.
                job();
            }
        }

        // 2. Drain returns: deliver into the promise on this thread, which
        //    routes metrics and breaker updates through the rail release.
        for _ in 0..self.pool_size {
            let Some(handle) = self.to_return.pop() else {
                break;
            };
            did_work = true;

            if let Some(tracked) = state.tasks.remove(&handle) {
                if let Some(deadline) = tracked.deadline_nanos {
                    state.deadlines.remove(&(deadline, handle));
                }
                tracked.unit.deliver();
            }
        }

        // 3. Fire timeouts: take the expired head of the deadline map so it
        //    only ever tracks live deadlines.
        let now = self.clock.now_nanos();
        let live = state.deadlines.split_off(&(now + 1, 0));
        let expired = std::mem::replace(&mut state.deadlines, live);
        for (_, handle) in expired.keys() {
            did_work = true;
            // The task entry stays until the worker's return arrives; the
            // cancel is idempotent against a racing delivery.
            if let Some(tracked) = state.tasks.get(handle) {
                tracked.unit.cancel_timed_out();
            }
        }

        did_work
    }
}

/// Coordinator-thread executor over lock-free in/out queues.
///
/// Construct with [`start`](SchedulerLoop::start) for a driven coordinator,
/// or [`new_unstarted`](SchedulerLoop::new_unstarted) to drive cycles by
/// hand with [`run_once`](SchedulerLoop::run_once).
pub struct SchedulerLoop {
    shared: Arc<SchedulerShared>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl SchedulerLoop {
    pub fn builder(name: impl Into<String>) -> SchedulerLoopBuilder {
        SchedulerLoopBuilder {
            name: name.into(),
            pool_size: None,
            clock: None,
        }
    }

    /// Starts a scheduler with default settings.
    pub fn start(name: impl Into<String>) -> Self {
        Self::builder(name).start()
    }

    /// Creates a scheduler without a coordinator thread; the caller drives
    /// it through [`run_once`](SchedulerLoop::run_once).
    pub fn new_unstarted(name: impl Into<String>) -> Self {
        Self::builder(name).new_unstarted()
    }

    /// Runs one coordinator cycle: drain submissions, drain returns, fire
    /// timeouts. Returns `false` when the cycle found nothing to do (and
    /// had no side effects).
    pub fn run_once(&self) -> bool {
        self.shared.run_once()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shut_down.load(Ordering::Acquire)
    }
}

impl Executor for SchedulerLoop {
    fn submit<T: Send + 'static>(
        &self,
        rail: &GuardRail,
        action: Action<T>,
        timeout: Option<Duration>,
    ) -> RailFuture<T> {
        if self.is_shut_down() {
            return RailFuture::rejected(RejectedReason::Shutdown);
        }

        let now = self.shared.clock.now_nanos();
        let promise: Promise<T> = match rail.acquire_promise(1, now) {
            Ok(promise) => promise,
            Err(reason) => return RailFuture::rejected(RejectedReason::Gate(reason)),
        };

        let future = promise.future();
        let task = action.into_task(rail.result_class(), promise);
        let handle = self.shared.handle_seq.fetch_add(1, Ordering::Relaxed);

        self.shared.to_schedule.push(Submission {
            handle,
            deadline_nanos: timeout.map(|t| now + t.as_nanos() as u64),
            unit: Arc::new(ScheduledTask {
                task,
                pending: Mutex::new(None),
            }),
        });
        self.shared.unpark_driver();

        future
    }

    fn shutdown(&self) {
        if self.shared.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::info!("scheduler loop shutting down");

        // Workers drain and push their returns before the pool joins; the
        // coordinator then drains the final returns and exits.
        self.shared.pool.shutdown();
        self.shared.unpark_driver();
        if let Some(driver) = self.driver.lock().take() {
            let _ = driver.join();
        } else {
            // Hand-driven scheduler: drain the remaining bookkeeping here.
            while self.shared.run_once() {}
        }
    }
}

impl Drop for SchedulerLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn driver_loop(shared: Arc<SchedulerShared>) {
    let mut idle_cycles: u32 = 0;
    loop {
        if shared.shut_down.load(Ordering::Acquire) {
            while shared.run_once() {}
            return;
        }

        if shared.run_once() {
            idle_cycles = 0;
        } else {
            idle_cycles = idle_cycles.saturating_add(1);
            if idle_cycles < SPIN_CYCLES {
                std::hint::spin_loop();
            } else if idle_cycles < YIELD_CYCLES {
                std::thread::yield_now();
            } else {
                std::thread::park_timeout(PARK_INTERVAL);
            }
        }
    }
}

/// Builder for a [`SchedulerLoop`].
pub struct SchedulerLoopBuilder {
    name: String,
    pool_size: Option<usize>,
    clock: Option<Arc<dyn Clock>>,
}

impl SchedulerLoopBuilder {
    /// Sets the internal worker count, which also bounds how many
    /// submissions and returns one cycle drains.
    ///
    /// Default: available parallelism.
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = Some(size);
        self
    }

    /// Sets the clock used for start timestamps and deadlines.
    ///
    /// Default: the shared [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Builds the scheduler and spawns its coordinator thread.
    pub fn start(self) -> SchedulerLoop {
        let name = self.name.clone();
        let scheduler = self.new_unstarted();

        let shared = Arc::clone(&scheduler.shared);
        let handle = std::thread::Builder::new()
            .name(format!("{name}-coordinator"))
            .spawn(move || driver_loop(shared))
            .expect("failed to spawn scheduler coordinator");
        *scheduler.shared.driver.lock() = Some(handle.thread().clone());
        *scheduler.driver.lock() = Some(handle);

        scheduler
    }

    /// Builds the scheduler without spawning a coordinator.
    pub fn new_unstarted(self) -> SchedulerLoop {
        let pool_size = self.pool_size.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        });

        SchedulerLoop {
            shared: Arc::new(SchedulerShared {
                to_schedule: SegQueue::new(),
                to_return: SegQueue::new(),
                state: Mutex::new(CoordState::default()),
                pool: WorkerPool::new(pool_size, &self.name),
                pool_size,
                clock: self
                    .clock
                    .unwrap_or_else(|| SystemClock::shared() as Arc<dyn Clock>),
                shut_down: AtomicBool::new(false),
                handle_seq: AtomicU64::new(0),
                driver: Mutex::new(None),
            }),
            driver: Mutex::new(None),
        }
    }
}
