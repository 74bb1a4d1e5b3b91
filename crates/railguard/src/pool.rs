//! Fixed-size worker pool and the thread-pool executor.
//!
//! The pool feeds workers from an unbounded FIFO channel: back-pressure is
//! the guard rail's responsibility, never the pool's.

use crate::executor::{Action, Executor};
use crate::promise::Promise;
use crate::rail::GuardRail;
use crate::task::CancellableTask;
use crate::timeout::{Expire, TimeoutService};
use crate::{RailFuture, RejectedReason};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use railguard_core::{Clock, SystemClock};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

pub(crate) type Job = Box<dyn FnOnce() + Send>;

/// Fixed set of worker threads draining a FIFO queue.
pub(crate) struct WorkerPool {
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub(crate) fn new(size: usize, name: &str) -> Self {
        assert!(size > 0, "a worker pool needs at least one thread");
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();

        let workers = (0..size)
            .map(|index| {
                let receiver: Receiver<Job> = receiver.clone();
                std::thread::Builder::new()
                    .name(format!("{name}-worker-{index}"))
                    .spawn(move || {
                        for job in receiver.iter() {
                            // A panicking job must not take the worker down.
                            let _ = catch_unwind(AssertUnwindSafe(job));
                        }
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        }
    }

    /// Enqueues a job; hands it back when the pool is shut down.
    pub(crate) fn spawn(&self, job: Job) -> Result<(), Job> {
        let guard = self.sender.lock();
        match guard.as_ref() {
            Some(sender) => sender.send(job).map_err(|rejected| rejected.into_inner()),
            None => Err(job),
        }
    }

    /// Closes the queue, lets the workers drain what was already enqueued,
    /// and joins them. Idempotent. Must not be called from a worker.
    pub(crate) fn shutdown(&self) {
        drop(self.sender.lock().take());
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            let _ = worker.join();
        }
    }
}

/// Executes guarded actions on a fixed worker pool, arming timeouts against
/// their promises.
///
/// ```no_run
/// use railguard::{Action, Executor, GuardRail, PermitGate, RejectionClass, ResultClass, ThreadPoolExecutor};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let results = ResultClass::builder()
///     .success("success")
///     .failure("error")
///     .failure("timeout")
///     .build();
/// let reasons = RejectionClass::builder().reason("max-concurrency").build();
/// let full = reasons.reason("max-concurrency").unwrap();
///
/// let rail = GuardRail::builder("db", results, reasons)
///     .add_back_pressure("permits", Arc::new(PermitGate::new(10, full)))
///     .build();
/// let executor = ThreadPoolExecutor::builder("db-pool").pool_size(4).build();
///
/// let future = executor.submit(
///     &rail,
///     Action::new(|| Ok::<_, railguard::ActionError>("hello")),
///     Some(Duration::from_millis(50)),
/// );
/// future.await_done();
/// executor.shutdown();
/// ```
pub struct ThreadPoolExecutor {
    pool: WorkerPool,
    timeouts: Arc<TimeoutService>,
    owns_timeouts: bool,
    clock: Arc<dyn Clock>,
    shut_down: AtomicBool,
}

impl ThreadPoolExecutor {
    pub fn builder(name: impl Into<String>) -> ThreadPoolExecutorBuilder {
        ThreadPoolExecutorBuilder {
            name: name.into(),
            pool_size: None,
            clock: None,
            timeouts: None,
        }
    }

    /// True once [`shutdown`](Executor::shutdown) ran.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}

impl Executor for ThreadPoolExecutor {
    fn submit<T: Send + 'static>(
        &self,
        rail: &GuardRail,
        action: Action<T>,
        timeout: Option<Duration>,
    ) -> RailFuture<T> {
        if self.is_shut_down() {
            return RailFuture::rejected(RejectedReason::Shutdown);
        }

        let now = self.clock.now_nanos();
        let promise: Promise<T> = match rail.acquire_promise(1, now) {
            Ok(promise) => promise,
            Err(reason) => return RailFuture::rejected(RejectedReason::Gate(reason)),
        };

        let future = promise.future();
        let task = Arc::new(action.into_task(rail.result_class(), promise));

        let job: Job = {
            let task = Arc::clone(&task);
            Box::new(move || {
                let _ = task.execute();
            })
        };
        if self.pool.spawn(job).is_err() {
            // Shutdown raced the submit; the promise never completes, so the
            // permits must be handed back here.
            rail.release_without_result(1, self.clock.now_nanos());
            return RailFuture::rejected(RejectedReason::Shutdown);
        }

        if let Some(timeout) = timeout {
            let deadline = now + timeout.as_nanos() as u64;
            self.timeouts.arm(deadline, task as Arc<dyn Expire>);
        }

        future
    }

    fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::info!("thread-pool executor shutting down");

        self.pool.shutdown();
        if self.owns_timeouts {
            self.timeouts.shutdown();
        }
    }
}

impl<T: Send + 'static> Expire for CancellableTask<T> {
    fn expire(&self, _now_nanos: u64) {
        let _ = self.cancel_timed_out();
    }
}

impl Drop for ThreadPoolExecutor {
    fn drop(&mut self) {
        Executor::shutdown(self);
    }
}

/// Builder for a [`ThreadPoolExecutor`].
pub struct ThreadPoolExecutorBuilder {
    name: String,
    pool_size: Option<usize>,
    clock: Option<Arc<dyn Clock>>,
    timeouts: Option<Arc<TimeoutService>>,
}

impl ThreadPoolExecutorBuilder {
    /// Sets the number of worker threads.
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

    /// Shares an external timeout service instead of owning one.
    ///
    /// A shared service is not stopped by this executor's shutdown.
    pub fn timeout_service(mut self, timeouts: Arc<TimeoutService>) -> Self {
        self.timeouts = Some(timeouts);
        self
    }

    pub fn build(self) -> ThreadPoolExecutor {
        let pool_size = self.pool_size.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        });
        let owns_timeouts = self.timeouts.is_none();
        let timeouts = self
            .timeouts
            .unwrap_or_else(|| Arc::new(TimeoutService::start()));

        ThreadPoolExecutor {
            pool: WorkerPool::new(pool_size, &self.name),
            timeouts,
            owns_timeouts,
            clock: self
                .clock
                .unwrap_or_else(|| SystemClock::shared() as Arc<dyn Clock>),
            shut_down: AtomicBool::new(false),
        }
    }
}
