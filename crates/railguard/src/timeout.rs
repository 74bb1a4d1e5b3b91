//! Deadline tracking with a single background expirer thread.
//!
//! Deadlines live in a min-heap keyed by absolute monotonic nanos. The
//! expirer sleeps until the earliest deadline, or until an insertion with an
//! earlier deadline wakes it, then fires the entry's cancellation. Firing
//! against work that already completed is harmless: the promise's one-shot
//! completion makes the cancel a no-op.

use parking_lot::{Condvar, Mutex};
use railguard_core::{Clock, SystemClock};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use std::time::Duration;

/// Something a fired deadline can cancel.
pub trait Expire: Send + Sync + 'static {
    /// Invoked by the expirer once the deadline has passed.
    fn expire(&self, now_nanos: u64);
}

struct Entry {
    deadline_nanos: u64,
    seq: u64,
    target: Arc<dyn Expire>,
}

// Min-heap over (deadline, seq): BinaryHeap is a max-heap, so the ordering
// is reversed here instead of wrapping every entry in `Reverse`.
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (other.deadline_nanos, other.seq).cmp(&(self.deadline_nanos, self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline_nanos == other.deadline_nanos && self.seq == other.seq
    }
}

impl Eq for Entry {}

struct TimeoutShared {
    heap: Mutex<BinaryHeap<Entry>>,
    wakeup: Condvar,
    shutdown: AtomicBool,
    seq: AtomicU64,
    clock: Arc<dyn Clock>,
}

/// Background deadline expirer with an explicit lifecycle.
///
/// The service starts its thread at construction and stops it on
/// [`shutdown`](TimeoutService::shutdown) (or drop). There is no implicit
/// process-wide instance; callers that want one opt in through
/// [`TimeoutService::shared`].
pub struct TimeoutService {
    shared: Arc<TimeoutShared>,
    expirer: Mutex<Option<JoinHandle<()>>>,
}

impl TimeoutService {
    /// Starts a service on the shared system clock.
    pub fn start() -> Self {
        Self::start_with_clock(SystemClock::shared())
    }

    /// Starts a service reading deadlines against `clock`.
    ///
    /// The expirer still sleeps in real time between firings, so a manual
    /// clock is only useful together with short real waits.
    pub fn start_with_clock(clock: Arc<dyn Clock>) -> Self {
        let shared = Arc::new(TimeoutShared {
            heap: Mutex::new(BinaryHeap::new()),
            wakeup: Condvar::new(),
            shutdown: AtomicBool::new(false),
            seq: AtomicU64::new(0),
            clock,
        });

        let thread_shared = Arc::clone(&shared);
        let expirer = std::thread::Builder::new()
            .name("railguard-timeout".to_string())
            .spawn(move || expirer_loop(thread_shared))
            .expect("failed to spawn timeout expirer thread");

        Self {
            shared,
            expirer: Mutex::new(Some(expirer)),
        }
    }

    /// The process-wide shared service, created on first use.
    pub fn shared() -> Arc<TimeoutService> {
        static SHARED: OnceLock<Arc<TimeoutService>> = OnceLock::new();
        Arc::clone(SHARED.get_or_init(|| Arc::new(TimeoutService::start())))
    }

    /// Schedules `target` to be cancelled at `deadline_nanos`.
    ///
    /// A deadline already in the past fires on the expirer's next tick; the
    /// caller never blocks.
    pub fn arm(&self, deadline_nanos: u64, target: Arc<dyn Expire>) {
        let entry = Entry {
            deadline_nanos,
            seq: self.shared.seq.fetch_add(1, Ordering::Relaxed),
            target,
        };

        let mut heap = self.shared.heap.lock();
        let wake = heap
            .peek()
            .map(|head| entry.deadline_nanos < head.deadline_nanos)
            .unwrap_or(true);
        heap.push(entry);
        drop(heap);

        if wake {
            self.shared.wakeup.notify_one();
        }
    }

    /// Deadlines currently tracked (fired entries are gone).
    pub fn pending(&self) -> usize {
        self.shared.heap.lock().len()
    }

    /// Stops the expirer and joins it. Idempotent; deadlines still queued
    /// never fire.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        {
            let _guard = self.shared.heap.lock();
            self.shared.wakeup.notify_one();
        }
        if let Some(handle) = self.expirer.lock().take() {
            let _ = handle.join();
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("timeout service shut down");
    }
}

impl Drop for TimeoutService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn expirer_loop(shared: Arc<TimeoutShared>) {
    let mut heap = shared.heap.lock();
    loop {
        if shared.shutdown.load(Ordering::Acquire) {
            return;
        }

        let now = shared.clock.now_nanos();
        match heap.peek() {
            Some(head) if head.deadline_nanos <= now => {
                let entry = heap.pop().expect("peeked entry is present");
                // Fire without holding the lock; cancellation walks into
                // promise completion and the rail release chain.
                drop(heap);
                entry.target.expire(now);

                #[cfg(feature = "tracing")]
                tracing::trace!(deadline = entry.deadline_nanos, "timeout fired");

                heap = shared.heap.lock();
            }
            Some(head) => {
                let wait = Duration::from_nanos(head.deadline_nanos - now);
                let _ = shared.wakeup.wait_for(&mut heap, wait);
            }
            None => {
                shared.wakeup.wait(&mut heap);
            }
        }
    }
}
