//! One-shot result cells and their read-side view.
//!
//! A cell moves `pending → completing → done` through a single atomic word;
//! the first completion wins and later ones are silent no-ops. When a cell
//! was born from a guard-rail acquire it carries an execution context, and
//! the winning completion routes the rail release exactly once.

use crate::error::{ActionError, InvalidResultError, RejectedReason};
use crate::outcome::{Outcome, ResultClass};
use crate::rail::GuardRail;
use parking_lot::{Condvar, Mutex};
use railguard_core::Clock;
use std::cell::UnsafeCell;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

const PENDING: u8 = 0;
const COMPLETING: u8 = 1;
const DONE: u8 = 2;

/// What a completed cell holds.
struct Completed<T> {
    outcome: Outcome,
    value: Result<T, ActionError>,
    cancelled: bool,
}

type Callback<T> = Box<dyn FnOnce(Outcome, &Result<T, ActionError>) + Send>;

/// The rail-to-cell binding installed by `acquire_promise`.
pub(crate) struct ExecutionContext {
    pub(crate) rail: GuardRail,
    pub(crate) permits: u64,
    pub(crate) start_nanos: u64,
    pub(crate) clock: Arc<dyn Clock>,
}

struct Shared<T> {
    state: AtomicU8,
    slot: UnsafeCell<Option<Completed<T>>>,
    class: ResultClass,
    context: Option<ExecutionContext>,
    wait_lock: Mutex<()>,
    done_cv: Condvar,
    callbacks: Mutex<Vec<Callback<T>>>,
}

// The slot is written exactly once, by the writer that won the
// pending→completing CAS, and only read after the done store is observed
// with acquire ordering.
unsafe impl<T: Send> Send for Shared<T> {}
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Shared<T> {
    fn new(class: ResultClass, context: Option<ExecutionContext>) -> Self {
        Self {
            state: AtomicU8::new(PENDING),
            slot: UnsafeCell::new(None),
            class,
            context,
            wait_lock: Mutex::new(()),
            done_cv: Condvar::new(),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    fn completed(&self) -> Option<&Completed<T>> {
        if self.state.load(Ordering::Acquire) == DONE {
            unsafe { (*self.slot.get()).as_ref() }
        } else {
            None
        }
    }

    /// Completion protocol: validate, win the CAS, publish, wake, release,
    /// fire callbacks. Returns `Ok(false)` when another writer already won.
    fn try_complete(&self, completed: Completed<T>) -> Result<bool, InvalidResultError> {
        if !self.class.contains(completed.outcome) {
            return Err(InvalidResultError::new(
                completed.outcome.token(),
                self.class.tokens(),
            ));
        }

        if self
            .state
            .compare_exchange(PENDING, COMPLETING, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Ok(false);
        }

        let outcome = completed.outcome;
        // Sole writer: the completing tag fences out every other completion.
        unsafe { *self.slot.get() = Some(completed) };
        self.state.store(DONE, Ordering::Release);

        {
            let _guard = self.wait_lock.lock();
            self.done_cv.notify_all();
        }

        // Route the release exactly once; a panicking gate observer must not
        // starve the callbacks, so it is resurfaced after they ran.
        let release_panic = self.context.as_ref().and_then(|ctx| {
            catch_unwind(AssertUnwindSafe(|| {
                let now = ctx.clock.now_nanos();
                ctx.rail
                    .release_with_result(ctx.permits, outcome, ctx.start_nanos, now);
            }))
            .err()
        });

        let callbacks = std::mem::take(&mut *self.callbacks.lock());
        if !callbacks.is_empty() {
            let value = &self.completed().expect("cell just completed").value;
            for callback in callbacks {
                let _ = catch_unwind(AssertUnwindSafe(|| callback(outcome, value)));
            }
        }

        if let Some(payload) = release_panic {
            resume_unwind(payload);
        }
        Ok(true)
    }

    fn add_callback(&self, callback: Callback<T>) {
        {
            let mut callbacks = self.callbacks.lock();
            // Checked under the lock so a completing writer either sees this
            // callback in its drain or we see the done state here.
            if self.state.load(Ordering::Acquire) != DONE {
                callbacks.push(callback);
                return;
            }
        }
        let completed = self.completed().expect("state is done");
        let _ = catch_unwind(AssertUnwindSafe(|| {
            callback(completed.outcome, &completed.value)
        }));
    }

    fn wait_done(&self) {
        if self.state.load(Ordering::Acquire) == DONE {
            return;
        }
        let mut guard = self.wait_lock.lock();
        while self.state.load(Ordering::Acquire) != DONE {
            self.done_cv.wait(&mut guard);
        }
    }

    fn wait_done_for(&self, timeout: Duration) -> bool {
        if self.state.load(Ordering::Acquire) == DONE {
            return true;
        }
        let deadline = std::time::Instant::now() + timeout;
        let mut guard = self.wait_lock.lock();
        while self.state.load(Ordering::Acquire) != DONE {
            if self.done_cv.wait_until(&mut guard, deadline).timed_out() {
                return self.state.load(Ordering::Acquire) == DONE;
            }
        }
        true
    }
}

/// Multi-writer one-shot cell.
///
/// Any number of threads may race to complete a promise; exactly one wins
/// and the rest observe `Ok(false)`.
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> std::fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise").finish_non_exhaustive()
    }
}

impl<T> Promise<T> {
    /// A standalone promise over `class`, unattached to any rail.
    pub fn new(class: &ResultClass) -> Self {
        Self {
            shared: Arc::new(Shared::new(class.clone(), None)),
        }
    }

    pub(crate) fn with_context(class: ResultClass, context: ExecutionContext) -> Self {
        Self {
            shared: Arc::new(Shared::new(class, Some(context))),
        }
    }

    /// Completes with a value. Returns whether this call won the completion.
    ///
    /// # Errors
    ///
    /// [`InvalidResultError`] when `outcome` is not a member of the
    /// promise's result class; the cell is left untouched.
    pub fn complete(&self, outcome: Outcome, value: T) -> Result<bool, InvalidResultError> {
        self.shared.try_complete(Completed {
            outcome,
            value: Ok(value),
            cancelled: false,
        })
    }

    /// Completes with an error payload.
    pub fn complete_error(
        &self,
        outcome: Outcome,
        error: ActionError,
    ) -> Result<bool, InvalidResultError> {
        self.shared.try_complete(Completed {
            outcome,
            value: Err(error),
            cancelled: false,
        })
    }

    /// Terminal cancellation: completes with the caller-chosen outcome and
    /// marks the cell cancelled. A no-op when already done.
    pub(crate) fn complete_cancelled(
        &self,
        outcome: Outcome,
        error: ActionError,
    ) -> Result<bool, InvalidResultError> {
        self.shared.try_complete(Completed {
            outcome,
            value: Err(error),
            cancelled: true,
        })
    }

    /// The read-side view of this promise.
    pub fn future(&self) -> RailFuture<T> {
        RailFuture {
            inner: FutureInner::Cell(Arc::clone(&self.shared)),
        }
    }
}

/// Single-writer one-shot cell.
///
/// The `&mut` completion methods make the single-writer contract a
/// compile-time fact; the read side is shared freely through
/// [`future`](Completable::future).
pub struct Completable<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Completable<T> {
    /// A standalone completable over `class`, unattached to any rail.
    pub fn new(class: &ResultClass) -> Self {
        Self {
            shared: Arc::new(Shared::new(class.clone(), None)),
        }
    }

    pub(crate) fn with_context(class: ResultClass, context: ExecutionContext) -> Self {
        Self {
            shared: Arc::new(Shared::new(class, Some(context))),
        }
    }

    /// Completes with a value. Returns whether the cell was still pending.
    pub fn complete(&mut self, outcome: Outcome, value: T) -> Result<bool, InvalidResultError> {
        self.shared.try_complete(Completed {
            outcome,
            value: Ok(value),
            cancelled: false,
        })
    }

    /// Completes with an error payload.
    pub fn complete_error(
        &mut self,
        outcome: Outcome,
        error: ActionError,
    ) -> Result<bool, InvalidResultError> {
        self.shared.try_complete(Completed {
            outcome,
            value: Err(error),
            cancelled: false,
        })
    }

    /// The read-side view of this completable.
    pub fn future(&self) -> RailFuture<T> {
        RailFuture {
            inner: FutureInner::Cell(Arc::clone(&self.shared)),
        }
    }
}

enum FutureInner<T> {
    /// Born rejected; never transitions.
    Rejected(RejectedReason),
    Cell(Arc<Shared<T>>),
}

/// Read-side view of a promise or completable.
pub struct RailFuture<T> {
    inner: FutureInner<T>,
}

impl<T> Clone for RailFuture<T> {
    fn clone(&self) -> Self {
        let inner = match &self.inner {
            FutureInner::Rejected(reason) => FutureInner::Rejected(*reason),
            FutureInner::Cell(shared) => FutureInner::Cell(Arc::clone(shared)),
        };
        Self { inner }
    }
}

impl<T> RailFuture<T> {
    /// A future that was denied at submission and will never transition.
    pub(crate) fn rejected(reason: RejectedReason) -> Self {
        Self {
            inner: FutureInner::Rejected(reason),
        }
    }

    /// True while no completion has landed. Rejected futures are never
    /// pending.
    pub fn is_pending(&self) -> bool {
        match &self.inner {
            FutureInner::Rejected(_) => false,
            FutureInner::Cell(shared) => shared.state.load(Ordering::Acquire) != DONE,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.inner, FutureInner::Rejected(_))
    }

    /// The rejection, when this future was denied at submission.
    pub fn rejected_reason(&self) -> Option<RejectedReason> {
        match &self.inner {
            FutureInner::Rejected(reason) => Some(*reason),
            FutureInner::Cell(_) => None,
        }
    }

    /// The completed outcome, once done.
    pub fn outcome(&self) -> Option<Outcome> {
        self.completed().map(|c| c.outcome)
    }

    /// The completed value, when the completion carried one.
    pub fn value(&self) -> Option<&T> {
        self.completed().and_then(|c| c.value.as_ref().ok())
    }

    /// The completed error payload, when the completion carried one.
    pub fn error(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.completed()
            .and_then(|c| c.value.as_ref().err().map(|e| e.as_ref()))
    }

    /// True once done with a success-tagged outcome.
    pub fn is_success(&self) -> bool {
        self.outcome().is_some_and(|o| o.is_success())
    }

    /// True once done with a failure-tagged outcome.
    pub fn is_failure(&self) -> bool {
        self.outcome().is_some_and(|o| o.is_failure())
    }

    /// True when the completion was a cancellation (typically a timeout).
    pub fn is_cancelled(&self) -> bool {
        self.completed().is_some_and(|c| c.cancelled)
    }

    /// Blocks the calling thread until completion.
    ///
    /// Returns the completed outcome, or `None` when the future was rejected
    /// at submission (rejected futures never complete).
    pub fn await_done(&self) -> Option<Outcome> {
        match &self.inner {
            FutureInner::Rejected(_) => None,
            FutureInner::Cell(shared) => {
                shared.wait_done();
                self.outcome()
            }
        }
    }

    /// Blocks until completion or `timeout`, whichever comes first.
    ///
    /// Returns true when the future is done (rejected futures count as
    /// done).
    pub fn await_done_for(&self, timeout: Duration) -> bool {
        match &self.inner {
            FutureInner::Rejected(_) => true,
            FutureInner::Cell(shared) => shared.wait_done_for(timeout),
        }
    }

    /// Registers a completion callback.
    ///
    /// Fires exactly once, on the completing thread, or immediately on the
    /// calling thread when already done. Rejected futures never fire
    /// callbacks; check [`is_rejected`](RailFuture::is_rejected) instead.
    pub fn on_complete<F>(&self, callback: F)
    where
        F: FnOnce(Outcome, &Result<T, ActionError>) + Send + 'static,
    {
        match &self.inner {
            FutureInner::Rejected(_) => {}
            FutureInner::Cell(shared) => shared.add_callback(Box::new(callback)),
        }
    }

    fn completed(&self) -> Option<&Completed<T>> {
        match &self.inner {
            FutureInner::Rejected(_) => None,
            FutureInner::Cell(shared) => shared.completed(),
        }
    }
}
