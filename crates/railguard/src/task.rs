//! Cancellable unit of work targeting a promise.
//!
//! The task wraps a fallible action plus two converters that map its value
//! or error to an outcome. A local runnable→cancelled flag combined with the
//! promise's one-shot completion guarantees that however a run, a cancel,
//! and a timeout interleave, exactly one completion is observed downstream.

use crate::error::{ActionError, InvalidResultError, TimeoutError};
use crate::outcome::Outcome;
use crate::promise::Promise;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

const RUNNABLE: u8 = 0;
const RUNNING: u8 = 1;
const CANCELLED: u8 = 2;

pub(crate) type ActionFn<T> = Box<dyn FnOnce() -> Result<T, ActionError> + Send>;
pub(crate) type ValueConverter<T> = Arc<dyn Fn(&T) -> Outcome + Send + Sync>;
pub(crate) type ErrorConverter = Arc<dyn Fn(&ActionError) -> Outcome + Send + Sync>;

/// A unit of work bound to a promise, cancellable until its completion wins.
pub struct CancellableTask<T> {
    promise: Promise<T>,
    action: Mutex<Option<ActionFn<T>>>,
    status: AtomicU8,
    value_converter: ValueConverter<T>,
    error_converter: ErrorConverter,
    timeout_outcome: Outcome,
}

impl<T: Send + 'static> CancellableTask<T> {
    /// Binds `action` to `promise` with its outcome converters and the
    /// outcome installed when a timeout cancels it.
    pub fn new(
        promise: Promise<T>,
        action: impl FnOnce() -> Result<T, ActionError> + Send + 'static,
        value_converter: impl Fn(&T) -> Outcome + Send + Sync + 'static,
        error_converter: impl Fn(&ActionError) -> Outcome + Send + Sync + 'static,
        timeout_outcome: Outcome,
    ) -> Self {
        Self::from_parts(
            promise,
            Box::new(action),
            Arc::new(value_converter),
            Arc::new(error_converter),
            timeout_outcome,
        )
    }

    pub(crate) fn from_parts(
        promise: Promise<T>,
        action: ActionFn<T>,
        value_converter: ValueConverter<T>,
        error_converter: ErrorConverter,
        timeout_outcome: Outcome,
    ) -> Self {
        Self {
            promise,
            action: Mutex::new(Some(action)),
            status: AtomicU8::new(RUNNABLE),
            value_converter,
            error_converter,
            timeout_outcome,
        }
    }

    /// Claims the task for execution; `None` when it was cancelled first.
    pub(crate) fn begin(&self) -> Option<ActionFn<T>> {
        self.status
            .compare_exchange(RUNNABLE, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        self.action.lock().take()
    }

    /// Runs the claimed action, capturing panics into the error payload.
    pub(crate) fn run_action(action: ActionFn<T>) -> Result<T, ActionError> {
        match catch_unwind(AssertUnwindSafe(action)) {
            Ok(result) => result,
            Err(payload) => Err(panic_payload_to_error(payload)),
        }
    }

    /// Converts a raw result and completes the promise. Losing to a
    /// cancellation that already completed is a silent no-op.
    pub(crate) fn deliver(&self, result: Result<T, ActionError>) -> Result<bool, InvalidResultError> {
        let outcome = match &result {
            Ok(value) => (self.value_converter)(value),
            Err(error) => (self.error_converter)(error),
        };
        match result {
            Ok(value) => self.promise.complete(outcome, value),
            Err(error) => self.promise.complete_error(outcome, error),
        }
    }

    /// Claims, runs, and delivers in one step (the thread-pool path).
    pub(crate) fn execute(&self) -> Result<bool, InvalidResultError> {
        match self.begin() {
            Some(action) => self.deliver(Self::run_action(action)),
            None => Ok(false),
        }
    }

    /// Cancels with a caller-chosen outcome and error payload.
    ///
    /// When the action has not started, it never will; when it is in flight,
    /// its eventual result loses the promise's completion race and is
    /// discarded. Cancelling an already-completed task is a no-op.
    pub fn cancel(&self, outcome: Outcome, error: ActionError) -> Result<bool, InvalidResultError> {
        let _ = self
            .status
            .compare_exchange(RUNNABLE, CANCELLED, Ordering::AcqRel, Ordering::Acquire);
        self.promise.complete_cancelled(outcome, error)
    }

    /// Cancels with the configured timeout outcome and a [`TimeoutError`]
    /// payload.
    pub(crate) fn cancel_timed_out(&self) -> Result<bool, InvalidResultError> {
        self.cancel(self.timeout_outcome, Box::new(TimeoutError))
    }

    pub(crate) fn timeout_outcome(&self) -> Outcome {
        self.timeout_outcome
    }
}

fn panic_payload_to_error(payload: Box<dyn std::any::Any + Send>) -> ActionError {
    let message = payload
        .downcast_ref::<&'static str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "action panicked".to_string());
    format!("action panicked: {message}").into()
}
