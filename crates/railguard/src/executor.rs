//! The common executor shape shared by the thread pool and the scheduler
//! loop, plus the [`Action`] submission type.

use crate::error::ActionError;
use crate::outcome::{Outcome, ResultClass};
use crate::promise::Promise;
use crate::rail::GuardRail;
use crate::task::{ActionFn, CancellableTask, ErrorConverter, ValueConverter};
use crate::RailFuture;
use std::sync::Arc;
use std::time::Duration;

/// A unit of work to submit through a guard rail.
///
/// The converters map the action's value or error to an outcome of the
/// rail's result class. Converters left unset are resolved against the
/// rail at submission:
///
/// - value → the class's first success-tagged outcome
/// - error → the outcome registered as `"error"`, else the first
///   failure-tagged outcome
/// - timeout → the outcome registered as `"timeout"`, else the first
///   failure-tagged outcome
///
/// ```
/// use railguard::Action;
///
/// let action = Action::new(|| Ok::<_, railguard::ActionError>(2 + 2));
/// ```
pub struct Action<T> {
    run: ActionFn<T>,
    value_converter: Option<ValueConverter<T>>,
    error_converter: Option<ErrorConverter>,
    timeout_outcome: Option<Outcome>,
}

impl<T: Send + 'static> Action<T> {
    pub fn new(run: impl FnOnce() -> Result<T, ActionError> + Send + 'static) -> Self {
        Self {
            run: Box::new(run),
            value_converter: None,
            error_converter: None,
            timeout_outcome: None,
        }
    }

    /// Maps the action's value to an outcome.
    pub fn on_value(mut self, f: impl Fn(&T) -> Outcome + Send + Sync + 'static) -> Self {
        self.value_converter = Some(Arc::new(f));
        self
    }

    /// Maps the action's error payload to an outcome.
    pub fn on_error(mut self, f: impl Fn(&ActionError) -> Outcome + Send + Sync + 'static) -> Self {
        self.error_converter = Some(Arc::new(f));
        self
    }

    /// The outcome installed when a timeout cancels this action.
    pub fn timeout_outcome(mut self, outcome: Outcome) -> Self {
        self.timeout_outcome = Some(outcome);
        self
    }

    /// Resolves converter defaults against `class` and binds the action to
    /// `promise`.
    ///
    /// # Panics
    ///
    /// Panics when a default cannot be resolved (e.g. the class has no
    /// success-tagged outcome and no value converter was given).
    pub(crate) fn into_task(self, class: &ResultClass, promise: Promise<T>) -> CancellableTask<T> {
        let value_converter = self.value_converter.unwrap_or_else(|| {
            let outcome = class
                .first_success()
                .expect("result class has no success outcome; set an explicit value converter");
            Arc::new(move |_: &T| outcome)
        });
        let error_converter = self.error_converter.unwrap_or_else(|| {
            let outcome = class
                .outcome("error")
                .or_else(|| class.first_failure())
                .expect("result class has no failure outcome; set an explicit error converter");
            Arc::new(move |_: &ActionError| outcome)
        });
        let timeout_outcome = self.timeout_outcome.unwrap_or_else(|| {
            class
                .outcome("timeout")
                .or_else(|| class.first_failure())
                .expect("result class has no failure outcome; set an explicit timeout outcome")
        });

        CancellableTask::from_parts(
            promise,
            self.run,
            value_converter,
            error_converter,
            timeout_outcome,
        )
    }
}

/// The contract shared by both execution strategies, so rails and futures
/// never depend on which one is in use.
pub trait Executor {
    /// Submits `action` through `rail` with an optional deadline.
    ///
    /// Admission goes through the rail's gates; a denied submit returns an
    /// already-rejected future rather than an error.
    fn submit<T: Send + 'static>(
        &self,
        rail: &GuardRail,
        action: Action<T>,
        timeout: Option<Duration>,
    ) -> RailFuture<T>;

    /// Stops accepting work and drains what is in flight. Idempotent.
    fn shutdown(&self);
}
