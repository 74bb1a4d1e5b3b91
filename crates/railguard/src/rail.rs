//! Guard rail: the single acquire/release surface around an operation.
//!
//! A rail composes an ordered list of back-pressure gates with result and
//! rejection counters and an optional latency recorder. Every attempted unit
//! of work acquires through the rail, and every completion releases through
//! it, so the counters and the gates (notably a circuit breaker) observe one
//! consistent stream of outcomes.

use crate::events::RailEvent;
use crate::outcome::{Outcome, Rejection, RejectionClass, ResultClass};
use crate::promise::{Completable, ExecutionContext, Promise};
use railguard_core::{Clock, EventListeners, LatencyRecorder, RollingCounts, SystemClock};
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::Arc;

#[cfg(feature = "metrics")]
use metrics::counter;

/// A gate that can deny an acquire with a structured reason.
///
/// Gates are evaluated in registration order on acquire and walked in
/// reverse on release. `inform` is the observer hook invoked on every
/// release-with-result; the default does nothing.
pub trait BackPressure: Send + Sync + 'static {
    /// Attempts to reserve `permits`; must not block.
    fn try_acquire(&self, permits: u64, now_nanos: u64) -> Result<(), Rejection>;

    /// Hands `permits` back.
    fn release(&self, permits: u64);

    /// Observes a completed outcome.
    fn inform(&self, _outcome: Outcome, _now_nanos: u64) {}
}

/// A successful acquire: the permits held and the start timestamp to report
/// back on release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermitGrant {
    pub permits: u64,
    pub start_nanos: u64,
}

struct NamedGate {
    name: String,
    gate: Arc<dyn BackPressure>,
}

struct RailInner {
    name: String,
    result_class: ResultClass,
    rejected_class: RejectionClass,
    result_counts: Arc<RollingCounts>,
    rejected_counts: Arc<RollingCounts>,
    latency: Option<Arc<LatencyRecorder>>,
    gates: Vec<NamedGate>,
    listeners: EventListeners<RailEvent>,
    clock: Arc<dyn Clock>,
}

/// The composition of counters and back-pressure gates around an operation.
///
/// Cloning is cheap; clones share all state.
///
/// ```
/// use railguard::{GuardRail, PermitGate, RejectionClass, ResultClass};
/// use std::sync::Arc;
///
/// let results = ResultClass::builder().success("success").failure("error").build();
/// let reasons = RejectionClass::builder().reason("max-concurrency").build();
/// let full = reasons.reason("max-concurrency").unwrap();
///
/// let rail = GuardRail::builder("db", results.clone(), reasons)
///     .add_back_pressure("permits", Arc::new(PermitGate::new(5, full)))
///     .build();
///
/// let grant = rail.acquire(1, 100).unwrap();
/// let success = results.outcome("success").unwrap();
/// rail.release_with_result(grant.permits, success, grant.start_nanos, 450);
/// ```
#[derive(Clone)]
pub struct GuardRail {
    inner: Arc<RailInner>,
}

impl GuardRail {
    /// Creates a new builder.
    pub fn builder(
        name: impl Into<String>,
        result_class: ResultClass,
        rejected_class: RejectionClass,
    ) -> GuardRailBuilder {
        GuardRailBuilder {
            name: name.into(),
            result_class,
            rejected_class,
            result_counts: None,
            rejected_counts: None,
            latency: None,
            gates: Vec::new(),
            listeners: EventListeners::new(),
            clock: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn result_class(&self) -> &ResultClass {
        &self.inner.result_class
    }

    pub fn rejected_class(&self) -> &RejectionClass {
        &self.inner.rejected_class
    }

    pub fn result_counts(&self) -> &Arc<RollingCounts> {
        &self.inner.result_counts
    }

    pub fn rejected_counts(&self) -> &Arc<RollingCounts> {
        &self.inner.rejected_counts
    }

    pub fn latency(&self) -> Option<&Arc<LatencyRecorder>> {
        self.inner.latency.as_ref()
    }

    /// The clock handed to promises created through this rail.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    /// Attempts to reserve `permits` at `now_nanos`.
    ///
    /// Gates run in registration order; the first rejector wins, gates that
    /// had already admitted are rolled back in reverse, and no partial
    /// acquisition survives. The rejection is counted by reason; result
    /// counters and latency are untouched.
    pub fn acquire(&self, permits: u64, now_nanos: u64) -> Result<PermitGrant, Rejection> {
        for (index, named) in self.inner.gates.iter().enumerate() {
            if let Err(reason) = named.gate.try_acquire(permits, now_nanos) {
                for admitted in self.inner.gates[..index].iter().rev() {
                    admitted.gate.release(permits);
                }
                self.record_rejection(reason, now_nanos);
                return Err(reason);
            }
        }

        #[cfg(feature = "metrics")]
        counter!("railguard_acquired_total", "rail" => self.inner.name.clone()).increment(1);

        Ok(PermitGrant {
            permits,
            start_nanos: now_nanos,
        })
    }

    /// Acquires and binds the grant to a multi-writer [`Promise`]; the
    /// winning completion performs the release.
    pub fn acquire_promise<T>(&self, permits: u64, now_nanos: u64) -> Result<Promise<T>, Rejection> {
        let grant = self.acquire(permits, now_nanos)?;
        Ok(Promise::with_context(
            self.inner.result_class.clone(),
            self.execution_context(grant),
        ))
    }

    /// Acquires and binds the grant to a single-writer [`Completable`].
    pub fn acquire_completable<T>(
        &self,
        permits: u64,
        now_nanos: u64,
    ) -> Result<Completable<T>, Rejection> {
        let grant = self.acquire(permits, now_nanos)?;
        Ok(Completable::with_context(
            self.inner.result_class.clone(),
            self.execution_context(grant),
        ))
    }

    fn execution_context(&self, grant: PermitGrant) -> ExecutionContext {
        ExecutionContext {
            rail: self.clone(),
            permits: grant.permits,
            start_nanos: grant.start_nanos,
            clock: Arc::clone(&self.inner.clock),
        }
    }

    /// Releases `permits` with a completed outcome.
    ///
    /// In order: the outcome is counted, the latency `now - start` is
    /// recorded, every gate observer is informed in reverse registration
    /// order, and the gates hand their permits back. The chain is total: a
    /// panicking observer does not stop later steps, and the first panic is
    /// resurfaced once everything ran.
    ///
    /// # Panics
    ///
    /// Panics when `outcome` is not a member of this rail's result class.
    pub fn release_with_result(
        &self,
        permits: u64,
        outcome: Outcome,
        start_nanos: u64,
        now_nanos: u64,
    ) {
        assert!(
            self.inner.result_class.contains(outcome),
            "outcome '{outcome}' is not in the result class of rail '{}'",
            self.inner.name
        );

        self.inner
            .result_counts
            .add(outcome.index(), 1, now_nanos);

        let latency_nanos = now_nanos.saturating_sub(start_nanos);
        if let Some(latency) = &self.inner.latency {
            latency.record(outcome.index(), latency_nanos);
        }

        let mut first_panic = None;
        for named in self.inner.gates.iter().rev() {
            let result = catch_unwind(AssertUnwindSafe(|| named.gate.inform(outcome, now_nanos)));
            if let Err(payload) = result {
                first_panic.get_or_insert(payload);
            }
        }
        for named in self.inner.gates.iter().rev() {
            let result = catch_unwind(AssertUnwindSafe(|| named.gate.release(permits)));
            if let Err(payload) = result {
                first_panic.get_or_insert(payload);
            }
        }

        self.inner.listeners.emit(&RailEvent::ResultRecorded {
            rail_name: self.inner.name.clone(),
            at_nanos: now_nanos,
            outcome,
            latency_nanos,
        });

        #[cfg(feature = "metrics")]
        counter!(
            "railguard_released_total",
            "rail" => self.inner.name.clone(),
            "outcome" => outcome.token()
        )
        .increment(1);

        if let Some(payload) = first_panic {
            resume_unwind(payload);
        }
    }

    /// Releases `permits` without recording a result.
    ///
    /// Gates are walked in reverse; no counter, latency, or observer is
    /// touched. Use this to back out of an acquire whose work never ran.
    pub fn release_without_result(&self, permits: u64, now_nanos: u64) {
        for named in self.inner.gates.iter().rev() {
            named.gate.release(permits);
        }
        self.inner.listeners.emit(&RailEvent::PermitsReleased {
            rail_name: self.inner.name.clone(),
            at_nanos: now_nanos,
            permits,
        });
    }

    /// Bare permit return: gates hand permits back, nothing is recorded and
    /// no event fires.
    pub fn release_raw_permits(&self, permits: u64) {
        for named in self.inner.gates.iter().rev() {
            named.gate.release(permits);
        }
    }

    fn record_rejection(&self, reason: Rejection, now_nanos: u64) {
        debug_assert!(
            self.inner.rejected_class.contains(reason),
            "gate rejected with a reason outside the rail's rejection class"
        );
        if self.inner.rejected_class.contains(reason) {
            self.inner
                .rejected_counts
                .add(reason.index(), 1, now_nanos);
        }

        self.inner.listeners.emit(&RailEvent::AcquireRejected {
            rail_name: self.inner.name.clone(),
            at_nanos: now_nanos,
            reason,
        });

        #[cfg(feature = "tracing")]
        tracing::debug!(rail = %self.inner.name, reason = %reason, "acquire rejected");

        #[cfg(feature = "metrics")]
        counter!(
            "railguard_rejected_total",
            "rail" => self.inner.name.clone(),
            "reason" => reason.token()
        )
        .increment(1);
    }
}

/// Builder for a [`GuardRail`]. Once built, the rail is immutable in
/// structure.
pub struct GuardRailBuilder {
    name: String,
    result_class: ResultClass,
    rejected_class: RejectionClass,
    result_counts: Option<Arc<RollingCounts>>,
    rejected_counts: Option<Arc<RollingCounts>>,
    latency: Option<Arc<LatencyRecorder>>,
    gates: Vec<NamedGate>,
    listeners: EventListeners<RailEvent>,
    clock: Option<Arc<dyn Clock>>,
}

impl GuardRailBuilder {
    /// Supplies the result counter; one slot per outcome.
    ///
    /// Default: a fresh counter with the default ring geometry.
    pub fn result_counts(mut self, counts: Arc<RollingCounts>) -> Self {
        self.result_counts = Some(counts);
        self
    }

    /// Supplies the rejection counter; one slot per reason.
    ///
    /// Default: a fresh counter with the default ring geometry.
    pub fn rejected_counts(mut self, counts: Arc<RollingCounts>) -> Self {
        self.rejected_counts = Some(counts);
        self
    }

    /// Supplies the latency recorder; one slot per outcome.
    ///
    /// Default: none (latency is not recorded).
    pub fn latency(mut self, latency: Arc<LatencyRecorder>) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Appends a back-pressure gate. Gates are evaluated in the order they
    /// were added.
    pub fn add_back_pressure(mut self, name: impl Into<String>, gate: Arc<dyn BackPressure>) -> Self {
        self.gates.push(NamedGate {
            name: name.into(),
            gate,
        });
        self
    }

    /// Sets the clock handed to promises created through the rail.
    ///
    /// Default: the shared [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Register a callback for rejected acquires.
    pub fn on_rejected<F>(mut self, f: F) -> Self
    where
        F: Fn(Rejection) + Send + Sync + 'static,
    {
        self.listeners.add(move |event: &RailEvent| {
            if let RailEvent::AcquireRejected { reason, .. } = event {
                f(*reason);
            }
        });
        self
    }

    /// Register a callback for recorded results.
    pub fn on_result<F>(mut self, f: F) -> Self
    where
        F: Fn(Outcome, u64) + Send + Sync + 'static,
    {
        self.listeners.add(move |event: &RailEvent| {
            if let RailEvent::ResultRecorded {
                outcome,
                latency_nanos,
                ..
            } = event
            {
                f(*outcome, *latency_nanos);
            }
        });
        self
    }

    /// Builds the rail.
    ///
    /// # Panics
    ///
    /// Panics when a supplied counter or latency recorder does not have one
    /// slot per class member, or when two gates share a name.
    pub fn build(self) -> GuardRail {
        let result_counts = self
            .result_counts
            .unwrap_or_else(|| Arc::new(RollingCounts::with_default_window(self.result_class.len())));
        let rejected_counts = self.rejected_counts.unwrap_or_else(|| {
            Arc::new(RollingCounts::with_default_window(self.rejected_class.len()))
        });

        assert_eq!(
            result_counts.slots(),
            self.result_class.len(),
            "result counter must have one slot per outcome"
        );
        assert_eq!(
            rejected_counts.slots(),
            self.rejected_class.len(),
            "rejection counter must have one slot per reason"
        );
        if let Some(latency) = &self.latency {
            assert_eq!(
                latency.slots(),
                self.result_class.len(),
                "latency recorder must have one slot per outcome"
            );
        }
        for (index, gate) in self.gates.iter().enumerate() {
            assert!(
                self.gates[index + 1..].iter().all(|g| g.name != gate.name),
                "duplicate back-pressure name '{}'",
                gate.name
            );
        }

        GuardRail {
            inner: Arc::new(RailInner {
                name: self.name,
                result_class: self.result_class,
                rejected_class: self.rejected_class,
                result_counts,
                rejected_counts,
                latency: self.latency,
                gates: self.gates,
                listeners: self.listeners,
                clock: self
                    .clock
                    .unwrap_or_else(|| SystemClock::shared() as Arc<dyn Clock>),
            }),
        }
    }
}
