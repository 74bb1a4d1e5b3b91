//! Circuit breaker: a state machine over rolling windows of outcomes.
//!
//! The breaker acts as a back-pressure gate on a guard rail. It reads the
//! rail's result counters (handed to it at construction, which keeps the
//! rail→breaker→counters cycle one-directional) and trips open when the
//! failure mix over the trailing period crosses a threshold. While open it
//! rejects everything until the backoff expires, then admits exactly one
//! probe; the probe's outcome decides between closing and re-opening.

use crate::events::CircuitEvent;
use crate::outcome::{Outcome, Rejection, ResultClass};
use crate::rail::BackPressure;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use railguard_core::{EventListeners, RollingCounts};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Represents the state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CircuitState {
    /// The circuit is closed and calls are admitted.
    Closed = 0,
    /// The circuit is open and calls are rejected until the backoff expires.
    Open = 1,
    /// The circuit admitted a probe and is waiting for its outcome.
    HalfOpen = 2,
}

impl CircuitState {
    fn from_tag(tag: u64) -> Self {
        match tag {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            _ => CircuitState::HalfOpen,
        }
    }

    #[cfg(feature = "metrics")]
    fn label(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

// State word layout: the state tag lives in the low two bits, the monotonic
// nanos at which the current open period began in the high bits. A single
// CAS therefore moves both atomically and transitions are total-ordered.
fn pack(state: CircuitState, opened_at_nanos: u64) -> u64 {
    (opened_at_nanos << 2) | state as u64
}

fn state_of(word: u64) -> CircuitState {
    CircuitState::from_tag(word & 0b11)
}

fn opened_at_of(word: u64) -> u64 {
    word >> 2
}

/// Hot-swappable breaker tunables.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitConfig {
    /// Rolling window over which failures are counted.
    pub trailing_period: Duration,
    /// Absolute failure count above which the circuit opens (strictly
    /// greater-than: `k` failures keep it closed, the `(k+1)`-th opens it).
    pub failure_threshold: u64,
    /// Failure ratio (0.0..=1.0) at or above which the circuit opens, once
    /// `sample_size_threshold` results have been observed.
    pub failure_percentage_threshold: f64,
    /// Minimum result volume in the window before the ratio applies.
    pub sample_size_threshold: u64,
    /// How long the circuit stays open before admitting a probe.
    pub backoff: Duration,
    /// How long a health snapshot may be reused before recomputing.
    /// Zero disables caching.
    pub health_refresh_interval: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            trailing_period: Duration::from_secs(1),
            failure_threshold: u64::MAX,
            failure_percentage_threshold: 0.5,
            sample_size_threshold: 50,
            backoff: Duration::from_secs(1),
            health_refresh_interval: Duration::ZERO,
        }
    }
}

/// A health reading over the breaker's trailing period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub total: u64,
    pub failures: u64,
}

struct HealthSource {
    counts: Arc<RollingCounts>,
    failure_slots: Box<[bool]>,
}

impl HealthSource {
    fn read(&self, trailing: Duration, now_nanos: u64) -> HealthSnapshot {
        let mut total = 0;
        let mut failures = 0;
        for (slot, is_failure) in self.failure_slots.iter().enumerate() {
            let count = self.counts.count(slot, trailing, now_nanos);
            total += count;
            if *is_failure {
                failures += count;
            }
        }
        HealthSnapshot { total, failures }
    }
}

/// Circuit breaker over a rail's result counters.
///
/// ```
/// use railguard::{CircuitBreaker, CircuitState, RejectionClass, ResultClass};
/// use railguard_core::RollingCounts;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let results = ResultClass::builder().success("success").failure("error").build();
/// let reasons = RejectionClass::builder().reason("circuit-open").build();
/// let counts = Arc::new(RollingCounts::with_default_window(results.len()));
///
/// let breaker = CircuitBreaker::builder("db", reasons.reason("circuit-open").unwrap())
///     .failure_threshold(5)
///     .trailing_period(Duration::from_secs(1))
///     .health_source(Arc::clone(&counts), &results)
///     .build();
///
/// assert_eq!(breaker.state(), CircuitState::Closed);
/// ```
pub struct CircuitBreaker {
    name: String,
    word: AtomicU64,
    config: ArcSwap<CircuitConfig>,
    health: HealthSource,
    health_cache: Mutex<Option<(u64, HealthSnapshot)>>,
    reason: Rejection,
    listeners: EventListeners<CircuitEvent>,
}

impl CircuitBreaker {
    /// Creates a new builder.
    ///
    /// `reason` is the rejection handed out while the breaker is not
    /// admitting calls.
    pub fn builder(name: impl Into<String>, reason: Rejection) -> CircuitBreakerBuilder {
        CircuitBreakerBuilder {
            name: name.into(),
            reason,
            config: CircuitConfig::default(),
            health_source: None,
            listeners: EventListeners::new(),
        }
    }

    /// Preset: balanced breaker (50% over 100 samples, 30s backoff).
    pub fn standard(name: impl Into<String>, reason: Rejection) -> CircuitBreakerBuilder {
        Self::builder(name, reason)
            .failure_percentage_threshold(0.5)
            .sample_size_threshold(100)
            .backoff(Duration::from_secs(30))
    }

    /// Preset: trips quickly (25% over 20 samples, 10s backoff) for
    /// latency-sensitive callers.
    pub fn fast_trip(name: impl Into<String>, reason: Rejection) -> CircuitBreakerBuilder {
        Self::builder(name, reason)
            .failure_percentage_threshold(0.25)
            .sample_size_threshold(20)
            .backoff(Duration::from_secs(10))
    }

    /// Preset: tolerates transient trouble (75% over 200 samples, 60s
    /// backoff).
    pub fn tolerant(name: impl Into<String>, reason: Rejection) -> CircuitBreakerBuilder {
        Self::builder(name, reason)
            .failure_percentage_threshold(0.75)
            .sample_size_threshold(200)
            .backoff(Duration::from_secs(60))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        state_of(self.word.load(Ordering::Acquire))
    }

    /// Monotonic nanos at which the current open period began, when open or
    /// half-open.
    pub fn opened_at_nanos(&self) -> Option<u64> {
        let word = self.word.load(Ordering::Acquire);
        match state_of(word) {
            CircuitState::Closed => None,
            CircuitState::Open | CircuitState::HalfOpen => Some(opened_at_of(word)),
        }
    }

    /// The active configuration.
    pub fn config(&self) -> Arc<CircuitConfig> {
        self.config.load_full()
    }

    /// Replaces the configuration; takes effect on the next evaluation.
    pub fn update_config(&self, config: CircuitConfig) {
        self.config.store(Arc::new(config));
    }

    /// The rejection handed out while not admitting calls.
    pub fn rejection_reason(&self) -> Rejection {
        self.reason
    }

    /// Reads the failure mix over the trailing period ending at `now_nanos`,
    /// honoring the configured refresh interval.
    pub fn health(&self, now_nanos: u64) -> HealthSnapshot {
        let config = self.config.load();
        if config.health_refresh_interval.is_zero() {
            return self.health.read(config.trailing_period, now_nanos);
        }

        let refresh_nanos = config.health_refresh_interval.as_nanos() as u64;
        let mut cache = self.health_cache.lock();
        match *cache {
            Some((at, snapshot)) if now_nanos.saturating_sub(at) < refresh_nanos => snapshot,
            _ => {
                let snapshot = self.health.read(config.trailing_period, now_nanos);
                *cache = Some((now_nanos, snapshot));
                snapshot
            }
        }
    }

    /// Unconditionally opens the circuit.
    pub fn force_open(&self, now_nanos: u64) {
        self.force_to(CircuitState::Open, now_nanos);
    }

    /// Unconditionally closes the circuit.
    pub fn force_closed(&self, now_nanos: u64) {
        self.force_to(CircuitState::Closed, now_nanos);
    }

    fn force_to(&self, state: CircuitState, now_nanos: u64) {
        let opened_at = match state {
            CircuitState::Closed => 0,
            _ => now_nanos,
        };
        let previous = self.word.swap(pack(state, opened_at), Ordering::AcqRel);
        let from = state_of(previous);
        if from != state {
            self.on_transition(from, state, now_nanos, true);
        }
    }

    /// Records an observed outcome; called by the guard rail on every
    /// release-with-result.
    pub fn inform(&self, outcome: Outcome, now_nanos: u64) {
        let word = self.word.load(Ordering::Acquire);
        match state_of(word) {
            CircuitState::Closed => {
                if outcome.is_failure() && self.should_trip(now_nanos) {
                    self.try_transition(word, CircuitState::Open, now_nanos);
                }
            }
            CircuitState::HalfOpen => {
                if outcome.is_failure() {
                    self.try_transition(word, CircuitState::Open, now_nanos);
                } else {
                    self.try_transition(word, CircuitState::Closed, now_nanos);
                }
            }
            // Results landing while open belong to calls admitted earlier;
            // the backoff clock is not disturbed.
            CircuitState::Open => {}
        }
    }

    /// Attempts to admit a call at `now_nanos`.
    ///
    /// Closed admits everything. Open rejects until the backoff has elapsed,
    /// then the winning caller becomes the half-open probe. Half-open rejects
    /// everything but the probe already in flight.
    pub fn try_acquire(&self, now_nanos: u64) -> Result<(), Rejection> {
        let word = self.word.load(Ordering::Acquire);
        match state_of(word) {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let backoff = self.config.load().backoff.as_nanos() as u64;
                if now_nanos.saturating_sub(opened_at_of(word)) >= backoff
                    && self.try_transition(word, CircuitState::HalfOpen, now_nanos)
                {
                    self.listeners.emit(&CircuitEvent::ProbeAdmitted {
                        breaker_name: self.name.clone(),
                        at_nanos: now_nanos,
                    });
                    Ok(())
                } else {
                    self.reject(now_nanos)
                }
            }
            CircuitState::HalfOpen => self.reject(now_nanos),
        }
    }

    fn reject(&self, now_nanos: u64) -> Result<(), Rejection> {
        self.listeners.emit(&CircuitEvent::CallRejected {
            breaker_name: self.name.clone(),
            at_nanos: now_nanos,
        });
        Err(self.reason)
    }

    fn should_trip(&self, now_nanos: u64) -> bool {
        let config = self.config.load();
        let health = self.health(now_nanos);
        if health.failures > config.failure_threshold {
            return true;
        }
        health.total >= config.sample_size_threshold
            && health.total > 0
            && health.failures as f64 / health.total as f64 >= config.failure_percentage_threshold
    }

    /// CASes from the observed word into `to`; losing the race means another
    /// transition happened first and this one is dropped.
    fn try_transition(&self, observed: u64, to: CircuitState, now_nanos: u64) -> bool {
        let opened_at = match to {
            CircuitState::Closed => 0,
            CircuitState::Open => now_nanos,
            // The probe keeps the open period's timestamp.
            CircuitState::HalfOpen => opened_at_of(observed),
        };
        let won = self
            .word
            .compare_exchange(
                observed,
                pack(to, opened_at),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if won {
            self.on_transition(state_of(observed), to, now_nanos, false);
        }
        won
    }

    fn on_transition(&self, from: CircuitState, to: CircuitState, now_nanos: u64, forced: bool) {
        self.listeners.emit(&CircuitEvent::StateTransition {
            breaker_name: self.name.clone(),
            at_nanos: now_nanos,
            from,
            to,
            forced,
        });

        #[cfg(feature = "tracing")]
        tracing::info!(breaker = %self.name, from = ?from, to = ?to, forced, "circuit state transition");

        #[cfg(feature = "metrics")]
        {
            counter!(
                "railguard_circuit_transitions_total",
                "breaker" => self.name.clone(),
                "from" => from.label(),
                "to" => to.label()
            )
            .increment(1);

            gauge!("railguard_circuit_state", "breaker" => self.name.clone()).set(to as u8 as f64);
        }
    }
}

impl BackPressure for CircuitBreaker {
    fn try_acquire(&self, _permits: u64, now_nanos: u64) -> Result<(), Rejection> {
        CircuitBreaker::try_acquire(self, now_nanos)
    }

    fn release(&self, _permits: u64) {}

    fn inform(&self, outcome: Outcome, now_nanos: u64) {
        CircuitBreaker::inform(self, outcome, now_nanos)
    }
}

/// Builder for a [`CircuitBreaker`].
pub struct CircuitBreakerBuilder {
    name: String,
    reason: Rejection,
    config: CircuitConfig,
    health_source: Option<HealthSource>,
    listeners: EventListeners<CircuitEvent>,
}

impl CircuitBreakerBuilder {
    /// Sets the rolling window over which failures are counted.
    ///
    /// Default: 1 second.
    pub fn trailing_period(mut self, period: Duration) -> Self {
        self.config.trailing_period = period;
        self
    }

    /// Sets the absolute failure count above which the circuit opens.
    ///
    /// Default: disabled (`u64::MAX`).
    pub fn failure_threshold(mut self, threshold: u64) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// Sets the failure ratio (0.0..=1.0) at which the circuit opens once
    /// the sample-size threshold is met.
    ///
    /// Default: 0.5
    pub fn failure_percentage_threshold(mut self, threshold: f64) -> Self {
        self.config.failure_percentage_threshold = threshold;
        self
    }

    /// Sets the minimum result volume before the ratio applies.
    ///
    /// Default: 50
    pub fn sample_size_threshold(mut self, threshold: u64) -> Self {
        self.config.sample_size_threshold = threshold;
        self
    }

    /// Sets how long the circuit stays open before admitting a probe.
    ///
    /// Default: 1 second.
    pub fn backoff(mut self, backoff: Duration) -> Self {
        self.config.backoff = backoff;
        self
    }

    /// Sets how long a health snapshot may be reused.
    ///
    /// Default: zero (every failure evaluation reads the counters).
    pub fn health_refresh_interval(mut self, interval: Duration) -> Self {
        self.config.health_refresh_interval = interval;
        self
    }

    /// Attaches the result counters the breaker reads its health from,
    /// along with the result class describing which slots are failures.
    ///
    /// This is normally the same counter instance handed to the guard rail's
    /// `result_counts`.
    pub fn health_source(mut self, counts: Arc<RollingCounts>, class: &ResultClass) -> Self {
        assert_eq!(
            counts.slots(),
            class.len(),
            "health counters must have one slot per outcome"
        );
        let failure_slots = class.outcomes().map(|o| o.is_failure()).collect();
        self.health_source = Some(HealthSource {
            counts,
            failure_slots,
        });
        self
    }

    /// Register a callback for state transition events.
    pub fn on_state_transition<F>(mut self, f: F) -> Self
    where
        F: Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.listeners.add(move |event: &CircuitEvent| {
            if let CircuitEvent::StateTransition { from, to, .. } = event {
                f(*from, *to);
            }
        });
        self
    }

    /// Register a callback for rejected calls.
    pub fn on_call_rejected<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.listeners.add(move |event: &CircuitEvent| {
            if matches!(event, CircuitEvent::CallRejected { .. }) {
                f();
            }
        });
        self
    }

    /// Builds the breaker.
    ///
    /// # Panics
    ///
    /// Panics when no health source was attached or a threshold is out of
    /// range.
    pub fn build(self) -> CircuitBreaker {
        let health = self
            .health_source
            .expect("a circuit breaker needs a health source (attach the rail's result counters)");
        assert!(
            (0.0..=1.0).contains(&self.config.failure_percentage_threshold),
            "failure_percentage_threshold must be within 0.0..=1.0"
        );

        CircuitBreaker {
            name: self.name,
            word: AtomicU64::new(pack(CircuitState::Closed, 0)),
            config: ArcSwap::from_pointee(self.config),
            health,
            health_cache: Mutex::new(None),
            reason: self.reason,
            listeners: self.listeners,
        }
    }
}
