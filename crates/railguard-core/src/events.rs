//! Observability hooks for rails and breakers.
//!
//! Components own an [`EventListeners`] collection fixed at build time and
//! publish typed events (rejections, state transitions, recorded results)
//! synchronously on the thread that produced them. Any `Fn(&E)` closure is a
//! listener; dispatch isolates panicking listeners the same way the rail
//! isolates panicking gate observers, by finishing the chain first and
//! reporting afterwards.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// An event published by a runtime component.
pub trait GuardEvent: Send + Sync + fmt::Debug {
    /// Short machine-readable kind, e.g. "state_transition".
    fn event_type(&self) -> &'static str;

    /// Monotonic nanos at which the event occurred.
    fn at_nanos(&self) -> u64;

    /// Name of the rail or breaker instance that published it.
    fn source_name(&self) -> &str;
}

/// A consumer of events of type `E`.
///
/// Implemented for every `Fn(&E) + Send + Sync` closure, so listeners are
/// usually registered as plain closures through builder hooks.
pub trait EventListener<E: GuardEvent>: Send + Sync {
    fn on_event(&self, event: &E);
}

impl<E, F> EventListener<E> for F
where
    E: GuardEvent,
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        self(event)
    }
}

/// The listeners registered on one component.
pub struct EventListeners<E: GuardEvent> {
    listeners: Vec<Arc<dyn EventListener<E>>>,
}

impl<E: GuardEvent> EventListeners<E> {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    /// Registers a listener.
    pub fn add<L>(&mut self, listener: L)
    where
        L: EventListener<E> + 'static,
    {
        self.listeners.push(Arc::new(listener));
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Delivers `event` to every listener.
    ///
    /// The dispatch is total: a panicking listener is unwound in place and
    /// the rest of the chain still runs. Panics are tallied and reported
    /// once at the end (a `tracing` warning and/or a `metrics` counter,
    /// depending on enabled features) rather than propagated; an event
    /// publisher must never die because an observer did.
    pub fn emit(&self, event: &E) {
        let mut panicked = 0u64;
        for listener in &self.listeners {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener.on_event(event)));
            if outcome.is_err() {
                panicked += 1;
            }
        }
        if panicked > 0 {
            report_panicked(event, panicked);
        }
    }
}

impl<E: GuardEvent> Default for EventListeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Surfaced once per dispatch, after every listener ran.
fn report_panicked<E: GuardEvent>(event: &E, panicked: u64) {
    #[cfg(feature = "tracing")]
    tracing::warn!(
        source = event.source_name(),
        event_type = event.event_type(),
        panicked,
        "listener panics swallowed during event dispatch"
    );

    #[cfg(feature = "metrics")]
    metrics::counter!(
        "railguard_listener_panics_total",
        "source" => event.source_name().to_string()
    )
    .increment(panicked);

    #[cfg(not(any(feature = "tracing", feature = "metrics")))]
    let _ = (event, panicked);
}
