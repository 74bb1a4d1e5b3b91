//! Events emitted by guard rails and circuit breakers.

use crate::circuit::CircuitState;
use crate::outcome::{Outcome, Rejection};
use railguard_core::GuardEvent;

/// Events emitted by a guard rail.
#[derive(Debug, Clone)]
pub enum RailEvent {
    /// An acquire was denied by a back-pressure gate.
    AcquireRejected {
        rail_name: String,
        at_nanos: u64,
        reason: Rejection,
    },
    /// A release-with-result accounted an outcome.
    ResultRecorded {
        rail_name: String,
        at_nanos: u64,
        outcome: Outcome,
        latency_nanos: u64,
    },
    /// Permits were handed back without a result.
    PermitsReleased {
        rail_name: String,
        at_nanos: u64,
        permits: u64,
    },
}

impl GuardEvent for RailEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RailEvent::AcquireRejected { .. } => "acquire_rejected",
            RailEvent::ResultRecorded { .. } => "result_recorded",
            RailEvent::PermitsReleased { .. } => "permits_released",
        }
    }

    fn at_nanos(&self) -> u64 {
        match self {
            RailEvent::AcquireRejected { at_nanos, .. }
            | RailEvent::ResultRecorded { at_nanos, .. }
            | RailEvent::PermitsReleased { at_nanos, .. } => *at_nanos,
        }
    }

    fn source_name(&self) -> &str {
        match self {
            RailEvent::AcquireRejected { rail_name, .. }
            | RailEvent::ResultRecorded { rail_name, .. }
            | RailEvent::PermitsReleased { rail_name, .. } => rail_name,
        }
    }
}

/// Events emitted by a circuit breaker.
#[derive(Debug, Clone)]
pub enum CircuitEvent {
    /// The breaker moved between states.
    StateTransition {
        breaker_name: String,
        at_nanos: u64,
        from: CircuitState,
        to: CircuitState,
        /// True when the transition came from `force_open`/`force_closed`.
        forced: bool,
    },
    /// An acquire was denied because the circuit is not admitting calls.
    CallRejected { breaker_name: String, at_nanos: u64 },
    /// A probe was admitted while half-open.
    ProbeAdmitted { breaker_name: String, at_nanos: u64 },
}

impl GuardEvent for CircuitEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CircuitEvent::StateTransition { .. } => "state_transition",
            CircuitEvent::CallRejected { .. } => "call_rejected",
            CircuitEvent::ProbeAdmitted { .. } => "probe_admitted",
        }
    }

    fn at_nanos(&self) -> u64 {
        match self {
            CircuitEvent::StateTransition { at_nanos, .. }
            | CircuitEvent::CallRejected { at_nanos, .. }
            | CircuitEvent::ProbeAdmitted { at_nanos, .. } => *at_nanos,
        }
    }

    fn source_name(&self) -> &str {
        match self {
            CircuitEvent::StateTransition { breaker_name, .. }
            | CircuitEvent::CallRejected { breaker_name, .. }
            | CircuitEvent::ProbeAdmitted { breaker_name, .. } => breaker_name,
        }
    }
}
