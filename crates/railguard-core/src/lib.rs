//! Core infrastructure for railguard.
//!
//! This crate provides shared functionality used across the railguard runtime:
//! - Injectable time sources (monotonic + wall clock)
//! - Event system for observability
//! - Rolling per-outcome counters
//! - Latency recording with percentile queries

pub mod clock;
pub mod counts;
pub mod events;
pub mod latency;

pub use clock::{Clock, ManualClock, SystemClock};
pub use counts::{CountsSnapshot, RollingCounts};
pub use events::{EventListener, EventListeners, GuardEvent};
pub use latency::{LatencyRecorder, LatencySnapshot};
