//! Time sources for the runtime.
//!
//! Every component that needs to know "now" on its own (executors, the
//! timeout service) takes an injected [`Clock`] so tests can control time.
//! Operations that already receive an explicit timestamp (guard-rail
//! acquire/release) stay clock-free.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// A source of monotonic nanoseconds and wall-clock milliseconds.
pub trait Clock: Send + Sync + 'static {
    /// Monotonic nanoseconds since a process-wide origin.
    ///
    /// All [`SystemClock`] instances share the same origin, so timestamps
    /// taken from different instances are directly comparable.
    fn now_nanos(&self) -> u64;

    /// Wall-clock milliseconds since the unix epoch.
    fn wall_millis(&self) -> u64;
}

fn process_origin() -> Instant {
    static ORIGIN: OnceLock<Instant> = OnceLock::new();
    *ORIGIN.get_or_init(Instant::now)
}

/// The default clock, backed by [`Instant`] and [`SystemTime`].
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: process_origin(),
        }
    }

    /// A shared handle to the default clock.
    pub fn shared() -> Arc<SystemClock> {
        static SHARED: OnceLock<Arc<SystemClock>> = OnceLock::new();
        Arc::clone(SHARED.get_or_init(|| Arc::new(SystemClock::new())))
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_nanos(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }

    fn wall_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// A hand-driven clock for tests.
///
/// Time only moves when [`advance`](ManualClock::advance) or
/// [`set_nanos`](ManualClock::set_nanos) is called.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    pub fn starting_at(nanos: u64) -> Self {
        Self {
            nanos: AtomicU64::new(nanos),
        }
    }

    /// Moves the clock forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        self.nanos
            .fetch_add(delta.as_nanos() as u64, Ordering::Release);
    }

    /// Jumps the clock to an absolute reading.
    pub fn set_nanos(&self, nanos: u64) {
        self.nanos.store(nanos, Ordering::Release);
    }
}

impl Clock for ManualClock {
    fn now_nanos(&self) -> u64 {
        self.nanos.load(Ordering::Acquire)
    }

    fn wall_millis(&self) -> u64 {
        self.now_nanos() / 1_000_000
    }
}
