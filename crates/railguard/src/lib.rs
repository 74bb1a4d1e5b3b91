//! Fault-isolation runtime for slow or failing downstream dependencies.
//!
//! Every attempted unit of work acquires permits through a [`GuardRail`]'s
//! back-pressure gates (a [`PermitGate`], usually fronted by a
//! [`CircuitBreaker`]); every completion releases back through the rail,
//! which updates rolling counters, records latency, and notifies the
//! breaker. On top of that surface sit two execution strategies behind a
//! common [`Executor`] shape: a bounded [`ThreadPoolExecutor`] with armed
//! timeouts, and a single-coordinator [`SchedulerLoop`].
//!
//! ## Basic Example
//!
//! ```no_run
//! use railguard::{
//!     Action, CircuitBreaker, Executor, GuardRail, PermitGate, RejectionClass, ResultClass,
//!     ThreadPoolExecutor,
//! };
//! use railguard_core::RollingCounts;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let results = ResultClass::builder()
//!     .success("success")
//!     .failure("error")
//!     .failure("timeout")
//!     .build();
//! let reasons = RejectionClass::builder()
//!     .reason("max-concurrency")
//!     .reason("circuit-open")
//!     .build();
//!
//! let counts = Arc::new(RollingCounts::with_default_window(results.len()));
//! let breaker = CircuitBreaker::builder("db", reasons.reason("circuit-open").unwrap())
//!     .failure_threshold(10)
//!     .backoff(Duration::from_secs(5))
//!     .health_source(Arc::clone(&counts), &results)
//!     .build();
//!
//! let rail = GuardRail::builder("db", results, reasons.clone())
//!     .result_counts(counts)
//!     .add_back_pressure("breaker", Arc::new(breaker))
//!     .add_back_pressure(
//!         "permits",
//!         Arc::new(PermitGate::new(32, reasons.reason("max-concurrency").unwrap())),
//!     )
//!     .build();
//!
//! let executor = ThreadPoolExecutor::builder("db-pool").pool_size(8).build();
//! let future = executor.submit(
//!     &rail,
//!     Action::new(|| Ok::<_, railguard::ActionError>("row")),
//!     Some(Duration::from_millis(100)),
//! );
//!
//! match future.await_done() {
//!     Some(outcome) => println!("finished as {outcome}"),
//!     None => println!("rejected: {:?}", future.rejected_reason()),
//! }
//! executor.shutdown();
//! ```
//!
//! ## Feature Flags
//! - `metrics`: emit counters/gauges through the `metrics` crate
//! - `tracing`: log transitions and shutdowns through the `tracing` crate

pub use circuit::{CircuitBreaker, CircuitBreakerBuilder, CircuitConfig, CircuitState, HealthSnapshot};
pub use error::{ActionError, InvalidResultError, RejectedReason, TimeoutError};
pub use events::{CircuitEvent, RailEvent};
pub use executor::{Action, Executor};
pub use outcome::{Outcome, Rejection, RejectionClass, RejectionClassBuilder, ResultClass, ResultClassBuilder};
pub use pool::{ThreadPoolExecutor, ThreadPoolExecutorBuilder};
pub use promise::{Completable, Promise, RailFuture};
pub use rail::{BackPressure, GuardRail, GuardRailBuilder, PermitGrant};
pub use scheduler::{SchedulerLoop, SchedulerLoopBuilder};
pub use semaphore::PermitGate;
pub use task::CancellableTask;
pub use timeout::{Expire, TimeoutService};

mod circuit;
mod error;
mod events;
mod executor;
mod outcome;
mod pool;
mod promise;
mod rail;
mod scheduler;
mod semaphore;
mod task;
mod timeout;
