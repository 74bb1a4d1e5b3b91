use railguard::{BackPressure, GuardRail, PermitGate, RejectionClass, ResultClass};
use railguard_core::LatencyRecorder;
use std::sync::Arc;

pub mod scheduler;
pub mod timeouts;

/// Standard rail for executor tests: `{success, error, timeout}` outcomes,
/// a permit gate, and a latency recorder.
pub fn guarded_rail(max_permits: u64) -> (GuardRail, Arc<PermitGate>) {
    let results = ResultClass::builder()
        .success("success")
        .failure("error")
        .failure("timeout")
        .build();
    let reasons = RejectionClass::builder().reason("max-concurrency").build();
    let gate = Arc::new(PermitGate::new(
        max_permits,
        reasons.reason("max-concurrency").unwrap(),
    ));
    let rail = GuardRail::builder("executor-it", results.clone(), reasons)
        .latency(Arc::new(LatencyRecorder::with_defaults(results.len())))
        .add_back_pressure("permits", Arc::clone(&gate) as Arc<dyn BackPressure>)
        .build();
    (rail, gate)
}
