//! Integration tests for telemetry initialization and span helpers.

use chunk_tracker::model::{SchedulingStatus, TrackingKey};
use chunk_tracker::telemetry::{self, TelemetryConfig, tracking};

#[test]
fn telemetry_initializes_without_endpoint() {
    // A global subscriber can only be set once per process, so this may
    // return Err if another test got there first; that is acceptable.
    let _guard = telemetry::init_telemetry(TelemetryConfig::new("chunk-tracker-test"));
}

#[test]
fn registration_span_records_waiting_on() {
    let span = tracking::start_registration_span(TrackingKey::new(1, 2), 7);
    span.record("tracker.waiting_on", 3usize);
}

#[test]
fn completion_span_records_transition() {
    let span = tracking::start_completion_span(TrackingKey::new(1, 2));
    tracking::record_state_transition(
        &span,
        TrackingKey::new(2, 0),
        SchedulingStatus::Blocked,
        SchedulingStatus::QueuedForProcessing,
    );
    span.record("tracker.unblocked", 1usize);
}

#[test]
fn metric_instruments_build_without_provider() {
    use opentelemetry::KeyValue;
    telemetry::metrics::trackers_registered().add(1, &[KeyValue::new("status", "blocked")]);
    telemetry::metrics::store_operations().add(
        2,
        &[
            KeyValue::new("store", "memory"),
            KeyValue::new("operation", "store_all"),
        ],
    );
    telemetry::metrics::operation_duration_ms().record(1.5, &[KeyValue::new("operation", "test")]);
}
