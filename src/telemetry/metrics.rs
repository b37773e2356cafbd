//! Metric instrument factories for chunk-tracker.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"chunk-tracker"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for chunk-tracker instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("chunk-tracker")
}

/// Counter: chunks registered.
/// Labels: `status` (status at registration), `barrier` ("true" | "false").
pub fn trackers_registered() -> Counter<u64> {
    meter()
        .u64_counter("tracker.registered")
        .with_description("Number of chunks registered for scheduling")
        .build()
}

/// Counter: chunks released from BLOCKED by a completion.
/// Labels: `sink_id`.
pub fn chunks_unblocked() -> Counter<u64> {
    meter()
        .u64_counter("tracker.unblocked")
        .with_description("Number of chunks unblocked by completions")
        .build()
}

/// Counter: tracker status transitions.
/// Labels: `from`, `to`.
pub fn status_transitions() -> Counter<u64> {
    meter()
        .u64_counter("tracker.status_transitions")
        .with_description("Number of tracker status transitions")
        .build()
}

/// Counter: rows touched by backing store operations.
/// Labels: `store`, `operation`.
pub fn store_operations() -> Counter<u64> {
    meter()
        .u64_counter("tracker.store.operations")
        .with_description("Rows touched by tracking store operations")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("tracker.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
