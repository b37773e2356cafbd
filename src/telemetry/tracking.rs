//! Scheduling span helpers.
//!
//! Span creation and state-transition recording for chunks flowing through
//! registration and completion.

use tracing::Span;

use crate::model::{SchedulingStatus, TrackingKey};

/// Start a span for registering a chunk.
///
/// `tracker.waiting_on` is declared empty and filled in once the
/// dependency set is known.
pub fn start_registration_span(key: TrackingKey, sink_id: i32) -> Span {
    tracing::info_span!(
        "tracker.register",
        "tracker.key" = %key,
        "tracker.sink_id" = sink_id,
        "tracker.waiting_on" = tracing::field::Empty,
    )
}

/// Start a span for completing a chunk.
///
/// `tracker.unblocked` is declared empty and recorded after the cascade.
pub fn start_completion_span(key: TrackingKey) -> Span {
    tracing::info_span!(
        "tracker.complete",
        "tracker.key" = %key,
        "tracker.unblocked" = tracing::field::Empty,
    )
}

/// Record a status transition event on the given span and count it.
pub fn record_state_transition(span: &Span, key: TrackingKey, from: SchedulingStatus, to: SchedulingStatus) {
    span.in_scope(|| {
        tracing::info!(key = %key, from = %from, to = %to, "state_transition");
    });
    super::metrics::status_transitions().add(
        1,
        &[
            opentelemetry::KeyValue::new("from", from.to_string()),
            opentelemetry::KeyValue::new("to", to.to_string()),
        ],
    );
}
