//! Structured events emitted by the tracking map on every committed change.
//!
//! Listeners keep derived state (per-sink status counts) in step with the
//! map without scanning it. Entries loaded from the store during warm-up
//! do not raise events; listeners rebuild from an aggregation instead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{SchedulingStatus, TrackingKey};

/// A structured event emitted by the map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence number. Consumers can detect gaps.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    TrackerAdded {
        key: TrackingKey,
        sink_id: i32,
        status: SchedulingStatus,
    },
    TrackerUpdated {
        key: TrackingKey,
        sink_id: i32,
        from: SchedulingStatus,
        to: SchedulingStatus,
    },
    TrackerRemoved {
        key: TrackingKey,
        sink_id: i32,
        status: SchedulingStatus,
    },
}

/// Receives map events synchronously, after the change is committed.
///
/// Runs while the owning partition is locked, so implementations must not
/// call back into the map.
pub trait MapListener: Send + Sync {
    fn on_event(&self, event: &Event);
}
