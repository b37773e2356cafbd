//! Core data model.
//!
//! A tracker is the scheduling state of one chunk submitted to one sink:
//! which other chunks it must wait for, which logical records it touches,
//! and where it is in the processing/delivery pipeline.

pub mod key;
pub mod sink_status;
pub mod status;
pub mod tracking;

pub use key::TrackingKey;
pub use sink_status::{Phase, QueueStatus, QueueSubmitMode, SinkStatus};
pub use status::SchedulingStatus;
pub use tracking::{DependencyTracking, NewTracker, WaitFor, match_key_hash};
