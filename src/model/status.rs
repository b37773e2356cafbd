//! Scheduling status of a tracked chunk.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Where a chunk is in the processing/delivery pipeline.
///
/// Codes are stable and persisted as a small integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchedulingStatus {
    /// Eligible for processing, waiting for a free slot in the processor queue.
    ReadyForProcessing,
    /// Handed to the processor queue.
    QueuedForProcessing,
    /// Waiting for other chunks at the same sink to complete.
    Blocked,
    /// Processed, waiting for a free slot in the sink queue.
    ReadyForDelivery,
    /// Handed to the sink queue.
    QueuedForDelivery,
    /// Delivered. Only seen when finished trackers are retained.
    Completed,
}

impl SchedulingStatus {
    pub const ALL: [SchedulingStatus; 6] = [
        SchedulingStatus::ReadyForProcessing,
        SchedulingStatus::QueuedForProcessing,
        SchedulingStatus::Blocked,
        SchedulingStatus::ReadyForDelivery,
        SchedulingStatus::QueuedForDelivery,
        SchedulingStatus::Completed,
    ];

    pub fn code(self) -> i16 {
        match self {
            SchedulingStatus::ReadyForProcessing => 1,
            SchedulingStatus::QueuedForProcessing => 2,
            SchedulingStatus::Blocked => 3,
            SchedulingStatus::ReadyForDelivery => 4,
            SchedulingStatus::QueuedForDelivery => 5,
            SchedulingStatus::Completed => 6,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }

    /// Status a chunk falls back to when it has to be sent again.
    pub fn resend_target(self) -> Option<Self> {
        match self {
            SchedulingStatus::QueuedForProcessing => Some(SchedulingStatus::ReadyForProcessing),
            SchedulingStatus::QueuedForDelivery => Some(SchedulingStatus::ReadyForDelivery),
            _ => None,
        }
    }

    /// Live trackers take part in dependency resolution; completed ones don't.
    pub fn is_live(self) -> bool {
        self != SchedulingStatus::Completed
    }

    fn as_str(self) -> &'static str {
        match self {
            SchedulingStatus::ReadyForProcessing => "ready_for_processing",
            SchedulingStatus::QueuedForProcessing => "queued_for_processing",
            SchedulingStatus::Blocked => "blocked",
            SchedulingStatus::ReadyForDelivery => "ready_for_delivery",
            SchedulingStatus::QueuedForDelivery => "queued_for_delivery",
            SchedulingStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for SchedulingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SchedulingStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == wanted)
            .ok_or_else(|| Error::Other(format!("unknown scheduling status '{s}'")))
    }
}
