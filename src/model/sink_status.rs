//! Per-sink queue bookkeeping used to throttle submission.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::SchedulingStatus;

/// How chunks for a sink and phase are handed to their queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueSubmitMode {
    /// Enqueue as soon as a chunk becomes ready.
    #[default]
    Direct,
    /// Queue is saturated; only a bulk submitter enqueues ready chunks.
    Bulk,
    /// Leaving bulk mode; both paths enqueue until the grace period is over.
    TransitionToDirect,
}

/// Pipeline phase a queue belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Processing,
    Delivering,
}

/// Time a sink must spend in `TransitionToDirect` before going direct.
pub fn transition_grace() -> Duration {
    Duration::seconds(2)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub ready: usize,
    pub enqueued: usize,
    pub mode: QueueSubmitMode,
    pub mode_changed_at: DateTime<Utc>,
}

impl Default for QueueStatus {
    fn default() -> Self {
        Self {
            ready: 0,
            enqueued: 0,
            mode: QueueSubmitMode::Direct,
            mode_changed_at: Utc::now(),
        }
    }
}

impl QueueStatus {
    pub fn is_direct_submit(&self) -> bool {
        self.mode != QueueSubmitMode::Bulk
    }

    pub fn set_mode(&mut self, mode: QueueSubmitMode) {
        if self.mode != mode {
            self.mode = mode;
            self.mode_changed_at = Utc::now();
        }
    }

    /// Apply the bulk/direct thresholds. Returns true if the mode changed.
    pub fn update_mode(&mut self, max_enqueued: usize, direct_mark: usize, now: DateTime<Utc>) -> bool {
        let next = match self.mode {
            QueueSubmitMode::Direct if self.enqueued >= max_enqueued => QueueSubmitMode::Bulk,
            QueueSubmitMode::Bulk if self.enqueued <= direct_mark => {
                QueueSubmitMode::TransitionToDirect
            }
            QueueSubmitMode::TransitionToDirect if self.enqueued >= max_enqueued => {
                QueueSubmitMode::Bulk
            }
            QueueSubmitMode::TransitionToDirect
                if now - self.mode_changed_at >= transition_grace() =>
            {
                QueueSubmitMode::Direct
            }
            current => current,
        };
        if next == self.mode {
            return false;
        }
        self.mode = next;
        self.mode_changed_at = now;
        true
    }
}

/// Counts and submit modes for one sink.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkStatus {
    pub processing: QueueStatus,
    pub delivering: QueueStatus,
    pub blocked: usize,
    pub completed: usize,
}

impl SinkStatus {
    pub fn queue(&self, phase: Phase) -> &QueueStatus {
        match phase {
            Phase::Processing => &self.processing,
            Phase::Delivering => &self.delivering,
        }
    }

    pub fn queue_mut(&mut self, phase: Phase) -> &mut QueueStatus {
        match phase {
            Phase::Processing => &mut self.processing,
            Phase::Delivering => &mut self.delivering,
        }
    }

    /// Count one tracker in `status`.
    pub fn count(&mut self, status: SchedulingStatus) {
        *self.slot(status) += 1;
    }

    /// Stop counting one tracker in `status`.
    pub fn uncount(&mut self, status: SchedulingStatus) {
        let slot = self.slot(status);
        *slot = slot.saturating_sub(1);
    }

    /// Number of trackers counted in `status`.
    pub fn get(&self, status: SchedulingStatus) -> usize {
        match status {
            SchedulingStatus::ReadyForProcessing => self.processing.ready,
            SchedulingStatus::QueuedForProcessing => self.processing.enqueued,
            SchedulingStatus::Blocked => self.blocked,
            SchedulingStatus::ReadyForDelivery => self.delivering.ready,
            SchedulingStatus::QueuedForDelivery => self.delivering.enqueued,
            SchedulingStatus::Completed => self.completed,
        }
    }

    /// Add another sink status's counts into this one. Modes are kept.
    pub fn merge_counts(&mut self, other: &SinkStatus) {
        self.processing.ready += other.processing.ready;
        self.processing.enqueued += other.processing.enqueued;
        self.delivering.ready += other.delivering.ready;
        self.delivering.enqueued += other.delivering.enqueued;
        self.blocked += other.blocked;
        self.completed += other.completed;
    }

    fn slot(&mut self, status: SchedulingStatus) -> &mut usize {
        match status {
            SchedulingStatus::ReadyForProcessing => &mut self.processing.ready,
            SchedulingStatus::QueuedForProcessing => &mut self.processing.enqueued,
            SchedulingStatus::Blocked => &mut self.blocked,
            SchedulingStatus::ReadyForDelivery => &mut self.delivering.ready,
            SchedulingStatus::QueuedForDelivery => &mut self.delivering.enqueued,
            SchedulingStatus::Completed => &mut self.completed,
        }
    }
}
