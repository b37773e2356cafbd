//! Atomic mutators.
//!
//! Run by the tracking map on the partition owning the key, under that
//! partition's lock. Whatever they change is written through to the store.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::grid::{EntryProcessor, Predicate};
use crate::model::{DependencyTracking, SchedulingStatus, TrackingKey};

/// Drop a completed chunk from a dependent's wait set.
///
/// Reports `true` only when this call moved the tracker from `BLOCKED` to
/// `QUEUED_FOR_PROCESSING`. Also usable as the predicate selecting the
/// trackers it applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveWaitingOnProcessor {
    pub key: TrackingKey,
}

impl RemoveWaitingOnProcessor {
    pub fn new(key: TrackingKey) -> Self {
        Self { key }
    }
}

impl EntryProcessor for RemoveWaitingOnProcessor {
    type Output = bool;

    fn process(&self, tracker: &mut DependencyTracking) -> bool {
        if !tracker.waiting_on.remove(&self.key) {
            return false;
        }
        if tracker.waiting_on.is_empty() && tracker.status == SchedulingStatus::Blocked {
            tracker.status = SchedulingStatus::QueuedForProcessing;
            return true;
        }
        false
    }
}

impl Predicate for RemoveWaitingOnProcessor {
    fn test(&self, _key: &TrackingKey, tracker: &DependencyTracking) -> bool {
        tracker.waiting_on.contains(&self.key)
    }
}

/// Force a status, bypassing the wait-set mechanism.
///
/// Forcing any status other than `BLOCKED` releases the tracker from its
/// prerequisites. Forcing `BLOCKED` onto a tracker with nothing to wait for
/// is ignored. Reports whether the status changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateStatusProcessor {
    pub status: SchedulingStatus,
}

impl UpdateStatusProcessor {
    pub fn new(status: SchedulingStatus) -> Self {
        Self { status }
    }
}

impl EntryProcessor for UpdateStatusProcessor {
    type Output = bool;

    fn process(&self, tracker: &mut DependencyTracking) -> bool {
        if self.status == SchedulingStatus::Blocked {
            if tracker.waiting_on.is_empty() {
                return false;
            }
        } else {
            tracker.waiting_on.clear();
        }
        let changed = tracker.status != self.status;
        tracker.status = self.status;
        changed
    }
}

/// Move a tracker from one non-blocked status to another, only if it is
/// still in `from`. Reports whether it moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionProcessor {
    pub from: SchedulingStatus,
    pub to: SchedulingStatus,
}

impl EntryProcessor for TransitionProcessor {
    type Output = bool;

    fn process(&self, tracker: &mut DependencyTracking) -> bool {
        if tracker.status != self.from || self.from == self.to {
            return false;
        }
        tracker.status = self.to;
        true
    }
}

/// Raise a tracker's priority.
///
/// Returns the tracker's prerequisites when the priority was raised so the
/// boost can be pushed on to them, `None` when it was already high enough.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePriorityProcessor {
    pub priority: i32,
}

impl EntryProcessor for UpdatePriorityProcessor {
    type Output = Option<BTreeSet<TrackingKey>>;

    fn process(&self, tracker: &mut DependencyTracking) -> Self::Output {
        if self.priority <= tracker.priority {
            return None;
        }
        tracker.priority = self.priority;
        Some(tracker.waiting_on.clone())
    }
}

/// Send a queued chunk again. Returns the retry count afterwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResendProcessor;

impl EntryProcessor for ResendProcessor {
    type Output = i32;

    fn process(&self, tracker: &mut DependencyTracking) -> i32 {
        tracker.resend()
    }
}
