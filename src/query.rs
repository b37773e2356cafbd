//! Query primitives.
//!
//! Each query is a plain serializable value implementing [`Predicate`]. It
//! looks at one `(key, tracker)` pair at a time and holds no outside state.
//! Trackers in the `COMPLETED` state are retained history, not scheduling
//! state, so the dependency queries skip them.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::grid::Predicate;
use crate::model::{DependencyTracking, SchedulingStatus, TrackingKey, match_key_hash};

/// Trackers with `status`, in `sink_id` or in any sink when `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ByStatusAndSinkId {
    pub sink_id: Option<i32>,
    pub status: SchedulingStatus,
}

impl ByStatusAndSinkId {
    pub fn new(sink_id: Option<i32>, status: SchedulingStatus) -> Self {
        Self { sink_id, status }
    }
}

impl Predicate for ByStatusAndSinkId {
    fn test(&self, _key: &TrackingKey, tracker: &DependencyTracking) -> bool {
        tracker.status == self.status && self.sink_id.is_none_or(|sink| sink == tracker.sink_id)
    }
}

/// Live trackers in the same sink and submitter sharing at least one hash.
///
/// This is the "who do I depend on" query run at registration. A barrier
/// match key is hashed into the search set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunksToWaitFor {
    pub sink_id: i32,
    pub submitter: i32,
    /// Sorted and deduplicated.
    pub hashes: Vec<i32>,
}

impl ChunksToWaitFor {
    pub fn new(sink_id: i32, submitter: i32, hashes: &[i32], barrier_match_key: Option<&str>) -> Self {
        let mut hashes = hashes.to_vec();
        if let Some(barrier) = barrier_match_key {
            hashes.push(match_key_hash(barrier));
        }
        hashes.sort_unstable();
        hashes.dedup();
        Self {
            sink_id,
            submitter,
            hashes,
        }
    }
}

impl Predicate for ChunksToWaitFor {
    fn test(&self, _key: &TrackingKey, tracker: &DependencyTracking) -> bool {
        tracker.status.is_live()
            && tracker.sink_id == self.sink_id
            && tracker.submitter == self.submitter
            && self.hashes.iter().any(|h| tracker.has_hash(*h))
    }
}

/// Live trackers in the sink that belong to `job_id` or share a match key.
///
/// Orders a job behind its own earlier chunks as well as behind anything
/// touching the same logical entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobChunksWaitForKey {
    pub sink_id: i32,
    pub job_id: i32,
    pub match_keys: BTreeSet<String>,
}

impl Predicate for JobChunksWaitForKey {
    fn test(&self, key: &TrackingKey, tracker: &DependencyTracking) -> bool {
        tracker.status.is_live()
            && tracker.sink_id == self.sink_id
            && (key.job_id == self.job_id
                || tracker
                    .match_keys
                    .iter()
                    .any(|k| self.match_keys.contains(k)))
    }
}

/// Live trackers in the sink and submitter holding the first of `match_keys`.
///
/// Only the first key (in sorted order) is checked; the rest are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitForKey {
    pub sink_id: i32,
    pub submitter: i32,
    pub match_keys: BTreeSet<String>,
}

impl Predicate for WaitForKey {
    fn test(&self, _key: &TrackingKey, tracker: &DependencyTracking) -> bool {
        let Some(first) = self.match_keys.first() else {
            return false;
        };
        tracker.status.is_live()
            && tracker.sink_id == self.sink_id
            && tracker.submitter == self.submitter
            && tracker.match_keys.contains(first)
    }
}

/// Trackers whose wait set contains `key`, in `sink_id` or anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitingOn {
    pub sink_id: Option<i32>,
    pub key: TrackingKey,
}

impl WaitingOn {
    pub fn new(sink_id: Option<i32>, key: TrackingKey) -> Self {
        Self { sink_id, key }
    }
}

impl Predicate for WaitingOn {
    fn test(&self, _key: &TrackingKey, tracker: &DependencyTracking) -> bool {
        self.sink_id.is_none_or(|sink| sink == tracker.sink_id)
            && tracker.waiting_on.contains(&self.key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ByJobId {
    pub job_id: i32,
}

impl Predicate for ByJobId {
    fn test(&self, key: &TrackingKey, _tracker: &DependencyTracking) -> bool {
        key.job_id == self.job_id
    }
}

/// Trackers stuck in `status` since before `older_than`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaleByStatus {
    pub status: SchedulingStatus,
    pub older_than: DateTime<Utc>,
}

impl Predicate for StaleByStatus {
    fn test(&self, _key: &TrackingKey, tracker: &DependencyTracking) -> bool {
        tracker.status == self.status && tracker.last_modified < self.older_than
    }
}

/// Trackers with `status` belonging to any of `job_ids`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusInJobs {
    pub status: SchedulingStatus,
    pub job_ids: BTreeSet<i32>,
}

impl Predicate for StatusInJobs {
    fn test(&self, key: &TrackingKey, tracker: &DependencyTracking) -> bool {
        tracker.status == self.status && self.job_ids.contains(&key.job_id)
    }
}
