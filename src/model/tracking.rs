//! The dependency tracking record and its builder.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::{SchedulingStatus, TrackingKey};

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Scheduling state for one chunk submitted to one sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyTracking {
    /// Identity. Never changes.
    pub key: TrackingKey,

    /// Ordering between chunks is only enforced within a sink.
    pub sink_id: i32,

    /// Submitter (agency) number, the second scope for key based ordering.
    pub submitter: i32,

    pub status: SchedulingStatus,

    /// Chunks that must complete first. Only ever shrinks.
    pub waiting_on: BTreeSet<TrackingKey>,

    /// Business keys identifying the logical records this chunk touches.
    pub match_keys: BTreeSet<String>,

    /// Hashes of `match_keys`, sorted and deduplicated.
    pub hashes: Vec<i32>,

    /// Higher is more urgent.
    pub priority: i32,

    pub retries: i32,

    pub last_modified: DateTime<Utc>,
}

impl DependencyTracking {
    /// True when the BLOCKED status and a non-empty wait set agree.
    pub fn is_consistent(&self) -> bool {
        (self.status == SchedulingStatus::Blocked) == !self.waiting_on.is_empty()
    }

    pub fn has_hash(&self, hash: i32) -> bool {
        self.hashes.binary_search(&hash).is_ok()
    }

    /// Replace the match keys, recomputing hashes.
    pub fn set_match_keys(&mut self, match_keys: BTreeSet<String>) {
        self.hashes = compute_hashes(&match_keys);
        self.match_keys = match_keys;
    }

    /// Move a queued chunk back to its ready state so it is sent again.
    ///
    /// Returns the retry count after the call; unchanged for states that
    /// can't be resent.
    pub fn resend(&mut self) -> i32 {
        if let Some(target) = self.status.resend_target() {
            self.status = target;
            self.retries += 1;
        }
        self.retries
    }

    pub fn touch(&mut self) {
        self.last_modified = now();
    }
}

/// Current time at the microsecond precision the store keeps.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

// ---------------------------------------------------------------------------
// Wait-for identifier
// ---------------------------------------------------------------------------

/// A key-based ordering channel: one record hash within a sink and submitter.
///
/// At most one tracker is the latest writer for a given `WaitFor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitFor {
    pub sink_id: i32,
    pub submitter: i32,
    pub hash: i32,
}

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

/// Stable 32-bit fingerprint of a match key.
///
/// Polynomial hash over UTF-16 code units with wrapping arithmetic, so the
/// value is the same in every process and across restarts.
pub fn match_key_hash(key: &str) -> i32 {
    key.encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(i32::from(unit)))
}

pub(crate) fn compute_hashes(match_keys: &BTreeSet<String>) -> Vec<i32> {
    let mut hashes: Vec<i32> = match_keys.iter().map(|k| match_key_hash(k)).collect();
    hashes.sort_unstable();
    hashes.dedup();
    hashes
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for a chunk registration. The service's public API for scheduling.
#[derive(Debug, Clone)]
pub struct NewTracker {
    pub(crate) key: TrackingKey,
    pub(crate) sink_id: i32,
    pub(crate) submitter: i32,
    pub(crate) match_keys: BTreeSet<String>,
    pub(crate) priority: i32,
}

impl NewTracker {
    pub fn new(key: TrackingKey, sink_id: i32) -> Self {
        Self {
            key,
            sink_id,
            submitter: 0,
            match_keys: BTreeSet::new(),
            priority: 0,
        }
    }

    pub fn submitter(mut self, submitter: i32) -> Self {
        self.submitter = submitter;
        self
    }

    pub fn match_key(mut self, key: impl Into<String>) -> Self {
        self.match_keys.insert(key.into());
        self
    }

    pub fn match_keys<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.match_keys.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn key(&self) -> TrackingKey {
        self.key
    }

    /// Materialize the tracker with an empty wait set.
    ///
    /// Registration decides the final wait set and status.
    pub fn build(self) -> DependencyTracking {
        DependencyTracking {
            key: self.key,
            sink_id: self.sink_id,
            submitter: self.submitter,
            status: SchedulingStatus::ReadyForProcessing,
            waiting_on: BTreeSet::new(),
            hashes: compute_hashes(&self.match_keys),
            match_keys: self.match_keys,
            priority: self.priority,
            retries: 0,
            last_modified: now(),
        }
    }
}
