//! Aggregation primitives.
//!
//! Each aggregator is built empty, accumulates the entries of one partition,
//! is combined with the other partitions' partials, and is finalized into
//! its result. Only the reduced value crosses partitions.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::grid::Aggregator;
use crate::model::{DependencyTracking, SchedulingStatus, SinkStatus, TrackingKey, WaitFor};

/// Distinct sinks with tracked chunks.
///
/// With a status filter, only sinks holding a tracker in that status count.
/// Without one, retained `COMPLETED` trackers are ignored.
#[derive(Debug, Clone, Default)]
pub struct ActiveSinks {
    status: Option<SchedulingStatus>,
    sinks: BTreeSet<i32>,
}

impl ActiveSinks {
    pub fn new(status: Option<SchedulingStatus>) -> Self {
        Self {
            status,
            sinks: BTreeSet::new(),
        }
    }
}

impl Aggregator for ActiveSinks {
    type Output = BTreeSet<i32>;

    fn accumulate(&mut self, _key: &TrackingKey, tracker: &DependencyTracking) {
        let counts = match self.status {
            Some(status) => tracker.status == status,
            None => tracker.status.is_live(),
        };
        if counts {
            self.sinks.insert(tracker.sink_id);
        }
    }

    fn combine(&mut self, other: Self) {
        self.sinks.extend(other.sinks);
    }

    fn finalize(self) -> BTreeSet<i32> {
        self.sinks
    }
}

/// Jobs and chunks in flight for one sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCount {
    pub jobs: usize,
    pub chunks: usize,
}

#[derive(Debug, Clone)]
pub struct JobCounter {
    sink_id: i32,
    jobs: BTreeSet<i32>,
    chunks: usize,
}

impl JobCounter {
    pub fn new(sink_id: i32) -> Self {
        Self {
            sink_id,
            jobs: BTreeSet::new(),
            chunks: 0,
        }
    }
}

impl Aggregator for JobCounter {
    type Output = JobCount;

    fn accumulate(&mut self, key: &TrackingKey, tracker: &DependencyTracking) {
        if tracker.sink_id == self.sink_id && tracker.status.is_live() {
            self.jobs.insert(key.job_id);
            self.chunks += 1;
        }
    }

    fn combine(&mut self, other: Self) {
        self.jobs.extend(other.jobs);
        self.chunks += other.chunks;
    }

    fn finalize(self) -> JobCount {
        JobCount {
            jobs: self.jobs.len(),
            chunks: self.chunks,
        }
    }
}

/// Latest live tracker per `(sink, submitter, hash)`.
///
/// "Latest" is the greatest key, so ties between partitions resolve the
/// same way whichever partial is combined first.
#[derive(Debug, Clone, Default)]
pub struct LastTrackerMap {
    latest: HashMap<WaitFor, TrackingKey>,
}

impl LastTrackerMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn offer(&mut self, wait_for: WaitFor, key: TrackingKey) {
        self.latest
            .entry(wait_for)
            .and_modify(|current| {
                if key > *current {
                    *current = key;
                }
            })
            .or_insert(key);
    }
}

impl Aggregator for LastTrackerMap {
    type Output = HashMap<WaitFor, TrackingKey>;

    fn accumulate(&mut self, key: &TrackingKey, tracker: &DependencyTracking) {
        if !tracker.status.is_live() {
            return;
        }
        for hash in &tracker.hashes {
            let wait_for = WaitFor {
                sink_id: tracker.sink_id,
                submitter: tracker.submitter,
                hash: *hash,
            };
            self.offer(wait_for, *key);
        }
    }

    fn combine(&mut self, other: Self) {
        for (wait_for, key) in other.latest {
            self.offer(wait_for, key);
        }
    }

    fn finalize(self) -> HashMap<WaitFor, TrackingKey> {
        self.latest
    }
}

/// Per-sink status counts, for the given sinks or all when empty.
///
/// Submit modes in the result are defaults; callers own mode decisions.
#[derive(Debug, Clone, Default)]
pub struct StatusCounter {
    sinks: BTreeSet<i32>,
    counts: BTreeMap<i32, SinkStatus>,
}

impl StatusCounter {
    pub fn new(sinks: BTreeSet<i32>) -> Self {
        Self {
            sinks,
            counts: BTreeMap::new(),
        }
    }
}

impl Aggregator for StatusCounter {
    type Output = BTreeMap<i32, SinkStatus>;

    fn accumulate(&mut self, _key: &TrackingKey, tracker: &DependencyTracking) {
        if self.sinks.is_empty() || self.sinks.contains(&tracker.sink_id) {
            self.counts
                .entry(tracker.sink_id)
                .or_default()
                .count(tracker.status);
        }
    }

    fn combine(&mut self, other: Self) {
        for (sink, status) in other.counts {
            self.counts.entry(sink).or_default().merge_counts(&status);
        }
    }

    fn finalize(self) -> BTreeMap<i32, SinkStatus> {
        self.counts
    }
}

/// Number of trackers in one sink with one status.
#[derive(Debug, Clone)]
pub struct SinkStatusCounter {
    sink_id: i32,
    status: SchedulingStatus,
    count: usize,
}

impl SinkStatusCounter {
    pub fn new(sink_id: i32, status: SchedulingStatus) -> Self {
        Self {
            sink_id,
            status,
            count: 0,
        }
    }
}

impl Aggregator for SinkStatusCounter {
    type Output = usize;

    fn accumulate(&mut self, _key: &TrackingKey, tracker: &DependencyTracking) {
        if tracker.sink_id == self.sink_id && tracker.status == self.status {
            self.count += 1;
        }
    }

    fn combine(&mut self, other: Self) {
        self.count += other.count;
    }

    fn finalize(self) -> usize {
        self.count
    }
}

/// Trackers with one status, counted per sink.
#[derive(Debug, Clone)]
pub struct BlockedCounter {
    status: SchedulingStatus,
    counts: BTreeMap<i32, usize>,
}

impl BlockedCounter {
    pub fn new(status: SchedulingStatus) -> Self {
        Self {
            status,
            counts: BTreeMap::new(),
        }
    }
}

impl Aggregator for BlockedCounter {
    type Output = BTreeMap<i32, usize>;

    fn accumulate(&mut self, _key: &TrackingKey, tracker: &DependencyTracking) {
        if tracker.status == self.status {
            *self.counts.entry(tracker.sink_id).or_default() += 1;
        }
    }

    fn combine(&mut self, other: Self) {
        for (sink, count) in other.counts {
            *self.counts.entry(sink).or_default() += count;
        }
    }

    fn finalize(self) -> BTreeMap<i32, usize> {
        self.counts
    }
}
