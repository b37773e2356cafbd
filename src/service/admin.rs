//! Lookups, operator overrides and monitoring on the tracking service.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::{Duration, Utc};
use tracing::{info, warn};

use super::DependencyTrackingService;
use crate::aggregate::{
    ActiveSinks, BlockedCounter, JobCount, JobCounter, LastTrackerMap, SinkStatusCounter,
    StatusCounter,
};
use crate::error::{Error, Result};
use crate::model::{
    DependencyTracking, Phase, QueueSubmitMode, SchedulingStatus, SinkStatus, TrackingKey, WaitFor,
};
use crate::processor::{
    RemoveWaitingOnProcessor, ResendProcessor, UpdatePriorityProcessor, UpdateStatusProcessor,
};
use crate::query::{
    ByJobId, ByStatusAndSinkId, JobChunksWaitForKey, StaleByStatus, StatusInJobs, WaitForKey,
    WaitingOn,
};
use crate::store::TrackingStore;

impl<S: TrackingStore> DependencyTrackingService<S> {
    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    pub async fn get(&self, key: TrackingKey) -> Option<DependencyTracking> {
        self.map.get(key).await
    }

    /// Like [`get`](Self::get), but a missing tracker is an error.
    pub async fn require(&self, key: TrackingKey) -> Result<DependencyTracking> {
        self.map
            .get(key)
            .await
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    pub async fn is_scheduled(&self, key: TrackingKey) -> bool {
        self.map.contains_key(key).await
    }

    /// Every tracker of one job, ordered by chunk.
    pub async fn snapshot(&self, job_id: i32) -> Vec<DependencyTracking> {
        self.map.values(&ByJobId { job_id }).await
    }

    /// Keys in `status`, most urgent first, then by key.
    pub async fn find(
        &self,
        status: SchedulingStatus,
        sink_id: Option<i32>,
        limit: Option<usize>,
    ) -> Vec<TrackingKey> {
        let mut found = self.map.values(&ByStatusAndSinkId::new(sink_id, status)).await;
        found.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.key.cmp(&b.key)));
        found
            .into_iter()
            .take(limit.unwrap_or(usize::MAX))
            .map(|t| t.key)
            .collect()
    }

    /// Dependents of `key` in `sink_id`, ordered.
    pub async fn find_chunks_waiting_for(&self, key: TrackingKey, sink_id: i32) -> Vec<TrackingKey> {
        self.map.keys(&WaitingOn::new(Some(sink_id), key)).await
    }

    /// Live chunks a job barrier has to wait for: the job's own chunks and
    /// anything sharing one of `match_keys`.
    pub async fn find_job_barrier(
        &self,
        sink_id: i32,
        job_id: i32,
        match_keys: BTreeSet<String>,
    ) -> Vec<TrackingKey> {
        let query = JobChunksWaitForKey {
            sink_id,
            job_id,
            match_keys,
        };
        self.map.keys(&query).await
    }

    /// Live chunks from `submitter` holding the first of `match_keys`.
    pub async fn find_wait_for_key(
        &self,
        sink_id: i32,
        submitter: i32,
        match_keys: BTreeSet<String>,
    ) -> Vec<TrackingKey> {
        let query = WaitForKey {
            sink_id,
            submitter,
            match_keys,
        };
        self.map.keys(&query).await
    }

    /// Trackers left in `status` for longer than `timeout`.
    pub async fn stale(&self, status: SchedulingStatus, timeout: Duration) -> Vec<DependencyTracking> {
        let query = StaleByStatus {
            status,
            older_than: Utc::now() - timeout,
        };
        self.map.values(&query).await
    }

    // -----------------------------------------------------------------------
    // Overrides
    // -----------------------------------------------------------------------

    /// Force a status. Returns whether it changed; unknown keys are ignored.
    pub async fn set_status(&self, key: TrackingKey, status: SchedulingStatus) -> Result<bool> {
        let before = self.map.get(key).await.map(|t| t.status);
        let changed = self
            .map
            .execute_on_key(key, &UpdateStatusProcessor::new(status))
            .await?
            .unwrap_or(false);
        if changed {
            info!(key = %key, from = ?before, to = %status, "status forced");
            if status == SchedulingStatus::QueuedForProcessing {
                self.notify_ready(key);
            }
        }
        Ok(changed)
    }

    /// Force every tracker of `job_ids` in `from` to `to`. Returns how many
    /// were found in `from`.
    pub async fn reset_status(
        &self,
        from: SchedulingStatus,
        to: SchedulingStatus,
        job_ids: &[i32],
    ) -> Result<usize> {
        if from == SchedulingStatus::Blocked || to == SchedulingStatus::Blocked {
            return Err(Error::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        let query = StatusInJobs {
            status: from,
            job_ids: job_ids.iter().copied().collect(),
        };
        let keys = self.map.keys(&query).await;
        for key in &keys {
            self.set_status(*key, to).await?;
        }
        info!(jobs = ?job_ids, from = %from, to = %to, count = keys.len(), "status reset");
        Ok(keys.len())
    }

    /// Send a queued chunk again. Returns its retry count, `None` if unknown.
    pub async fn resend(&self, key: TrackingKey) -> Result<Option<i32>> {
        self.map.execute_on_key(key, &ResendProcessor).await
    }

    /// Raise the priority of `keys` and, transitively, of everything they
    /// wait for. Returns the number of trackers raised.
    pub async fn boost_priorities(&self, keys: &[TrackingKey], priority: i32) -> Result<usize> {
        let processor = UpdatePriorityProcessor { priority };
        let mut visited: HashSet<TrackingKey> = keys.iter().copied().collect();
        let mut pending: Vec<TrackingKey> = keys.to_vec();
        let mut boosted = 0;
        while !pending.is_empty() {
            let outcomes = self.map.execute_on_keys(&pending, &processor).await?;
            pending.clear();
            for prerequisites in outcomes.into_values().flatten() {
                boosted += 1;
                for prerequisite in prerequisites {
                    if visited.insert(prerequisite) {
                        pending.push(prerequisite);
                    }
                }
            }
        }
        Ok(boosted)
    }

    pub async fn remove(&self, key: TrackingKey) -> Result<Option<DependencyTracking>> {
        self.map.remove(key).await
    }

    /// Drop every tracker of a job. Dependents are left for [`recheck_blocks`](Self::recheck_blocks).
    pub async fn remove_job(&self, job_id: i32) -> Result<Vec<TrackingKey>> {
        let removed = self.map.remove_where(&ByJobId { job_id }).await?;
        info!(job_id, removed = removed.len(), "job removed from tracking");
        Ok(removed)
    }

    /// Repair blocked trackers whose prerequisites no longer exist.
    ///
    /// Returns the repaired keys; those left with nothing to wait for are
    /// queued and pushed to the ready stream.
    pub async fn recheck_blocks(&self) -> Result<BTreeSet<TrackingKey>> {
        let blocked = self
            .map
            .values(&ByStatusAndSinkId::new(None, SchedulingStatus::Blocked))
            .await;
        let prerequisites: Vec<TrackingKey> = blocked
            .iter()
            .flat_map(|t| t.waiting_on.iter().copied())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let live = self.map.get_all(&prerequisites).await;
        let is_live = |k: &TrackingKey| live.get(k).is_some_and(|t| t.status.is_live());

        let mut repaired = BTreeSet::new();
        for tracker in &blocked {
            for dead in tracker.waiting_on.iter().filter(|k| !is_live(k)) {
                let unblocked = self
                    .map
                    .execute_on_key(tracker.key, &RemoveWaitingOnProcessor::new(*dead))
                    .await?;
                repaired.insert(tracker.key);
                if unblocked == Some(true) {
                    self.notify_ready(tracker.key);
                }
            }
        }
        if !repaired.is_empty() {
            warn!(repaired = repaired.len(), "blocked trackers had vanished prerequisites");
        }
        Ok(repaired)
    }

    /// Delete retained `COMPLETED` trackers.
    pub async fn purge_completed(&self) -> Result<Vec<TrackingKey>> {
        let query = ByStatusAndSinkId::new(None, SchedulingStatus::Completed);
        let purged = self.map.remove_where(&query).await?;
        info!(purged = purged.len(), "completed trackers purged");
        Ok(purged)
    }

    /// Drop the in-memory map and rebuild it from the store.
    ///
    /// The map is swapped in one step, so concurrent registrations see
    /// either the old or the reloaded trackers, never an empty map.
    pub async fn clear_cache(&self) -> Result<usize> {
        self.init().await
    }

    // -----------------------------------------------------------------------
    // Monitoring
    // -----------------------------------------------------------------------

    pub async fn active_sinks(&self, status: Option<SchedulingStatus>) -> BTreeSet<i32> {
        self.map.aggregate(ActiveSinks::new(status)).await
    }

    pub async fn job_count(&self, sink_id: i32) -> JobCount {
        self.map.aggregate(JobCounter::new(sink_id)).await
    }

    pub async fn status_count(&self, sink_id: i32, status: SchedulingStatus) -> usize {
        self.map.aggregate(SinkStatusCounter::new(sink_id, status)).await
    }

    /// Status counts for `sinks`, or every sink when empty.
    pub async fn status_counts(&self, sinks: &BTreeSet<i32>) -> BTreeMap<i32, SinkStatus> {
        self.map.aggregate(StatusCounter::new(sinks.clone())).await
    }

    /// Trackers in `status`, counted per sink.
    pub async fn sink_status_count(&self, status: SchedulingStatus) -> BTreeMap<i32, usize> {
        self.map.aggregate(BlockedCounter::new(status)).await
    }

    pub async fn last_tracker_map(&self) -> HashMap<WaitFor, TrackingKey> {
        self.map.aggregate(LastTrackerMap::new()).await
    }

    // -----------------------------------------------------------------------
    // Sink submit modes
    // -----------------------------------------------------------------------

    pub fn sink_status(&self, sink_id: i32) -> SinkStatus {
        self.sink_status.get(sink_id)
    }

    pub fn sink_status_map(&self) -> BTreeMap<i32, SinkStatus> {
        self.sink_status.snapshot()
    }

    pub fn force_mode(&self, sink_id: i32, phase: Phase, mode: QueueSubmitMode) {
        self.sink_status
            .with_sink(sink_id, |status| status.queue_mut(phase).set_mode(mode));
        info!(sink_id, ?phase, ?mode, "submit mode forced");
    }

    /// Apply the bulk/direct thresholds to one queue. Returns true if the
    /// mode changed.
    pub fn update_submit_mode(&self, sink_id: i32, phase: Phase) -> bool {
        let max = self.config.max_enqueued_per_sink;
        let mark = self.config.transition_to_direct_mark;
        let changed = self.sink_status.with_sink(sink_id, |status| {
            status.queue_mut(phase).update_mode(max, mark, Utc::now())
        });
        if changed {
            let mode = self.sink_status.get(sink_id).queue(phase).mode;
            info!(sink_id, ?phase, ?mode, "submit mode changed");
        }
        changed
    }

    /// Move ready chunks of one sink into its `phase` queue, up to the
    /// queue's free space, most urgent first.
    ///
    /// Chunks moved to `QUEUED_FOR_PROCESSING` are sent on the ready
    /// stream. Returns the moved keys.
    pub async fn bulk_schedule(&self, sink_id: i32, phase: Phase) -> Result<Vec<TrackingKey>> {
        let (ready, queued) = match phase {
            Phase::Processing => (
                SchedulingStatus::ReadyForProcessing,
                SchedulingStatus::QueuedForProcessing,
            ),
            Phase::Delivering => (
                SchedulingStatus::ReadyForDelivery,
                SchedulingStatus::QueuedForDelivery,
            ),
        };
        let enqueued = self.sink_status.get(sink_id).queue(phase).enqueued;
        let space = self.config.max_enqueued_per_sink.saturating_sub(enqueued);
        if space == 0 {
            return Ok(Vec::new());
        }

        let mut scheduled = Vec::new();
        for key in self.find(ready, Some(sink_id), Some(space)).await {
            if self.transition(key, ready, queued).await? {
                scheduled.push(key);
            }
        }
        if !scheduled.is_empty() {
            info!(sink_id, ?phase, enqueued, scheduled = scheduled.len(), "bulk scheduled");
        }
        Ok(scheduled)
    }

    /// Rebuild sink status from the map for `sinks` (all when empty).
    ///
    /// Every recounted queue starts in bulk mode until the thresholds move
    /// it back to direct.
    pub async fn recount_sink_status(&self, sinks: &BTreeSet<i32>) {
        let mut counts = self.status_counts(sinks).await;
        for status in counts.values_mut() {
            status.processing.set_mode(QueueSubmitMode::Bulk);
            status.delivering.set_mode(QueueSubmitMode::Bulk);
        }
        if sinks.is_empty() {
            self.sink_status.replace(counts, None);
        } else {
            let listed: Vec<i32> = sinks.iter().copied().collect();
            self.sink_status.replace(counts, Some(&listed));
        }
    }
}
