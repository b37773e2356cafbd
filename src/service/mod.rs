//! Dependency tracking service.
//!
//! Ties the map, queries, aggregations and mutators together into the
//! scheduling protocol:
//!
//! 1. **Register**: find live trackers in the same sink and submitter that
//!    share a record hash with the new chunk, keep the latest holder per
//!    hash, and store the new tracker `BLOCKED` on them (or queued when
//!    there are none).
//! 2. **Complete**: drop the finished tracker, then strip its key from every
//!    dependent's wait set. Dependents whose set became empty are reported
//!    and pushed to the ready stream.
//!
//! Registration is a read-then-write sequence, not a transaction. Two
//! chunks racing on the same key may both depend on the same predecessor;
//! a predecessor that completes mid-registration is caught by re-checking
//! liveness after the write.

pub mod admin;
pub mod sink_status;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use opentelemetry::KeyValue;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::{Retention, ServiceConfig};
use crate::error::{Error, Result};
use crate::grid::TrackingMap;
use crate::model::{DependencyTracking, NewTracker, Phase, SchedulingStatus, TrackingKey};
use crate::processor::{RemoveWaitingOnProcessor, TransitionProcessor, UpdateStatusProcessor};
use crate::query::{ChunksToWaitFor, WaitingOn};
use crate::store::TrackingStore;
use crate::telemetry::{metrics, tracking};

pub use sink_status::SinkStatusBook;

pub struct DependencyTrackingService<S> {
    map: Arc<TrackingMap<S>>,
    config: ServiceConfig,
    sink_status: Arc<SinkStatusBook>,
    ready_tx: Option<mpsc::UnboundedSender<TrackingKey>>,
}

impl<S: TrackingStore> DependencyTrackingService<S> {
    pub fn new(store: Arc<S>, config: ServiceConfig) -> Self {
        let map = Arc::new(TrackingMap::new(store, config.partitions));
        let sink_status = Arc::new(SinkStatusBook::new());
        map.add_listener(sink_status.clone());
        Self {
            map,
            config,
            sink_status,
            ready_tx: None,
        }
    }

    /// Attach the outbound stream of keys that became `QUEUED_FOR_PROCESSING`.
    pub fn with_ready_stream(mut self) -> (Self, mpsc::UnboundedReceiver<TrackingKey>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.ready_tx = Some(tx);
        (self, rx)
    }

    pub fn map(&self) -> &Arc<TrackingMap<S>> {
        &self.map
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Warm the map from the store and rebuild the sink status book.
    pub async fn init(&self) -> Result<usize> {
        let loaded = self.map.load_all().await?;
        self.recount_sink_status(&BTreeSet::new()).await;
        info!(loaded, "dependency tracking initialized");
        Ok(loaded)
    }

    /// Register a chunk and compute what it has to wait for.
    ///
    /// A barrier match key becomes one of the chunk's own match keys, so
    /// the next chunk registered with the same barrier waits for this one.
    /// Registering a key that is still live returns the existing tracker,
    /// so a retried registration never gains new prerequisites.
    pub async fn register(
        &self,
        new: NewTracker,
        barrier_match_key: Option<&str>,
    ) -> Result<DependencyTracking> {
        let started = Instant::now();
        let span = tracking::start_registration_span(new.key(), new.sink_id);
        if let Some(existing) = self.map.get(new.key()).await.filter(|t| t.status.is_live()) {
            return self.reregister(existing).await;
        }
        let mut tracker = new.build();
        if let Some(barrier) = barrier_match_key {
            let mut match_keys = std::mem::take(&mut tracker.match_keys);
            match_keys.insert(barrier.to_string());
            tracker.set_match_keys(match_keys);
        }

        tracker.waiting_on = self.find_chunks_to_wait_for(&tracker, barrier_match_key).await;
        tracker.status = if !tracker.waiting_on.is_empty() {
            SchedulingStatus::Blocked
        } else if self.direct_submit(tracker.sink_id) {
            SchedulingStatus::QueuedForProcessing
        } else {
            SchedulingStatus::ReadyForProcessing
        };
        span.record("tracker.waiting_on", tracker.waiting_on.len());

        let key = tracker.key;
        self.map.set(tracker.clone()).await?;
        let tracker = self.remove_dead_prerequisites(tracker).await?;

        debug!(
            key = %key,
            sink_id = tracker.sink_id,
            status = %tracker.status,
            waiting_on = tracker.waiting_on.len(),
            "chunk registered"
        );
        if tracker.status == SchedulingStatus::QueuedForProcessing {
            self.notify_ready(key);
        }
        metrics::trackers_registered().add(
            1,
            &[
                KeyValue::new("status", tracker.status.to_string()),
                KeyValue::new("barrier", barrier_match_key.is_some().to_string()),
            ],
        );
        record_duration("register", started);
        Ok(tracker)
    }

    /// Candidate prerequisites for `tracker`, reduced to one per hash.
    pub async fn find_chunks_to_wait_for(
        &self,
        tracker: &DependencyTracking,
        barrier_match_key: Option<&str>,
    ) -> BTreeSet<TrackingKey> {
        if tracker.hashes.is_empty() && barrier_match_key.is_none() {
            return BTreeSet::new();
        }
        let query = ChunksToWaitFor::new(
            tracker.sink_id,
            tracker.submitter,
            &tracker.hashes,
            barrier_match_key,
        );
        let candidates: Vec<DependencyTracking> = self
            .map
            .values(&query)
            .await
            .into_iter()
            .filter(|c| c.key != tracker.key && !c.waiting_on.contains(&tracker.key))
            .collect();
        minimal_dependencies(&query.hashes, &candidates)
    }

    /// A chunk has been delivered: release everything waiting for it.
    ///
    /// Returns the keys that became `QUEUED_FOR_PROCESSING` because of this
    /// completion. Completing an unknown key still runs the cascade.
    pub async fn complete(&self, key: TrackingKey) -> Result<BTreeSet<TrackingKey>> {
        let started = Instant::now();
        let span = tracking::start_completion_span(key);

        let sink_id = match self.config.retention {
            Retention::Purge => self.map.remove(key).await?.map(|t| t.sink_id),
            Retention::Retain => {
                let sink_id = self.map.get(key).await.map(|t| t.sink_id);
                let processor = UpdateStatusProcessor::new(SchedulingStatus::Completed);
                self.map.execute_on_key(key, &processor).await?;
                sink_id
            }
        };
        if sink_id.is_none() {
            debug!(key = %key, "completed chunk was not tracked");
        }

        let unblocked = self.remove_from_waiting_on(key, sink_id).await?;
        for dependent in &unblocked {
            tracking::record_state_transition(
                &span,
                *dependent,
                SchedulingStatus::Blocked,
                SchedulingStatus::QueuedForProcessing,
            );
            self.notify_ready(*dependent);
        }
        span.record("tracker.unblocked", unblocked.len());
        if let Some(sink_id) = sink_id {
            metrics::chunks_unblocked()
                .add(unblocked.len() as u64, &[KeyValue::new("sink_id", i64::from(sink_id))]);
        }
        record_duration("complete", started);
        Ok(unblocked)
    }

    /// Strip `key` from every wait set holding it. Returns newly unblocked keys.
    pub async fn remove_from_waiting_on(
        &self,
        key: TrackingKey,
        sink_id: Option<i32>,
    ) -> Result<BTreeSet<TrackingKey>> {
        let processor = RemoveWaitingOnProcessor::new(key);
        let outcomes = self
            .map
            .execute_on_entries(&processor, &WaitingOn::new(sink_id, key))
            .await?;
        Ok(outcomes
            .into_iter()
            .filter(|(_, unblocked)| *unblocked)
            .map(|(k, _)| k)
            .collect())
    }

    /// Processing of a queued chunk finished; it now waits for delivery.
    ///
    /// The freed processing slot goes to the sink's ready chunks, if any
    /// are left over from bulk mode.
    pub async fn processing_done(&self, key: TrackingKey) -> Result<bool> {
        let moved = self
            .transition(
                key,
                SchedulingStatus::QueuedForProcessing,
                SchedulingStatus::ReadyForDelivery,
            )
            .await?;
        if moved {
            if let Some(tracker) = self.map.get(key).await {
                self.update_submit_mode(tracker.sink_id, Phase::Processing);
                if self.sink_status.get(tracker.sink_id).processing.ready > 0 {
                    self.bulk_schedule(tracker.sink_id, Phase::Processing).await?;
                }
            }
        }
        Ok(moved)
    }

    /// Move `key` from `from` to `to` if it is still in `from`.
    ///
    /// `BLOCKED` is owned by the wait-set mechanism and can't be entered or
    /// left this way.
    pub async fn transition(
        &self,
        key: TrackingKey,
        from: SchedulingStatus,
        to: SchedulingStatus,
    ) -> Result<bool> {
        if from == SchedulingStatus::Blocked || to == SchedulingStatus::Blocked {
            return Err(Error::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        let moved = self
            .map
            .execute_on_key(key, &TransitionProcessor { from, to })
            .await?
            .unwrap_or(false);
        if moved {
            if to == SchedulingStatus::QueuedForProcessing {
                self.notify_ready(key);
            }
        } else {
            info!(key = %key, from = %from, to = %to, "transition skipped, tracker not in expected status");
        }
        Ok(moved)
    }

    /// A live tracker keeps the wait set it was registered with; only
    /// prerequisites that have finished since are dropped.
    async fn reregister(&self, existing: DependencyTracking) -> Result<DependencyTracking> {
        let was_blocked = existing.status == SchedulingStatus::Blocked;
        let tracker = self.remove_dead_prerequisites(existing).await?;
        debug!(key = %tracker.key, status = %tracker.status, "chunk already registered");
        if was_blocked && tracker.status == SchedulingStatus::QueuedForProcessing {
            self.notify_ready(tracker.key);
        }
        Ok(tracker)
    }

    /// Drop prerequisites that are gone or completed since the query ran.
    async fn remove_dead_prerequisites(&self, tracker: DependencyTracking) -> Result<DependencyTracking> {
        if tracker.waiting_on.is_empty() {
            return Ok(tracker);
        }
        let prerequisites: Vec<TrackingKey> = tracker.waiting_on.iter().copied().collect();
        let live = self.map.get_all(&prerequisites).await;
        let dead: Vec<TrackingKey> = prerequisites
            .into_iter()
            .filter(|k| !live.get(k).is_some_and(|t| t.status.is_live()))
            .collect();
        if dead.is_empty() {
            return Ok(tracker);
        }
        for prerequisite in &dead {
            self.map
                .execute_on_key(tracker.key, &RemoveWaitingOnProcessor::new(*prerequisite))
                .await?;
        }
        debug!(key = %tracker.key, dead = dead.len(), "dropped finished prerequisites");
        Ok(self.map.get(tracker.key).await.unwrap_or(tracker))
    }

    fn direct_submit(&self, sink_id: i32) -> bool {
        self.update_submit_mode(sink_id, Phase::Processing);
        self.sink_status.get(sink_id).processing.is_direct_submit()
    }

    fn notify_ready(&self, key: TrackingKey) {
        if let Some(tx) = &self.ready_tx {
            if tx.send(key).is_err() {
                warn!(key = %key, "ready stream closed, dropping notification");
            }
        }
    }
}

/// Reduce candidate prerequisites to a minimal set.
///
/// Keeps only the latest (greatest key) candidate per searched hash, then
/// drops any kept candidate another kept candidate already waits for.
pub fn minimal_dependencies(hashes: &[i32], candidates: &[DependencyTracking]) -> BTreeSet<TrackingKey> {
    let mut latest: BTreeMap<i32, &DependencyTracking> = BTreeMap::new();
    for candidate in candidates {
        for hash in hashes.iter().filter(|h| candidate.has_hash(**h)) {
            latest
                .entry(*hash)
                .and_modify(|current| {
                    if candidate.key > current.key {
                        *current = candidate;
                    }
                })
                .or_insert(candidate);
        }
    }
    let chosen: BTreeMap<TrackingKey, &DependencyTracking> =
        latest.into_values().map(|t| (t.key, t)).collect();
    let covered: BTreeSet<TrackingKey> = chosen
        .values()
        .flat_map(|t| t.waiting_on.iter().copied())
        .collect();
    chosen
        .into_keys()
        .filter(|k| !covered.contains(k))
        .collect()
}

fn record_duration(operation: &'static str, started: Instant) {
    metrics::operation_duration_ms().record(
        started.elapsed().as_secs_f64() * 1000.0,
        &[KeyValue::new("operation", operation)],
    );
}
