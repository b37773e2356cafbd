//! Partitioned tracking map.
//!
//! A `TrackingKey -> DependencyTracking` map split into hash partitions.
//! Each partition owns its entries behind its own lock; every mutation is
//! written through to the [`TrackingStore`] while that lock is held and only
//! then applied in memory, so a failed write leaves the map untouched.
//!
//! Queries and aggregations visit every partition (scatter) and merge the
//! per-partition results (gather). Entry processors run on the partition
//! owning their key. There is no cross-partition transaction: a query result
//! is a snapshot that may be stale by the time the caller acts on it.

mod partition;
pub mod primitives;

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};

use chrono::Utc;
use tracing::info;

use crate::error::Result;
use crate::event::{Event, EventKind, MapListener};
use crate::model::{DependencyTracking, TrackingKey};
use crate::store::TrackingStore;

use partition::{Entries, Partition};
pub use partition::Partitioner;
pub use primitives::{Aggregator, AllEntries, EntryProcessor, Predicate};

pub struct TrackingMap<S> {
    store: Arc<S>,
    partitioner: Partitioner,
    partitions: Vec<Partition>,
    listeners: StdRwLock<Vec<Arc<dyn MapListener>>>,
    seq: AtomicU64,
}

impl<S: TrackingStore> TrackingMap<S> {
    pub fn new(store: Arc<S>, partition_count: usize) -> Self {
        let partitioner = Partitioner::new(partition_count);
        let partitions = (0..partitioner.count())
            .map(|_| Partition::default())
            .collect();
        Self {
            store,
            partitioner,
            partitions,
            listeners: StdRwLock::new(Vec::new()),
            seq: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn partitioner(&self) -> Partitioner {
        self.partitioner
    }

    pub fn add_listener(&self, listener: Arc<dyn MapListener>) {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.push(listener);
        }
    }

    // -----------------------------------------------------------------------
    // Point access
    // -----------------------------------------------------------------------

    pub async fn get(&self, key: TrackingKey) -> Option<DependencyTracking> {
        self.partition(&key).entries.read().await.get(&key).cloned()
    }

    pub async fn contains_key(&self, key: TrackingKey) -> bool {
        self.partition(&key).entries.read().await.contains_key(&key)
    }

    /// Fetch many keys, visiting each owning partition once.
    pub async fn get_all(&self, keys: &[TrackingKey]) -> BTreeMap<TrackingKey, DependencyTracking> {
        let mut found = BTreeMap::new();
        for (idx, wanted) in self.group_by_partition(keys) {
            let entries = self.partitions[idx].entries.read().await;
            for key in wanted {
                if let Some(tracker) = entries.get(&key) {
                    found.insert(key, tracker.clone());
                }
            }
        }
        found
    }

    pub async fn len(&self) -> usize {
        let mut total = 0;
        for partition in &self.partitions {
            total += partition.entries.read().await.len();
        }
        total
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    // -----------------------------------------------------------------------
    // Write-through mutation
    // -----------------------------------------------------------------------

    /// Insert or replace a tracker.
    pub async fn set(&self, tracker: DependencyTracking) -> Result<()> {
        let mut entries = self.partition(&tracker.key).entries.write().await;
        self.store.store(&tracker).await?;
        let old = entries.insert(tracker.key, tracker.clone());
        self.emit_change(old.as_ref(), Some(&tracker));
        Ok(())
    }

    /// Insert or replace a batch of trackers with a single store write.
    pub async fn set_all(&self, trackers: Vec<DependencyTracking>) -> Result<()> {
        if trackers.is_empty() {
            return Ok(());
        }
        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (i, tracker) in trackers.iter().enumerate() {
            groups
                .entry(self.partitioner.partition_for(&tracker.key))
                .or_default()
                .push(i);
        }
        // Lock partitions in ascending order.
        let mut guards = Vec::with_capacity(groups.len());
        for idx in groups.keys() {
            guards.push(self.partitions[*idx].entries.write().await);
        }
        self.store.store_all(&trackers).await?;
        for (members, entries) in groups.values().zip(guards.iter_mut()) {
            for &i in members {
                let tracker = &trackers[i];
                let old = entries.insert(tracker.key, tracker.clone());
                self.emit_change(old.as_ref(), Some(tracker));
            }
        }
        Ok(())
    }

    /// Delete a tracker from the store and the map.
    pub async fn remove(&self, key: TrackingKey) -> Result<Option<DependencyTracking>> {
        let mut entries = self.partition(&key).entries.write().await;
        self.store.delete(key).await?;
        let old = entries.remove(&key);
        self.emit_change(old.as_ref(), None);
        Ok(old)
    }

    /// Delete every tracker matching `predicate`. Returns the removed keys, ordered.
    pub async fn remove_where<Q: Predicate>(&self, predicate: &Q) -> Result<Vec<TrackingKey>> {
        let mut removed = Vec::new();
        for partition in &self.partitions {
            let mut entries = partition.entries.write().await;
            let doomed: Vec<TrackingKey> = entries
                .iter()
                .filter(|(k, t)| predicate.test(k, t))
                .map(|(k, _)| *k)
                .collect();
            if doomed.is_empty() {
                continue;
            }
            self.store.delete_all(&doomed).await?;
            for key in &doomed {
                let old = entries.remove(key);
                self.emit_change(old.as_ref(), None);
            }
            removed.extend(doomed);
        }
        removed.sort();
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Scatter-gather reads
    // -----------------------------------------------------------------------

    /// Trackers matching `predicate`, ordered by key.
    pub async fn values<Q: Predicate>(&self, predicate: &Q) -> Vec<DependencyTracking> {
        let mut matched = Vec::new();
        for partition in &self.partitions {
            let entries = partition.entries.read().await;
            matched.extend(
                entries
                    .iter()
                    .filter(|(k, t)| predicate.test(k, t))
                    .map(|(_, t)| t.clone()),
            );
        }
        matched.sort_by_key(|t| t.key);
        matched
    }

    /// Keys of trackers matching `predicate`, ordered.
    pub async fn keys<Q: Predicate>(&self, predicate: &Q) -> Vec<TrackingKey> {
        let mut matched = Vec::new();
        for partition in &self.partitions {
            let entries = partition.entries.read().await;
            matched.extend(
                entries
                    .iter()
                    .filter(|(k, t)| predicate.test(k, t))
                    .map(|(k, _)| *k),
            );
        }
        matched.sort();
        matched
    }

    /// Run an aggregation: accumulate per partition, combine, finalize.
    pub async fn aggregate<A: Aggregator>(&self, prototype: A) -> A::Output {
        let mut total = prototype.clone();
        for partition in &self.partitions {
            let mut partial = prototype.clone();
            {
                let entries = partition.entries.read().await;
                for (key, tracker) in entries.iter() {
                    partial.accumulate(key, tracker);
                }
            }
            total.combine(partial);
        }
        total.finalize()
    }

    // -----------------------------------------------------------------------
    // Entry processors
    // -----------------------------------------------------------------------

    /// Run `processor` against `key` on its owning partition.
    ///
    /// A missing key is not an error: the result is `None`.
    pub async fn execute_on_key<P: EntryProcessor>(
        &self,
        key: TrackingKey,
        processor: &P,
    ) -> Result<Option<P::Output>> {
        let mut entries = self.partition(&key).entries.write().await;
        let mut updated = match entries.get(&key) {
            Some(tracker) => tracker.clone(),
            None => return Ok(None),
        };
        let output = processor.process(&mut updated);
        let changed = entries.get(&key).is_some_and(|current| *current != updated);
        if changed {
            updated.touch();
            self.store.store(&updated).await?;
            let old = entries.insert(key, updated.clone());
            self.emit_change(old.as_ref(), Some(&updated));
        }
        Ok(Some(output))
    }

    /// Run `processor` against each existing key among `keys`.
    pub async fn execute_on_keys<P: EntryProcessor>(
        &self,
        keys: &[TrackingKey],
        processor: &P,
    ) -> Result<BTreeMap<TrackingKey, P::Output>> {
        let mut outputs = BTreeMap::new();
        for (idx, wanted) in self.group_by_partition(keys) {
            let wanted: HashSet<TrackingKey> = wanted.into_iter().collect();
            let results = self
                .process_partition(idx, |k, _| wanted.contains(k), processor)
                .await?;
            outputs.extend(results);
        }
        Ok(outputs)
    }

    /// Run `processor` against every entry matching `predicate`, partition by
    /// partition. Each partition's changes are written as one batch.
    pub async fn execute_on_entries<P, Q>(
        &self,
        processor: &P,
        predicate: &Q,
    ) -> Result<BTreeMap<TrackingKey, P::Output>>
    where
        P: EntryProcessor,
        Q: Predicate,
    {
        let mut outputs = BTreeMap::new();
        for idx in 0..self.partitions.len() {
            let results = self
                .process_partition(idx, |k, t| predicate.test(k, t), processor)
                .await?;
            outputs.extend(results);
        }
        Ok(outputs)
    }

    async fn process_partition<P, F>(
        &self,
        idx: usize,
        select: F,
        processor: &P,
    ) -> Result<Vec<(TrackingKey, P::Output)>>
    where
        P: EntryProcessor,
        F: Fn(&TrackingKey, &DependencyTracking) -> bool + Send,
    {
        let mut entries = self.partitions[idx].entries.write().await;
        let mut outputs = Vec::new();
        let mut changed = Vec::new();
        for (key, tracker) in entries.iter() {
            if !select(key, tracker) {
                continue;
            }
            let mut updated = tracker.clone();
            let output = processor.process(&mut updated);
            if updated != *tracker {
                updated.touch();
                changed.push(updated);
            }
            outputs.push((*key, output));
        }
        if !changed.is_empty() {
            self.store.store_all(&changed).await?;
            for tracker in changed {
                let old = entries.insert(tracker.key, tracker.clone());
                self.emit_change(old.as_ref(), Some(&tracker));
            }
        }
        Ok(outputs)
    }

    // -----------------------------------------------------------------------
    // Warm-up
    // -----------------------------------------------------------------------

    /// Replace the in-memory contents with everything in the store.
    ///
    /// Every partition stays write-locked from before the store is read
    /// until the new contents are installed, so no read sees a half-loaded
    /// map and no write lands between the load and the swap. Nothing is
    /// written back. Returns the number of trackers loaded.
    pub async fn load_all(&self) -> Result<usize> {
        let mut guards = Vec::with_capacity(self.partitions.len());
        for partition in &self.partitions {
            guards.push(partition.entries.write().await);
        }
        let keys = self.store.load_all_keys().await?;
        let trackers = self.store.load_all(&keys).await?;

        let mut loaded: Vec<Entries> = vec![Entries::new(); self.partitions.len()];
        let count = trackers.len();
        for tracker in trackers {
            loaded[self.partitioner.partition_for(&tracker.key)].insert(tracker.key, tracker);
        }
        for (entries, fresh) in guards.iter_mut().zip(loaded) {
            **entries = fresh;
        }
        info!(loaded = count, partitions = self.partitions.len(), "tracking map loaded from store");
        Ok(count)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn partition(&self, key: &TrackingKey) -> &Partition {
        &self.partitions[self.partitioner.partition_for(key)]
    }

    fn group_by_partition(&self, keys: &[TrackingKey]) -> BTreeMap<usize, Vec<TrackingKey>> {
        let mut groups: BTreeMap<usize, Vec<TrackingKey>> = BTreeMap::new();
        for key in keys {
            groups
                .entry(self.partitioner.partition_for(key))
                .or_default()
                .push(*key);
        }
        groups
    }

    fn emit_change(&self, old: Option<&DependencyTracking>, new: Option<&DependencyTracking>) {
        let kind = match (old, new) {
            (None, Some(t)) => EventKind::TrackerAdded {
                key: t.key,
                sink_id: t.sink_id,
                status: t.status,
            },
            (Some(o), Some(t)) => EventKind::TrackerUpdated {
                key: t.key,
                sink_id: t.sink_id,
                from: o.status,
                to: t.status,
            },
            (Some(o), None) => EventKind::TrackerRemoved {
                key: o.key,
                sink_id: o.sink_id,
                status: o.status,
            },
            (None, None) => return,
        };
        let event = Event {
            seq: self.seq.fetch_add(1, Ordering::SeqCst) + 1,
            timestamp: Utc::now(),
            kind,
        };
        if let Ok(listeners) = self.listeners.read() {
            for listener in listeners.iter() {
                listener.on_event(&event);
            }
        }
    }
}
