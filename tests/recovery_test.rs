//! Write-through persistence and rebuilding the map from the store.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chunk_tracker::config::ServiceConfig;
use chunk_tracker::error::{Error, Result};
use chunk_tracker::grid::AllEntries;
use chunk_tracker::model::{DependencyTracking, NewTracker, SchedulingStatus, TrackingKey};
use chunk_tracker::service::DependencyTrackingService;
use chunk_tracker::store::{MemoryStore, TrackingStore};
use tokio::sync::{Notify, Semaphore};

fn config(partitions: usize) -> ServiceConfig {
    ServiceConfig {
        partitions,
        ..ServiceConfig::default()
    }
}

#[tokio::test]
async fn restart_reconstructs_identical_map() {
    let store = Arc::new(MemoryStore::new());
    let before = DependencyTrackingService::new(Arc::clone(&store), config(4));
    for job in 1..=5 {
        for chunk in 0..6 {
            let key = TrackingKey::new(job, chunk);
            let new = NewTracker::new(key, job % 2)
                .match_key(format!("rec-{}", chunk % 3))
                .priority(chunk);
            before.register(new, None).await.unwrap();
        }
    }
    before.complete(TrackingKey::new(1, 0)).await.unwrap();
    let expected = before.map().values(&AllEntries).await;
    assert_eq!(expected.len(), 29);
    assert_eq!(store.len(), 29);

    // different partition count on the way back up
    let after = DependencyTrackingService::new(Arc::clone(&store), config(7));
    let loaded = after.init().await.unwrap();
    assert_eq!(loaded, 29);
    assert_eq!(after.map().values(&AllEntries).await, expected);

    // sink status is rebuilt from the loaded trackers
    let blocked: usize = after.sink_status_map().values().map(|s| s.blocked).sum();
    let expected_blocked = expected
        .iter()
        .filter(|t| t.status == SchedulingStatus::Blocked)
        .count();
    assert_eq!(blocked, expected_blocked);
}

#[tokio::test]
async fn store_rows_are_loaded_as_written() {
    let mut blocked = NewTracker::new(TrackingKey::new(3, 1), 2)
        .match_keys(["a", "b"])
        .build();
    blocked.waiting_on.insert(TrackingKey::new(3, 0));
    blocked.status = SchedulingStatus::Blocked;
    let ready = NewTracker::new(TrackingKey::new(3, 0), 2).match_key("a").build();
    let store = Arc::new(MemoryStore::with_rows([blocked.clone(), ready.clone()]));

    let service = DependencyTrackingService::new(store, config(2));
    assert_eq!(service.init().await.unwrap(), 2);
    assert_eq!(service.get(blocked.key).await, Some(blocked));
    assert_eq!(service.get(ready.key).await, Some(ready));
}

#[tokio::test]
async fn failed_store_write_leaves_map_untouched() {
    let store = Arc::new(MemoryStore::new());
    let service = DependencyTrackingService::new(Arc::clone(&store), config(4));
    let t1 = TrackingKey::new(1, 0);
    let t2 = TrackingKey::new(2, 0);
    service
        .register(NewTracker::new(t1, 0).match_key("k"), None)
        .await
        .unwrap();
    service
        .register(NewTracker::new(t2, 0).match_key("k"), None)
        .await
        .unwrap();
    let snapshot = service.map().values(&AllEntries).await;

    store.fail_writes(true);
    let err = service
        .register(NewTracker::new(TrackingKey::new(3, 0), 0).match_key("k"), None)
        .await;
    assert!(err.is_err());
    assert!(service.complete(t1).await.is_err());
    assert!(service.set_status(t2, SchedulingStatus::ReadyForProcessing).await.is_err());
    assert_eq!(service.map().values(&AllEntries).await, snapshot);

    // retrying after the store recovers completes the operation
    store.fail_writes(false);
    assert_eq!(service.complete(t1).await.unwrap(), BTreeSet::from([t2]));
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn clear_cache_reloads_from_store() {
    let store = Arc::new(MemoryStore::new());
    let service = DependencyTrackingService::new(Arc::clone(&store), config(3));
    for chunk in 0..4 {
        service
            .register(NewTracker::new(TrackingKey::new(1, chunk), 0), None)
            .await
            .unwrap();
    }
    // changed behind the map's back
    store.delete(TrackingKey::new(1, 3)).await.unwrap();
    assert_eq!(service.map().len().await, 4);

    assert_eq!(service.clear_cache().await.unwrap(), 3);
    assert_eq!(service.map().len().await, 3);
    assert!(!service.is_scheduled(TrackingKey::new(1, 3)).await);
}

/// Memory store whose key enumeration can be held open until released.
struct GatedStore {
    inner: MemoryStore,
    armed: AtomicBool,
    entered: Notify,
    release: Semaphore,
}

impl GatedStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            armed: AtomicBool::new(false),
            entered: Notify::new(),
            release: Semaphore::new(0),
        }
    }
}

impl TrackingStore for GatedStore {
    async fn store(&self, tracker: &DependencyTracking) -> Result<()> {
        self.inner.store(tracker).await
    }

    async fn store_all(&self, trackers: &[DependencyTracking]) -> Result<()> {
        self.inner.store_all(trackers).await
    }

    async fn delete(&self, key: TrackingKey) -> Result<()> {
        self.inner.delete(key).await
    }

    async fn delete_all(&self, keys: &[TrackingKey]) -> Result<()> {
        self.inner.delete_all(keys).await
    }

    async fn load(&self, key: TrackingKey) -> Result<Option<DependencyTracking>> {
        self.inner.load(key).await
    }

    async fn load_all(&self, keys: &[TrackingKey]) -> Result<Vec<DependencyTracking>> {
        self.inner.load_all(keys).await
    }

    async fn load_all_keys(&self) -> Result<Vec<TrackingKey>> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            let _permit = self
                .release
                .acquire()
                .await
                .map_err(|e| Error::Other(e.to_string()))?;
        }
        self.inner.load_all_keys().await
    }
}

#[tokio::test]
async fn registration_during_cache_clear_still_finds_predecessor() {
    let store = Arc::new(GatedStore::new());
    let service = Arc::new(DependencyTrackingService::new(Arc::clone(&store), config(4)));
    let (t1, t2) = (TrackingKey::new(1, 0), TrackingKey::new(2, 0));
    service
        .register(NewTracker::new(t1, 0).match_key("k"), None)
        .await
        .unwrap();

    store.armed.store(true, Ordering::SeqCst);
    let clearing = tokio::spawn({
        let service = Arc::clone(&service);
        async move { service.clear_cache().await }
    });
    store.entered.notified().await;

    let registering = tokio::spawn({
        let service = Arc::clone(&service);
        async move {
            service
                .register(NewTracker::new(t2, 0).match_key("k"), None)
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    store.release.add_permits(1);

    assert_eq!(clearing.await.unwrap().unwrap(), 1);
    let tracker = registering.await.unwrap().unwrap();
    assert_eq!(tracker.waiting_on, BTreeSet::from([t1]));
    assert_eq!(tracker.status, SchedulingStatus::Blocked);
    assert_eq!(service.map().len().await, 2);
    assert_eq!(store.inner.len(), 2);
}
