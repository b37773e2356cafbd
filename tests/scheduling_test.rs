//! Registration and completion cascade against an in-memory store.

use std::collections::BTreeSet;
use std::sync::Arc;

use chunk_tracker::config::{Retention, ServiceConfig};
use chunk_tracker::grid::AllEntries;
use chunk_tracker::model::{NewTracker, SchedulingStatus, TrackingKey};
use chunk_tracker::service::DependencyTrackingService;
use chunk_tracker::store::MemoryStore;

type Service = DependencyTrackingService<MemoryStore>;

const N0_1: TrackingKey = TrackingKey { job_id: 0, chunk_id: 1 };
const N0_2: TrackingKey = TrackingKey { job_id: 0, chunk_id: 2 };
const T1_1: TrackingKey = TrackingKey { job_id: 1, chunk_id: 1 };
const T1_2: TrackingKey = TrackingKey { job_id: 1, chunk_id: 2 };
const T1_3: TrackingKey = TrackingKey { job_id: 1, chunk_id: 3 };
const T2_1: TrackingKey = TrackingKey { job_id: 2, chunk_id: 1 };
const T2_2: TrackingKey = TrackingKey { job_id: 2, chunk_id: 2 };
const T2_3: TrackingKey = TrackingKey { job_id: 2, chunk_id: 3 };
const T2_4: TrackingKey = TrackingKey { job_id: 2, chunk_id: 4 };
const T2_5: TrackingKey = TrackingKey { job_id: 2, chunk_id: 5 };

fn service(partitions: usize) -> Service {
    let config = ServiceConfig {
        partitions,
        ..ServiceConfig::default()
    };
    DependencyTrackingService::new(Arc::new(MemoryStore::new()), config)
}

fn chunk(key: TrackingKey, keys: &[&str]) -> NewTracker {
    NewTracker::new(key, 0).match_keys(keys.iter().copied())
}

fn keys(list: &[TrackingKey]) -> BTreeSet<TrackingKey> {
    list.iter().copied().collect()
}

/// Two trackers outside the default sink/submitter scope, then two jobs
/// overlapping on K1..K3 in sink 0, submitter 0.
async fn register_test_set(service: &Service) {
    service
        .register(NewTracker::new(N0_1, 1).match_key("K1"), None)
        .await
        .unwrap();
    service
        .register(NewTracker::new(N0_2, 0).submitter(1).match_key("K2"), None)
        .await
        .unwrap();
    service.register(chunk(T1_1, &["K1", "K3"]), None).await.unwrap();
    service.register(chunk(T1_2, &["K2"]), None).await.unwrap();
    service.register(chunk(T1_3, &[]), None).await.unwrap();
    service.register(chunk(T2_1, &["K1", "K2"]), None).await.unwrap();
    service.register(chunk(T2_2, &["K1"]), None).await.unwrap();
    service.register(chunk(T2_3, &["K2"]), None).await.unwrap();
    service.register(chunk(T2_4, &["K3"]), None).await.unwrap();
    service
        .register(chunk(T2_5, &["K1", "K2", "K3"]), None)
        .await
        .unwrap();
}

async fn waiting_on(service: &Service, key: TrackingKey) -> BTreeSet<TrackingKey> {
    service.get(key).await.unwrap().waiting_on
}

async fn assert_invariant(service: &Service) {
    for tracker in service.map().values(&AllEntries).await {
        assert!(
            tracker.is_consistent(),
            "{} is {} with {} prerequisite(s)",
            tracker.key,
            tracker.status,
            tracker.waiting_on.len()
        );
    }
}

#[tokio::test]
async fn test_set_dependencies() {
    let service = service(4);
    register_test_set(&service).await;

    assert!(waiting_on(&service, N0_1).await.is_empty());
    assert!(waiting_on(&service, N0_2).await.is_empty());
    assert!(waiting_on(&service, T1_1).await.is_empty());
    assert!(waiting_on(&service, T1_2).await.is_empty());
    assert!(waiting_on(&service, T1_3).await.is_empty());
    assert_eq!(waiting_on(&service, T2_1).await, keys(&[T1_1, T1_2]));
    assert_eq!(waiting_on(&service, T2_2).await, keys(&[T2_1]));
    assert_eq!(waiting_on(&service, T2_3).await, keys(&[T2_1]));
    assert_eq!(waiting_on(&service, T2_4).await, keys(&[T1_1]));
    assert_eq!(waiting_on(&service, T2_5).await, keys(&[T2_2, T2_3, T2_4]));

    let t1_1 = service.get(T1_1).await.unwrap();
    assert_eq!(t1_1.status, SchedulingStatus::QueuedForProcessing);
    let t2_5 = service.get(T2_5).await.unwrap();
    assert_eq!(t2_5.status, SchedulingStatus::Blocked);

    assert_invariant(&service).await;
}

#[tokio::test]
async fn completion_releases_dependents_step_by_step() {
    let service = service(3);
    register_test_set(&service).await;

    let unblocked = service.complete(T1_1).await.unwrap();
    assert_eq!(unblocked, keys(&[T2_4]));
    assert!(waiting_on(&service, T2_4).await.is_empty());
    assert_eq!(waiting_on(&service, T2_1).await, keys(&[T1_2]));
    assert!(!service.is_scheduled(T1_1).await);

    let unblocked = service.complete(T1_2).await.unwrap();
    assert_eq!(unblocked, keys(&[T2_1]));
    assert!(waiting_on(&service, T2_1).await.is_empty());
    assert_eq!(
        service.get(T2_1).await.unwrap().status,
        SchedulingStatus::QueuedForProcessing
    );

    assert_invariant(&service).await;
}

#[tokio::test]
async fn completing_everything_empties_the_scope() {
    let service = service(5);
    register_test_set(&service).await;

    for key in [T1_1, T1_2, T1_3, T2_1, T2_2, T2_3, T2_4, T2_5] {
        service.complete(key).await.unwrap();
        assert_invariant(&service).await;
    }

    let latest = service.last_tracker_map().await;
    assert!(
        latest
            .keys()
            .all(|w| !(w.sink_id == 0 && w.submitter == 0)),
        "left over: {latest:?}"
    );
    assert_eq!(service.map().len().await, 2);
}

#[tokio::test]
async fn barrier_orders_chunks_without_shared_keys() {
    let service = service(4);
    service
        .register(chunk(T1_1, &["K1", "K3"]), Some("hest"))
        .await
        .unwrap();
    service.register(chunk(T1_2, &["K2"]), Some("hest")).await.unwrap();
    service.register(chunk(T1_3, &[]), Some("hest")).await.unwrap();

    assert!(waiting_on(&service, T1_1).await.is_empty());
    assert_eq!(waiting_on(&service, T1_2).await, keys(&[T1_1]));
    assert_eq!(waiting_on(&service, T1_3).await, keys(&[T1_2]));
    assert!(service.get(T1_3).await.unwrap().match_keys.contains("hest"));
}

#[tokio::test]
async fn barrier_without_earlier_holders_waits_for_nothing() {
    let service = service(2);
    let tracker = service.register(chunk(T1_1, &[]), Some("hest")).await.unwrap();
    assert!(tracker.waiting_on.is_empty());
    assert_eq!(tracker.status, SchedulingStatus::QueuedForProcessing);
}

#[tokio::test]
async fn only_the_latest_holder_is_a_prerequisite() {
    let service = service(4);
    for chunk_id in 0..5 {
        service
            .register(chunk(TrackingKey::new(1, chunk_id), &["5"]), None)
            .await
            .unwrap();
    }
    let newest = service
        .register(chunk(TrackingKey::new(2, 0), &["5"]), None)
        .await
        .unwrap();
    assert_eq!(newest.waiting_on, keys(&[TrackingKey::new(1, 4)]));
}

#[tokio::test]
async fn later_writer_waits_for_earlier_one() {
    let service = service(4);
    let first = TrackingKey::new(7, 0);
    let second = TrackingKey::new(7, 1);
    service.register(chunk(first, &["5"]), None).await.unwrap();
    let tracker = service.register(chunk(second, &["5"]), None).await.unwrap();
    assert!(tracker.waiting_on.contains(&first));
    assert_eq!(tracker.status, SchedulingStatus::Blocked);
}

#[tokio::test]
async fn completion_cascade_reports_exactly_the_released_chunks() {
    let service = service(4);
    let t1 = TrackingKey::new(1, 0);
    let t2 = TrackingKey::new(2, 0);
    let t3 = TrackingKey::new(3, 0);
    let t4 = TrackingKey::new(4, 0);
    service.register(chunk(t1, &["a", "b"]), None).await.unwrap();
    service.register(chunk(t2, &["a"]), None).await.unwrap();
    service.register(chunk(t3, &["b"]), None).await.unwrap();
    service.register(chunk(t4, &["a", "b"]), None).await.unwrap();
    assert_eq!(waiting_on(&service, t2).await, keys(&[t1]));
    assert_eq!(waiting_on(&service, t3).await, keys(&[t1]));
    assert_eq!(waiting_on(&service, t4).await, keys(&[t2, t3]));

    let unblocked = service.complete(t1).await.unwrap();
    assert_eq!(unblocked, keys(&[t2, t3]));
    for key in [t2, t3] {
        assert_eq!(
            service.get(key).await.unwrap().status,
            SchedulingStatus::QueuedForProcessing
        );
    }
    assert_eq!(
        service.get(t4).await.unwrap().status,
        SchedulingStatus::Blocked
    );
}

#[tokio::test]
async fn completing_twice_is_harmless() {
    let service = service(2);
    let t1 = TrackingKey::new(1, 0);
    let t2 = TrackingKey::new(2, 0);
    service.register(chunk(t1, &["x"]), None).await.unwrap();
    service.register(chunk(t2, &["x"]), None).await.unwrap();

    let first = service.complete(t1).await.unwrap();
    let after_first = service.get(t2).await.unwrap();
    let second = service.complete(t1).await.unwrap();
    let after_second = service.get(t2).await.unwrap();

    assert_eq!(first, keys(&[t2]));
    assert!(second.is_empty());
    assert_eq!(after_first, after_second);
}

#[tokio::test]
async fn ready_stream_receives_queued_chunks() {
    let (service, mut ready) = service(3).with_ready_stream();
    let t1 = TrackingKey::new(1, 0);
    let t2 = TrackingKey::new(2, 0);
    service.register(chunk(t1, &["x"]), None).await.unwrap();
    service.register(chunk(t2, &["x"]), None).await.unwrap();

    assert_eq!(ready.try_recv().ok(), Some(t1));
    assert!(ready.try_recv().is_err());

    service.complete(t1).await.unwrap();
    assert_eq!(ready.try_recv().ok(), Some(t2));
    assert!(ready.try_recv().is_err());
}

#[tokio::test]
async fn sink_and_submitter_scope_dependencies() {
    let service = service(4);
    let a = TrackingKey::new(1, 0);
    let other_sink = TrackingKey::new(2, 0);
    let other_submitter = TrackingKey::new(3, 0);
    service.register(chunk(a, &["k"]), None).await.unwrap();
    let t = service
        .register(NewTracker::new(other_sink, 9).match_key("k"), None)
        .await
        .unwrap();
    assert!(t.waiting_on.is_empty());
    let t = service
        .register(
            NewTracker::new(other_submitter, 0).submitter(870970).match_key("k"),
            None,
        )
        .await
        .unwrap();
    assert!(t.waiting_on.is_empty());
}

#[tokio::test]
async fn retained_trackers_are_not_prerequisites() {
    let config = ServiceConfig {
        partitions: 3,
        retention: Retention::Retain,
        ..ServiceConfig::default()
    };
    let service = DependencyTrackingService::new(Arc::new(MemoryStore::new()), config);
    let t1 = TrackingKey::new(1, 0);
    let t2 = TrackingKey::new(2, 0);
    let t3 = TrackingKey::new(3, 0);
    service.register(chunk(t1, &["k"]), None).await.unwrap();
    service.register(chunk(t2, &["k"]), None).await.unwrap();

    assert_eq!(service.complete(t1).await.unwrap(), keys(&[t2]));
    let retained = service.get(t1).await.unwrap();
    assert_eq!(retained.status, SchedulingStatus::Completed);
    assert!(retained.is_consistent());

    service.complete(t2).await.unwrap();
    let t = service.register(chunk(t3, &["k"]), None).await.unwrap();
    assert!(t.waiting_on.is_empty());
    assert_eq!(service.job_count(0).await.chunks, 1);

    let purged = service.purge_completed().await.unwrap();
    assert_eq!(purged, vec![t1, t2]);
    assert_eq!(service.map().len().await, 1);
}

#[tokio::test]
async fn concurrent_registrations_keep_the_invariant() {
    let service = Arc::new(service(8));
    let mut handles = Vec::new();
    for job in 0..8 {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            for chunk_id in 0..10 {
                let key = TrackingKey::new(job, chunk_id);
                let record = format!("r{}", (job + chunk_id) % 5);
                service.register(chunk(key, &[record.as_str()]), None).await.unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(service.map().len().await, 80);
    assert_invariant(&service).await;

    // completing in key order drains everything
    let mut remaining: Vec<TrackingKey> = service.map().keys(&AllEntries).await;
    remaining.sort();
    for key in remaining {
        service.complete(key).await.unwrap();
        assert_invariant(&service).await;
    }
    assert!(service.map().is_empty().await);
}

#[tokio::test]
async fn registering_a_live_chunk_again_keeps_its_prerequisites() {
    let service = service(4);
    let (t1, t2, t3) = (
        TrackingKey::new(1, 0),
        TrackingKey::new(2, 0),
        TrackingKey::new(3, 0),
    );
    for key in [t1, t2, t3] {
        service.register(chunk(key, &["k"]), None).await.unwrap();
    }

    let again = service.register(chunk(t2, &["k"]), None).await.unwrap();
    assert_eq!(again.waiting_on, keys(&[t1]));
    assert_eq!(waiting_on(&service, t3).await, keys(&[t2]));

    // t3 already waits for t2, so it can never become t2's prerequisite
    let retried = chunk(t2, &["k"]).build();
    assert_eq!(
        service.find_chunks_to_wait_for(&retried, None).await,
        keys(&[t1])
    );

    assert_eq!(service.complete(t1).await.unwrap(), keys(&[t2]));
    assert_eq!(service.complete(t2).await.unwrap(), keys(&[t3]));
    assert_invariant(&service).await;
}

#[tokio::test]
async fn registering_again_drops_vanished_prerequisites() {
    let (service, mut ready) = service(2).with_ready_stream();
    let (t1, t2) = (TrackingKey::new(1, 0), TrackingKey::new(2, 0));
    service.register(chunk(t1, &["k"]), None).await.unwrap();
    service.register(chunk(t2, &["k"]), None).await.unwrap();
    assert_eq!(ready.try_recv().ok(), Some(t1));

    service.remove(t1).await.unwrap();
    let again = service.register(chunk(t2, &["k"]), None).await.unwrap();
    assert!(again.waiting_on.is_empty());
    assert_eq!(again.status, SchedulingStatus::QueuedForProcessing);
    assert_eq!(ready.try_recv().ok(), Some(t2));
    assert!(ready.try_recv().is_err());
}
