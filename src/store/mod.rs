//! Durable backing store for trackers.
//!
//! The store is the source of truth. The in-memory tracking map writes
//! through to it before a mutation counts as committed, and is rebuilt
//! from it on startup via full key enumeration plus bulk load.

pub mod memory;

use std::future::Future;

use crate::error::Result;
use crate::model::{DependencyTracking, TrackingKey};

pub use memory::MemoryStore;

/// Persistence contract for tracking records keyed by `(job_id, chunk_id)`.
///
/// Every batch operation is all-or-nothing. Upserts and deletes are
/// idempotent so callers can retry a failed batch as a whole.
pub trait TrackingStore: Send + Sync + 'static {
    /// Insert or replace one tracker.
    fn store(&self, tracker: &DependencyTracking) -> impl Future<Output = Result<()>> + Send;

    /// Insert or replace a batch of trackers atomically.
    fn store_all(&self, trackers: &[DependencyTracking])
    -> impl Future<Output = Result<()>> + Send;

    /// Delete one tracker. Deleting a missing key is not an error.
    fn delete(&self, key: TrackingKey) -> impl Future<Output = Result<()>> + Send;

    /// Delete a batch of trackers atomically.
    fn delete_all(&self, keys: &[TrackingKey]) -> impl Future<Output = Result<()>> + Send;

    fn load(
        &self,
        key: TrackingKey,
    ) -> impl Future<Output = Result<Option<DependencyTracking>>> + Send;

    /// Load every tracker among `keys` that exists. Missing keys are skipped.
    fn load_all(
        &self,
        keys: &[TrackingKey],
    ) -> impl Future<Output = Result<Vec<DependencyTracking>>> + Send;

    /// Enumerate every stored key, ordered.
    fn load_all_keys(&self) -> impl Future<Output = Result<Vec<TrackingKey>>> + Send;
}
