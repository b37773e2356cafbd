//! In-process tracking store.
//!
//! Used for single-node operation without Postgres and in tests. Writes
//! can be made to fail on demand to exercise error propagation.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use super::TrackingStore;
use crate::error::{Error, Result};
use crate::model::{DependencyTracking, TrackingKey};

#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Mutex<BTreeMap<TrackingKey, DependencyTracking>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with rows, bypassing any map.
    pub fn with_rows(rows: impl IntoIterator<Item = DependencyTracking>) -> Self {
        let store = Self::new();
        if let Ok(mut guard) = store.rows.lock() {
            guard.extend(rows.into_iter().map(|t| (t.key, t)));
        }
        store
    }

    /// Make every following write fail with an I/O error until reset.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.rows.lock().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every stored row, ordered by key.
    pub fn rows(&self) -> Result<Vec<DependencyTracking>> {
        Ok(self.lock()?.values().cloned().collect())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<TrackingKey, DependencyTracking>>> {
        self.rows
            .lock()
            .map_err(|_| Error::Other("memory store lock poisoned".to_string()))
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::other(
                "memory store rejected write",
            )));
        }
        Ok(())
    }
}

impl TrackingStore for MemoryStore {
    async fn store(&self, tracker: &DependencyTracking) -> Result<()> {
        self.check_writable()?;
        self.lock()?.insert(tracker.key, tracker.clone());
        Ok(())
    }

    async fn store_all(&self, trackers: &[DependencyTracking]) -> Result<()> {
        self.check_writable()?;
        let mut rows = self.lock()?;
        for tracker in trackers {
            rows.insert(tracker.key, tracker.clone());
        }
        Ok(())
    }

    async fn delete(&self, key: TrackingKey) -> Result<()> {
        self.check_writable()?;
        self.lock()?.remove(&key);
        Ok(())
    }

    async fn delete_all(&self, keys: &[TrackingKey]) -> Result<()> {
        self.check_writable()?;
        let mut rows = self.lock()?;
        for key in keys {
            rows.remove(key);
        }
        Ok(())
    }

    async fn load(&self, key: TrackingKey) -> Result<Option<DependencyTracking>> {
        Ok(self.lock()?.get(&key).cloned())
    }

    async fn load_all(&self, keys: &[TrackingKey]) -> Result<Vec<DependencyTracking>> {
        let rows = self.lock()?;
        Ok(keys.iter().filter_map(|k| rows.get(k).cloned()).collect())
    }

    async fn load_all_keys(&self) -> Result<Vec<TrackingKey>> {
        Ok(self.lock()?.keys().copied().collect())
    }
}
