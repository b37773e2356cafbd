//! Key-to-partition routing.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::model::{DependencyTracking, TrackingKey};

/// Entries owned by one partition.
pub(crate) type Entries = HashMap<TrackingKey, DependencyTracking>;

/// One partition of the map. The lock is the only mutual exclusion for
/// the entries it owns.
#[derive(Debug, Default)]
pub(crate) struct Partition {
    pub(crate) entries: RwLock<Entries>,
}

/// Hash-partitions tracking keys over a fixed number of partitions.
#[derive(Debug, Clone, Copy)]
pub struct Partitioner {
    count: usize,
}

impl Partitioner {
    pub fn new(count: usize) -> Self {
        Self {
            count: count.max(1),
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Partition owning `key`. Stable for a given partition count.
    pub fn partition_for(&self, key: &TrackingKey) -> usize {
        let packed = (u64::from(key.job_id as u32) << 32) | u64::from(key.chunk_id as u32);
        ((mix_hash(packed) >> 32) as usize) % self.count
    }
}

/// Fibonacci hashing: spreads consecutive chunk ids over partitions.
#[inline]
fn mix_hash(hash: u64) -> u64 {
    const GOLDEN_RATIO: u64 = 0x9E37_79B9_7F4A_7C15;
    hash.wrapping_mul(GOLDEN_RATIO)
}
