//! The three kinds of functions the tracking map runs next to its data.
//!
//! All of them see one `(key, tracker)` entry at a time and carry no
//! external state, so they behave the same on whichever partition owns the
//! entry.

use crate::model::{DependencyTracking, TrackingKey};

/// Read-only filter evaluated against every entry of every partition.
pub trait Predicate: Send + Sync {
    fn test(&self, key: &TrackingKey, tracker: &DependencyTracking) -> bool;
}

/// Reduction computed per partition and then merged.
///
/// The value handed to `TrackingMap::aggregate` is an empty prototype:
/// each partition accumulates into its own clone, the partials are
/// combined, and `finalize` produces the result. Raw entries never leave
/// their partition.
pub trait Aggregator: Clone + Send + Sync {
    type Output;

    fn accumulate(&mut self, key: &TrackingKey, tracker: &DependencyTracking);

    fn combine(&mut self, other: Self);

    fn finalize(self) -> Self::Output;
}

/// Read-modify-write of a single entry, executed on the partition that
/// owns it while that partition is locked.
///
/// Whatever the processor changes on `tracker` is written through to the
/// store and committed; an unchanged tracker costs no write.
pub trait EntryProcessor: Send + Sync {
    type Output: Send;

    fn process(&self, tracker: &mut DependencyTracking) -> Self::Output;
}

/// Matches every entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllEntries;

impl Predicate for AllEntries {
    fn test(&self, _key: &TrackingKey, _tracker: &DependencyTracking) -> bool {
        true
    }
}
