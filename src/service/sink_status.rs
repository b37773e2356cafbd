//! Per-sink queue status kept in step with the tracking map.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use crate::event::{Event, EventKind, MapListener};
use crate::model::SinkStatus;

/// Status counts and submit modes per sink.
///
/// Counts are maintained incrementally from map events; a full recount
/// replaces them from an aggregation.
#[derive(Debug, Default)]
pub struct SinkStatusBook {
    sinks: Mutex<BTreeMap<i32, SinkStatus>>,
}

impl SinkStatusBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status of one sink. Unknown sinks read as empty and direct.
    pub fn get(&self, sink_id: i32) -> SinkStatus {
        self.lock().get(&sink_id).cloned().unwrap_or_default()
    }

    pub fn snapshot(&self) -> BTreeMap<i32, SinkStatus> {
        self.lock().clone()
    }

    /// Run `f` against one sink's status, creating it if needed.
    pub fn with_sink<R>(&self, sink_id: i32, f: impl FnOnce(&mut SinkStatus) -> R) -> R {
        f(self.lock().entry(sink_id).or_default())
    }

    /// Replace the listed sinks, or everything when `sinks` is `None`.
    pub fn replace(&self, counts: BTreeMap<i32, SinkStatus>, sinks: Option<&[i32]>) {
        let mut book = self.lock();
        match sinks {
            None => *book = counts,
            Some(sinks) => {
                for sink in sinks {
                    book.remove(sink);
                }
                book.extend(counts);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<i32, SinkStatus>> {
        // plain counters; still valid after a panic elsewhere
        self.sinks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MapListener for SinkStatusBook {
    fn on_event(&self, event: &Event) {
        let mut book = self.lock();
        match event.kind {
            EventKind::TrackerAdded { sink_id, status, .. } => {
                book.entry(sink_id).or_default().count(status);
            }
            EventKind::TrackerUpdated { sink_id, from, to, .. } => {
                if from != to {
                    let sink = book.entry(sink_id).or_default();
                    sink.uncount(from);
                    sink.count(to);
                }
            }
            EventKind::TrackerRemoved { sink_id, status, .. } => {
                book.entry(sink_id).or_default().uncount(status);
            }
        }
        debug!(seq = event.seq, "sink status updated");
    }
}
