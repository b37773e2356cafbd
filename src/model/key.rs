//! Tracker identity.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Composite identity of a tracked chunk.
///
/// Ordered by job, then chunk. "Latest" always means greatest key, so a
/// chunk of a later job outranks every chunk of an earlier one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct TrackingKey {
    pub job_id: i32,
    pub chunk_id: i32,
}

impl TrackingKey {
    pub fn new(job_id: i32, chunk_id: i32) -> Self {
        Self { job_id, chunk_id }
    }
}

impl fmt::Display for TrackingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.job_id, self.chunk_id)
    }
}

impl FromStr for TrackingKey {
    type Err = Error;

    /// Parses the `job/chunk` form produced by `Display`.
    fn from_str(s: &str) -> Result<Self> {
        let (job, chunk) = s
            .split_once('/')
            .ok_or_else(|| Error::Other(format!("invalid tracking key '{s}', expected job/chunk")))?;
        let job_id = job
            .trim()
            .parse()
            .map_err(|_| Error::Other(format!("invalid job id in tracking key '{s}'")))?;
        let chunk_id = chunk
            .trim()
            .parse()
            .map_err(|_| Error::Other(format!("invalid chunk id in tracking key '{s}'")))?;
        Ok(Self { job_id, chunk_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_by_job_then_chunk() {
        let mut keys = vec![
            TrackingKey::new(2, 1),
            TrackingKey::new(1, 9),
            TrackingKey::new(2, 0),
            TrackingKey::new(1, 10),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                TrackingKey::new(1, 9),
                TrackingKey::new(1, 10),
                TrackingKey::new(2, 0),
                TrackingKey::new(2, 1),
            ]
        );
    }

    #[test]
    fn parses_display_form() {
        let key: TrackingKey = "42/7".parse().unwrap();
        assert_eq!(key, TrackingKey::new(42, 7));
        assert_eq!(key.to_string(), "42/7");
        assert!("42".parse::<TrackingKey>().is_err());
        assert!("a/1".parse::<TrackingKey>().is_err());
    }

    #[test]
    fn serializes_with_camel_case_fields() {
        let json = serde_json::to_value(TrackingKey::new(3, 4)).unwrap();
        assert_eq!(json, serde_json::json!({"jobId": 3, "chunkId": 4}));
    }
}
