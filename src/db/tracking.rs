//! Tracker persistence: upsert, delete, point and bulk load.
//!
//! Set-valued fields are stored as JSONB (`waitingon`, `matchkeys`) and the
//! record hashes as a native `INTEGER[]`. Hashes are always recomputed from
//! the match keys on load.

use std::collections::{BTreeMap, BTreeSet};

use opentelemetry::KeyValue;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::model::{DependencyTracking, SchedulingStatus, TrackingKey};
use crate::store::TrackingStore;
use crate::telemetry::metrics;

const UPSERT: &str = "INSERT INTO dependencytracking
        (jobid, chunkid, sinkid, status, waitingon, matchkeys, priority, hashes, submitter, lastmodified, retries)
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
     ON CONFLICT (jobid, chunkid) DO UPDATE SET
        sinkid = EXCLUDED.sinkid,
        status = EXCLUDED.status,
        waitingon = EXCLUDED.waitingon,
        matchkeys = EXCLUDED.matchkeys,
        priority = EXCLUDED.priority,
        hashes = EXCLUDED.hashes,
        submitter = EXCLUDED.submitter,
        lastmodified = EXCLUDED.lastmodified,
        retries = EXCLUDED.retries";

const SELECT_COLUMNS: &str = "SELECT jobid, chunkid, sinkid, status, waitingon, matchkeys, priority, submitter, lastmodified, retries
     FROM dependencytracking";

fn record_operation(operation: &'static str, rows: usize) {
    metrics::store_operations().add(
        rows as u64,
        &[
            KeyValue::new("store", "postgres"),
            KeyValue::new("operation", operation),
        ],
    );
}

impl super::Db {
    async fn upsert_on(conn: &mut sqlx::PgConnection, tracker: &DependencyTracking) -> Result<()> {
        sqlx::query(UPSERT)
            .bind(tracker.key.job_id)
            .bind(tracker.key.chunk_id)
            .bind(tracker.sink_id)
            .bind(tracker.status.code())
            .bind(key_set_to_json(&tracker.waiting_on)?)
            .bind(string_set_to_json(&tracker.match_keys)?)
            .bind(tracker.priority)
            .bind(tracker.hashes.as_slice())
            .bind(tracker.submitter)
            .bind(tracker.last_modified)
            .bind(tracker.retries)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Count trackers per `(sink, status)` directly in the table.
    ///
    /// Used by the CLI to cross-check the in-memory aggregation.
    pub async fn count_by_sink_and_status(&self) -> Result<Vec<(i32, SchedulingStatus, i64)>> {
        let rows: Vec<(i32, i16, i64)> = sqlx::query_as(
            "SELECT sinkid, status, count(*) FROM dependencytracking
             GROUP BY sinkid, status ORDER BY sinkid, status",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|(sink, code, count)| Ok((sink, status_from_code(code)?, count)))
            .collect()
    }
}

impl TrackingStore for super::Db {
    async fn store(&self, tracker: &DependencyTracking) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        Self::upsert_on(&mut conn, tracker).await?;
        record_operation("store", 1);
        Ok(())
    }

    async fn store_all(&self, trackers: &[DependencyTracking]) -> Result<()> {
        if trackers.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for tracker in trackers {
            Self::upsert_on(&mut tx, tracker).await?;
        }
        tx.commit().await?;
        record_operation("store_all", trackers.len());
        Ok(())
    }

    async fn delete(&self, key: TrackingKey) -> Result<()> {
        sqlx::query("DELETE FROM dependencytracking WHERE jobid = $1 AND chunkid = $2")
            .bind(key.job_id)
            .bind(key.chunk_id)
            .execute(&self.pool)
            .await?;
        record_operation("delete", 1);
        Ok(())
    }

    async fn delete_all(&self, keys: &[TrackingKey]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for (job_id, chunk_ids) in group_by_job(keys) {
            sqlx::query("DELETE FROM dependencytracking WHERE jobid = $1 AND chunkid = ANY($2)")
                .bind(job_id)
                .bind(chunk_ids.as_slice())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        record_operation("delete_all", keys.len());
        Ok(())
    }

    async fn load(&self, key: TrackingKey) -> Result<Option<DependencyTracking>> {
        let query = format!("{SELECT_COLUMNS} WHERE jobid = $1 AND chunkid = $2");
        let row: Option<TrackingRow> = sqlx::query_as(&query)
            .bind(key.job_id)
            .bind(key.chunk_id)
            .fetch_optional(&self.pool)
            .await?;
        record_operation("load", 1);
        row.map(TrackingRow::try_into_tracker).transpose()
    }

    async fn load_all(&self, keys: &[TrackingKey]) -> Result<Vec<DependencyTracking>> {
        let query = format!("{SELECT_COLUMNS} WHERE jobid = $1 AND chunkid = ANY($2) ORDER BY chunkid");
        let mut trackers = Vec::with_capacity(keys.len());
        for (job_id, chunk_ids) in group_by_job(keys) {
            let rows: Vec<TrackingRow> = sqlx::query_as(&query)
                .bind(job_id)
                .bind(chunk_ids.as_slice())
                .fetch_all(&self.pool)
                .await?;
            for row in rows {
                trackers.push(row.try_into_tracker()?);
            }
        }
        record_operation("load_all", trackers.len());
        Ok(trackers)
    }

    async fn load_all_keys(&self) -> Result<Vec<TrackingKey>> {
        let rows: Vec<(i32, i32)> =
            sqlx::query_as("SELECT jobid, chunkid FROM dependencytracking ORDER BY jobid, chunkid")
                .fetch_all(&self.pool)
                .await?;
        record_operation("load_all_keys", rows.len());
        Ok(rows
            .into_iter()
            .map(|(job_id, chunk_id)| TrackingKey::new(job_id, chunk_id))
            .collect())
    }
}

fn group_by_job(keys: &[TrackingKey]) -> BTreeMap<i32, Vec<i32>> {
    let mut grouped: BTreeMap<i32, Vec<i32>> = BTreeMap::new();
    for key in keys {
        grouped.entry(key.job_id).or_default().push(key.chunk_id);
    }
    grouped
}

fn status_from_code(code: i16) -> Result<SchedulingStatus> {
    SchedulingStatus::from_code(code).ok_or(Error::UnknownStatus(code))
}

// ---------------------------------------------------------------------------
// Column converters
// ---------------------------------------------------------------------------

/// `waitingon` column: `[{"jobId": 1, "chunkId": 0}, ...]`.
pub fn key_set_to_json(keys: &BTreeSet<TrackingKey>) -> Result<Value> {
    Ok(serde_json::to_value(keys)?)
}

pub fn key_set_from_json(value: Value) -> Result<BTreeSet<TrackingKey>> {
    if value.is_null() {
        return Ok(BTreeSet::new());
    }
    Ok(serde_json::from_value(value)?)
}

/// `matchkeys` column: `["a", "b"]`.
pub fn string_set_to_json(keys: &BTreeSet<String>) -> Result<Value> {
    Ok(serde_json::to_value(keys)?)
}

pub fn string_set_from_json(value: Value) -> Result<BTreeSet<String>> {
    if value.is_null() {
        return Ok(BTreeSet::new());
    }
    Ok(serde_json::from_value(value)?)
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct TrackingRow {
    jobid: i32,
    chunkid: i32,
    sinkid: i32,
    status: i16,
    waitingon: Value,
    matchkeys: Value,
    priority: i32,
    submitter: i32,
    lastmodified: chrono::DateTime<chrono::Utc>,
    retries: i32,
}

impl TrackingRow {
    fn try_into_tracker(self) -> Result<DependencyTracking> {
        let mut tracker = DependencyTracking {
            key: TrackingKey::new(self.jobid, self.chunkid),
            sink_id: self.sinkid,
            submitter: self.submitter,
            status: status_from_code(self.status)?,
            waiting_on: key_set_from_json(self.waitingon)?,
            match_keys: BTreeSet::new(),
            hashes: Vec::new(),
            priority: self.priority,
            retries: self.retries,
            last_modified: self.lastmodified,
        };
        tracker.set_match_keys(string_set_from_json(self.matchkeys)?);
        Ok(tracker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn waiting_on_column_round_trips() {
        let keys: BTreeSet<_> = [TrackingKey::new(2, 1), TrackingKey::new(1, 5)].into();
        let value = key_set_to_json(&keys).unwrap();
        assert_eq!(
            value,
            json!([{"jobId": 1, "chunkId": 5}, {"jobId": 2, "chunkId": 1}])
        );
        assert_eq!(key_set_from_json(value).unwrap(), keys);
        assert!(key_set_from_json(Value::Null).unwrap().is_empty());
    }

    #[test]
    fn match_keys_column_rejects_non_strings() {
        assert!(string_set_from_json(json!([1, 2])).is_err());
        let keys = string_set_from_json(json!(["b", "a", "b"])).unwrap();
        assert_eq!(keys.into_iter().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn keys_are_grouped_per_job() {
        let grouped = group_by_job(&[
            TrackingKey::new(2, 0),
            TrackingKey::new(1, 3),
            TrackingKey::new(2, 4),
        ]);
        assert_eq!(grouped.get(&1), Some(&vec![3]));
        assert_eq!(grouped.get(&2), Some(&vec![0, 4]));
    }

    #[test]
    fn unknown_status_code_is_an_error() {
        let row = TrackingRow {
            jobid: 1,
            chunkid: 0,
            sinkid: 1,
            status: 42,
            waitingon: json!([]),
            matchkeys: json!(["k"]),
            priority: 0,
            submitter: 0,
            lastmodified: chrono::Utc::now(),
            retries: 0,
        };
        assert!(matches!(row.try_into_tracker(), Err(Error::UnknownStatus(42))));
    }
}
