//! SQLite checkpoint store.
//!
//! Implements `StateStore` from `linkflow-core` using sqlx with split
//! read/write pools. `workflow_states` holds one header row per run with the
//! latest metadata; `workflow_state_versions` holds the payloads, pruned to
//! the configured retention. Every payload is stored with its SHA-256 digest,
//! which is checked again on load.
//!
//! Writes run in a transaction on the single-connection writer pool, so the
//! admission check (sequence, terminal status) and the write are atomic.

use chrono::{DateTime, SecondsFormat, Utc};
use linkflow_core::state::{StateStore, StoredState, check_write};
use linkflow_types::error::RepositoryError;
use linkflow_types::state::{CheckpointVersion, RunStatus, StoreStatistics, WorkflowStateMetadata};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use super::pool::DatabasePool;
use crate::crypto::hash::{sha256_hex, verify_sha256};

/// SQLite-backed implementation of `StateStore`.
#[derive(Clone)]
pub struct SqliteStateStore {
    pool: DatabasePool,
}

impl SqliteStateStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct HeaderRow {
    workflow_id: String,
    run_id: String,
    status: String,
    current_block: String,
    workflow_version: String,
    sequence: i64,
    size_bytes: i64,
    checksum: Option<String>,
    custom: String,
    updated_at: String,
}

impl HeaderRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            workflow_id: row.try_get("workflow_id")?,
            run_id: row.try_get("run_id")?,
            status: row.try_get("status")?,
            current_block: row.try_get("current_block")?,
            workflow_version: row.try_get("workflow_version")?,
            sequence: row.try_get("sequence")?,
            size_bytes: row.try_get("size_bytes")?,
            checksum: row.try_get("checksum")?,
            custom: row.try_get("custom")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_metadata(self) -> Result<WorkflowStateMetadata, RepositoryError> {
        Ok(WorkflowStateMetadata {
            workflow_id: self.workflow_id,
            run_id: parse_uuid(&self.run_id)?,
            status: parse_status(&self.status)?,
            current_block: self.current_block,
            size_bytes: to_u64(self.size_bytes, "size_bytes")?,
            workflow_version: self.workflow_version,
            updated_at: parse_datetime(&self.updated_at)?,
            sequence: to_u64(self.sequence, "sequence")?,
            checksum: self.checksum,
            custom: serde_json::from_str(&self.custom)
                .map_err(|e| RepositoryError::Query(format!("invalid custom metadata JSON: {e}")))?,
        })
    }
}

struct VersionRow {
    version: i64,
    sequence: i64,
    status: String,
    size_bytes: i64,
    saved_at: String,
}

impl VersionRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            version: row.try_get("version")?,
            sequence: row.try_get("sequence")?,
            status: row.try_get("status")?,
            size_bytes: row.try_get("size_bytes")?,
            saved_at: row.try_get("saved_at")?,
        })
    }

    fn into_version(self) -> Result<CheckpointVersion, RepositoryError> {
        Ok(CheckpointVersion {
            version: to_u64(self.version, "version")?,
            sequence: to_u64(self.sequence, "sequence")?,
            status: parse_status(&self.status)?,
            size_bytes: to_u64(self.size_bytes, "size_bytes")?,
            saved_at: parse_datetime(&self.saved_at)?,
        })
    }
}

/// Payload bytes read from a version row, checked against the stored digest.
fn verified_payload(row: &SqliteRow, workflow_id: &str, run_id: &Uuid) -> Result<Vec<u8>, RepositoryError> {
    let payload: Vec<u8> = row.try_get("payload").map_err(query_err)?;
    let checksum: String = row.try_get("payload_checksum").map_err(query_err)?;
    if !verify_sha256(&payload, &checksum) {
        tracing::warn!(workflow_id, run_id = %run_id, "checkpoint payload failed checksum verification");
        return Err(RepositoryError::Corrupted(format!(
            "checksum mismatch for run {run_id} of workflow '{workflow_id}'"
        )));
    }
    Ok(payload)
}

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

fn query_err(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    Uuid::parse_str(s).map_err(|e| RepositoryError::Query(format!("invalid UUID '{s}': {e}")))
}

fn parse_status(s: &str) -> Result<RunStatus, RepositoryError> {
    RunStatus::parse(s).ok_or_else(|| RepositoryError::Query(format!("invalid run status '{s}'")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime '{s}': {e}")))
}

/// Fixed-width RFC 3339 so that text comparison orders by time.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn to_i64(value: u64, field: &str) -> Result<i64, RepositoryError> {
    i64::try_from(value).map_err(|_| RepositoryError::Query(format!("{field} {value} out of range")))
}

fn to_u64(value: i64, field: &str) -> Result<u64, RepositoryError> {
    u64::try_from(value).map_err(|_| RepositoryError::Query(format!("negative {field}: {value}")))
}

fn custom_json(metadata: &WorkflowStateMetadata) -> Result<String, RepositoryError> {
    serde_json::to_string(&metadata.custom)
        .map_err(|e| RepositoryError::Query(format!("failed to serialize custom metadata: {e}")))
}

fn metadata_json(metadata: &WorkflowStateMetadata) -> Result<String, RepositoryError> {
    serde_json::to_string(metadata)
        .map_err(|e| RepositoryError::Query(format!("failed to serialize metadata: {e}")))
}

/// The stored status and sequence, in the shape `check_write` expects.
fn admission_metadata(
    incoming: &WorkflowStateMetadata,
    row: &SqliteRow,
) -> Result<WorkflowStateMetadata, RepositoryError> {
    let status: String = row.try_get("status").map_err(query_err)?;
    let sequence: i64 = row.try_get("sequence").map_err(query_err)?;
    let mut stored = incoming.clone();
    stored.status = parse_status(&status)?;
    stored.sequence = to_u64(sequence, "sequence")?;
    Ok(stored)
}

// ---------------------------------------------------------------------------
// StateStore implementation
// ---------------------------------------------------------------------------

const LATEST_SELECT: &str = r#"
    SELECT s.workflow_id, s.run_id, s.status, s.current_block, s.workflow_version,
           s.sequence, s.size_bytes, s.checksum, s.custom, s.updated_at,
           v.payload, v.checksum AS payload_checksum
    FROM workflow_states s
    JOIN workflow_state_versions v
      ON v.workflow_id = s.workflow_id
     AND v.run_id = s.run_id
     AND v.version = s.latest_version
    WHERE s.workflow_id = ? AND s.run_id = ?
"#;

impl StateStore for SqliteStateStore {
    async fn put(
        &self,
        record: StoredState,
        retain_versions: Option<u32>,
    ) -> Result<WorkflowStateMetadata, RepositoryError> {
        let StoredState {
            mut metadata,
            payload,
        } = record;
        metadata.size_bytes = payload.len() as u64;
        let checksum = sha256_hex(&payload);
        metadata.checksum = Some(checksum.clone());

        let run_id = metadata.run_id.to_string();
        let sequence = to_i64(metadata.sequence, "sequence")?;
        let size_bytes = to_i64(metadata.size_bytes, "size_bytes")?;
        let updated_at = format_datetime(&metadata.updated_at);
        let custom = custom_json(&metadata)?;
        let keep = i64::from(retain_versions.map_or(1, |n| n.max(1)));

        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        let existing = sqlx::query(
            "SELECT status, sequence, latest_version FROM workflow_states WHERE workflow_id = ? AND run_id = ?",
        )
        .bind(&metadata.workflow_id)
        .bind(&run_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(query_err)?;

        let version = match existing {
            Some(row) => {
                check_write(&admission_metadata(&metadata, &row)?, &metadata)?;
                let latest: i64 = row.try_get("latest_version").map_err(query_err)?;
                latest + 1
            }
            None => 1,
        };

        sqlx::query(
            r#"
            INSERT INTO workflow_states
                (workflow_id, run_id, status, current_block, workflow_version, sequence,
                 size_bytes, checksum, custom, latest_version, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(workflow_id, run_id) DO UPDATE SET
                status = excluded.status,
                current_block = excluded.current_block,
                workflow_version = excluded.workflow_version,
                sequence = excluded.sequence,
                size_bytes = excluded.size_bytes,
                checksum = excluded.checksum,
                custom = excluded.custom,
                latest_version = excluded.latest_version,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&metadata.workflow_id)
        .bind(&run_id)
        .bind(metadata.status.as_str())
        .bind(&metadata.current_block)
        .bind(&metadata.workflow_version)
        .bind(sequence)
        .bind(size_bytes)
        .bind(&checksum)
        .bind(&custom)
        .bind(version)
        .bind(&updated_at)
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;

        sqlx::query(
            r#"
            INSERT INTO workflow_state_versions
                (workflow_id, run_id, version, sequence, status, size_bytes, checksum,
                 metadata, payload, saved_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&metadata.workflow_id)
        .bind(&run_id)
        .bind(version)
        .bind(sequence)
        .bind(metadata.status.as_str())
        .bind(size_bytes)
        .bind(&checksum)
        .bind(metadata_json(&metadata)?)
        .bind(&payload)
        .bind(&updated_at)
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;

        let pruned = sqlx::query(
            "DELETE FROM workflow_state_versions WHERE workflow_id = ? AND run_id = ? AND version <= ?",
        )
        .bind(&metadata.workflow_id)
        .bind(&run_id)
        .bind(version - keep)
        .execute(&mut *tx)
        .await
        .map_err(query_err)?
        .rows_affected();

        tx.commit().await.map_err(query_err)?;

        tracing::debug!(
            workflow_id = %metadata.workflow_id,
            run_id = %metadata.run_id,
            version,
            sequence = metadata.sequence,
            pruned,
            "checkpoint row written"
        );

        Ok(metadata)
    }

    async fn get(&self, workflow_id: &str, run_id: &Uuid) -> Result<Option<StoredState>, RepositoryError> {
        let row = sqlx::query(LATEST_SELECT)
            .bind(workflow_id)
            .bind(run_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        match row {
            Some(row) => {
                let payload = verified_payload(&row, workflow_id, run_id)?;
                let metadata = HeaderRow::from_row(&row).map_err(query_err)?.into_metadata()?;
                Ok(Some(StoredState { metadata, payload }))
            }
            None => Ok(None),
        }
    }

    async fn get_version(
        &self,
        workflow_id: &str,
        run_id: &Uuid,
        version: u64,
    ) -> Result<Option<StoredState>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT metadata, payload, checksum AS payload_checksum
            FROM workflow_state_versions
            WHERE workflow_id = ? AND run_id = ? AND version = ?
            "#,
        )
        .bind(workflow_id)
        .bind(run_id.to_string())
        .bind(to_i64(version, "version")?)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_err)?;

        match row {
            Some(row) => {
                let payload = verified_payload(&row, workflow_id, run_id)?;
                let metadata: String = row.try_get("metadata").map_err(query_err)?;
                let metadata = serde_json::from_str(&metadata)
                    .map_err(|e| RepositoryError::Query(format!("invalid metadata JSON: {e}")))?;
                Ok(Some(StoredState { metadata, payload }))
            }
            None => Ok(None),
        }
    }

    async fn list_versions(
        &self,
        workflow_id: &str,
        run_id: &Uuid,
    ) -> Result<Vec<CheckpointVersion>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT version, sequence, status, size_bytes, saved_at
            FROM workflow_state_versions
            WHERE workflow_id = ? AND run_id = ?
            ORDER BY version ASC
            "#,
        )
        .bind(workflow_id)
        .bind(run_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        rows.iter()
            .map(|row| VersionRow::from_row(row).map_err(query_err)?.into_version())
            .collect()
    }

    async fn exists(&self, workflow_id: &str, run_id: &Uuid) -> Result<bool, RepositoryError> {
        let row = sqlx::query("SELECT 1 FROM workflow_states WHERE workflow_id = ? AND run_id = ?")
            .bind(workflow_id)
            .bind(run_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;
        Ok(row.is_some())
    }

    async fn delete(&self, workflow_id: &str, run_id: &Uuid) -> Result<bool, RepositoryError> {
        // Versions go with the header via ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM workflow_states WHERE workflow_id = ? AND run_id = ?")
            .bind(workflow_id)
            .bind(run_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_runs(&self, workflow_id: &str) -> Result<Vec<Uuid>, RepositoryError> {
        let rows = sqlx::query("SELECT run_id FROM workflow_states WHERE workflow_id = ?")
            .bind(workflow_id)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;

        let mut runs = rows
            .iter()
            .map(|row| {
                let run_id: String = row.try_get("run_id").map_err(query_err)?;
                parse_uuid(&run_id)
            })
            .collect::<Result<Vec<_>, _>>()?;
        runs.sort();
        Ok(runs)
    }

    async fn get_metadata(
        &self,
        workflow_id: &str,
        run_id: &Uuid,
    ) -> Result<Option<WorkflowStateMetadata>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT workflow_id, run_id, status, current_block, workflow_version, sequence,
                   size_bytes, checksum, custom, updated_at
            FROM workflow_states
            WHERE workflow_id = ? AND run_id = ?
            "#,
        )
        .bind(workflow_id)
        .bind(run_id.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_err)?;

        match row {
            Some(row) => Ok(Some(HeaderRow::from_row(&row).map_err(query_err)?.into_metadata()?)),
            None => Ok(None),
        }
    }

    async fn update_metadata(&self, metadata: &WorkflowStateMetadata) -> Result<(), RepositoryError> {
        let run_id = metadata.run_id.to_string();
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        let row = sqlx::query(
            r#"
            SELECT status, sequence, size_bytes, checksum, latest_version
            FROM workflow_states
            WHERE workflow_id = ? AND run_id = ?
            "#,
        )
        .bind(&metadata.workflow_id)
        .bind(&run_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(query_err)?
        .ok_or(RepositoryError::NotFound)?;

        check_write(&admission_metadata(metadata, &row)?, metadata)?;

        // The payload is untouched, so its size and digest stay.
        let size_bytes: i64 = row.try_get("size_bytes").map_err(query_err)?;
        let checksum: Option<String> = row.try_get("checksum").map_err(query_err)?;
        let latest_version: i64 = row.try_get("latest_version").map_err(query_err)?;

        let mut updated = metadata.clone();
        updated.size_bytes = to_u64(size_bytes, "size_bytes")?;
        updated.checksum = checksum;

        sqlx::query(
            r#"
            UPDATE workflow_states
            SET status = ?, current_block = ?, workflow_version = ?, sequence = ?,
                custom = ?, updated_at = ?
            WHERE workflow_id = ? AND run_id = ?
            "#,
        )
        .bind(updated.status.as_str())
        .bind(&updated.current_block)
        .bind(&updated.workflow_version)
        .bind(to_i64(updated.sequence, "sequence")?)
        .bind(custom_json(&updated)?)
        .bind(format_datetime(&updated.updated_at))
        .bind(&updated.workflow_id)
        .bind(&run_id)
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;

        sqlx::query(
            r#"
            UPDATE workflow_state_versions
            SET status = ?, sequence = ?, metadata = ?
            WHERE workflow_id = ? AND run_id = ? AND version = ?
            "#,
        )
        .bind(updated.status.as_str())
        .bind(to_i64(updated.sequence, "sequence")?)
        .bind(metadata_json(&updated)?)
        .bind(&updated.workflow_id)
        .bind(&run_id)
        .bind(latest_version)
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;

        tx.commit().await.map_err(query_err)?;
        Ok(())
    }

    async fn cleanup_older_than(
        &self,
        cutoff: DateTime<Utc>,
        status: Option<RunStatus>,
    ) -> Result<u64, RepositoryError> {
        let cutoff = format_datetime(&cutoff);
        let result = match status {
            Some(status) => {
                sqlx::query("DELETE FROM workflow_states WHERE updated_at < ? AND status = ?")
                    .bind(&cutoff)
                    .bind(status.as_str())
                    .execute(&self.pool.writer)
                    .await
            }
            None => {
                sqlx::query("DELETE FROM workflow_states WHERE updated_at < ?")
                    .bind(&cutoff)
                    .execute(&self.pool.writer)
                    .await
            }
        }
        .map_err(query_err)?;

        let removed = result.rows_affected();
        if removed > 0 {
            tracing::info!(removed, cutoff = %cutoff, "old checkpoints removed");
        }
        Ok(removed)
    }

    async fn statistics(&self) -> Result<StoreStatistics, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total_states,
                   COALESCE(SUM(size_bytes), 0) AS total_size_bytes,
                   COALESCE(SUM(CASE WHEN status IN ('running', 'waiting', 'suspended') THEN 1 ELSE 0 END), 0) AS active_count,
                   COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0) AS completed_count,
                   COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0) AS failed_count
            FROM workflow_states
            "#,
        )
        .fetch_one(&self.pool.reader)
        .await
        .map_err(query_err)?;

        let field = |name: &str| -> Result<u64, RepositoryError> {
            let value: i64 = row.try_get(name).map_err(query_err)?;
            to_u64(value, name)
        };

        Ok(StoreStatistics {
            total_states: field("total_states")?,
            total_size_bytes: field("total_size_bytes")?,
            active_count: field("active_count")?,
            completed_count: field("completed_count")?,
            failed_count: field("failed_count")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use linkflow_core::state::{CheckpointManager, PayloadPipeline};
    use linkflow_types::config::CheckpointConfig;
    use linkflow_types::value::StateValue;

    async fn test_pool() -> DatabasePool {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        // Leak the tempdir so it lives for the test duration
        let pool = DatabasePool::new(&url).await.unwrap();
        std::mem::forget(dir);
        pool
    }

    async fn test_store() -> SqliteStateStore {
        SqliteStateStore::new(test_pool().await)
    }

    fn record(run_id: Uuid, status: RunStatus, sequence: u64, payload: &[u8]) -> StoredState {
        let mut metadata = WorkflowStateMetadata::new("payment", run_id, "1");
        metadata.status = status;
        metadata.sequence = sequence;
        metadata.current_block = "charge".to_string();
        StoredState {
            metadata,
            payload: payload.to_vec(),
        }
    }

    #[tokio::test]
    async fn test_put_and_get_latest() {
        let store = test_store().await;
        let run_id = Uuid::now_v7();

        let mut rec = record(run_id, RunStatus::Running, 1, b"first");
        rec.metadata
            .custom
            .insert("resume_at".to_string(), serde_json::json!("2030-01-01T00:00:00Z"));
        let stored = store.put(rec, None).await.unwrap();
        assert_eq!(stored.size_bytes, 5);
        assert_eq!(stored.checksum.as_deref(), Some(sha256_hex(b"first").as_str()));

        let loaded = store.get("payment", &run_id).await.unwrap().unwrap();
        assert_eq!(loaded.payload, b"first");
        assert_eq!(loaded.metadata, stored);
        assert_eq!(loaded.metadata.custom["resume_at"], "2030-01-01T00:00:00Z");

        assert!(store.get("payment", &Uuid::now_v7()).await.unwrap().is_none());
        assert!(store.get("refund", &run_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_replaces_latest_without_retention() {
        let store = test_store().await;
        let run_id = Uuid::now_v7();

        store.put(record(run_id, RunStatus::Running, 1, b"one"), None).await.unwrap();
        store.put(record(run_id, RunStatus::Running, 2, b"two"), None).await.unwrap();

        let loaded = store.get("payment", &run_id).await.unwrap().unwrap();
        assert_eq!(loaded.payload, b"two");
        assert_eq!(loaded.metadata.sequence, 2);

        let versions = store.list_versions("payment", &run_id).await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].version, 2);
    }

    #[tokio::test]
    async fn test_stale_write_rejected() {
        let store = test_store().await;
        let run_id = Uuid::now_v7();

        store.put(record(run_id, RunStatus::Running, 5, b"newer"), None).await.unwrap();
        let err = store
            .put(record(run_id, RunStatus::Running, 3, b"older"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::StaleWrite { incoming: 3, stored: 5 }));

        let loaded = store.get("payment", &run_id).await.unwrap().unwrap();
        assert_eq!(loaded.payload, b"newer");
    }

    #[tokio::test]
    async fn test_terminal_status_is_final() {
        let store = test_store().await;
        let run_id = Uuid::now_v7();

        store.put(record(run_id, RunStatus::Completed, 1, b"done"), None).await.unwrap();
        let err = store
            .put(record(run_id, RunStatus::Running, 2, b"again"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::TerminalStatus { .. }));

        // Same terminal status may be written again.
        store.put(record(run_id, RunStatus::Completed, 2, b"done2"), None).await.unwrap();
        let meta = store.get_metadata("payment", &run_id).await.unwrap().unwrap();
        assert_eq!(meta.status, RunStatus::Completed);
        assert_eq!(meta.sequence, 2);
    }

    #[tokio::test]
    async fn test_version_retention_prunes_oldest() {
        let store = test_store().await;
        let run_id = Uuid::now_v7();

        for seq in 1..=5u64 {
            let payload = format!("v{seq}");
            store
                .put(record(run_id, RunStatus::Running, seq, payload.as_bytes()), Some(3))
                .await
                .unwrap();
        }

        let versions = store.list_versions("payment", &run_id).await.unwrap();
        let numbers: Vec<u64> = versions.iter().map(|v| v.version).collect();
        assert_eq!(numbers, vec![3, 4, 5]);
        assert_eq!(versions[0].sequence, 3);

        let old = store.get_version("payment", &run_id, 3).await.unwrap().unwrap();
        assert_eq!(old.payload, b"v3");
        assert_eq!(old.metadata.sequence, 3);
        assert!(store.get_version("payment", &run_id, 1).await.unwrap().is_none());

        let latest = store.get("payment", &run_id).await.unwrap().unwrap();
        assert_eq!(latest.payload, b"v5");
    }

    #[tokio::test]
    async fn test_corrupted_payload_detected() {
        let store = test_store().await;
        let run_id = Uuid::now_v7();
        store.put(record(run_id, RunStatus::Running, 1, b"intact"), None).await.unwrap();

        sqlx::query("UPDATE workflow_state_versions SET payload = ? WHERE run_id = ?")
            .bind(b"tampered".to_vec())
            .bind(run_id.to_string())
            .execute(&store.pool().writer)
            .await
            .unwrap();

        let err = store.get("payment", &run_id).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Corrupted(_)));
    }

    #[tokio::test]
    async fn test_exists_delete_and_list_runs() {
        let store = test_store().await;
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();
        store.put(record(a, RunStatus::Running, 1, b"a"), Some(2)).await.unwrap();
        store.put(record(a, RunStatus::Running, 2, b"a2"), Some(2)).await.unwrap();
        store.put(record(b, RunStatus::Running, 1, b"b"), None).await.unwrap();

        assert!(store.exists("payment", &a).await.unwrap());
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(store.list_runs("payment").await.unwrap(), expected);
        assert!(store.list_runs("refund").await.unwrap().is_empty());

        assert!(store.delete("payment", &a).await.unwrap());
        assert!(!store.delete("payment", &a).await.unwrap());
        assert!(!store.exists("payment", &a).await.unwrap());
        assert!(store.list_versions("payment", &a).await.unwrap().is_empty());
        assert_eq!(store.list_runs("payment").await.unwrap(), vec![b]);
    }

    #[tokio::test]
    async fn test_update_metadata_keeps_payload() {
        let store = test_store().await;
        let run_id = Uuid::now_v7();
        let stored = store
            .put(record(run_id, RunStatus::Running, 1, b"payload"), None)
            .await
            .unwrap();

        let mut meta = stored.clone();
        meta.status = RunStatus::Suspended;
        meta.sequence = 2;
        meta.current_block = "approve".to_string();
        meta.size_bytes = 0;
        meta.checksum = None;
        store.update_metadata(&meta).await.unwrap();

        let loaded = store.get("payment", &run_id).await.unwrap().unwrap();
        assert_eq!(loaded.payload, b"payload");
        assert_eq!(loaded.metadata.status, RunStatus::Suspended);
        assert_eq!(loaded.metadata.current_block, "approve");
        assert_eq!(loaded.metadata.size_bytes, 7);
        assert_eq!(loaded.metadata.checksum, stored.checksum);

        let version = store.get_version("payment", &run_id, 1).await.unwrap().unwrap();
        assert_eq!(version.metadata.status, RunStatus::Suspended);
    }

    #[tokio::test]
    async fn test_update_metadata_missing_run() {
        let store = test_store().await;
        let meta = WorkflowStateMetadata::new("payment", Uuid::now_v7(), "1");
        let err = store.update_metadata(&meta).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn test_cleanup_older_than_with_status_filter() {
        let store = test_store().await;
        let old_done = Uuid::now_v7();
        let old_running = Uuid::now_v7();
        let fresh_done = Uuid::now_v7();

        let past = Utc::now() - chrono::Duration::days(10);
        let mut rec = record(old_done, RunStatus::Completed, 1, b"x");
        rec.metadata.updated_at = past;
        store.put(rec, None).await.unwrap();
        let mut rec = record(old_running, RunStatus::Running, 1, b"y");
        rec.metadata.updated_at = past;
        store.put(rec, None).await.unwrap();
        store.put(record(fresh_done, RunStatus::Completed, 1, b"z"), None).await.unwrap();

        let cutoff = Utc::now() - chrono::Duration::days(1);
        let removed = store
            .cleanup_older_than(cutoff, Some(RunStatus::Completed))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(!store.exists("payment", &old_done).await.unwrap());
        assert!(store.exists("payment", &old_running).await.unwrap());

        let removed = store.cleanup_older_than(cutoff, None).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.exists("payment", &fresh_done).await.unwrap());
    }

    #[tokio::test]
    async fn test_statistics() {
        let store = test_store().await;
        assert_eq!(store.statistics().await.unwrap(), StoreStatistics::default());

        store.put(record(Uuid::now_v7(), RunStatus::Running, 1, b"aa"), None).await.unwrap();
        store.put(record(Uuid::now_v7(), RunStatus::Suspended, 1, b"bbb"), None).await.unwrap();
        store.put(record(Uuid::now_v7(), RunStatus::Completed, 1, b"c"), None).await.unwrap();
        store.put(record(Uuid::now_v7(), RunStatus::Failed, 1, b"dddd"), None).await.unwrap();
        store.put(record(Uuid::now_v7(), RunStatus::Cancelled, 1, b"e"), None).await.unwrap();

        let stats = store.statistics().await.unwrap();
        assert_eq!(stats.total_states, 5);
        assert_eq!(stats.total_size_bytes, 11);
        assert_eq!(stats.active_count, 2);
        assert_eq!(stats.completed_count, 1);
        assert_eq!(stats.failed_count, 1);
    }

    #[tokio::test]
    async fn test_checkpoint_manager_roundtrip_through_sqlite() {
        let store = test_store().await;
        let manager = CheckpointManager::new(store)
            .with_pipeline(PayloadPipeline::from_config(&CheckpointConfig::default(), None))
            .with_retained_versions(Some(2));
        let run_id = Uuid::now_v7();

        let mut state = HashMap::new();
        state.insert("amount".to_string(), StateValue::from(1250_i64));
        state.insert("currency".to_string(), StateValue::from("EUR"));
        state.insert("blob".to_string(), StateValue::from("x".repeat(4096)));

        let meta = WorkflowStateMetadata::new("payment", run_id, "1");
        manager.save("payment", run_id, &state, meta).await.unwrap();

        let loaded = manager.load("payment", run_id).await.unwrap().unwrap();
        assert_eq!(loaded.state, state);
        assert!(loaded.metadata.checksum.is_some());
    }
}
