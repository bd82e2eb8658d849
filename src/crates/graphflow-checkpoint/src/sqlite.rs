//! Durable single-file checkpoint storage backed by SQLite.
//!
//! [`SqliteCheckpointStore`] persists checkpoints in one SQLite database
//! file, created on first connect. The schema is a single table keyed by
//! `(run_id, node_id)` with an index covering the ordered listing query:
//!
//! ```sql
//! CREATE TABLE checkpoints (
//!     run_id         TEXT NOT NULL,
//!     node_id        TEXT NOT NULL,
//!     created_at     TEXT NOT NULL,   -- RFC 3339 UTC, microsecond precision
//!     schema_version INTEGER NOT NULL,
//!     compressed     INTEGER NOT NULL DEFAULT 0,
//!     state          BLOB NOT NULL,
//!     metadata       TEXT NOT NULL,   -- JSON-encoded CheckpointMetadata
//!     PRIMARY KEY (run_id, node_id)
//! );
//! ```
//!
//! Timestamps are stored as RFC 3339 UTC text with fixed microsecond
//! precision so lexicographic `ORDER BY` equals chronological order. Saves
//! are upserts, which implements the per-`(run, node)` coalescing of the
//! [`CheckpointStore`] contract; SQLite's transactional write path makes a
//! returned `Ok` durable.

use crate::checkpoint::{Checkpoint, CheckpointHeader, CheckpointMetadata};
use crate::error::{CheckpointError, Result};
use crate::traits::{validate_keys, CheckpointStore};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;

/// Checkpoint store over a single SQLite database file.
///
/// # Example
///
/// ```rust,no_run
/// use graphflow_checkpoint::SqliteCheckpointStore;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = SqliteCheckpointStore::connect("checkpoints.db").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl SqliteCheckpointStore {
    /// Open (creating if missing) the database file at `path`.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        Self::connect_with(options, 5).await
    }

    /// Open an in-memory database. Handy for tests that want the SQL path
    /// without touching disk.
    pub async fn in_memory() -> Result<Self> {
        // A single connection keeps every query on the same in-memory db.
        let options = SqliteConnectOptions::new().filename(":memory:");
        Self::connect_with(options, 1).await
    }

    async fn connect_with(options: SqliteConnectOptions, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        tracing::debug!(max_connections, "sqlite checkpoint store ready");
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                run_id         TEXT NOT NULL,
                node_id        TEXT NOT NULL,
                created_at     TEXT NOT NULL,
                schema_version INTEGER NOT NULL,
                compressed     INTEGER NOT NULL DEFAULT 0,
                state          BLOB NOT NULL,
                metadata       TEXT NOT NULL,
                PRIMARY KEY (run_id, node_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_checkpoints_run_created
             ON checkpoints (run_id, created_at, node_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn check_open(&self) -> Result<()> {
        if self.pool.is_closed() {
            return Err(CheckpointError::Closed);
        }
        Ok(())
    }

    fn encode_timestamp(ts: DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    fn decode_timestamp(raw: &str) -> Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|e| CheckpointError::invalid(format!("bad stored timestamp '{raw}': {e}")))
    }

    fn row_to_header(row: &sqlx::sqlite::SqliteRow) -> Result<CheckpointHeader> {
        let run_id: String = row.try_get("run_id")?;
        let node_id: String = row.try_get("node_id")?;
        let created_raw: String = row.try_get("created_at")?;
        let metadata_raw: String = row.try_get("metadata")?;
        let metadata: CheckpointMetadata = serde_json::from_str(&metadata_raw)?;
        Ok(CheckpointHeader {
            run_id,
            node_id,
            created_at: Self::decode_timestamp(&created_raw)?,
            metadata,
        })
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn save(
        &self,
        run_id: &str,
        node_id: &str,
        state: Vec<u8>,
        metadata: CheckpointMetadata,
    ) -> Result<()> {
        self.check_open()?;
        validate_keys(run_id, node_id)?;

        let metadata_json = serde_json::to_string(&metadata)?;
        sqlx::query(
            r#"
            INSERT INTO checkpoints
                (run_id, node_id, created_at, schema_version, compressed, state, metadata)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (run_id, node_id) DO UPDATE SET
                created_at = excluded.created_at,
                schema_version = excluded.schema_version,
                compressed = excluded.compressed,
                state = excluded.state,
                metadata = excluded.metadata
            "#,
        )
        .bind(run_id)
        .bind(node_id)
        .bind(Self::encode_timestamp(metadata.created_at))
        .bind(metadata.schema_version as i64)
        .bind(metadata.compressed as i64)
        .bind(state)
        .bind(metadata_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load(&self, run_id: &str, node_id: &str) -> Result<Checkpoint> {
        self.check_open()?;
        validate_keys(run_id, node_id)?;

        let row = sqlx::query(
            "SELECT run_id, node_id, created_at, state, metadata
             FROM checkpoints WHERE run_id = ?1 AND node_id = ?2",
        )
        .bind(run_id)
        .bind(node_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| CheckpointError::not_found(run_id, node_id))?;

        let created_raw: String = row.try_get("created_at")?;
        let state: Vec<u8> = row.try_get("state")?;
        let metadata_raw: String = row.try_get("metadata")?;
        let metadata: CheckpointMetadata = serde_json::from_str(&metadata_raw)?;

        Ok(Checkpoint {
            run_id: run_id.to_string(),
            node_id: node_id.to_string(),
            created_at: Self::decode_timestamp(&created_raw)?,
            state,
            metadata,
        })
    }

    async fn list(&self, run_id: &str) -> Result<Vec<CheckpointHeader>> {
        self.check_open()?;

        let rows = sqlx::query(
            "SELECT run_id, node_id, created_at, metadata
             FROM checkpoints WHERE run_id = ?1
             ORDER BY created_at ASC, node_id ASC",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_header).collect()
    }

    async fn delete(&self, run_id: &str, node_id: &str) -> Result<()> {
        self.check_open()?;

        sqlx::query("DELETE FROM checkpoints WHERE run_id = ?1 AND node_id = ?2")
            .bind(run_id)
            .bind(node_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_run(&self, run_id: &str) -> Result<()> {
        self.check_open()?;

        sqlx::query("DELETE FROM checkpoints WHERE run_id = ?1")
            .bind(run_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}
