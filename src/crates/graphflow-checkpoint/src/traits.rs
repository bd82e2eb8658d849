//! The [`CheckpointStore`] trait - the pluggable persistence boundary.
//!
//! The runner talks to checkpoint storage exclusively through this trait, so
//! downstream projects can persist snapshots anywhere (PostgreSQL, Redis,
//! object storage) by implementing six methods. Two implementations ship
//! with the crate:
//!
//! - [`MemoryCheckpointStore`](crate::memory::MemoryCheckpointStore) -
//!   ephemeral, for tests and development.
//! - [`SqliteCheckpointStore`](crate::sqlite::SqliteCheckpointStore) -
//!   durable single-file store that survives process restarts.
//!
//! # Contract
//!
//! - `save` must be durable before returning `Ok`.
//! - `list` returns headers in ascending timestamp order, ties broken by
//!   node id, with at most one header per `(run_id, node_id)` pair (stores
//!   may coalesce redundant checkpoints for the same pair by overwriting).
//! - `load` returns [`CheckpointError::NotFound`] for unknown pairs.
//! - After `close`, further operations fail.

use crate::checkpoint::{Checkpoint, CheckpointHeader, CheckpointMetadata};
use crate::error::{CheckpointError, Result};
use async_trait::async_trait;

/// Pluggable storage backend for run checkpoints.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Durably record serialized state for `(run_id, node_id)`.
    ///
    /// A second save for the same pair overwrites the first; the store keeps
    /// only the most recent snapshot per pair.
    async fn save(
        &self,
        run_id: &str,
        node_id: &str,
        state: Vec<u8>,
        metadata: CheckpointMetadata,
    ) -> Result<()>;

    /// Fetch the checkpoint recorded for `(run_id, node_id)`.
    async fn load(&self, run_id: &str, node_id: &str) -> Result<Checkpoint>;

    /// Headers for all checkpoints of a run, oldest first.
    async fn list(&self, run_id: &str) -> Result<Vec<CheckpointHeader>>;

    /// Remove the checkpoint for `(run_id, node_id)`, if any.
    async fn delete(&self, run_id: &str, node_id: &str) -> Result<()>;

    /// Remove every checkpoint of a run.
    async fn delete_run(&self, run_id: &str) -> Result<()>;

    /// Release backing resources. Further operations fail.
    async fn close(&self) -> Result<()>;

    /// The most recent checkpoint of a run.
    ///
    /// Default implementation: last header from [`list`](Self::list), then
    /// [`load`](Self::load). Stores with a cheaper native query may
    /// override.
    async fn latest(&self, run_id: &str) -> Result<Checkpoint> {
        let headers = self.list(run_id).await?;
        let last = headers
            .last()
            .ok_or_else(|| CheckpointError::EmptyRun(run_id.to_string()))?;
        self.load(run_id, &last.node_id).await
    }
}

/// Reject blank run/node identifiers before they reach a backend.
pub(crate) fn validate_keys(run_id: &str, node_id: &str) -> Result<()> {
    if run_id.trim().is_empty() {
        return Err(CheckpointError::invalid("run_id must not be empty"));
    }
    if node_id.trim().is_empty() {
        return Err(CheckpointError::invalid("node_id must not be empty"));
    }
    Ok(())
}
