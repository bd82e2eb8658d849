//! In-memory checkpoint storage for development and testing.
//!
//! [`MemoryCheckpointStore`] keeps every checkpoint in a thread-safe map
//! keyed by run id. It implements the full [`CheckpointStore`] contract
//! (including per-`(run, node)` coalescing and ordered listing) but nothing
//! survives a process restart - use
//! [`SqliteCheckpointStore`](crate::sqlite::SqliteCheckpointStore) when
//! durability matters.
//!
//! Beyond the trait, the store exposes `run_count` / `checkpoint_count` /
//! `clear` helpers for test assertions and isolation.

use crate::checkpoint::{Checkpoint, CheckpointHeader, CheckpointMetadata};
use crate::error::{CheckpointError, Result};
use crate::traits::{validate_keys, CheckpointStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

type RunCheckpoints = HashMap<String, Vec<Checkpoint>>;

/// Thread-safe in-memory checkpoint store.
///
/// Cloning is shallow: clones share the same underlying storage.
///
/// # Example
///
/// ```rust
/// use graphflow_checkpoint::{CheckpointMetadata, CheckpointStore, MemoryCheckpointStore};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = MemoryCheckpointStore::new();
/// let meta = CheckpointMetadata::new("run-1", "step1");
/// store.save("run-1", "step1", b"{\"count\":1}".to_vec(), meta).await?;
///
/// let cp = store.load("run-1", "step1").await?;
/// assert_eq!(cp.state, b"{\"count\":1}");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    storage: Arc<RwLock<RunCheckpoints>>,
    closed: Arc<AtomicBool>,
}

impl MemoryCheckpointStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct runs with at least one checkpoint.
    pub async fn run_count(&self) -> usize {
        self.storage.read().await.len()
    }

    /// Total number of checkpoints across all runs.
    pub async fn checkpoint_count(&self) -> usize {
        self.storage
            .read()
            .await
            .values()
            .map(|entries| entries.len())
            .sum()
    }

    /// Drop every checkpoint. Useful between tests.
    pub async fn clear(&self) {
        self.storage.write().await.clear();
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CheckpointError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(
        &self,
        run_id: &str,
        node_id: &str,
        state: Vec<u8>,
        metadata: CheckpointMetadata,
    ) -> Result<()> {
        self.check_open()?;
        validate_keys(run_id, node_id)?;

        let checkpoint = Checkpoint {
            run_id: run_id.to_string(),
            node_id: node_id.to_string(),
            created_at: metadata.created_at,
            state,
            metadata,
        };

        let mut storage = self.storage.write().await;
        let entries = storage.entry(run_id.to_string()).or_default();
        // Coalesce: at most one checkpoint per (run, node).
        entries.retain(|cp| cp.node_id != node_id);
        entries.push(checkpoint);
        Ok(())
    }

    async fn load(&self, run_id: &str, node_id: &str) -> Result<Checkpoint> {
        self.check_open()?;
        validate_keys(run_id, node_id)?;

        let storage = self.storage.read().await;
        storage
            .get(run_id)
            .and_then(|entries| entries.iter().find(|cp| cp.node_id == node_id))
            .cloned()
            .ok_or_else(|| CheckpointError::not_found(run_id, node_id))
    }

    async fn list(&self, run_id: &str) -> Result<Vec<CheckpointHeader>> {
        self.check_open()?;

        let storage = self.storage.read().await;
        let mut headers: Vec<CheckpointHeader> = storage
            .get(run_id)
            .map(|entries| entries.iter().map(Checkpoint::header).collect())
            .unwrap_or_default();
        headers.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        Ok(headers)
    }

    async fn delete(&self, run_id: &str, node_id: &str) -> Result<()> {
        self.check_open()?;

        let mut storage = self.storage.write().await;
        if let Some(entries) = storage.get_mut(run_id) {
            entries.retain(|cp| cp.node_id != node_id);
            if entries.is_empty() {
                storage.remove(run_id);
            }
        }
        Ok(())
    }

    async fn delete_run(&self, run_id: &str) -> Result<()> {
        self.check_open()?;
        self.storage.write().await.remove(run_id);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(run: &str, node: &str) -> CheckpointMetadata {
        CheckpointMetadata::new(run, node)
    }

    #[tokio::test]
    async fn save_and_load_round_trip() {
        let store = MemoryCheckpointStore::new();
        store
            .save("run-1", "step1", b"{\"n\":1}".to_vec(), meta("run-1", "step1"))
            .await
            .unwrap();

        let cp = store.load("run-1", "step1").await.unwrap();
        assert_eq!(cp.run_id, "run-1");
        assert_eq!(cp.node_id, "step1");
        assert_eq!(cp.state, b"{\"n\":1}");
    }

    #[tokio::test]
    async fn load_missing_returns_not_found() {
        let store = MemoryCheckpointStore::new();
        let err = store.load("run-1", "nope").await.unwrap_err();
        assert!(err.is_not_found(), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn list_orders_by_timestamp() {
        let store = MemoryCheckpointStore::new();
        for node in ["step1", "step2", "step3"] {
            store
                .save("run-1", node, vec![], meta("run-1", node))
                .await
                .unwrap();
        }

        let headers = store.list("run-1").await.unwrap();
        let nodes: Vec<_> = headers.iter().map(|h| h.node_id.as_str()).collect();
        assert_eq!(nodes, vec!["step1", "step2", "step3"]);
    }

    #[tokio::test]
    async fn redundant_saves_coalesce() {
        let store = MemoryCheckpointStore::new();
        store
            .save("run-1", "loop", b"1".to_vec(), meta("run-1", "loop"))
            .await
            .unwrap();
        store
            .save("run-1", "loop", b"2".to_vec(), meta("run-1", "loop"))
            .await
            .unwrap();

        let headers = store.list("run-1").await.unwrap();
        assert_eq!(headers.len(), 1);
        let cp = store.load("run-1", "loop").await.unwrap();
        assert_eq!(cp.state, b"2");
    }

    #[tokio::test]
    async fn latest_returns_most_recent() {
        let store = MemoryCheckpointStore::new();
        store
            .save("run-1", "a", b"a".to_vec(), meta("run-1", "a"))
            .await
            .unwrap();
        store
            .save("run-1", "b", b"b".to_vec(), meta("run-1", "b"))
            .await
            .unwrap();

        let latest = store.latest("run-1").await.unwrap();
        assert_eq!(latest.node_id, "b");
    }

    #[tokio::test]
    async fn latest_on_empty_run_fails() {
        let store = MemoryCheckpointStore::new();
        let err = store.latest("ghost").await.unwrap_err();
        assert!(matches!(err, CheckpointError::EmptyRun(_)));
    }

    #[tokio::test]
    async fn delete_run_removes_everything() {
        let store = MemoryCheckpointStore::new();
        store
            .save("run-1", "a", vec![], meta("run-1", "a"))
            .await
            .unwrap();
        store
            .save("run-2", "a", vec![], meta("run-2", "a"))
            .await
            .unwrap();

        store.delete_run("run-1").await.unwrap();
        assert_eq!(store.run_count().await, 1);
        assert!(store.list("run-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn closed_store_rejects_operations() {
        let store = MemoryCheckpointStore::new();
        store.close().await.unwrap();
        let err = store
            .save("run-1", "a", vec![], meta("run-1", "a"))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckpointError::Closed));
    }

    #[tokio::test]
    async fn blank_keys_are_rejected() {
        let store = MemoryCheckpointStore::new();
        let err = store
            .save("", "a", vec![], meta("", "a"))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckpointError::Invalid(_)));
    }
}
