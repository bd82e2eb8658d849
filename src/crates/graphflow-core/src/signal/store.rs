//! Signal storage: enqueue by target, drain pending in FIFO order.

use super::{Signal, SignalError, SignalStatus};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Pluggable signal storage.
///
/// Only the in-memory implementation ships with the crate; signals are not
/// durable across process restarts.
#[async_trait]
pub trait SignalStore: Send + Sync {
    /// Append a signal to its target's queue.
    async fn enqueue(&self, signal: Signal) -> Result<(), SignalError>;

    /// Pending signals for a target, in enqueue order.
    async fn pending(&self, target_id: &str) -> Result<Vec<Signal>, SignalError>;

    /// Fetch a signal by id.
    async fn get(&self, signal_id: &str) -> Result<Signal, SignalError>;

    /// Mark a pending signal processed. Terminal.
    async fn mark_processed(&self, signal_id: &str) -> Result<(), SignalError>;

    /// Mark a pending signal failed with a reason. Terminal.
    async fn mark_failed(&self, signal_id: &str, error: &str) -> Result<(), SignalError>;
}

#[derive(Default)]
struct Inner {
    /// Signals per target, in enqueue order.
    queues: HashMap<String, Vec<Signal>>,
    /// Signal id -> owning target, for id-based lookups.
    index: HashMap<String, String>,
}

/// In-memory signal store.
#[derive(Clone, Default)]
pub struct MemorySignalStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemorySignalStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored signals, any status.
    pub async fn len(&self) -> usize {
        self.inner.read().await.index.len()
    }

    /// True when no signals are stored.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.index.is_empty()
    }

    async fn update_status(
        &self,
        signal_id: &str,
        status: SignalStatus,
        error: Option<String>,
    ) -> Result<(), SignalError> {
        let mut inner = self.inner.write().await;
        let target = inner
            .index
            .get(signal_id)
            .cloned()
            .ok_or_else(|| SignalError::NotFound(signal_id.to_string()))?;
        let signal = inner
            .queues
            .get_mut(&target)
            .and_then(|queue| queue.iter_mut().find(|s| s.id == signal_id))
            .ok_or_else(|| SignalError::NotFound(signal_id.to_string()))?;

        if signal.is_terminal() {
            return Err(SignalError::Terminal {
                id: signal.id.clone(),
                status: signal.status,
            });
        }
        signal.status = status;
        signal.processed_at = Some(Utc::now());
        signal.error = error;
        Ok(())
    }
}

#[async_trait]
impl SignalStore for MemorySignalStore {
    async fn enqueue(&self, signal: Signal) -> Result<(), SignalError> {
        if signal.name.trim().is_empty() {
            return Err(SignalError::InvalidSignal("name must not be empty".into()));
        }
        if signal.target_id.trim().is_empty() {
            return Err(SignalError::InvalidSignal(
                "target_id must not be empty".into(),
            ));
        }

        let mut inner = self.inner.write().await;
        inner
            .index
            .insert(signal.id.clone(), signal.target_id.clone());
        inner
            .queues
            .entry(signal.target_id.clone())
            .or_default()
            .push(signal);
        Ok(())
    }

    async fn pending(&self, target_id: &str) -> Result<Vec<Signal>, SignalError> {
        let inner = self.inner.read().await;
        Ok(inner
            .queues
            .get(target_id)
            .map(|queue| {
                queue
                    .iter()
                    .filter(|s| s.status == SignalStatus::Pending)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get(&self, signal_id: &str) -> Result<Signal, SignalError> {
        let inner = self.inner.read().await;
        let target = inner
            .index
            .get(signal_id)
            .ok_or_else(|| SignalError::NotFound(signal_id.to_string()))?;
        inner
            .queues
            .get(target)
            .and_then(|queue| queue.iter().find(|s| s.id == signal_id))
            .cloned()
            .ok_or_else(|| SignalError::NotFound(signal_id.to_string()))
    }

    async fn mark_processed(&self, signal_id: &str) -> Result<(), SignalError> {
        self.update_status(signal_id, SignalStatus::Processed, None)
            .await
    }

    async fn mark_failed(&self, signal_id: &str, error: &str) -> Result<(), SignalError> {
        self.update_status(signal_id, SignalStatus::Failed, Some(error.to_string()))
            .await
    }
}
