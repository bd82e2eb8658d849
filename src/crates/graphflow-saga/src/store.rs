//! Saga execution persistence.

use crate::error::{Result, SagaError};
use crate::execution::{SagaExecution, SagaStatus};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Filter for [`SagaStore::list`].
#[derive(Debug, Clone, Default)]
pub struct ExecutionFilter {
    /// Only executions of this saga.
    pub saga_name: Option<String>,
    /// Only executions in this status.
    pub status: Option<SagaStatus>,
    /// Cap on the number of records returned.
    pub limit: Option<usize>,
}

impl ExecutionFilter {
    /// Match everything.
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to one saga name.
    pub fn saga(mut self, name: impl Into<String>) -> Self {
        self.saga_name = Some(name.into());
        self
    }

    /// Restrict to one status.
    pub fn status(mut self, status: SagaStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Cap the result count.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, execution: &SagaExecution) -> bool {
        if let Some(name) = &self.saga_name {
            if &execution.saga_name != name {
                return false;
            }
        }
        if let Some(status) = self.status {
            if execution.status != status {
                return false;
            }
        }
        true
    }
}

/// Pluggable persistence for saga executions.
///
/// The orchestrator writes through this trait on every status transition;
/// reads return owned records.
#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Persist a new execution. Fails if the id already exists.
    async fn create(&self, execution: &SagaExecution) -> Result<()>;

    /// Replace the stored record for an existing execution.
    async fn update(&self, execution: &SagaExecution) -> Result<()>;

    /// Fetch an execution by id.
    async fn get(&self, execution_id: &str) -> Result<SagaExecution>;

    /// Executions matching `filter`, oldest first.
    async fn list(&self, filter: &ExecutionFilter) -> Result<Vec<SagaExecution>>;

    /// Remove an execution record.
    async fn delete(&self, execution_id: &str) -> Result<()>;
}

/// In-memory saga store.
#[derive(Clone, Default)]
pub struct MemorySagaStore {
    executions: Arc<RwLock<HashMap<String, SagaExecution>>>,
}

impl MemorySagaStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored executions.
    pub async fn len(&self) -> usize {
        self.executions.read().await.len()
    }

    /// True when nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.executions.read().await.is_empty()
    }
}

#[async_trait]
impl SagaStore for MemorySagaStore {
    async fn create(&self, execution: &SagaExecution) -> Result<()> {
        let mut executions = self.executions.write().await;
        if executions.contains_key(&execution.id) {
            return Err(SagaError::InvalidState(format!(
                "execution '{}' already exists",
                execution.id
            )));
        }
        executions.insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    async fn update(&self, execution: &SagaExecution) -> Result<()> {
        let mut executions = self.executions.write().await;
        if !executions.contains_key(&execution.id) {
            return Err(SagaError::UnknownExecution(execution.id.clone()));
        }
        executions.insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    async fn get(&self, execution_id: &str) -> Result<SagaExecution> {
        self.executions
            .read()
            .await
            .get(execution_id)
            .cloned()
            .ok_or_else(|| SagaError::UnknownExecution(execution_id.to_string()))
    }

    async fn list(&self, filter: &ExecutionFilter) -> Result<Vec<SagaExecution>> {
        let executions = self.executions.read().await;
        let mut matching: Vec<SagaExecution> = executions
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            matching.truncate(limit);
        }
        Ok(matching)
    }

    async fn delete(&self, execution_id: &str) -> Result<()> {
        self.executions.write().await.remove(execution_id);
        Ok(())
    }
}
