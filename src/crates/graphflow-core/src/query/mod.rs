//! Read-only queries over a run's current state.
//!
//! The runner publishes a [`RunSnapshot`] per step when
//! [`RunOptions::with_query_executor`](crate::RunOptions::with_query_executor)
//! is set; the [`QueryExecutor`] serves synchronous, side-effect-free
//! queries against the latest snapshot. Built-in queries cover `status`,
//! `progress`, `current_node`, `variables`, and `state`; custom queries may
//! be registered by name.
//!
//! Query handlers must be synchronous and fast; the executor evaluates them
//! on a blocking thread under a short timeout (5 seconds unless configured
//! otherwise).

use crate::context::Context;
use crate::registry::{Registry, RegistryError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Status of a run as seen by queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Not started yet.
    Pending,
    /// Executing nodes.
    Running,
    /// Reached `END`.
    Completed,
    /// Returned an error.
    Failed,
    /// Observed cancellation.
    Cancelled,
}

/// The runner-published view of a run that queries compute over.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSnapshot {
    /// The run this snapshot describes.
    pub target_id: String,

    /// Current status.
    pub status: RunStatus,

    /// Completed node executions over the graph's node count, clamped to
    /// 1.0 (loops can execute more nodes than the graph holds).
    pub progress: f64,

    /// Top-level fields of the JSON-encoded state (empty for non-object
    /// states).
    pub variables: HashMap<String, serde_json::Value>,

    /// Node currently executing (or last executed).
    pub current_node: String,
}

impl RunSnapshot {
    /// A pending snapshot for `target_id`.
    pub fn new(target_id: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            status: RunStatus::Pending,
            progress: 0.0,
            variables: HashMap::new(),
            current_node: String::new(),
        }
    }
}

/// Errors from the query facility.
#[derive(Debug, Error)]
pub enum QueryError {
    /// No query registered under this name.
    #[error("unknown query '{0}'")]
    UnknownQuery(String),

    /// No snapshot published for this target.
    #[error("unknown query target '{0}'")]
    UnknownTarget(String),

    /// A query under this name already exists.
    #[error("query '{0}' is already registered")]
    AlreadyRegistered(String),

    /// The handler exceeded the executor's timeout.
    #[error("query '{query}' timed out after {timeout_ms}ms")]
    Timeout {
        /// The query that timed out.
        query: String,
        /// The timeout that was exceeded.
        timeout_ms: u64,
    },

    /// The handler failed.
    #[error("query handler failed: {0}")]
    Handler(String),
}

/// Arguments passed to a query handler.
pub type QueryArgs = HashMap<String, serde_json::Value>;

/// A query handler: a synchronous, read-only computation over a snapshot.
pub type QueryFn = Arc<
    dyn Fn(&Context, &RunSnapshot, &QueryArgs) -> Result<serde_json::Value, QueryError>
        + Send
        + Sync,
>;

/// Thread-safe map from query name to handler, pre-loaded with the
/// built-in queries.
pub struct QueryRegistry {
    queries: Registry<QueryFn>,
}

impl Default for QueryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryRegistry {
    /// A registry with the built-in queries registered.
    pub fn new() -> Self {
        let registry = Self {
            queries: Registry::new(),
        };
        registry.install_builtins();
        registry
    }

    fn install_builtins(&self) {
        let builtins: [(&str, QueryFn); 5] = [
            (
                "status",
                Arc::new(|_ctx, snapshot, _args| {
                    serde_json::to_value(snapshot.status)
                        .map_err(|e| QueryError::Handler(e.to_string()))
                }),
            ),
            (
                "progress",
                Arc::new(|_ctx, snapshot, _args| Ok(serde_json::json!(snapshot.progress))),
            ),
            (
                "current_node",
                Arc::new(|_ctx, snapshot, _args| {
                    Ok(serde_json::json!(snapshot.current_node))
                }),
            ),
            (
                "variables",
                Arc::new(|_ctx, snapshot, _args| {
                    serde_json::to_value(&snapshot.variables)
                        .map_err(|e| QueryError::Handler(e.to_string()))
                }),
            ),
            (
                "state",
                Arc::new(|_ctx, snapshot, _args| {
                    serde_json::to_value(snapshot)
                        .map_err(|e| QueryError::Handler(e.to_string()))
                }),
            ),
        ];
        for (name, handler) in builtins {
            // A fresh registry cannot collide on built-in names.
            let _ = self.queries.register(name, handler);
        }
    }

    /// Register a custom query. Refused if the name is taken (including by
    /// a built-in).
    pub fn register<F>(&self, name: impl Into<String>, handler: F) -> Result<(), QueryError>
    where
        F: Fn(&Context, &RunSnapshot, &QueryArgs) -> Result<serde_json::Value, QueryError>
            + Send
            + Sync
            + 'static,
    {
        self.queries
            .register(name, Arc::new(handler) as QueryFn)
            .map_err(|err| match err {
                RegistryError::AlreadyRegistered(name) => QueryError::AlreadyRegistered(name),
                RegistryError::NotRegistered(name) => QueryError::UnknownQuery(name),
            })
    }

    /// Remove a query by name.
    pub fn unregister(&self, name: &str) -> Result<(), QueryError> {
        self.queries
            .unregister(name)
            .map(|_| ())
            .map_err(|_| QueryError::UnknownQuery(name.to_string()))
    }

    /// The handler for `name`, if registered.
    pub fn get(&self, name: &str) -> Option<QueryFn> {
        self.queries.get(name)
    }
}

const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Serves queries against the latest published snapshots.
pub struct QueryExecutor {
    registry: Arc<QueryRegistry>,
    snapshots: RwLock<HashMap<String, RunSnapshot>>,
    timeout: Duration,
    context: Context,
}

impl Default for QueryExecutor {
    fn default() -> Self {
        Self::new(Arc::new(QueryRegistry::new()))
    }
}

impl QueryExecutor {
    /// An executor over `registry` with the default timeout.
    pub fn new(registry: Arc<QueryRegistry>) -> Self {
        Self {
            registry,
            snapshots: RwLock::new(HashMap::new()),
            timeout: DEFAULT_QUERY_TIMEOUT,
            context: Context::new(),
        }
    }

    /// Replace the per-query timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The registry backing this executor.
    pub fn registry(&self) -> &Arc<QueryRegistry> {
        &self.registry
    }

    /// Publish (or replace) the snapshot for a target. Called by the
    /// runner after every node.
    pub fn publish(&self, snapshot: RunSnapshot) {
        self.snapshots
            .write()
            .insert(snapshot.target_id.clone(), snapshot);
    }

    /// Drop the snapshot for a target.
    pub fn remove(&self, target_id: &str) {
        self.snapshots.write().remove(target_id);
    }

    /// The latest snapshot for a target, if one was published.
    pub fn snapshot(&self, target_id: &str) -> Option<RunSnapshot> {
        self.snapshots.read().get(target_id).cloned()
    }

    /// Evaluate a query against a target's latest snapshot.
    ///
    /// The handler runs on a blocking thread under the executor's timeout.
    pub async fn execute(
        &self,
        target_id: &str,
        query: &str,
        args: QueryArgs,
    ) -> Result<serde_json::Value, QueryError> {
        let snapshot = self
            .snapshot(target_id)
            .ok_or_else(|| QueryError::UnknownTarget(target_id.to_string()))?;
        let handler = self
            .registry
            .get(query)
            .ok_or_else(|| QueryError::UnknownQuery(query.to_string()))?;

        let ctx = self.context.clone();
        let task =
            tokio::task::spawn_blocking(move || handler(&ctx, &snapshot, &args));

        match tokio::time::timeout(self.timeout, task).await {
            Err(_) => Err(QueryError::Timeout {
                query: query.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
            Ok(Err(join_err)) => Err(QueryError::Handler(join_err.to_string())),
            Ok(Ok(result)) => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn executor_with_snapshot() -> QueryExecutor {
        let executor = QueryExecutor::default();
        executor.publish(RunSnapshot {
            target_id: "run-1".into(),
            status: RunStatus::Running,
            progress: 0.5,
            variables: HashMap::from([("count".to_string(), json!(2))]),
            current_node: "step2".into(),
        });
        executor
    }

    #[tokio::test]
    async fn builtin_queries_answer_from_snapshot() {
        let executor = executor_with_snapshot();

        let status = executor
            .execute("run-1", "status", QueryArgs::new())
            .await
            .unwrap();
        assert_eq!(status, json!("running"));

        let progress = executor
            .execute("run-1", "progress", QueryArgs::new())
            .await
            .unwrap();
        assert_eq!(progress, json!(0.5));

        let node = executor
            .execute("run-1", "current_node", QueryArgs::new())
            .await
            .unwrap();
        assert_eq!(node, json!("step2"));

        let variables = executor
            .execute("run-1", "variables", QueryArgs::new())
            .await
            .unwrap();
        assert_eq!(variables, json!({"count": 2}));
    }

    #[tokio::test]
    async fn state_query_returns_whole_snapshot() {
        let executor = executor_with_snapshot();
        let state = executor
            .execute("run-1", "state", QueryArgs::new())
            .await
            .unwrap();
        assert_eq!(state["target_id"], "run-1");
        assert_eq!(state["current_node"], "step2");
    }

    #[tokio::test]
    async fn unknown_target_and_query_fail() {
        let executor = executor_with_snapshot();
        assert!(matches!(
            executor.execute("ghost", "status", QueryArgs::new()).await,
            Err(QueryError::UnknownTarget(_))
        ));
        assert!(matches!(
            executor.execute("run-1", "nope", QueryArgs::new()).await,
            Err(QueryError::UnknownQuery(_))
        ));
    }

    #[tokio::test]
    async fn custom_queries_can_read_args() {
        let executor = executor_with_snapshot();
        executor
            .registry()
            .register("variable", |_ctx, snapshot, args| {
                let key = args
                    .get("key")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| QueryError::Handler("missing 'key' arg".into()))?;
                Ok(snapshot
                    .variables
                    .get(key)
                    .cloned()
                    .unwrap_or(serde_json::Value::Null))
            })
            .unwrap();

        let args = QueryArgs::from([("key".to_string(), json!("count"))]);
        let value = executor.execute("run-1", "variable", args).await.unwrap();
        assert_eq!(value, json!(2));
    }

    #[tokio::test]
    async fn builtin_names_cannot_be_shadowed() {
        let executor = QueryExecutor::default();
        let err = executor
            .registry()
            .register("status", |_ctx, _snapshot, _args| Ok(json!(null)))
            .unwrap_err();
        assert!(matches!(err, QueryError::AlreadyRegistered(_)));
    }

    #[tokio::test]
    async fn slow_handlers_time_out() {
        let registry = Arc::new(QueryRegistry::new());
        registry
            .register("sleepy", |_ctx, _snapshot, _args| {
                std::thread::sleep(Duration::from_millis(250));
                Ok(json!(null))
            })
            .unwrap();
        let executor = QueryExecutor::new(registry).with_timeout(Duration::from_millis(20));
        executor.publish(RunSnapshot::new("run-1"));

        let err = executor
            .execute("run-1", "sleepy", QueryArgs::new())
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Timeout { .. }));
    }
}
