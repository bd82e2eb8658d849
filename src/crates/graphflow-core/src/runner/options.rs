//! Per-run configuration.
//!
//! [`RunOptions`] is a builder-style bag of knobs passed to
//! [`CompiledGraph::run_with_options`](crate::CompiledGraph::run_with_options):
//! checkpointing, the run id, the iteration bound, cancellation, telemetry
//! toggles, and the injected services the [`Context`] exposes to nodes.

use crate::context::Context;
use crate::query::QueryExecutor;
use graphflow_checkpoint::{CheckpointStore, JsonSerializer, SerializerProtocol};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Iteration bound applied when none is configured.
pub const DEFAULT_MAX_ITERATIONS: u32 = 1_000;

/// Hard ceiling on the configurable iteration bound.
pub const MAX_ITERATION_CEILING: u32 = 100_000;

/// Options for a single run of a compiled graph.
#[derive(Clone)]
pub struct RunOptions {
    pub(crate) checkpoint_store: Option<Arc<dyn CheckpointStore>>,
    pub(crate) run_id: Option<String>,
    pub(crate) checkpoint_failure_fatal: bool,
    pub(crate) max_iterations: u32,
    pub(crate) cancellation: CancellationToken,
    pub(crate) metrics_enabled: bool,
    pub(crate) tracing_enabled: bool,
    pub(crate) serializer: Arc<dyn SerializerProtocol>,
    pub(crate) query_executor: Option<Arc<QueryExecutor>>,
    pub(crate) model_client: Option<Arc<dyn Any + Send + Sync>>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            checkpoint_store: None,
            run_id: None,
            checkpoint_failure_fatal: false,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            cancellation: CancellationToken::new(),
            metrics_enabled: false,
            tracing_enabled: false,
            serializer: Arc::new(JsonSerializer::new()),
            query_executor: None,
            model_client: None,
        }
    }
}

impl RunOptions {
    /// Default options: no checkpointing, iteration bound of
    /// [`DEFAULT_MAX_ITERATIONS`], fresh cancellation token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable per-node checkpointing through `store`. Requires
    /// [`with_run_id`](Self::with_run_id).
    pub fn with_checkpointing(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoint_store = Some(store);
        self
    }

    /// Identify the run. Required when checkpointing is enabled.
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Treat a failed checkpoint save as fatal for the run. Off by default
    /// (failures are logged and execution continues).
    pub fn with_checkpoint_failure_fatal(mut self, fatal: bool) -> Self {
        self.checkpoint_failure_fatal = fatal;
        self
    }

    /// Bound the number of node executions for this run.
    ///
    /// # Panics
    ///
    /// If `max` is zero or exceeds [`MAX_ITERATION_CEILING`].
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        if max == 0 || max > MAX_ITERATION_CEILING {
            panic!(
                "max iterations must be between 1 and {MAX_ITERATION_CEILING}, got {max}"
            );
        }
        self.max_iterations = max;
        self
    }

    /// Attach a cancellation token; cancelling it aborts the run at the
    /// next between-nodes check.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Emit per-node timing events.
    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }

    /// Emit step-level trace events.
    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.tracing_enabled = enabled;
        self
    }

    /// Replace the state serializer used for checkpoints (JSON by default).
    pub fn with_serializer(mut self, serializer: Arc<dyn SerializerProtocol>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Publish run snapshots to `executor`, making the run queryable.
    /// Requires [`with_run_id`](Self::with_run_id) to take effect.
    pub fn with_query_executor(mut self, executor: Arc<QueryExecutor>) -> Self {
        self.query_executor = Some(executor);
        self
    }

    /// Inject a model client into the node [`Context`].
    pub fn with_model_client(mut self, client: Arc<dyn Any + Send + Sync>) -> Self {
        self.model_client = Some(client);
        self
    }

    /// The context handed to the first node, before per-node derivation.
    pub(crate) fn base_context(&self) -> Context {
        let mut ctx = Context::new().with_cancellation(self.cancellation.clone());
        if let Some(run_id) = &self.run_id {
            ctx = ctx.with_run_id(run_id.clone());
        }
        if let Some(store) = &self.checkpoint_store {
            ctx = ctx.with_checkpoint_store(Arc::clone(store));
        }
        if let Some(client) = &self.model_client {
            ctx = ctx.with_model_client(Arc::clone(client));
        }
        ctx
    }
}

impl fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptions")
            .field("run_id", &self.run_id)
            .field("checkpointing", &self.checkpoint_store.is_some())
            .field("checkpoint_failure_fatal", &self.checkpoint_failure_fatal)
            .field("max_iterations", &self.max_iterations)
            .field("metrics", &self.metrics_enabled)
            .field("tracing", &self.tracing_enabled)
            .finish()
    }
}
