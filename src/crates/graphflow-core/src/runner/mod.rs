//! The runner: drives a [`CompiledGraph`] from its entry node to `END`.
//!
//! One step of the sequential loop, in order:
//!
//! 1. Iteration bound check ([`MaxIterations`](crate::GraphError::MaxIterations)
//!    when exceeded).
//! 2. Cooperative cancellation check (between nodes).
//! 3. Node execution under panic protection: an unwind inside a node or
//!    router is caught and surfaced as a typed
//!    [`Panic`](crate::GraphError::Panic) error, never propagated.
//! 4. Checkpoint write (when enabled for the run), before routing. Save
//!    failures are logged and execution continues unless
//!    [`RunOptions::with_checkpoint_failure_fatal`] was set.
//! 5. Routing: a fork enters parallel fork/join execution
//!    ([`fork_join`]), a conditional edge asks its router (also under
//!    panic protection), a simple edge just advances. Routing to `END`
//!    returns the current state.
//!
//! Fork branches drive the same loop with their join node as terminator.

pub mod fork_join;
pub mod options;
pub mod resume;

pub use fork_join::{BranchHook, ForkJoinConfig};
pub use options::{RunOptions, DEFAULT_MAX_ITERATIONS, MAX_ITERATION_CEILING};

use crate::context::Context;
use crate::error::{GraphError, Result};
use crate::graph::compile::CompiledGraph;
use crate::graph::edge::{is_end, NodeId, END};
use crate::query::{QueryExecutor, RunSnapshot, RunStatus};
use crate::state::GraphState;
use futures::future::BoxFuture;
use futures::FutureExt;
use graphflow_checkpoint::{CheckpointMetadata, CheckpointStore, SerializerProtocol};
use serde::Serialize;
use std::any::Any;
use std::backtrace::Backtrace;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Where a segment of sequential execution stops.
#[derive(Debug, Clone)]
pub(crate) enum Terminator {
    /// Run until routing reaches `END`.
    End,
    /// Run until the next node would be this join node (fork branches).
    Join(NodeId),
}

/// Routing decision for a node's outgoing edge.
pub(crate) enum Route {
    End,
    Node(NodeId),
    Fork,
}

/// Parameters for one segment of sequential execution.
pub(crate) struct RunSegment<'a> {
    pub ctx: Context,
    pub start: NodeId,
    pub terminator: Terminator,
    /// Whether this segment writes checkpoints (fork branches do not).
    pub checkpoints: bool,
    pub options: &'a RunOptions,
    pub reporter: Option<&'a RunReporter>,
}

impl<S: GraphState> CompiledGraph<S> {
    /// Run the graph from its entry node with default options.
    pub async fn run(&self, state: S) -> Result<S> {
        self.run_with_options(state, RunOptions::default()).await
    }

    /// Run the graph from its entry node.
    ///
    /// Drives the sequential loop (and any fork/join sections) until
    /// routing reaches `END`, returning the final state or the first typed
    /// error. See [`RunOptions`] for checkpointing, cancellation, and
    /// telemetry knobs.
    #[tracing::instrument(skip_all, fields(run_id = options.run_id.as_deref().unwrap_or("")))]
    pub async fn run_with_options(&self, state: S, options: RunOptions) -> Result<S> {
        if options.checkpoint_store.is_some() && options.run_id.is_none() {
            return Err(GraphError::Configuration(
                "checkpointing requires a run id (use with_run_id)".into(),
            ));
        }

        let ctx = options.base_context();
        let reporter = RunReporter::from_options(&options, self.node_count());
        if let Some(reporter) = &reporter {
            reporter.started(self.entry());
        }
        tracing::debug!(entry = %self.entry, "starting run");

        let result = self
            .run_segment(
                RunSegment {
                    ctx,
                    start: self.entry.clone(),
                    terminator: Terminator::End,
                    checkpoints: true,
                    options: &options,
                    reporter: reporter.as_deref(),
                },
                state,
            )
            .await;

        if let Some(reporter) = &reporter {
            reporter.finished(&result);
        }
        match &result {
            Ok(_) => tracing::debug!("run completed"),
            Err(err) => tracing::warn!(error = %err, "run failed"),
        }
        result
    }

    /// One segment of sequential execution; boxed because fork branches
    /// recurse into it.
    pub(crate) fn run_segment<'a>(
        &'a self,
        segment: RunSegment<'a>,
        state: S,
    ) -> BoxFuture<'a, Result<S>> {
        Box::pin(async move {
            let RunSegment {
                ctx,
                start,
                terminator,
                checkpoints,
                options,
                reporter,
            } = segment;

            let mut state = state;
            let mut current = start;
            let mut iterations: u32 = 0;

            loop {
                if let Terminator::Join(join) = &terminator {
                    if current == *join {
                        return Ok(state);
                    }
                }
                if is_end(&current) {
                    return Ok(state);
                }

                iterations += 1;
                if iterations > options.max_iterations {
                    return Err(GraphError::MaxIterations {
                        node: current,
                        iterations: options.max_iterations,
                        state: serde_json::to_value(&state).ok(),
                    });
                }

                if ctx.is_cancelled() {
                    return Err(GraphError::Cancelled {
                        node: Some(current),
                        was_executing: false,
                    });
                }

                let node_fn = self.nodes.get(&current).cloned().ok_or_else(|| {
                    GraphError::state_error(
                        Some(current.as_str()),
                        "node disappeared from compiled graph",
                    )
                })?;

                if options.tracing_enabled {
                    tracing::trace!(node = %current, iteration = iterations, "node starting");
                }
                let started = Instant::now();

                let node_ctx = ctx.for_node(&current);
                let output = guard_panic(&current, node_fn(node_ctx, state.clone())).await?;
                state = match output {
                    Ok(next_state) => next_state,
                    Err(source) => {
                        if ctx.is_cancelled() {
                            return Err(GraphError::Cancelled {
                                node: Some(current),
                                was_executing: true,
                            });
                        }
                        return Err(GraphError::node_failure(current, source));
                    }
                };

                if options.metrics_enabled {
                    tracing::info!(
                        target: "graphflow::metrics",
                        node = %current,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "node executed"
                    );
                }
                if let Some(reporter) = reporter {
                    reporter.node_executed(&current, &state);
                }

                if checkpoints {
                    if let (Some(store), Some(run_id)) =
                        (&options.checkpoint_store, &options.run_id)
                    {
                        let outcome = write_checkpoint(
                            store.as_ref(),
                            run_id,
                            &current,
                            &state,
                            options.serializer.as_ref(),
                        )
                        .await;
                        if let Err(err) = outcome {
                            if options.checkpoint_failure_fatal {
                                return Err(err);
                            }
                            tracing::warn!(node = %current, error = %err, "checkpoint save failed; continuing");
                        }
                    }
                }

                match self.route_from(&ctx, &current, &state).await? {
                    Route::End => {
                        if let Terminator::Join(join) = &terminator {
                            tracing::debug!(node = %current, join = %join, "branch routed to END before its join");
                        }
                        return Ok(state);
                    }
                    Route::Node(next) => current = next,
                    Route::Fork => {
                        let pair = self.fork_joins.get(&current).ok_or_else(|| {
                            GraphError::state_error(Some(current.as_str()), "fork metadata missing")
                        })?;
                        state = self.run_fork(&ctx, state, &current, pair, options).await?;
                        current = pair.join.clone();
                    }
                }
            }
        })
    }

    /// Decide the hop after `node`, given its output state. Shared by the
    /// live loop and resume.
    pub(crate) async fn route_from(
        &self,
        ctx: &Context,
        node: &str,
        state: &S,
    ) -> Result<Route> {
        if self.fork_joins.contains_key(node) {
            return Ok(Route::Fork);
        }

        if let Some(router) = self.routers.get(node) {
            let router_ctx = ctx.for_node(node);
            let target = guard_panic(node, router(router_ctx, state.clone())).await?;
            if is_end(&target) {
                return Ok(Route::End);
            }
            if target.is_empty() || !self.nodes.contains_key(&target) {
                return Err(GraphError::routing(node, target));
            }
            return Ok(Route::Node(target));
        }

        if let Some(target) = self.simple_edges.get(node).and_then(|t| t.first()) {
            if is_end(target) {
                return Ok(Route::End);
            }
            return Ok(Route::Node(target.clone()));
        }

        Err(GraphError::routing(node, ""))
    }
}

/// Run `fut` with unwind protection, converting a panic into a typed error
/// carrying the recovered payload and a captured stack.
pub(crate) async fn guard_panic<T>(node: &str, fut: impl Future<Output = T>) -> Result<T> {
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(value) => Ok(value),
        Err(payload) => Err(GraphError::Panic {
            node: node.to_string(),
            message: panic_message(payload.as_ref()),
            backtrace: Backtrace::force_capture().to_string(),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

async fn write_checkpoint<S: GraphState>(
    store: &dyn CheckpointStore,
    run_id: &str,
    node_id: &str,
    state: &S,
    serializer: &dyn SerializerProtocol,
) -> Result<()> {
    let value = serde_json::to_value(state)?;
    let bytes = serializer.dumps_value(&value)?;
    let metadata = CheckpointMetadata::new(run_id, node_id);
    store.save(run_id, node_id, bytes, metadata).await?;
    Ok(())
}

/// Publishes [`RunSnapshot`]s to a [`QueryExecutor`] as the run advances.
pub(crate) struct RunReporter {
    executor: Arc<QueryExecutor>,
    target: String,
    node_total: usize,
    executed: AtomicUsize,
}

impl RunReporter {
    pub(crate) fn from_options(options: &RunOptions, node_total: usize) -> Option<Arc<Self>> {
        match (&options.query_executor, &options.run_id) {
            (Some(executor), Some(run_id)) => Some(Arc::new(Self {
                executor: Arc::clone(executor),
                target: run_id.clone(),
                node_total: node_total.max(1),
                executed: AtomicUsize::new(0),
            })),
            _ => None,
        }
    }

    fn publish(
        &self,
        status: RunStatus,
        current_node: &str,
        progress: f64,
        variables: HashMap<String, serde_json::Value>,
    ) {
        self.executor.publish(RunSnapshot {
            target_id: self.target.clone(),
            status,
            progress,
            variables,
            current_node: current_node.to_string(),
        });
    }

    pub(crate) fn started(&self, entry: &str) {
        self.publish(RunStatus::Running, entry, 0.0, HashMap::new());
    }

    pub(crate) fn node_executed<S: Serialize>(&self, node: &str, state: &S) {
        let done = self.executed.fetch_add(1, Ordering::Relaxed) + 1;
        let progress = (done as f64 / self.node_total as f64).min(1.0);
        self.publish(RunStatus::Running, node, progress, variables_of(state));
    }

    pub(crate) fn finished<S: Serialize>(&self, result: &Result<S>) {
        match result {
            Ok(state) => self.publish(RunStatus::Completed, END, 1.0, variables_of(state)),
            Err(err) => {
                let status = if err.is_cancelled() {
                    RunStatus::Cancelled
                } else {
                    RunStatus::Failed
                };
                let done = self.executed.load(Ordering::Relaxed);
                let progress = (done as f64 / self.node_total as f64).min(1.0);
                self.publish(
                    status,
                    err.node_id().unwrap_or_default(),
                    progress,
                    HashMap::new(),
                );
            }
        }
    }
}

fn variables_of<S: Serialize>(state: &S) -> HashMap<String, serde_json::Value> {
    serde_json::to_value(state)
        .ok()
        .and_then(|value| match value {
            serde_json::Value::Object(map) => Some(map.into_iter().collect()),
            _ => None,
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::graph::Graph;
    use serde_json::{json, Value};

    #[tokio::test]
    async fn guard_converts_panics_to_typed_errors() {
        let err = guard_panic("boomer", async {
            panic!("exploded");
        })
        .await
        .unwrap_err();

        match err {
            GraphError::Panic {
                node,
                message,
                backtrace,
            } => {
                assert_eq!(node, "boomer");
                assert_eq!(message, "exploded");
                assert!(!backtrace.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn guard_passes_values_through() {
        let value = guard_panic("ok", async { 7 }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn router_returning_unknown_node_is_a_routing_error() {
        let mut graph = Graph::<Value>::new();
        graph.add_node("a", |_ctx, s| async move { Ok::<_, BoxError>(s) });
        graph.add_conditional_edge("a", |_ctx, _s| async move { "nowhere".to_string() });
        graph.set_entry("a");
        let compiled = graph.compile().unwrap();

        let err = compiled.run(json!({})).await.unwrap_err();
        match err {
            GraphError::Routing { node, target } => {
                assert_eq!(node, "a");
                assert_eq!(target, "nowhere");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn router_returning_empty_string_is_a_routing_error() {
        let mut graph = Graph::<Value>::new();
        graph.add_node("a", |_ctx, s| async move { Ok::<_, BoxError>(s) });
        graph.add_conditional_edge("a", |_ctx, _s| async move { String::new() });
        graph.set_entry("a");
        let compiled = graph.compile().unwrap();

        let err = compiled.run(json!({})).await.unwrap_err();
        assert!(matches!(err, GraphError::Routing { target, .. } if target.is_empty()));
    }

    #[tokio::test]
    async fn checkpointing_without_run_id_is_rejected() {
        use graphflow_checkpoint::MemoryCheckpointStore;

        let mut graph = Graph::<Value>::new();
        graph.add_node("a", |_ctx, s| async move { Ok::<_, BoxError>(s) });
        graph.add_edge("a", END);
        graph.set_entry("a");
        let compiled = graph.compile().unwrap();

        let options =
            RunOptions::new().with_checkpointing(Arc::new(MemoryCheckpointStore::new()));
        let err = compiled.run_with_options(json!({}), options).await.unwrap_err();
        assert!(matches!(err, GraphError::Configuration(_)));
    }
}
