//! Resuming runs from their latest checkpoint.
//!
//! [`CompiledGraph::resume`] loads the most recent checkpoint of a run,
//! deserializes its state, and re-enters the sequential loop at the node
//! *following* the checkpointed one - determined by the same routing rules
//! as live execution, router invocations included. A run whose last
//! checkpoint was its terminal node returns the recorded state immediately.
//!
//! Checkpoint load failures here are always fatal: a run whose snapshot
//! cannot be read back cannot proceed. [`CompiledGraph::resume_from`]
//! substitutes a caller-supplied state for the stored one, which is the
//! escape hatch for state migrations.

use super::options::RunOptions;
use super::{Route, RunReporter, RunSegment, Terminator};
use crate::error::{GraphError, Result};
use crate::graph::compile::CompiledGraph;
use crate::state::GraphState;
use graphflow_checkpoint::CheckpointStore;
use std::sync::Arc;

impl<S: GraphState> CompiledGraph<S> {
    /// Resume a run from its latest checkpoint with default options.
    pub async fn resume(&self, store: Arc<dyn CheckpointStore>, run_id: &str) -> Result<S> {
        self.resume_with_options(store, run_id, RunOptions::default())
            .await
    }

    /// Resume a run from its latest checkpoint.
    ///
    /// The store and run id are installed into the options, so the resumed
    /// portion keeps checkpointing into the same run.
    #[tracing::instrument(skip_all, fields(run_id = run_id))]
    pub async fn resume_with_options(
        &self,
        store: Arc<dyn CheckpointStore>,
        run_id: &str,
        options: RunOptions,
    ) -> Result<S> {
        let checkpoint = store.latest(run_id).await?;
        let value = options.serializer.loads_value(&checkpoint.state)?;
        let state: S = serde_json::from_value(value)?;
        tracing::info!(last_node = %checkpoint.node_id, "resuming from checkpoint");
        self.resume_at(store, run_id, checkpoint.node_id, state, options)
            .await
    }

    /// Resume a run with a caller-supplied state override (state
    /// migrations). The resume position still comes from the latest
    /// checkpoint.
    pub async fn resume_from(
        &self,
        store: Arc<dyn CheckpointStore>,
        run_id: &str,
        state: S,
    ) -> Result<S> {
        self.resume_from_with_options(store, run_id, state, RunOptions::default())
            .await
    }

    /// [`resume_from`](Self::resume_from) with explicit options.
    #[tracing::instrument(skip_all, fields(run_id = run_id))]
    pub async fn resume_from_with_options(
        &self,
        store: Arc<dyn CheckpointStore>,
        run_id: &str,
        state: S,
        options: RunOptions,
    ) -> Result<S> {
        let checkpoint = store.latest(run_id).await?;
        tracing::info!(last_node = %checkpoint.node_id, "resuming from checkpoint with state override");
        self.resume_at(store, run_id, checkpoint.node_id, state, options)
            .await
    }

    async fn resume_at(
        &self,
        store: Arc<dyn CheckpointStore>,
        run_id: &str,
        last_node: String,
        state: S,
        mut options: RunOptions,
    ) -> Result<S> {
        options.checkpoint_store = Some(store);
        options.run_id = Some(run_id.to_string());

        let ctx = options.base_context();
        let reporter = RunReporter::from_options(&options, self.node_count());
        if let Some(reporter) = &reporter {
            reporter.started(&last_node);
        }

        let result = match self.route_from(&ctx, &last_node, &state).await {
            Err(err) => Err(err),
            Ok(Route::End) => Ok(state),
            Ok(Route::Node(next)) => {
                self.run_segment(
                    RunSegment {
                        ctx,
                        start: next,
                        terminator: Terminator::End,
                        checkpoints: true,
                        options: &options,
                        reporter: reporter.as_deref(),
                    },
                    state,
                )
                .await
            }
            Ok(Route::Fork) => match self.fork_joins.get(&last_node) {
                None => Err(GraphError::state_error(
                    Some(last_node.as_str()),
                    "fork metadata missing",
                )),
                Some(pair) => {
                    match self.run_fork(&ctx, state, &last_node, pair, &options).await {
                        Err(err) => Err(err),
                        Ok(merged) => {
                            self.run_segment(
                                RunSegment {
                                    ctx,
                                    start: pair.join.clone(),
                                    terminator: Terminator::End,
                                    checkpoints: true,
                                    options: &options,
                                    reporter: reporter.as_deref(),
                                },
                                merged,
                            )
                            .await
                        }
                    }
                }
            },
        };

        if let Some(reporter) = &reporter {
            reporter.finished(&result);
        }
        result
    }
}
