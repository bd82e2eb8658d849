//! Fork/join execution: parallel branches with state cloning and merging.
//!
//! When the runner reaches a fork (a node with two or more simple targets),
//! it clones the current state once per branch, optionally enriches each
//! clone through [`BranchHook::on_fork`], and schedules every branch as its
//! own tokio task driving the sequential loop with the fork's join node as
//! terminator. Admission is throttled by an optional semaphore
//! ([`ForkJoinConfig::max_concurrency`]); each branch runs under a child
//! cancellation token so a failing sibling (with
//! [`ForkJoinConfig::fail_fast`]) or an expired
//! [`ForkJoinConfig::merge_timeout`] cancels the rest cooperatively.
//!
//! After all branches settle, [`BranchHook::on_join`] may inspect the branch
//! states, and [`GraphState::merge_branches`] folds them back into a single
//! state that continues sequential execution at the join node.

use super::options::RunOptions;
use super::{RunSegment, Terminator};
use crate::context::Context;
use crate::error::{BoxError, GraphError, Result};
use crate::graph::compile::{CompiledGraph, ForkJoinPair};
use crate::state::GraphState;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Concurrency, failure, and timeout behavior for fork/join sections.
#[derive(Debug, Clone)]
pub struct ForkJoinConfig {
    /// Maximum branches in flight at once; `0` means unlimited.
    pub max_concurrency: usize,

    /// Cancel remaining branches as soon as one fails. When `false`, all
    /// branches run to completion and the first observed error is reported.
    pub fail_fast: bool,

    /// Bound on the total fork/join duration. Expiry cancels in-flight
    /// branches and fails the fork with a cancellation scoped to the fork
    /// node.
    pub merge_timeout: Option<Duration>,
}

impl Default for ForkJoinConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 0,
            fail_fast: true,
            merge_timeout: None,
        }
    }
}

impl ForkJoinConfig {
    /// Defaults: unlimited concurrency, fail-fast, no timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Throttle branch admission; `0` means unlimited.
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    /// Control whether the first branch failure cancels its siblings.
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Bound the total fork/join duration.
    pub fn with_merge_timeout(mut self, timeout: Duration) -> Self {
        self.merge_timeout = Some(timeout);
        self
    }
}

/// Hooks invoked around fork/join execution.
///
/// Both methods default to no-ops; implement the ones a use case needs -
/// `on_fork` to give each branch customized state (an isolated working
/// directory, a branch tag), `on_join` for cross-branch validation before
/// the merge.
#[async_trait]
pub trait BranchHook<S: GraphState>: Send + Sync {
    /// Called once per branch with its freshly cloned state, before the
    /// branch is scheduled. An error aborts the fork.
    async fn on_fork(&self, _branch_id: &str, _state: &mut S) -> std::result::Result<(), BoxError> {
        Ok(())
    }

    /// Called once with every branch's final state, after all branches
    /// completed and before the merge. An error aborts the fork.
    async fn on_join(
        &self,
        _branches: &BTreeMap<String, S>,
    ) -> std::result::Result<(), BoxError> {
        Ok(())
    }
}

impl<S: GraphState> CompiledGraph<S> {
    /// Execute one fork/join section and return the merged state. The
    /// caller continues sequential execution at `pair.join`.
    pub(crate) async fn run_fork(
        &self,
        ctx: &Context,
        base: S,
        fork: &str,
        pair: &ForkJoinPair,
        options: &RunOptions,
    ) -> Result<S> {
        let config = &self.fork_config;
        tracing::debug!(fork = %fork, branches = pair.branches.len(), "entering fork");

        let mut branch_states: Vec<(String, S)> = Vec::with_capacity(pair.branches.len());
        for branch in &pair.branches {
            let mut cloned = base
                .clone_for_branch(branch)
                .map_err(|e| GraphError::fork_join(fork, branch.clone(), e))?;
            if let Some(hook) = &self.branch_hook {
                hook.on_fork(branch, &mut cloned).await.map_err(|e| {
                    GraphError::fork_join(
                        fork,
                        branch.clone(),
                        GraphError::node_failure(branch.clone(), e),
                    )
                })?;
            }
            branch_states.push((branch.clone(), cloned));
        }

        let branch_root = ctx.child();
        let semaphore = (config.max_concurrency > 0)
            .then(|| Arc::new(Semaphore::new(config.max_concurrency)));
        let mut tasks: JoinSet<(String, Result<S>)> = JoinSet::new();

        for (branch, branch_state) in branch_states {
            let graph = self.clone();
            let branch_ctx = branch_root.clone();
            let options = options.clone();
            let semaphore = semaphore.clone();
            let join = pair.join.clone();

            tasks.spawn(async move {
                let _permit = match semaphore {
                    Some(semaphore) => {
                        tokio::select! {
                            permit = semaphore.acquire_owned() => match permit {
                                Ok(permit) => Some(permit),
                                Err(_) => {
                                    return (
                                        branch,
                                        Err(GraphError::state_error(None, "fork semaphore closed")),
                                    );
                                }
                            },
                            _ = branch_ctx.cancelled() => {
                                return (
                                    branch,
                                    Err(GraphError::Cancelled {
                                        node: None,
                                        was_executing: false,
                                    }),
                                );
                            }
                        }
                    }
                    None => None,
                };

                let result = graph
                    .run_segment(RunSegment {
                        ctx: branch_ctx,
                        start: branch.clone(),
                        terminator: Terminator::Join(join),
                        checkpoints: false,
                        options: &options,
                        reporter: None,
                    }, branch_state)
                    .await;
                (branch, result)
            });
        }

        let mut results: BTreeMap<String, S> = BTreeMap::new();
        let mut first_error: Option<(String, GraphError)> = None;

        let collect = async {
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((branch, Ok(state))) => {
                        results.insert(branch, state);
                    }
                    Ok((branch, Err(err))) => {
                        tracing::warn!(fork = %fork, branch = %branch, error = %err, "fork branch failed");
                        if first_error.is_none() {
                            if config.fail_fast {
                                branch_root.cancellation_token().cancel();
                            }
                            first_error = Some((branch, err));
                        }
                    }
                    Err(join_err) => {
                        // Branch panics are caught inside the segment; this
                        // covers task-level aborts.
                        if first_error.is_none() {
                            if config.fail_fast {
                                branch_root.cancellation_token().cancel();
                            }
                            first_error = Some((
                                fork.to_string(),
                                GraphError::Panic {
                                    node: fork.to_string(),
                                    message: join_err.to_string(),
                                    backtrace: String::new(),
                                },
                            ));
                        }
                    }
                }
            }
        };

        match config.merge_timeout {
            Some(limit) => {
                if tokio::time::timeout(limit, collect).await.is_err() {
                    branch_root.cancellation_token().cancel();
                    tasks.shutdown().await;
                    tracing::warn!(fork = %fork, timeout_ms = limit.as_millis() as u64, "fork merge timeout expired");
                    return Err(GraphError::Cancelled {
                        node: Some(fork.to_string()),
                        was_executing: true,
                    });
                }
            }
            None => collect.await,
        }

        if let Some((branch, err)) = first_error {
            return Err(GraphError::fork_join(fork, branch, err));
        }

        if let Some(hook) = &self.branch_hook {
            hook.on_join(&results)
                .await
                .map_err(|e| GraphError::node_failure(fork, e))?;
        }

        let merged = base.merge_branches(&results)?;
        tracing::debug!(fork = %fork, join = %pair.join, "fork branches merged");
        Ok(merged)
    }
}
