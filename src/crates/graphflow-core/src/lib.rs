//! # graphflow-core - graph-based workflow orchestration
//!
//! Build a directed graph of async state-transforming nodes, compile it,
//! and run it to completion with conditional routing, loops, parallel
//! fork/join, durable checkpoints, out-of-band signals, and read-only
//! queries.
//!
//! ## Core concepts
//!
//! - [`Graph`] - the mutable builder: register nodes (`(Context, S) -> S`),
//!   wire simple and conditional edges, pick an entry point.
//! - [`CompiledGraph`] - the validated, immutable snapshot produced by
//!   [`Graph::compile`]; safe to share across concurrent runs.
//! - [`GraphState`] - the bound on the user state type `S`: serde-encodable,
//!   cloneable per fork branch, mergeable at the join.
//! - [`Context`] - the per-node execution context: cancellation token, run
//!   and node ids, injected services.
//! - [`RunOptions`] - per-run knobs: checkpointing, iteration bound,
//!   cancellation, telemetry, query publication.
//!
//! ## A minimal run
//!
//! ```rust
//! use graphflow_core::{BoxError, Graph, GraphState, END};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Counter { count: i64 }
//! impl GraphState for Counter {}
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), graphflow_core::GraphError> {
//! let mut graph = Graph::new();
//! graph
//!     .add_node("a", |_ctx, mut s: Counter| async move {
//!         s.count += 1;
//!         Ok::<_, BoxError>(s)
//!     })
//!     .add_node("b", |_ctx, mut s: Counter| async move {
//!         s.count += 1;
//!         Ok::<_, BoxError>(s)
//!     })
//!     .add_edge("a", "b")
//!     .add_edge("b", END)
//!     .set_entry("a");
//!
//! let compiled = graph.compile()?;
//! let done = compiled.run(Counter { count: 0 }).await?;
//! assert_eq!(done.count, 2);
//! # Ok(())
//! # }
//! ```
//!
//! ## Fork/join
//!
//! A node with two or more simple edges is a fork: compilation identifies
//! the unique join node its branches converge on, and the runner executes
//! the branches as concurrent tasks over cloned states, merging them back
//! through [`GraphState::merge_branches`]. See [`ForkJoinConfig`] and
//! [`BranchHook`].
//!
//! ## Checkpoints, signals, queries
//!
//! Enable checkpointing with
//! [`RunOptions::with_checkpointing`] plus [`RunOptions::with_run_id`]; a
//! snapshot is written after every node, and
//! [`CompiledGraph::resume`] re-enters the graph after the last
//! checkpointed node. Signals ([`signal`]) are in-memory fire-and-forget
//! messages to a run; queries ([`query`]) are synchronous read-only views
//! over the runner-published [`RunSnapshot`].

pub mod context;
pub mod error;
pub mod graph;
pub mod query;
pub mod registry;
pub mod runner;
pub mod signal;
pub mod state;

pub use context::Context;
pub use error::{BoxError, GraphError, Result};
pub use graph::{is_end, CompiledGraph, ForkJoinPair, Graph, NodeFn, NodeId, RouterFn, END};
pub use query::{QueryArgs, QueryError, QueryExecutor, QueryRegistry, RunSnapshot, RunStatus};
pub use registry::{Registry, RegistryError};
pub use runner::{
    BranchHook, ForkJoinConfig, RunOptions, DEFAULT_MAX_ITERATIONS, MAX_ITERATION_CEILING,
};
pub use signal::{
    MemorySignalStore, ProcessOutcome, Signal, SignalDispatcher, SignalError, SignalHandler,
    SignalRegistry, SignalStatus, SignalStore,
};
pub use state::GraphState;

// The checkpoint layer is a separate crate; re-export the pieces run
// options and resume take.
pub use graphflow_checkpoint::{
    Checkpoint, CheckpointError, CheckpointHeader, CheckpointMetadata, CheckpointStore,
    JsonSerializer, MemoryCheckpointStore, SerializerProtocol, SqliteCheckpointStore,
};
