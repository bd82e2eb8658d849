//! Error types for graph construction and execution.
//!
//! Every failure the engine can surface is a [`GraphError`] variant, grouped
//! by origin:
//!
//! ```text
//! GraphError
//! ├── Compilation    - structural graph problems found by compile()
//! ├── Configuration  - invalid run options
//! ├── NodeFailure    - a node function returned an error (wrapped with node id)
//! ├── Panic          - a node or router unwound (recovered, never escapes)
//! ├── Routing        - a router returned an empty or unknown target
//! ├── MaxIterations  - the iteration bound was reached
//! ├── Cancelled      - the ambient context ended
//! ├── Checkpoint     - persistence failures (fatal or logged per options)
//! ├── ForkJoin       - a parallel branch failed (wrapped with fork/branch ids)
//! ├── State          - state capability failures (clone/merge)
//! └── Serialization  - JSON encode/decode failures
//! ```
//!
//! Errors are inspectable: [`GraphError::node_id`] exposes the originating
//! node where one exists, and `std::error::Error::source` unwraps to the
//! underlying cause.

use graphflow_checkpoint::CheckpointError;
use thiserror::Error;

/// Boxed error type accepted from user code (node functions, hooks).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Convenience result type using [`GraphError`].
pub type Result<T> = std::result::Result<T, GraphError>;

/// All errors produced by the graph engine.
#[derive(Debug, Error)]
pub enum GraphError {
    /// The graph failed structural validation during `compile()`.
    ///
    /// Covers unknown edge targets, missing entry point, no path to END,
    /// simple-edge cycles without a conditional exit, and undecidable
    /// fork/join pairs.
    #[error("graph compilation failed: {0}")]
    Compilation(String),

    /// Run options were inconsistent (e.g. checkpointing without a run id).
    #[error("invalid run configuration: {0}")]
    Configuration(String),

    /// A node function returned an error.
    #[error("node '{node}' failed: {source}")]
    NodeFailure {
        /// Node whose function failed.
        node: String,
        /// The error the node returned.
        #[source]
        source: BoxError,
    },

    /// A node function or router panicked. The unwind is caught by the
    /// runner and never escapes to the caller.
    #[error("node '{node}' panicked: {message}")]
    Panic {
        /// Node (or router owner) that panicked.
        node: String,
        /// Recovered panic payload, stringified.
        message: String,
        /// Stack captured at the recovery site.
        backtrace: String,
    },

    /// A router returned an empty string or an id that is not a node.
    #[error("router at node '{node}' returned invalid target '{target}'")]
    Routing {
        /// Node whose conditional edge misrouted.
        node: String,
        /// The offending target id (possibly empty).
        target: String,
    },

    /// The configured iteration bound was reached.
    #[error("run exceeded {iterations} iterations at node '{node}'")]
    MaxIterations {
        /// Node about to execute when the bound tripped.
        node: String,
        /// The bound that was exceeded.
        iterations: u32,
        /// Best-effort JSON snapshot of the last state.
        state: Option<serde_json::Value>,
    },

    /// The ambient context was cancelled.
    #[error("run cancelled{}{}", if *was_executing { " while executing" } else { " before entering" }, node.as_ref().map(|n| format!(" node '{n}'")).unwrap_or_default())]
    Cancelled {
        /// Node in flight (or up next) when cancellation was observed.
        node: Option<String>,
        /// True when cancellation interrupted a node, false when it was
        /// observed between nodes.
        was_executing: bool,
    },

    /// A checkpoint operation failed.
    ///
    /// Save failures are only surfaced when the run was configured with
    /// fatal checkpoint failures; load failures during resume always are.
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// A fork branch failed; wraps the branch's own error.
    #[error("fork '{fork}' branch '{branch}' failed: {source}")]
    ForkJoin {
        /// The fork node.
        fork: String,
        /// The branch (its entry node id) that failed.
        branch: String,
        /// The branch's underlying error.
        #[source]
        source: Box<GraphError>,
    },

    /// A state capability (branch clone, merge) failed.
    #[error("state error{}: {message}", node.as_ref().map(|n| format!(" at node '{n}'")).unwrap_or_default())]
    State {
        /// Node context, when the failure is attributable to one.
        node: Option<String>,
        /// Description of the failure.
        message: String,
    },

    /// State could not be encoded to or decoded from JSON.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GraphError {
    /// Wrap a node function's error with its node id.
    pub fn node_failure(node: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::NodeFailure {
            node: node.into(),
            source: source.into(),
        }
    }

    /// Build a routing error for an invalid router result.
    pub fn routing(node: impl Into<String>, target: impl Into<String>) -> Self {
        Self::Routing {
            node: node.into(),
            target: target.into(),
        }
    }

    /// Build a state-capability error.
    pub fn state_error(node: Option<&str>, message: impl Into<String>) -> Self {
        Self::State {
            node: node.map(str::to_string),
            message: message.into(),
        }
    }

    /// Wrap a failing branch's error with the fork and branch ids.
    pub fn fork_join(
        fork: impl Into<String>,
        branch: impl Into<String>,
        source: GraphError,
    ) -> Self {
        Self::ForkJoin {
            fork: fork.into(),
            branch: branch.into(),
            source: Box::new(source),
        }
    }

    /// The node id this error originated at, where one applies.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::NodeFailure { node, .. }
            | Self::Panic { node, .. }
            | Self::Routing { node, .. }
            | Self::MaxIterations { node, .. } => Some(node),
            Self::ForkJoin { fork, .. } => Some(fork),
            Self::Cancelled { node, .. } | Self::State { node, .. } => node.as_deref(),
            _ => None,
        }
    }

    /// True for either cancellation variant.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}
