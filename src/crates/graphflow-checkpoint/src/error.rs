//! Error types for the checkpoint layer.

use thiserror::Error;

/// Convenience result type using [`CheckpointError`].
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors produced by checkpoint stores and the serializer protocol.
///
/// Save failures are recoverable from the runner's point of view (they are
/// logged and execution continues unless the run was configured to treat
/// them as fatal). Load failures during resume are always fatal: a run whose
/// snapshot cannot be read back cannot proceed.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// No checkpoint exists for the requested `(run_id, node_id)` pair.
    #[error("checkpoint not found for run '{run_id}' at node '{node_id}'")]
    NotFound {
        /// Run the lookup was scoped to.
        run_id: String,
        /// Node the lookup was scoped to.
        node_id: String,
    },

    /// The run has no checkpoints at all.
    #[error("no checkpoints recorded for run '{0}'")]
    EmptyRun(String),

    /// The request was malformed (empty run id, empty node id, ...).
    #[error("invalid checkpoint request: {0}")]
    Invalid(String),

    /// State or metadata could not be encoded or decoded.
    #[error("checkpoint serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backing storage rejected the operation.
    #[error("checkpoint storage failed: {0}")]
    Storage(#[from] sqlx::Error),

    /// The store was closed and can no longer serve requests.
    #[error("checkpoint store is closed")]
    Closed,
}

impl CheckpointError {
    /// Create a [`CheckpointError::NotFound`] for a `(run, node)` pair.
    pub fn not_found(run_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self::NotFound {
            run_id: run_id.into(),
            node_id: node_id.into(),
        }
    }

    /// Create a [`CheckpointError::Invalid`] with a message.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    /// True when the error denotes a missing checkpoint rather than a
    /// storage failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::EmptyRun(_))
    }
}
