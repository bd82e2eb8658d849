//! Error types for the saga orchestrator.

use graphflow_core::BoxError;
use thiserror::Error;

/// Convenience result type using [`SagaError`].
pub type Result<T> = std::result::Result<T, SagaError>;

/// Errors produced by saga registration, execution, and compensation.
#[derive(Debug, Error)]
pub enum SagaError {
    /// No saga definition registered under this name.
    #[error("saga '{0}' is not registered")]
    UnknownSaga(String),

    /// A definition with this name already exists.
    #[error("saga '{0}' is already registered")]
    DuplicateSaga(String),

    /// The definition is malformed (empty name, no steps, blank step name).
    #[error("invalid saga definition: {0}")]
    InvalidDefinition(String),

    /// No execution with this id.
    #[error("saga execution '{0}' not found")]
    UnknownExecution(String),

    /// A forward handler failed (after retries).
    #[error("saga step '{step}' failed: {source}")]
    StepFailed {
        /// The failing step's name.
        step: String,
        /// The handler's error.
        #[source]
        source: BoxError,
    },

    /// A step exceeded its deadline.
    #[error("saga step '{step}' timed out after {timeout_ms}ms")]
    StepTimeout {
        /// The step that timed out.
        step: String,
        /// The deadline that was exceeded.
        timeout_ms: u64,
    },

    /// A compensation handler failed. Recorded per step; the compensation
    /// sequence continues past it.
    #[error("compensation for step '{step}' failed: {reason}")]
    CompensationFailed {
        /// The step whose compensation failed.
        step: String,
        /// The handler's error, stringified.
        reason: String,
    },

    /// The requested transition is not valid for the execution's current
    /// status (e.g. compensating a saga that is already compensating).
    #[error("invalid saga state: {0}")]
    InvalidState(String),

    /// The backing store rejected an operation.
    #[error("saga store error: {0}")]
    Store(String),
}
