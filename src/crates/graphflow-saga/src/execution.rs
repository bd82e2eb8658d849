//! Saga execution records: per-run and per-step status tracking.
//!
//! An execution's status walks `pending -> running -> completed`, or on
//! failure `running -> compensating -> compensated` (or `failed` when any
//! compensation handler errored). Records are serde-serializable so stores
//! can persist them as-is, and the orchestrator hands out clones to keep
//! mutation private.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Status of a saga execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStatus {
    /// Created, not yet running.
    Pending,
    /// Executing forward steps.
    Running,
    /// All steps completed. Terminal.
    Completed,
    /// Running compensation handlers in reverse order.
    Compensating,
    /// Compensation finished cleanly. Terminal.
    Compensated,
    /// A compensation handler failed (or the saga failed unrecoverably).
    /// Terminal.
    Failed,
}

impl SagaStatus {
    /// True for statuses no further transition leaves.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Compensated | Self::Failed)
    }
}

/// Status of one step within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not reached yet.
    Pending,
    /// Forward handler in flight.
    Running,
    /// Forward handler succeeded (or the step was optional and skipped
    /// past its failure).
    Completed,
    /// Forward handler failed after retries.
    Failed,
    /// Compensation handler succeeded.
    Compensated,
    /// Compensation handler failed.
    CompensationFailed,
}

/// Execution record for one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    /// Step name, copied from the definition.
    pub name: String,

    /// Current status.
    pub status: StepStatus,

    /// Input the forward handler received.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,

    /// Output the forward handler produced (compensation receives this).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,

    /// Last error observed for this step (forward or compensation).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Forward attempts made (retries included).
    pub attempts: u32,

    /// When the forward handler first started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// When the step reached its current resting status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    /// Wall-clock duration of the forward phase.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl StepExecution {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: StepStatus::Pending,
            input: None,
            output: None,
            error: None,
            attempts: 0,
            started_at: None,
            finished_at: None,
            duration_ms: None,
        }
    }
}

/// Execution record for one saga run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaExecution {
    /// Unique execution id (UUID v4).
    pub id: String,

    /// Name of the definition this execution runs.
    pub saga_name: String,

    /// Current status.
    pub status: SagaStatus,

    /// Per-step records, same order as the definition.
    pub steps: Vec<StepExecution>,

    /// Index of the step currently (or last) executing.
    pub current_step: usize,

    /// The saga input (first step's input).
    pub input: Value,

    /// The last step's output, set on completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,

    /// The failure that triggered compensation, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// When the execution was created.
    pub started_at: DateTime<Utc>,

    /// When the execution reached a terminal status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl SagaExecution {
    /// A pending execution of `saga_name` over `input`, with step records
    /// for `step_names`.
    pub fn new<I, N>(saga_name: impl Into<String>, input: Value, step_names: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        Self {
            id: Uuid::new_v4().to_string(),
            saga_name: saga_name.into(),
            status: SagaStatus::Pending,
            steps: step_names.into_iter().map(StepExecution::new).collect(),
            current_step: 0,
            input,
            output: None,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// True once the execution can no longer change.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
