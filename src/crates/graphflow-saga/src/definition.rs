//! Saga definitions: named step sequences with compensation handlers.

use crate::error::SagaError;
use crate::execution::SagaExecution;
use crate::retry::RetryPolicy;
use futures::future::BoxFuture;
use graphflow_core::{BoxError, Context};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// A step handler: forward action or compensation. Receives the execution
/// context and the step input, produces the step output.
pub type StepHandler =
    Arc<dyn Fn(Context, Value) -> BoxFuture<'static, Result<Value, BoxError>> + Send + Sync>;

/// Callback invoked with the final execution record.
pub type SagaCallback = Arc<dyn Fn(&SagaExecution) + Send + Sync>;

fn boxed_handler<F, Fut>(handler: F) -> StepHandler
where
    F: Fn(Context, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
{
    Arc::new(move |ctx, input| Box::pin(handler(ctx, input)))
}

/// One step of a saga: a forward handler, an optional compensation, and
/// per-step timeout / retry / optionality knobs.
#[derive(Clone)]
pub struct SagaStep {
    /// Step name, unique within the saga.
    pub name: String,

    /// The forward action. Its input is the previous step's output (the
    /// saga input for the first step).
    pub forward: StepHandler,

    /// Undo action invoked with the forward handler's recorded output when
    /// a later step fails. Steps without one are skipped during
    /// compensation.
    pub compensation: Option<StepHandler>,

    /// Per-step deadline; falls back to the saga's default timeout.
    pub timeout: Option<Duration>,

    /// Optional steps that exhaust their retries are treated as completed
    /// (output = input) instead of triggering compensation.
    pub optional: bool,

    /// Bounded-attempt retry for the forward handler.
    pub retry: Option<RetryPolicy>,
}

impl SagaStep {
    /// A step named `name` running `forward`.
    pub fn new<F, Fut>(name: impl Into<String>, forward: F) -> Self
    where
        F: Fn(Context, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            forward: boxed_handler(forward),
            compensation: None,
            timeout: None,
            optional: false,
            retry: None,
        }
    }

    /// Attach the compensation handler.
    pub fn with_compensation<F, Fut>(mut self, compensation: F) -> Self
    where
        F: Fn(Context, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        self.compensation = Some(boxed_handler(compensation));
        self
    }

    /// Set the per-step deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Mark the step optional.
    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    /// Attach a retry policy for the forward handler.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }
}

impl fmt::Debug for SagaStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SagaStep")
            .field("name", &self.name)
            .field("compensation", &self.compensation.is_some())
            .field("timeout", &self.timeout)
            .field("optional", &self.optional)
            .field("retry", &self.retry)
            .finish()
    }
}

/// A named sequence of steps executed as a long transaction.
#[derive(Clone)]
pub struct SagaDefinition {
    /// Saga name; the registration key.
    pub name: String,

    /// Steps in execution order.
    pub steps: Vec<SagaStep>,

    /// Deadline applied to steps without their own.
    pub default_timeout: Option<Duration>,

    /// Invoked once when the saga completes.
    pub on_complete: Option<SagaCallback>,

    /// Invoked once when compensation finishes (either terminal status).
    pub on_compensate: Option<SagaCallback>,
}

impl SagaDefinition {
    /// An empty definition named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            default_timeout: None,
            on_complete: None,
            on_compensate: None,
        }
    }

    /// Append a step.
    pub fn add_step(mut self, step: SagaStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Deadline for steps without their own.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Completion callback.
    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: Fn(&SagaExecution) + Send + Sync + 'static,
    {
        self.on_complete = Some(Arc::new(callback));
        self
    }

    /// Compensation-finished callback.
    pub fn on_compensate<F>(mut self, callback: F) -> Self
    where
        F: Fn(&SagaExecution) + Send + Sync + 'static,
    {
        self.on_compensate = Some(Arc::new(callback));
        self
    }

    /// Structural validation performed at registration.
    pub fn validate(&self) -> Result<(), SagaError> {
        if self.name.trim().is_empty() {
            return Err(SagaError::InvalidDefinition(
                "saga name must not be empty".into(),
            ));
        }
        if self.steps.is_empty() {
            return Err(SagaError::InvalidDefinition(format!(
                "saga '{}' has no steps",
                self.name
            )));
        }
        for step in &self.steps {
            if step.name.trim().is_empty() {
                return Err(SagaError::InvalidDefinition(format!(
                    "saga '{}' has a step with an empty name",
                    self.name
                )));
            }
        }
        let mut names: Vec<&str> = self.steps.iter().map(|s| s.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() != self.steps.len() {
            return Err(SagaError::InvalidDefinition(format!(
                "saga '{}' has duplicate step names",
                self.name
            )));
        }
        Ok(())
    }

    /// The effective deadline for a step, if any.
    pub(crate) fn timeout_for(&self, step: &SagaStep) -> Option<Duration> {
        step.timeout.or(self.default_timeout)
    }
}

impl fmt::Debug for SagaDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SagaDefinition")
            .field("name", &self.name)
            .field("steps", &self.steps)
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}
