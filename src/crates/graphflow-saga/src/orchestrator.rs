//! The saga orchestrator: forward execution with retries, reverse-order
//! compensation, and manual compensation triggers.
//!
//! Register [`SagaDefinition`]s, then [`start`](SagaOrchestrator::start) an
//! execution: it runs on its own tokio task, chaining each step's output
//! into the next step's input and persisting every status transition
//! through the [`SagaStore`]. When a required step fails after its retries,
//! the compensation handlers of all completed steps run in reverse order,
//! each receiving the output its forward handler produced. A compensation
//! error is recorded and the sequence continues; the terminal status is
//! `failed` if any compensation errored, `compensated` otherwise.
//!
//! Reads ([`get`](SagaOrchestrator::get), [`list`](SagaOrchestrator::list))
//! return cloned records, keeping mutation private to the running task.

use crate::definition::{SagaDefinition, SagaStep};
use crate::error::{Result, SagaError};
use crate::execution::{SagaExecution, SagaStatus, StepStatus};
use crate::retry::RetryPolicy;
use crate::store::{ExecutionFilter, MemorySagaStore, SagaStore};
use chrono::Utc;
use graphflow_core::{Context, Registry, RegistryError};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct RunningSaga {
    handle: JoinHandle<()>,
    /// Cancelling this asks the forward loop to stop at the next step
    /// boundary and compensate.
    compensate: CancellationToken,
}

/// Registers saga definitions and drives their executions.
pub struct SagaOrchestrator {
    definitions: Registry<Arc<SagaDefinition>>,
    store: Arc<dyn SagaStore>,
    running: Mutex<HashMap<String, RunningSaga>>,
}

impl Default for SagaOrchestrator {
    fn default() -> Self {
        Self::new(Arc::new(MemorySagaStore::new()))
    }
}

impl SagaOrchestrator {
    /// An orchestrator persisting through `store`.
    pub fn new(store: Arc<dyn SagaStore>) -> Self {
        Self {
            definitions: Registry::new(),
            store,
            running: Mutex::new(HashMap::new()),
        }
    }

    /// The store executions are persisted in.
    pub fn store(&self) -> &Arc<dyn SagaStore> {
        &self.store
    }

    /// Register a definition. Validated here; duplicate names are refused.
    pub fn register(&self, definition: SagaDefinition) -> Result<()> {
        definition.validate()?;
        let name = definition.name.clone();
        self.definitions
            .register(name, Arc::new(definition))
            .map_err(|err| match err {
                RegistryError::AlreadyRegistered(name) => SagaError::DuplicateSaga(name),
                RegistryError::NotRegistered(name) => SagaError::UnknownSaga(name),
            })
    }

    /// Start an execution of `saga_name` over `input` on its own task.
    /// Returns the execution id immediately.
    pub async fn start(&self, ctx: &Context, saga_name: &str, input: Value) -> Result<String> {
        let definition = self
            .definitions
            .get(saga_name)
            .ok_or_else(|| SagaError::UnknownSaga(saga_name.to_string()))?;

        let execution = SagaExecution::new(
            saga_name,
            input,
            definition.steps.iter().map(|s| s.name.clone()),
        );
        self.store.create(&execution).await?;
        let execution_id = execution.id.clone();

        let compensate = CancellationToken::new();
        let handle = tokio::spawn(run_saga(
            definition,
            execution,
            Arc::clone(&self.store),
            ctx.clone(),
            compensate.clone(),
        ));

        self.running.lock().await.insert(
            execution_id.clone(),
            RunningSaga { handle, compensate },
        );
        Ok(execution_id)
    }

    /// Await the execution's task (if still tracked) and return its final
    /// record.
    pub async fn wait(&self, execution_id: &str) -> Result<SagaExecution> {
        let running = self.running.lock().await.remove(execution_id);
        if let Some(running) = running {
            if let Err(err) = running.handle.await {
                tracing::warn!(execution = %execution_id, error = %err, "saga task aborted");
            }
        }
        self.store.get(execution_id).await
    }

    /// The current (cloned) record of an execution.
    pub async fn get(&self, execution_id: &str) -> Result<SagaExecution> {
        self.store.get(execution_id).await
    }

    /// Executions matching `filter`, oldest first.
    pub async fn list(&self, filter: &ExecutionFilter) -> Result<Vec<SagaExecution>> {
        self.store.list(filter).await
    }

    /// Trigger compensation manually.
    ///
    /// For a running execution this requests compensation at the next step
    /// boundary and returns the current record; for a completed one it
    /// compensates synchronously. An execution that is already
    /// compensating (or terminal after compensation) is rejected.
    pub async fn compensate(&self, ctx: &Context, execution_id: &str) -> Result<SagaExecution> {
        let execution = self.store.get(execution_id).await?;
        match execution.status {
            SagaStatus::Compensating => Err(SagaError::InvalidState(format!(
                "execution '{execution_id}' is already compensating"
            ))),
            SagaStatus::Compensated | SagaStatus::Failed => Err(SagaError::InvalidState(format!(
                "execution '{execution_id}' is already terminal"
            ))),
            SagaStatus::Pending | SagaStatus::Running => {
                let running = self.running.lock().await;
                if let Some(running) = running.get(execution_id) {
                    running.compensate.cancel();
                }
                drop(running);
                self.store.get(execution_id).await
            }
            SagaStatus::Completed => {
                let definition = self
                    .definitions
                    .get(&execution.saga_name)
                    .ok_or_else(|| SagaError::UnknownSaga(execution.saga_name.clone()))?;
                let mut execution = execution;
                execution.error = Some("manual compensation requested".to_string());
                let upto = execution.steps.len();
                compensate_completed_steps(
                    &definition,
                    &mut execution,
                    upto,
                    ctx,
                    self.store.as_ref(),
                )
                .await;
                if let Some(callback) = &definition.on_compensate {
                    callback(&execution);
                }
                self.store.get(execution_id).await
            }
        }
    }
}

/// Drive one execution to a terminal status. Runs on its own task.
async fn run_saga(
    definition: Arc<SagaDefinition>,
    mut execution: SagaExecution,
    store: Arc<dyn SagaStore>,
    ctx: Context,
    compensate: CancellationToken,
) {
    execution.status = SagaStatus::Running;
    persist(store.as_ref(), &execution).await;
    tracing::info!(saga = %definition.name, execution = %execution.id, "saga started");

    let mut carry = execution.input.clone();
    let mut failure: Option<usize> = None;

    for (index, step) in definition.steps.iter().enumerate() {
        if compensate.is_cancelled() {
            execution.error = Some("compensation requested".to_string());
            failure = Some(index);
            break;
        }

        execution.current_step = index;
        {
            let record = &mut execution.steps[index];
            record.status = StepStatus::Running;
            record.input = Some(carry.clone());
            record.started_at = Some(Utc::now());
        }
        persist(store.as_ref(), &execution).await;

        let started = Instant::now();
        let (attempts, outcome) =
            run_step_with_retry(&definition, step, &ctx, carry.clone()).await;

        let record = &mut execution.steps[index];
        record.attempts = attempts;
        record.finished_at = Some(Utc::now());
        record.duration_ms = Some(started.elapsed().as_millis() as u64);

        match outcome {
            Ok(output) => {
                record.status = StepStatus::Completed;
                record.output = Some(output.clone());
                carry = output;
            }
            Err(reason) => {
                if step.optional {
                    tracing::warn!(
                        saga = %definition.name,
                        step = %step.name,
                        error = %reason,
                        "optional step failed; treating as completed"
                    );
                    record.status = StepStatus::Completed;
                    record.output = Some(carry.clone());
                    record.error = Some(reason);
                } else {
                    tracing::warn!(
                        saga = %definition.name,
                        step = %step.name,
                        error = %reason,
                        "step failed; compensating"
                    );
                    record.status = StepStatus::Failed;
                    record.error = Some(reason.clone());
                    execution.error = Some(reason);
                    failure = Some(index);
                    persist(store.as_ref(), &execution).await;
                    break;
                }
            }
        }
        persist(store.as_ref(), &execution).await;
    }

    match failure {
        None => {
            execution.status = SagaStatus::Completed;
            execution.output = Some(carry);
            execution.finished_at = Some(Utc::now());
            persist(store.as_ref(), &execution).await;
            tracing::info!(saga = %definition.name, execution = %execution.id, "saga completed");
            if let Some(callback) = &definition.on_complete {
                callback(&execution);
            }
        }
        Some(index) => {
            compensate_completed_steps(&definition, &mut execution, index, &ctx, store.as_ref())
                .await;
            if let Some(callback) = &definition.on_compensate {
                callback(&execution);
            }
        }
    }
}

/// Run compensation handlers for completed steps `upto` (exclusive) in
/// reverse order. Each receives its forward output; failures are recorded
/// and the sequence continues.
async fn compensate_completed_steps(
    definition: &SagaDefinition,
    execution: &mut SagaExecution,
    upto: usize,
    ctx: &Context,
    store: &dyn SagaStore,
) {
    execution.status = SagaStatus::Compensating;
    persist(store, execution).await;
    let mut any_failed = false;

    for index in (0..upto).rev() {
        let step = &definition.steps[index];
        if execution.steps[index].status != StepStatus::Completed {
            continue;
        }
        let Some(compensation) = &step.compensation else {
            continue;
        };
        let output = execution.steps[index]
            .output
            .clone()
            .unwrap_or(Value::Null);

        let outcome = match definition.timeout_for(step) {
            Some(limit) => {
                match tokio::time::timeout(limit, compensation(ctx.clone(), output)).await {
                    Err(_) => Err(SagaError::StepTimeout {
                        step: step.name.clone(),
                        timeout_ms: limit.as_millis() as u64,
                    }
                    .to_string()),
                    Ok(result) => result.map_err(|e| e.to_string()),
                }
            }
            None => compensation(ctx.clone(), output).await.map_err(|e| e.to_string()),
        };

        let record = &mut execution.steps[index];
        match outcome {
            Ok(_) => {
                record.status = StepStatus::Compensated;
            }
            Err(reason) => {
                any_failed = true;
                tracing::warn!(
                    saga = %definition.name,
                    step = %step.name,
                    error = %reason,
                    "compensation failed; continuing"
                );
                record.status = StepStatus::CompensationFailed;
                record.error = Some(
                    SagaError::CompensationFailed {
                        step: step.name.clone(),
                        reason,
                    }
                    .to_string(),
                );
            }
        }
        persist(store, execution).await;
    }

    execution.status = if any_failed {
        SagaStatus::Failed
    } else {
        SagaStatus::Compensated
    };
    execution.finished_at = Some(Utc::now());
    persist(store, execution).await;
    tracing::info!(
        saga = %definition.name,
        execution = %execution.id,
        status = ?execution.status,
        "saga compensation finished"
    );
}

/// Run one step's forward handler with its retry policy and deadline.
/// Returns the attempts made and the final outcome.
async fn run_step_with_retry(
    definition: &SagaDefinition,
    step: &SagaStep,
    ctx: &Context,
    input: Value,
) -> (u32, std::result::Result<Value, String>) {
    let policy = step.retry.clone().unwrap_or_else(RetryPolicy::none);
    let max_attempts = policy.max_attempts.max(1);
    let deadline = definition.timeout_for(step);
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        tracing::debug!(step = %step.name, attempt, max_attempts, "executing saga step");
        let fut = (step.forward)(ctx.clone(), input.clone());
        let outcome = match deadline {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Err(_) => Err(SagaError::StepTimeout {
                    step: step.name.clone(),
                    timeout_ms: limit.as_millis() as u64,
                }
                .to_string()),
                Ok(result) => result.map_err(|e| e.to_string()),
            },
            None => fut.await.map_err(|e| e.to_string()),
        };

        match outcome {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(step = %step.name, attempts = attempt, "step succeeded after retry");
                }
                return (attempt, Ok(value));
            }
            Err(reason) => {
                last_error = reason;
                if attempt < max_attempts {
                    let delay = policy.delay(attempt);
                    tracing::warn!(
                        step = %step.name,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %last_error,
                        "step failed, retrying after delay"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    (max_attempts, Err(last_error))
}

async fn persist(store: &dyn SagaStore, execution: &SagaExecution) {
    if let Err(err) = store.update(execution).await {
        tracing::warn!(execution = %execution.id, error = %err, "failed to persist saga execution");
    }
}
