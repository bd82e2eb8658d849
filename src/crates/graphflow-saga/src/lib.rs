//! # graphflow-saga - compensating transactions for graphflow
//!
//! A saga is a sequence of steps executed as a long transaction: each
//! step's output feeds the next step's input, each step may carry a
//! compensation handler, and when a required step fails (after its bounded
//! retries) the compensation handlers of all completed steps run in
//! reverse order. The terminal status is `compensated` when every
//! compensation succeeded, `failed` when any errored.
//!
//! ```rust
//! use graphflow_saga::{SagaDefinition, SagaOrchestrator, SagaStatus, SagaStep};
//! use graphflow_core::Context;
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), graphflow_saga::SagaError> {
//! let orchestrator = SagaOrchestrator::default();
//! orchestrator.register(
//!     SagaDefinition::new("payment")
//!         .add_step(
//!             SagaStep::new("reserve", |_ctx, input| async move { Ok(input) })
//!                 .with_compensation(|_ctx, output| async move { Ok(output) }),
//!         )
//!         .add_step(SagaStep::new("charge", |_ctx, input| async move { Ok(input) })),
//! )?;
//!
//! let id = orchestrator
//!     .start(&Context::new(), "payment", json!({"amount": 42}))
//!     .await?;
//! let done = orchestrator.wait(&id).await?;
//! assert_eq!(done.status, SagaStatus::Completed);
//! # Ok(())
//! # }
//! ```
//!
//! Execution records persist through a pluggable [`SagaStore`]
//! ([`MemorySagaStore`] ships with the crate); every execution runs on its
//! own tokio task, and reads return cloned records.

pub mod definition;
pub mod error;
pub mod execution;
pub mod orchestrator;
pub mod retry;
pub mod store;

pub use definition::{SagaCallback, SagaDefinition, SagaStep, StepHandler};
pub use error::{Result, SagaError};
pub use execution::{SagaExecution, SagaStatus, StepExecution, StepStatus};
pub use orchestrator::SagaOrchestrator;
pub use retry::RetryPolicy;
pub use store::{ExecutionFilter, MemorySagaStore, SagaStore};
