//! Out-of-band signaling for running workflows.
//!
//! A [`Signal`] is an asynchronous fire-and-forget message aimed at a run:
//! a name, a target run id, and an optional payload. Signals are created
//! `pending`, enqueued through a [`SignalStore`](store::SignalStore), and
//! later drained by the [`SignalDispatcher`](dispatcher::SignalDispatcher),
//! which invokes the handler registered for the signal's name and marks the
//! signal `processed` or `failed` (both terminal).
//!
//! Ordering: signals for the same target are delivered to their handlers in
//! enqueue order. The store is in-memory; signals do not survive a process
//! restart.

pub mod dispatcher;
pub mod store;

pub use dispatcher::{ProcessOutcome, SignalDispatcher, SignalHandler, SignalRegistry};
pub use store::{MemorySignalStore, SignalStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

/// Lifecycle state of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStatus {
    /// Enqueued, not yet handled.
    Pending,
    /// Handler ran successfully. Terminal.
    Processed,
    /// Handler failed or was missing. Terminal.
    Failed,
}

/// An asynchronous message targeted at a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// Unique signal id (UUID v4).
    pub id: String,

    /// Signal name; selects the registered handler.
    pub name: String,

    /// The run this signal is aimed at.
    pub target_id: String,

    /// Free-form payload.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub payload: HashMap<String, serde_json::Value>,

    /// Optional identity of the sender.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,

    /// Current lifecycle state.
    pub status: SignalStatus,

    /// When the signal was created.
    pub sent_at: DateTime<Utc>,

    /// When the signal reached a terminal state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,

    /// Failure description for `Failed` signals.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Signal {
    /// A fresh pending signal of `name` aimed at `target_id`.
    pub fn new(name: impl Into<String>, target_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            target_id: target_id.into(),
            payload: HashMap::new(),
            sender_id: None,
            status: SignalStatus::Pending,
            sent_at: Utc::now(),
            processed_at: None,
            error: None,
        }
    }

    /// Attach a payload entry.
    pub fn with_payload(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    /// Record the sender's identity.
    pub fn with_sender(mut self, sender_id: impl Into<String>) -> Self {
        self.sender_id = Some(sender_id.into());
        self
    }

    /// Whether the signal has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status != SignalStatus::Pending
    }
}

/// Errors from the signal facility.
#[derive(Debug, Error)]
pub enum SignalError {
    /// A handler for this name already exists.
    #[error("signal handler '{0}' is already registered")]
    AlreadyRegistered(String),

    /// No handler is registered under this name.
    #[error("no signal handler registered for '{0}'")]
    NotRegistered(String),

    /// Processing found no handler for the signal's name. Recorded on the
    /// signal as the distinguished no-handler failure.
    #[error("no handler for signal '{0}'")]
    NoHandler(String),

    /// The signal id is unknown.
    #[error("signal '{0}' not found")]
    NotFound(String),

    /// The signal was malformed (empty name or target).
    #[error("invalid signal: {0}")]
    InvalidSignal(String),

    /// The signal already reached a terminal state.
    #[error("signal '{id}' is already {status:?}")]
    Terminal {
        /// The signal's id.
        id: String,
        /// Its terminal status.
        status: SignalStatus,
    },

    /// A handler returned an error.
    #[error("signal handler failed: {0}")]
    Handler(String),
}
