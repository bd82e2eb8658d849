//! Checkpoint data structures.
//!
//! A [`Checkpoint`] is a durable snapshot of a run's state taken immediately
//! after a node finished: the `(run_id, node_id)` pair that produced it, the
//! serialized state bytes, and a [`CheckpointMetadata`] record describing the
//! snapshot. Listings return lightweight [`CheckpointHeader`]s ordered by
//! timestamp (ties broken by node id), so the most recent header always names
//! the node that completed last.
//!
//! The state bytes are opaque to this crate; they are produced by the
//! [`SerializerProtocol`](crate::serializer::SerializerProtocol) the runner
//! was configured with (JSON by default, so snapshots stay human-inspectable).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Current version of the checkpoint record layout.
///
/// Stored with every checkpoint so future layouts can coexist with old rows
/// in the same store.
pub const SCHEMA_VERSION: u32 = 1;

/// Descriptive metadata persisted next to every checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Layout version of the record, see [`SCHEMA_VERSION`].
    pub schema_version: u32,

    /// When the checkpoint was taken.
    pub created_at: DateTime<Utc>,

    /// Run this checkpoint belongs to.
    pub run_id: String,

    /// Node that had just completed when the checkpoint was taken.
    pub node_id: String,

    /// Whether the state bytes are compressed.
    ///
    /// Neither built-in store compresses; the flag exists so external stores
    /// can without a schema change.
    #[serde(default)]
    pub compressed: bool,

    /// Open extension map for store- or application-specific annotations.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}

impl CheckpointMetadata {
    /// Metadata for a fresh checkpoint of `(run_id, node_id)`, stamped now.
    pub fn new(run_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            created_at: Utc::now(),
            run_id: run_id.into(),
            node_id: node_id.into(),
            compressed: false,
            extra: HashMap::new(),
        }
    }

    /// Mark the state bytes as compressed.
    pub fn with_compressed(mut self, compressed: bool) -> Self {
        self.compressed = compressed;
        self
    }

    /// Attach an extension entry.
    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// A durable state snapshot: serialized state plus identifying metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Run this checkpoint belongs to.
    pub run_id: String,

    /// Node that had just completed.
    pub node_id: String,

    /// When the checkpoint was taken.
    pub created_at: DateTime<Utc>,

    /// Serialized state, encoded by the configured serializer.
    pub state: Vec<u8>,

    /// Descriptive metadata, see [`CheckpointMetadata`].
    pub metadata: CheckpointMetadata,
}

impl Checkpoint {
    /// Build a checkpoint for `(run_id, node_id)` around serialized state,
    /// stamped now with default metadata.
    pub fn new(
        run_id: impl Into<String>,
        node_id: impl Into<String>,
        state: Vec<u8>,
    ) -> Self {
        let run_id = run_id.into();
        let node_id = node_id.into();
        let metadata = CheckpointMetadata::new(run_id.clone(), node_id.clone());
        Self {
            run_id,
            node_id,
            created_at: metadata.created_at,
            state,
            metadata,
        }
    }

    /// The listing view of this checkpoint.
    pub fn header(&self) -> CheckpointHeader {
        CheckpointHeader {
            run_id: self.run_id.clone(),
            node_id: self.node_id.clone(),
            created_at: self.created_at,
            metadata: self.metadata.clone(),
        }
    }
}

/// Listing entry for a stored checkpoint; everything but the state bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointHeader {
    /// Run this checkpoint belongs to.
    pub run_id: String,

    /// Node that had just completed.
    pub node_id: String,

    /// When the checkpoint was taken.
    pub created_at: DateTime<Utc>,

    /// Descriptive metadata, see [`CheckpointMetadata`].
    pub metadata: CheckpointMetadata,
}

impl CheckpointHeader {
    /// Sort key used by every store: ascending timestamp, ties broken by
    /// node id.
    pub fn sort_key(&self) -> (DateTime<Utc>, &str) {
        (self.created_at, self.node_id.as_str())
    }
}
