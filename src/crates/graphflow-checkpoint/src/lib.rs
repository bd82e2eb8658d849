//! # graphflow-checkpoint - durable snapshots for graphflow runs
//!
//! This crate is the persistence leaf of the graphflow workspace. It defines
//! the checkpoint data model, the pluggable [`CheckpointStore`] trait the
//! runner writes through, and two implementations:
//!
//! - [`MemoryCheckpointStore`] - ephemeral, for tests and development.
//! - [`SqliteCheckpointStore`] - a single-file embedded store that survives
//!   process restarts.
//!
//! A checkpoint is written immediately after a node succeeds; it records the
//! run id, the node that just completed, a timestamp, the serialized state
//! and a metadata envelope (schema version, compression flag, open extra
//! map). Listing a run yields headers in ascending timestamp order, so the
//! most recent header names the node to resume after.
//!
//! State bytes are produced by a [`SerializerProtocol`]; the default
//! [`JsonSerializer`] keeps snapshots as self-describing text.
//!
//! ```rust
//! use graphflow_checkpoint::{
//!     CheckpointMetadata, CheckpointStore, JsonSerializer, MemoryCheckpointStore,
//!     SerializerExt,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MemoryCheckpointStore::new();
//! let serializer = JsonSerializer::new();
//!
//! let state = serde_json::json!({"count": 3});
//! let bytes = serializer.dumps(&state)?;
//! store
//!     .save("run-1", "step1", bytes, CheckpointMetadata::new("run-1", "step1"))
//!     .await?;
//!
//! let latest = store.latest("run-1").await?;
//! assert_eq!(latest.node_id, "step1");
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod error;
pub mod memory;
pub mod serializer;
pub mod sqlite;
pub mod traits;

pub use checkpoint::{Checkpoint, CheckpointHeader, CheckpointMetadata, SCHEMA_VERSION};
pub use error::{CheckpointError, Result};
pub use memory::MemoryCheckpointStore;
pub use serializer::{JsonSerializer, PrettyJsonSerializer, SerializerExt, SerializerProtocol};
pub use sqlite::SqliteCheckpointStore;
pub use traits::CheckpointStore;
