//! Serialization protocol for checkpointed state.
//!
//! The runner encodes state values through a [`SerializerProtocol`] before
//! handing the bytes to a [`CheckpointStore`](crate::traits::CheckpointStore).
//! The object-safe core works on [`serde_json::Value`]; the blanket
//! [`SerializerExt`] adds typed convenience methods. The default
//! [`JsonSerializer`] produces compact, self-describing JSON text, which
//! keeps on-disk snapshots human-inspectable.

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Object-safe encoding protocol for state snapshots.
pub trait SerializerProtocol: Send + Sync {
    /// Encode a JSON value to bytes.
    fn dumps_value(&self, value: &serde_json::Value) -> Result<Vec<u8>>;

    /// Decode bytes back into a JSON value.
    fn loads_value(&self, data: &[u8]) -> Result<serde_json::Value>;
}

/// Typed helpers over any [`SerializerProtocol`].
pub trait SerializerExt: SerializerProtocol {
    /// Encode any serializable value.
    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        let json = serde_json::to_value(value)?;
        self.dumps_value(&json)
    }

    /// Decode bytes into a concrete type.
    fn loads<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        let json = self.loads_value(data)?;
        Ok(serde_json::from_value(json)?)
    }
}

impl<S: SerializerProtocol + ?Sized> SerializerExt for S {}

/// Compact JSON serializer (the default).
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    /// Create a JSON serializer.
    pub fn new() -> Self {
        Self
    }
}

impl SerializerProtocol for JsonSerializer {
    fn dumps_value(&self, value: &serde_json::Value) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn loads_value(&self, data: &[u8]) -> Result<serde_json::Value> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Pretty-printed JSON serializer, for stores whose snapshots are read by
/// humans more often than machines.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrettyJsonSerializer;

impl SerializerProtocol for PrettyJsonSerializer {
    fn dumps_value(&self, value: &serde_json::Value) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(value)?)
    }

    fn loads_value(&self, data: &[u8]) -> Result<serde_json::Value> {
        Ok(serde_json::from_slice(data)?)
    }
}
