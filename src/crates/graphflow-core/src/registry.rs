//! Generic thread-safe name registry.
//!
//! [`Registry`] is the shared building block behind the signal and query
//! registries: a read-mostly map from name to handler guarded by a
//! `parking_lot::RwLock`. Registration of an existing name is refused
//! rather than silently replaced, which is what the facilities built on top
//! rely on.

use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;

/// Errors from registry mutations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The name is already taken.
    #[error("'{0}' is already registered")]
    AlreadyRegistered(String),

    /// The name is unknown.
    #[error("'{0}' is not registered")]
    NotRegistered(String),
}

/// Thread-safe map from name to value, refusing duplicate registration.
#[derive(Debug)]
pub struct Registry<T> {
    entries: RwLock<HashMap<String, T>>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<T: Clone> Registry<T> {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Register `value` under `name`; refused if the name is taken.
    pub fn register(
        &self,
        name: impl Into<String>,
        value: T,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        let mut entries = self.entries.write();
        if entries.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }
        entries.insert(name, value);
        Ok(())
    }

    /// Remove and return the entry under `name`.
    pub fn unregister(&self, name: &str) -> Result<T, RegistryError> {
        self.entries
            .write()
            .remove(name)
            .ok_or_else(|| RegistryError::NotRegistered(name.to_string()))
    }

    /// Clone of the entry under `name`, if present.
    pub fn get(&self, name: &str) -> Option<T> {
        self.entries.read().get(name).cloned()
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    /// All registered names, unordered.
    pub fn names(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True when no entries are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
