//! Local persistence contract.
//!
//! The core only needs `get`/`put`/`delete` on byte values. The application
//! decides where the bytes live; two implementations ship with the crate:
//!
//! - [`MemoryStore`]: process-local, for tests and ephemeral sessions
//! - [`SqliteStore`]: a single-table `SQLite` database
//!
//! [`EventCache`] layers a JSON event cache on top of any store.

mod event_cache;
mod sqlite;

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;

pub use event_cache::EventCache;
pub use sqlite::SqliteStore;

/// Errors raised by store implementations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Database error from `SQLite`.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Generic storage failure (lock poisoning, I/O).
    #[error("Storage error: {0}")]
    Storage(String),

    /// Stored value could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Key-value persistence collaborator.
///
/// Implementations must be `Send + Sync`; every method is a short blocking
/// call and is never invoked while a network operation is pending.
pub trait KeyValueStore: Send + Sync {
    /// Returns the value stored under `key`, or `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Removes `key`. Removing a missing key succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn delete(&self, key: &str) -> Result<()>;
}

/// In-memory key-value store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().map(|data| data.len()).unwrap_or_default()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let data = self
            .data
            .read()
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(data.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut data = self
            .data
            .write()
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        data.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut data = self
            .data
            .write()
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        data.remove(key);
        Ok(())
    }
}
