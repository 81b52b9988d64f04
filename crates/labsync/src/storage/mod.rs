//! Durable key-value slots backing the offline queue.
//!
//! This module defines the `SlotStorage` trait: a minimal "named slot holding a
//! string" contract, the same shape as browser local storage. The queue keeps its
//! whole entry list serialized in a single slot and re-reads it on every operation.
//!
//! Two implementations are provided:
//!
//! - [`MemoryStorage`]: process-local, optional byte quota
//! - [`FileStorage`]: one JSON file per slot, atomic replace on write

mod file_store;
mod memory_store;

pub use file_store::FileStorage;
pub use memory_store::MemoryStorage;

use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during slot storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// Failed to serialize data
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Stored data could not be decoded
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// File system error
    #[error("I/O error: {0}")]
    IoError(String),

    /// The write would exceed the configured storage quota
    #[error("Storage quota exceeded")]
    QuotaExceeded,

    /// Slot key cannot be mapped onto the backend
    #[error("Invalid slot key: {0}")]
    InvalidKey(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::SerializationError(err.to_string())
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Named string slots with read / write / remove.
///
/// Implementations must treat a missing slot as `Ok(None)`, not as an error.
pub trait SlotStorage: Send + Sync {
    /// Read the slot, `None` if it has never been written or was removed.
    fn read(&self, key: &str) -> StorageResult<Option<String>>;

    /// Replace the slot contents.
    fn write(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Delete the slot. Removing a missing slot is not an error.
    fn remove(&self, key: &str) -> StorageResult<()>;
}

impl<S: SlotStorage + ?Sized> SlotStorage for Arc<S> {
    fn read(&self, key: &str) -> StorageResult<Option<String>> {
        (**self).read(key)
    }

    fn write(&self, key: &str, value: &str) -> StorageResult<()> {
        (**self).write(key, value)
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        (**self).remove(key)
    }
}
