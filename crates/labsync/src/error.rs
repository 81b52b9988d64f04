//! Error types for the labsync crate.

use crate::config::ConfigError;
use crate::storage::StorageError;
use thiserror::Error;

/// Result type alias for strict queue operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors surfaced by the strict (`try_*`) queue API and the configuration layer.
///
/// The lenient queue API never returns these; it logs and degrades instead.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The backing storage slot could not be read or written.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration could not be loaded or saved.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// No queue entry with the given id exists.
    #[error("Queue entry not found: {0}")]
    EntryNotFound(String),
}
