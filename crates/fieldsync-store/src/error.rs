//! Error types for the store module.

use fieldsync_core::{ItemStatus, QueueItemId};
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Encoding or decoding of a stored value failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Queue item not found.
    #[error("queue item not found: {0}")]
    NotFound(QueueItemId),

    /// The requested status change is not allowed.
    #[error("illegal transition for item {id}: {from} -> {to}")]
    InvalidTransition {
        id: QueueItemId,
        from: ItemStatus,
        to: ItemStatus,
    },

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// A lock guarding the store was poisoned by a panicking holder.
    #[error("store lock poisoned")]
    LockPoisoned,

    /// A blocking storage task failed to run to completion.
    #[error("storage task failed: {0}")]
    Task(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
