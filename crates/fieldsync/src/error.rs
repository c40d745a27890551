//! Error types for the engine.

use fieldsync_store::StoreError;
use fieldsync_sync::SyncError;
use thiserror::Error;

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// `start` was called while the scheduler is running.
    #[error("engine already started")]
    AlreadyStarted,
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
