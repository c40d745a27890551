//! Error types for fieldsync core.

use thiserror::Error;

use crate::mutation::ItemStatus;

/// Errors raised by the pure model layer.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    #[error("unknown item status: {0}")]
    UnknownStatus(String),

    #[error("unknown conflict strategy: {0}")]
    UnknownStrategy(String),

    #[error("unknown sync type: {0}")]
    UnknownSyncType(String),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: ItemStatus, to: ItemStatus },

    #[error("payload digest mismatch for item {0}")]
    PayloadCorrupted(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
