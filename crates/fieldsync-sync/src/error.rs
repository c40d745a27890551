//! Error types for the sync module.

use fieldsync_core::EntityKey;
use thiserror::Error;

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transport-level error (connection refused, reset, unreachable).
    #[error("transport error: {0}")]
    Transport(String),

    /// A network call exceeded its timeout.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The remote refused the request outright; resending cannot help.
    #[error("rejected by remote: {0}")]
    Rejected(String),

    /// Local persistence refused a resolved entity state.
    #[error("local apply failed for {entity}: {reason}")]
    LocalApply { entity: EntityKey, reason: String },

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] fieldsync_store::StoreError),

    /// Settings could not be parsed or hold an unsupported value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No deferred conflict exists for the entity.
    #[error("no pending conflict for {0}")]
    NoPendingConflict(EntityKey),

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Whether the failure may go away on its own (retry later).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
