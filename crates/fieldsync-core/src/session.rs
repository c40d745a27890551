//! Sync session records.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;
use crate::types::Checkpoint;

/// Kind of sync cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncType {
    /// Pull only remote changes since the last checkpoint.
    #[default]
    Delta,
    /// Reset the checkpoint and re-pull everything.
    Full,
}

impl SyncType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Delta => "delta",
            Self::Full => "full",
        }
    }
}

impl fmt::Display for SyncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "delta" => Ok(Self::Delta),
            "full" => Ok(Self::Full),
            other => Err(CoreError::UnknownSyncType(other.to_string())),
        }
    }
}

/// One execution of a sync cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSession {
    pub sync_type: SyncType,
    /// Start time (Unix ms, UTC).
    pub started_at: i64,
    /// End time (Unix ms, UTC). `None` while running.
    pub completed_at: Option<i64>,
    pub success: bool,
    pub items_pushed: u32,
    pub items_pulled: u32,
    pub conflicts_resolved: u32,
    pub items_failed: u32,
    /// Checkpoint in effect when the session ended.
    pub checkpoint: Checkpoint,
}

impl SyncSession {
    /// Start a new session record.
    pub fn begin(sync_type: SyncType, started_at: i64, checkpoint: Checkpoint) -> Self {
        Self {
            sync_type,
            started_at,
            completed_at: None,
            success: false,
            items_pushed: 0,
            items_pulled: 0,
            conflicts_resolved: 0,
            items_failed: 0,
            checkpoint,
        }
    }

    /// Close the session.
    pub fn finish(&mut self, success: bool, completed_at: i64) {
        self.success = success;
        self.completed_at = Some(completed_at);
    }

    /// Wall-clock duration in milliseconds, once finished.
    pub fn duration_millis(&self) -> Option<i64> {
        self.completed_at
            .map(|completed| completed.saturating_sub(self.started_at).max(0))
    }

    /// Whether some items failed even though the session completed.
    pub fn is_partial(&self) -> bool {
        self.success && self.items_failed > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_lifecycle() {
        let mut session = SyncSession::begin(SyncType::Delta, 1_000, Checkpoint::empty());
        assert!(session.duration_millis().is_none());

        session.items_failed = 1;
        session.finish(true, 1_250);
        assert_eq!(session.duration_millis(), Some(250));
        assert!(session.is_partial());
    }

    #[test]
    fn test_sync_type_names() {
        assert_eq!("full".parse::<SyncType>().unwrap(), SyncType::Full);
        assert_eq!(SyncType::default(), SyncType::Delta);
        assert!("partial".parse::<SyncType>().is_err());
    }
}
