//! Strong type definitions for fieldsync.
//!
//! Identifiers are newtypes to prevent misuse at compile time.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a queued mutation.
///
/// Assigned by the queue on enqueue. Strictly increasing, so ordering by id
/// is the total order of local mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QueueItemId(pub i64);

impl QueueItemId {
    /// Create from a raw value.
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Get the raw value.
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for QueueItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<i64> for QueueItemId {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

/// Identifies a domain record: `(entity_type, entity_id)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    /// Record type, e.g. `Asset` or `Job`.
    pub entity_type: String,
    /// Record identifier within its type.
    pub entity_id: String,
}

impl EntityKey {
    /// Create a new entity key.
    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity_type, self.entity_id)
    }
}

/// Opaque server-issued cursor marking the last successfully pulled state.
///
/// The empty checkpoint means "nothing pulled yet" and makes the server
/// return its full dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checkpoint(Option<String>);

impl Checkpoint {
    /// The empty checkpoint.
    pub const fn empty() -> Self {
        Self(None)
    }

    /// Wrap a server cursor. An empty string is treated as the empty checkpoint.
    pub fn new(cursor: impl Into<String>) -> Self {
        let cursor = cursor.into();
        if cursor.is_empty() {
            Self(None)
        } else {
            Self(Some(cursor))
        }
    }

    /// Whether this is the empty checkpoint.
    pub const fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    /// The raw cursor, if any.
    pub fn as_str(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(cursor) => f.write_str(cursor),
            None => f.write_str("<empty>"),
        }
    }
}

/// Get current time in milliseconds (UTC Unix epoch).
pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_key_display() {
        let key = EntityKey::new("Asset", "42");
        assert_eq!(key.to_string(), "Asset#42");
    }

    #[test]
    fn test_queue_item_id_ordering() {
        assert!(QueueItemId::new(1) < QueueItemId::new(2));
        assert_eq!(format!("{}", QueueItemId::new(7)), "#7");
    }

    #[test]
    fn test_checkpoint_empty() {
        assert!(Checkpoint::empty().is_empty());
        assert!(Checkpoint::new("").is_empty());
        assert!(Checkpoint::default().is_empty());

        let cp = Checkpoint::new("cursor-17");
        assert!(!cp.is_empty());
        assert_eq!(cp.as_str(), Some("cursor-17"));
    }
}
