//! Remote-facing data: entity versions, pulled deltas and push acknowledgments.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::mutation::{Operation, QueueItem};
use crate::types::{Checkpoint, EntityKey, QueueItemId};

/// One concrete state of an entity, local or remote.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityVersion {
    /// The mutation that produced this state.
    pub operation: Operation,
    /// Serialized entity. Empty for deletes.
    pub payload: Bytes,
    /// When this version was written (Unix ms, UTC).
    pub timestamp: i64,
}

impl EntityVersion {
    pub fn new(operation: Operation, payload: impl Into<Bytes>, timestamp: i64) -> Self {
        Self {
            operation,
            payload: payload.into(),
            timestamp,
        }
    }

    /// The version a queue item would produce if applied.
    pub fn from_item(item: &QueueItem) -> Self {
        Self {
            operation: item.operation,
            payload: item.payload.clone(),
            timestamp: item.queued_at,
        }
    }

    pub fn is_delete(&self) -> bool {
        self.operation == Operation::Delete
    }
}

/// A remote change to a single entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDelta {
    pub entity: EntityKey,
    pub version: EntityVersion,
}

impl EntityDelta {
    pub fn new(entity: EntityKey, version: EntityVersion) -> Self {
        Self { entity, version }
    }
}

/// What the remote returned for a pull.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullResult {
    /// Changes in server order.
    pub changes: Vec<EntityDelta>,
    /// Cursor to store once every change is applied.
    pub new_checkpoint: Checkpoint,
}

impl PullResult {
    /// Collapse the change list to the last change per entity, keeping the
    /// server order of each entity's final change.
    pub fn latest_per_entity(&self) -> Vec<EntityDelta> {
        let mut last_index: HashMap<&EntityKey, usize> = HashMap::new();
        for (index, delta) in self.changes.iter().enumerate() {
            last_index.insert(&delta.entity, index);
        }

        self.changes
            .iter()
            .enumerate()
            .filter(|(index, delta)| last_index.get(&delta.entity) == Some(index))
            .map(|(_, delta)| delta.clone())
            .collect()
    }
}

/// A queue item the remote refused to apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedItem {
    pub id: QueueItemId,
    pub reason: String,
    /// Whether resending the same payload could succeed.
    pub retryable: bool,
}

/// Per-item outcome of a push.
///
/// Items of the batch that appear in neither list are treated as
/// unacknowledged and retried.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckResult {
    pub acknowledged: Vec<QueueItemId>,
    pub rejected: Vec<RejectedItem>,
}

impl AckResult {
    /// Acknowledge every id.
    pub fn all(ids: impl IntoIterator<Item = QueueItemId>) -> Self {
        Self {
            acknowledged: ids.into_iter().collect(),
            rejected: Vec::new(),
        }
    }

    pub fn is_acknowledged(&self, id: QueueItemId) -> bool {
        self.acknowledged.contains(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(kind: &str, id: &str, ts: i64) -> EntityDelta {
        EntityDelta::new(
            EntityKey::new(kind, id),
            EntityVersion::new(Operation::Update, format!("v{ts}"), ts),
        )
    }

    #[test]
    fn test_latest_per_entity_keeps_last_change() {
        let pull = PullResult {
            changes: vec![
                delta("Job", "7", 1),
                delta("Asset", "42", 2),
                delta("Job", "7", 3),
            ],
            new_checkpoint: Checkpoint::new("3"),
        };

        let latest = pull.latest_per_entity();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].entity, EntityKey::new("Asset", "42"));
        assert_eq!(latest[1].entity, EntityKey::new("Job", "7"));
        assert_eq!(latest[1].version.timestamp, 3);
    }

    #[test]
    fn test_ack_result_all() {
        let ack = AckResult::all([QueueItemId::new(1), QueueItemId::new(2)]);
        assert!(ack.is_acknowledged(QueueItemId::new(2)));
        assert!(!ack.is_acknowledged(QueueItemId::new(3)));
        assert!(ack.rejected.is_empty());
    }
}
