//! Remote collaborator: the authoritative store.
//!
//! Implementations may use HTTP, gRPC, or any other transport. The engine only
//! relies on two calls and on idempotent handling of retransmitted items.

use async_trait::async_trait;
use fieldsync_core::{AckResult, Checkpoint, PullResult, QueueItem};

use crate::error::Result;

/// Transport to the authoritative remote store.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait RemoteSyncClient: Send + Sync {
    /// Transmit a batch of local mutations.
    ///
    /// Retransmitting an item with an id the remote already applied must be
    /// acknowledged without applying it twice.
    async fn push(&self, batch: &[QueueItem]) -> Result<AckResult>;

    /// Fetch remote changes since `checkpoint`.
    ///
    /// The empty checkpoint returns the full dataset.
    async fn pull(&self, checkpoint: &Checkpoint) -> Result<PullResult>;
}

/// A simple in-memory remote for testing.
///
/// Holds an entity table and a change log of edits made by other devices.
/// Checkpoints are positions in that log.
pub mod memory {
    use super::*;
    use std::collections::{BTreeMap, HashMap, HashSet};
    use std::time::Duration;

    use fieldsync_core::{EntityDelta, EntityKey, EntityVersion, QueueItemId, RejectedItem};
    use tokio::sync::Mutex;

    use crate::error::SyncError;

    #[derive(Default)]
    struct RemoteState {
        entities: BTreeMap<EntityKey, EntityVersion>,
        /// Edits from other devices; a checkpoint is an index into this log.
        log: Vec<EntityDelta>,
        /// Item ids already applied (idempotency).
        applied: HashSet<QueueItemId>,
        /// Times each item id was received, including duplicates.
        received: HashMap<QueueItemId, u32>,
        rejections: HashMap<QueueItemId, (String, bool)>,
        push_calls: u32,
        pull_calls: u32,
        offline: bool,
        failing_pushes: u32,
        failing_pulls: u32,
        dropped_acks: u32,
        latency: Option<Duration>,
    }

    /// In-memory authoritative store with failure injection.
    #[derive(Default)]
    pub struct MemoryRemote {
        state: Mutex<RemoteState>,
    }

    impl MemoryRemote {
        /// Create an empty remote.
        pub fn new() -> Self {
            Self::default()
        }

        // ─────────────────────────────────────────────────────────────────────
        // Simulation Controls
        // ─────────────────────────────────────────────────────────────────────

        /// Make every call fail as unreachable until set back to `false`.
        pub async fn set_offline(&self, offline: bool) {
            self.state.lock().await.offline = offline;
        }

        /// Fail the next `count` push calls with a transport error.
        pub async fn fail_next_pushes(&self, count: u32) {
            self.state.lock().await.failing_pushes = count;
        }

        /// Fail the next `count` pull calls with a transport error.
        pub async fn fail_next_pulls(&self, count: u32) {
            self.state.lock().await.failing_pulls = count;
        }

        /// Apply the next `count` pushes but lose the acknowledgment.
        pub async fn drop_next_acks(&self, count: u32) {
            self.state.lock().await.dropped_acks = count;
        }

        /// Reject an item whenever it is pushed.
        pub async fn reject_item(&self, id: QueueItemId, reason: &str, retryable: bool) {
            self.state
                .lock()
                .await
                .rejections
                .insert(id, (reason.to_string(), retryable));
        }

        /// Delay every call by `latency`.
        pub async fn set_latency(&self, latency: Option<Duration>) {
            self.state.lock().await.latency = latency;
        }

        /// Record an edit made by another device.
        pub async fn remote_edit(&self, entity: EntityKey, version: EntityVersion) {
            let mut state = self.state.lock().await;
            if version.is_delete() {
                state.entities.remove(&entity);
            } else {
                state.entities.insert(entity.clone(), version.clone());
            }
            state.log.push(EntityDelta::new(entity, version));
        }

        // ─────────────────────────────────────────────────────────────────────
        // Inspection
        // ─────────────────────────────────────────────────────────────────────

        /// Current remote state of an entity.
        pub async fn entity(&self, entity: &EntityKey) -> Option<EntityVersion> {
            self.state.lock().await.entities.get(entity).cloned()
        }

        /// How many times an item id was received (duplicates included).
        pub async fn times_received(&self, id: QueueItemId) -> u32 {
            self.state
                .lock()
                .await
                .received
                .get(&id)
                .copied()
                .unwrap_or(0)
        }

        /// Whether an item id was applied.
        pub async fn was_applied(&self, id: QueueItemId) -> bool {
            self.state.lock().await.applied.contains(&id)
        }

        /// Number of push calls received (failed ones included).
        pub async fn push_calls(&self) -> u32 {
            self.state.lock().await.push_calls
        }

        /// Number of pull calls received (failed ones included).
        pub async fn pull_calls(&self) -> u32 {
            self.state.lock().await.pull_calls
        }

        async fn simulate_latency(&self) {
            let latency = self.state.lock().await.latency;
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
        }
    }

    fn parse_checkpoint(checkpoint: &Checkpoint) -> Result<usize> {
        match checkpoint.as_str() {
            None => Ok(0),
            Some(raw) => raw
                .parse()
                .map_err(|_| SyncError::Rejected(format!("unknown checkpoint {raw:?}"))),
        }
    }

    #[async_trait]
    impl RemoteSyncClient for MemoryRemote {
        async fn push(&self, batch: &[QueueItem]) -> Result<AckResult> {
            self.simulate_latency().await;

            let mut state = self.state.lock().await;
            state.push_calls += 1;
            if state.offline {
                return Err(SyncError::Transport("remote unreachable".into()));
            }
            if state.failing_pushes > 0 {
                state.failing_pushes -= 1;
                return Err(SyncError::Transport("connection reset".into()));
            }

            let mut ack = AckResult::default();
            for item in batch {
                *state.received.entry(item.id).or_insert(0) += 1;

                if let Some((reason, retryable)) = state.rejections.get(&item.id).cloned() {
                    ack.rejected.push(RejectedItem {
                        id: item.id,
                        reason,
                        retryable,
                    });
                    continue;
                }

                if state.applied.insert(item.id) {
                    let version = EntityVersion::from_item(item);
                    if version.is_delete() {
                        state.entities.remove(&item.entity);
                    } else {
                        state.entities.insert(item.entity.clone(), version);
                    }
                }
                ack.acknowledged.push(item.id);
            }

            if state.dropped_acks > 0 {
                state.dropped_acks -= 1;
                return Err(SyncError::Transport(
                    "connection lost before acknowledgment".into(),
                ));
            }
            Ok(ack)
        }

        async fn pull(&self, checkpoint: &Checkpoint) -> Result<PullResult> {
            self.simulate_latency().await;

            let mut state = self.state.lock().await;
            state.pull_calls += 1;
            if state.offline {
                return Err(SyncError::Transport("remote unreachable".into()));
            }
            if state.failing_pulls > 0 {
                state.failing_pulls -= 1;
                return Err(SyncError::Transport("connection reset".into()));
            }

            let position = parse_checkpoint(checkpoint)?;
            let changes = if checkpoint.is_empty() {
                state
                    .entities
                    .iter()
                    .map(|(entity, version)| EntityDelta::new(entity.clone(), version.clone()))
                    .collect()
            } else {
                state.log.iter().skip(position).cloned().collect()
            };

            Ok(PullResult {
                changes,
                new_checkpoint: Checkpoint::new(state.log.len().to_string()),
            })
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use fieldsync_core::{NewMutation, Operation};

        fn item(id: i64, entity: &str, payload: &str) -> QueueItem {
            QueueItem::from_new(
                QueueItemId::new(id),
                NewMutation::update(EntityKey::new("Asset", entity), payload.to_string()),
            )
        }

        #[tokio::test]
        async fn test_push_is_idempotent() {
            let remote = MemoryRemote::new();
            let first = item(1, "42", "a");

            let ack = remote.push(&[first.clone()]).await.unwrap();
            assert!(ack.is_acknowledged(first.id));
            let ack = remote.push(&[first.clone()]).await.unwrap();
            assert!(ack.is_acknowledged(first.id));

            assert_eq!(remote.times_received(first.id).await, 2);
            assert!(remote.was_applied(first.id).await);
        }

        #[tokio::test]
        async fn test_dropped_ack_still_applies() {
            let remote = MemoryRemote::new();
            remote.drop_next_acks(1).await;
            let pushed = item(1, "42", "a");

            assert!(remote.push(&[pushed.clone()]).await.is_err());
            assert!(remote.was_applied(pushed.id).await);
            assert!(remote.push(&[pushed]).await.is_ok());
        }

        #[tokio::test]
        async fn test_pull_since_checkpoint() {
            let remote = MemoryRemote::new();
            let job = EntityKey::new("Job", "7");
            remote
                .remote_edit(job.clone(), EntityVersion::new(Operation::Update, "v1", 10))
                .await;

            let full = remote.pull(&Checkpoint::empty()).await.unwrap();
            assert_eq!(full.changes.len(), 1);
            assert_eq!(full.new_checkpoint.as_str(), Some("1"));

            let none = remote.pull(&full.new_checkpoint).await.unwrap();
            assert!(none.changes.is_empty());

            remote
                .remote_edit(job.clone(), EntityVersion::new(Operation::Update, "v2", 20))
                .await;
            let delta = remote.pull(&full.new_checkpoint).await.unwrap();
            assert_eq!(delta.changes.len(), 1);
            assert_eq!(delta.changes[0].version.timestamp, 20);
        }

        #[tokio::test]
        async fn test_rejections_and_offline() {
            let remote = MemoryRemote::new();
            let bad = item(1, "42", "a");
            remote.reject_item(bad.id, "schema violation", false).await;

            let ack = remote.push(&[bad.clone()]).await.unwrap();
            assert!(ack.acknowledged.is_empty());
            assert_eq!(ack.rejected[0].reason, "schema violation");

            remote.set_offline(true).await;
            let err = remote.pull(&Checkpoint::empty()).await.unwrap_err();
            assert!(err.is_transient());
        }

        #[tokio::test]
        async fn test_unknown_checkpoint_rejected() {
            let remote = MemoryRemote::new();
            let err = remote.pull(&Checkpoint::new("abc")).await.unwrap_err();
            assert!(matches!(err, SyncError::Rejected(_)));
        }
    }
}
