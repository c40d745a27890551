//! Queue items: durably recorded local mutations awaiting transmission.
//!
//! A queue item is created synchronously with the local write it describes.
//! Its payload is a snapshot of the entity at enqueue time and never changes
//! afterwards; only the delivery bookkeeping (`status`, `retry_count`,
//! `last_error`) moves.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::digest::PayloadDigest;
use crate::error::CoreError;
use crate::types::{now_millis, EntityKey, QueueItemId};

/// The kind of local mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// A new record.
    Create,
    /// A change to an existing record.
    Update,
    /// Removal of a record.
    Delete,
    /// A binary attachment.
    Upload,
}

impl Operation {
    /// Stable name used in storage.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Upload => "upload",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            "upload" => Ok(Self::Upload),
            other => Err(CoreError::UnknownOperation(other.to_string())),
        }
    }
}

/// Delivery status of a queue item.
///
/// ```text
/// Pending ──> InFlight ──> Acknowledged
///    ^           │
///    └───────────┤ (retry)
///                └──> Failed ──(manual retry)──> Pending
/// ```
///
/// `Pending -> Acknowledged` is used when a conflict is resolved in favour of
/// the remote version and the local item is dropped without transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemStatus {
    Pending,
    InFlight,
    Failed,
    Acknowledged,
}

impl ItemStatus {
    /// Stable name used in storage.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Failed => "failed",
            Self::Acknowledged => "acknowledged",
        }
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub const fn can_transition_to(self, next: ItemStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InFlight)
                | (Self::Pending, Self::Acknowledged)
                | (Self::InFlight, Self::Acknowledged)
                | (Self::InFlight, Self::Pending)
                | (Self::InFlight, Self::Failed)
                | (Self::Failed, Self::Pending)
        )
    }

    /// Check a transition, returning an error if it is illegal.
    pub fn check_transition(self, next: ItemStatus) -> Result<(), CoreError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(CoreError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_flight" => Ok(Self::InFlight),
            "failed" => Ok(Self::Failed),
            "acknowledged" => Ok(Self::Acknowledged),
            other => Err(CoreError::UnknownStatus(other.to_string())),
        }
    }
}

/// A mutation to be appended to the queue.
///
/// The queue assigns the id and the initial bookkeeping fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMutation {
    pub entity: EntityKey,
    pub operation: Operation,
    pub payload: Bytes,
    /// Enqueue time (Unix ms, UTC).
    pub queued_at: i64,
}

impl NewMutation {
    /// Create a mutation stamped with the current time.
    pub fn new(entity: EntityKey, operation: Operation, payload: impl Into<Bytes>) -> Self {
        Self {
            entity,
            operation,
            payload: payload.into(),
            queued_at: now_millis(),
        }
    }

    pub fn create(entity: EntityKey, payload: impl Into<Bytes>) -> Self {
        Self::new(entity, Operation::Create, payload)
    }

    pub fn update(entity: EntityKey, payload: impl Into<Bytes>) -> Self {
        Self::new(entity, Operation::Update, payload)
    }

    pub fn delete(entity: EntityKey) -> Self {
        Self::new(entity, Operation::Delete, Bytes::new())
    }

    pub fn upload(entity: EntityKey, payload: impl Into<Bytes>) -> Self {
        Self::new(entity, Operation::Upload, payload)
    }

    /// Override the enqueue timestamp.
    pub fn at(mut self, queued_at: i64) -> Self {
        self.queued_at = queued_at;
        self
    }

    /// Digest of the payload, recorded alongside the item.
    pub fn digest(&self) -> PayloadDigest {
        PayloadDigest::compute(&self.payload)
    }
}

/// A single pending local mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Unique, monotonically increasing id.
    pub id: QueueItemId,
    /// The affected record.
    pub entity: EntityKey,
    pub operation: Operation,
    /// Snapshot of the entity at enqueue time.
    pub payload: Bytes,
    /// Digest of `payload` taken at enqueue time.
    pub payload_digest: PayloadDigest,
    /// Enqueue time (Unix ms, UTC).
    pub queued_at: i64,
    /// Failed transmission attempts so far.
    pub retry_count: u32,
    /// Most recent failure description.
    pub last_error: Option<String>,
    pub status: ItemStatus,
}

impl QueueItem {
    /// Build the stored form of a freshly enqueued mutation.
    pub fn from_new(id: QueueItemId, mutation: NewMutation) -> Self {
        let payload_digest = mutation.digest();
        Self {
            id,
            entity: mutation.entity,
            operation: mutation.operation,
            payload: mutation.payload,
            payload_digest,
            queued_at: mutation.queued_at,
            retry_count: 0,
            last_error: None,
            status: ItemStatus::Pending,
        }
    }

    /// Check the payload against the digest recorded at enqueue.
    pub fn verify_payload(&self) -> Result<(), CoreError> {
        if self.payload_digest.verify(&self.payload) {
            Ok(())
        } else {
            Err(CoreError::PayloadCorrupted(self.id.to_string()))
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ItemStatus::Pending
    }

    pub fn is_failed(&self) -> bool {
        self.status == ItemStatus::Failed
    }
}
