//! # fieldsync core
//!
//! Pure model for the fieldsync offline-first sync engine: queued local
//! mutations, remote deltas, conflict resolution, and retry policy.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`QueueItem`] - A durably recorded local mutation awaiting transmission
//! - [`ItemStatus`] - Delivery state machine of a queue item
//! - [`EntityDelta`] - A remote change pulled from the authoritative store
//! - [`ConflictResolver`] - Pure decision over a [`ConflictCase`]
//! - [`RetryPolicy`] - Exponential backoff with cap and jitter
//! - [`SyncSession`] - Record of one sync cycle

pub mod conflict;
pub mod delta;
pub mod digest;
pub mod error;
pub mod mutation;
pub mod retry;
pub mod session;
pub mod types;

pub use conflict::{
    ConflictCase, ConflictResolver, ConflictStrategy, ManualChoice, Resolution, ResolvedOutcome,
    Winner,
};
pub use delta::{AckResult, EntityDelta, EntityVersion, PullResult, RejectedItem};
pub use digest::PayloadDigest;
pub use error::{CoreError, Result};
pub use mutation::{ItemStatus, NewMutation, Operation, QueueItem};
pub use retry::{FailureKind, RetryDecision, RetryPolicy, DEFAULT_MAX_RETRIES};
pub use session::{SyncSession, SyncType};
pub use types::{now_millis, Checkpoint, EntityKey, QueueItemId};
