//! # fieldsync
//!
//! Offline-first synchronization for field-service apps: local edits are
//! queued durably while offline and reconciled with an authoritative remote
//! when connectivity returns.
//!
//! ## Overview
//!
//! - **Queue**: every local mutation is committed to disk before `enqueue`
//!   returns and survives crashes and restarts
//! - **Sync**: sessions pull remote changes, push queued mutations in batches
//!   and resolve conflicts per entity
//! - **Conflicts**: `ServerWins`, `ClientWins`, `LastWriteWins`, or `Manual`
//!   (deferred to the user)
//! - **Scheduling**: automatic sync on an interval, when connectivity returns,
//!   and after failures with exponential backoff
//!
//! ## Key Concepts
//!
//! - **Queue item**: one local mutation awaiting acknowledgment. Removed only
//!   when the remote acknowledges it (at-least-once).
//! - **Checkpoint**: opaque pull cursor, advanced only after every remote
//!   change from the session has been applied.
//! - **Dead letter**: an item that exhausted its retries. Stays in the queue
//!   until the user retries or discards it.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use fieldsync::core::{EntityKey, NewMutation};
//! use fieldsync::store::SqliteStore;
//! use fieldsync::sync::{ConnectionKind, MemoryLocalStore, MemoryRemote, NetworkStatus};
//! use fieldsync::{EngineConfig, SyncEngine};
//!
//! async fn example() -> fieldsync::Result<()> {
//!     let store = Arc::new(SqliteStore::open("queue.db")?);
//!     let engine = SyncEngine::new(
//!         store,
//!         Arc::new(MemoryRemote::new()),
//!         Arc::new(MemoryLocalStore::new()),
//!         EngineConfig::default(),
//!     )
//!     .await?;
//!     engine.start()?;
//!
//!     // Works offline; returns once the mutation is on disk
//!     engine
//!         .enqueue(NewMutation::update(EntityKey::new("Asset", "42"), r#"{"brand":"Trane"}"#))
//!         .await?;
//!
//!     // Connectivity returning triggers a sync
//!     engine.report_network(NetworkStatus::online(ConnectionKind::Wifi));
//!
//!     engine.dispose().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `fieldsync::core` - Model types and decisions (QueueItem, ConflictResolver, etc.)
//! - `fieldsync::store` - Storage abstraction and SQLite
//! - `fieldsync::sync` - Orchestrator, collaborators, connectivity and events

pub mod engine;
pub mod error;

// Re-export component crates
pub use fieldsync_core as core;
pub use fieldsync_store as store;
pub use fieldsync_sync as sync;

// Re-export main types for convenience
pub use engine::{EngineConfig, SyncEngine};
pub use error::{EngineError, Result};

// Re-export commonly used types
pub use fieldsync_core::{
    ConflictStrategy, EntityKey, ItemStatus, ManualChoice, NewMutation, Operation, QueueItem,
    QueueItemId, SyncType,
};
pub use fieldsync_sync::{SyncEvent, SyncOutcome, SyncSettings};
