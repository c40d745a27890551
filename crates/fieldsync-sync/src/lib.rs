//! # fieldsync sync
//!
//! Session orchestration between the durable mutation queue and an
//! authoritative remote.
//!
//! ## Overview
//!
//! A [`SyncOrchestrator`] runs one session at a time: it pulls the remote
//! delta since the stored checkpoint, pushes queued mutations in batches,
//! resolves overlaps with a [`ConflictStrategy`](fieldsync_core::ConflictStrategy),
//! and applies remote versions through a [`LocalStore`]. The remote and the
//! local database are collaborators behind traits, so tests run against
//! [`MemoryRemote`] and [`MemoryLocalStore`].
//!
//! ## Key Properties
//!
//! - **At-least-once**: items leave the queue only on explicit acknowledgment
//! - **Per-entity order**: an item is never sent ahead of an older item for
//!   the same entity
//! - **Checkpoint last**: the pull cursor advances only after every remote
//!   change has been applied
//! - **Single session**: concurrent triggers are refused, not queued
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use fieldsync_core::{ConflictStrategy, SyncType};
//! use fieldsync_store::SqliteStore;
//! use fieldsync_sync::{EventBus, MemoryLocalStore, MemoryRemote, SyncConfig, SyncOrchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! async fn example() -> fieldsync_sync::Result<()> {
//!     let store = Arc::new(SqliteStore::open("queue.db")?);
//!     let orchestrator = SyncOrchestrator::new(
//!         store,
//!         Arc::new(MemoryRemote::new()),
//!         Arc::new(MemoryLocalStore::new()),
//!         SyncConfig::default(),
//!         EventBus::default(),
//!     );
//!
//!     let outcome = orchestrator
//!         .run(SyncType::Delta, ConflictStrategy::ServerWins, &CancellationToken::new())
//!         .await;
//!     println!("{outcome:?}");
//!     Ok(())
//! }
//! ```
//!
//! ## Session Flow
//!
//! ```text
//! Orchestrator                         Remote
//!   |-------- pull(checkpoint) -------->|
//!   |<------- changes, new checkpoint --|
//!   |-------- push(batch) ------------->|   entities not in the delta
//!   |<------- ack / rejected -----------|
//!   |   resolve overlaps                |
//!   |-------- push(batch) ------------->|   local winners
//!   |<------- ack / rejected -----------|
//!   |   apply remote versions, save checkpoint
//! ```

pub mod config;
pub mod connectivity;
pub mod error;
pub mod events;
pub mod local;
pub mod orchestrator;
pub mod remote;
pub mod stats;

pub use config::{SyncConfig, SyncInterval, SyncSettings};
pub use connectivity::{ConnectionKind, ConnectivityMonitor, NetworkStatus, Reachability};
pub use error::{Result, SyncError};
pub use events::{EventBus, SyncEvent};
pub use local::{memory::MemoryLocalStore, LocalStore};
pub use orchestrator::{SessionReport, SyncOrchestrator, SyncOutcome, SyncPhase};
pub use remote::{memory::MemoryRemote, RemoteSyncClient};
pub use stats::{StatisticsSnapshot, SyncStatistics};
