//! # fieldsync store
//!
//! Durable storage for the fieldsync engine: the mutation queue, the pull
//! checkpoint, deferred conflicts, and session history.
//!
//! ## Overview
//!
//! Storage is abstracted behind the [`MutationQueue`] and [`SyncStateStore`]
//! traits (combined as [`Store`]), so the sync layer is storage-agnostic.
//! The primary implementation is [`SqliteStore`], with [`MemoryStore`] for
//! testing.
//!
//! ## Key Types
//!
//! - [`MutationQueue`] - Durable FIFO of local mutations
//! - [`SyncStateStore`] - Checkpoint, deferred conflicts, and session history
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fieldsync_core::{EntityKey, NewMutation};
//! use fieldsync_store::{MutationQueue, SqliteStore};
//!
//! async fn example() -> fieldsync_store::Result<()> {
//!     let store = SqliteStore::open("queue.db")?;
//!
//!     let mutation = NewMutation::update(EntityKey::new("Asset", "42"), r#"{"brand":"Trane"}"#);
//!     let item = store.enqueue(mutation).await?;
//!     assert_eq!(store.size().await?, 1);
//!     # let _ = item;
//!     Ok(())
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Durable enqueue**: an item is committed before `enqueue` returns
//! - **Delete on ack**: acknowledged rows are removed, never kept as history
//! - **Restart-safe**: statuses and retry counts survive a reopen unchanged

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{select_batch, MutationQueue, Store, SyncStateStore};
