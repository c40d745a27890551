//! Storage traits: the durable mutation queue and persisted sync state.
//!
//! The engine is storage-agnostic. Implementations include SQLite (primary)
//! and in-memory (for tests).

use std::collections::HashSet;

use async_trait::async_trait;
use fieldsync_core::{
    Checkpoint, ConflictCase, EntityKey, ItemStatus, NewMutation, QueueItem, QueueItemId,
    SyncSession,
};

use crate::error::Result;

/// Durable FIFO of local mutations awaiting transmission.
///
/// # Design Notes
///
/// - **Durable before return**: `enqueue` only returns once the item is
///   committed, so a crash right after the call cannot lose it.
/// - **Removal on acknowledgment**: rows leave storage only through
///   [`MutationQueue::mark_acknowledged`] or an explicit
///   [`MutationQueue::discard`].
/// - **Per-entity order**: [`MutationQueue::peek_batch`] never returns an item
///   while an older item for the same entity is in flight or failed.
/// - **Atomic batches**: multi-item status changes are applied all-or-nothing.
#[async_trait]
pub trait MutationQueue: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Producer Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Durably append a mutation with status `Pending` and retry count 0.
    ///
    /// Returns the stored item with its assigned id. Ids increase
    /// monotonically and are never reused.
    async fn enqueue(&self, mutation: NewMutation) -> Result<QueueItem>;

    // ─────────────────────────────────────────────────────────────────────────
    // Delivery Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Up to `limit` deliverable `Pending` items, oldest first.
    ///
    /// Does not mutate state. Items are skipped when their entity has a
    /// pending manual conflict, or when an older item for the same entity is
    /// `InFlight` or `Failed`.
    async fn peek_batch(&self, limit: usize) -> Result<Vec<QueueItem>> {
        self.peek_batch_excluding(limit, &HashSet::new()).await
    }

    /// Like [`MutationQueue::peek_batch`], additionally skipping every item
    /// whose entity is in `exclude`.
    async fn peek_batch_excluding(
        &self,
        limit: usize,
        exclude: &HashSet<EntityKey>,
    ) -> Result<Vec<QueueItem>>;

    /// Move the given items from `Pending` to `InFlight`.
    async fn mark_in_flight(&self, ids: &[QueueItemId]) -> Result<()>;

    /// Record acknowledgment and remove the items from storage.
    ///
    /// Accepts `InFlight` items (server acknowledged) and `Pending` items
    /// (superseded by a winning remote version).
    async fn mark_acknowledged(&self, ids: &[QueueItemId]) -> Result<()>;

    /// Return an `InFlight` item to `Pending` after a failed attempt.
    ///
    /// Increments the retry count and records the error.
    async fn mark_retry(&self, id: QueueItemId, error: &str) -> Result<QueueItem>;

    /// Mark an item `Failed` (dead letter) after its final failed attempt.
    ///
    /// Increments the retry count and records the error.
    async fn mark_failed(&self, id: QueueItemId, error: &str) -> Result<QueueItem>;

    /// Return every `InFlight` item to `Pending` without touching its retry
    /// count. Used when a session is cancelled or found stale after a crash.
    ///
    /// Returns the number of items released.
    async fn release_in_flight(&self) -> Result<usize>;

    // ─────────────────────────────────────────────────────────────────────────
    // Dead Letter Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Move a `Failed` item back to `Pending` with a fresh retry budget.
    async fn retry_failed(&self, id: QueueItemId) -> Result<QueueItem>;

    /// Permanently remove a `Failed` or `Pending` item without sending it.
    async fn discard(&self, id: QueueItemId) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Query Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Get a single item by id.
    async fn get(&self, id: QueueItemId) -> Result<Option<QueueItem>>;

    /// Number of stored items that are not yet acknowledged.
    async fn size(&self) -> Result<usize>;

    /// Every stored item, oldest first.
    async fn list_all(&self) -> Result<Vec<QueueItem>>;

    /// Items in the dead-letter state, oldest first.
    async fn list_failed(&self) -> Result<Vec<QueueItem>>;

    /// `Pending` items targeting `entity`, oldest first.
    async fn pending_for_entity(&self, entity: &EntityKey) -> Result<Vec<QueueItem>>;
}

/// Persisted sync bookkeeping: checkpoint, deferred conflicts, history.
#[async_trait]
pub trait SyncStateStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Checkpoint
    // ─────────────────────────────────────────────────────────────────────────

    /// The last checkpoint committed by a successful pull. Empty if none.
    async fn load_checkpoint(&self) -> Result<Checkpoint>;

    /// Replace the stored checkpoint.
    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Deferred Conflicts
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert or replace the deferred conflict for `case.entity`.
    async fn save_pending_conflict(&self, case: &ConflictCase) -> Result<()>;

    /// The deferred conflict for an entity, if any.
    async fn get_pending_conflict(&self, entity: &EntityKey) -> Result<Option<ConflictCase>>;

    /// All deferred conflicts, ordered by entity.
    async fn list_pending_conflicts(&self) -> Result<Vec<ConflictCase>>;

    /// Remove the deferred conflict for an entity. Returns whether one existed.
    async fn remove_pending_conflict(&self, entity: &EntityKey) -> Result<bool>;

    // ─────────────────────────────────────────────────────────────────────────
    // Session History
    // ─────────────────────────────────────────────────────────────────────────

    /// Append a finished session to the history.
    async fn record_session(&self, session: &SyncSession) -> Result<()>;

    /// The most recent sessions, newest first.
    async fn recent_sessions(&self, limit: usize) -> Result<Vec<SyncSession>>;
}

/// Everything the sync engine needs from storage.
pub trait Store: MutationQueue + SyncStateStore {}

impl<S: MutationQueue + SyncStateStore + ?Sized> Store for S {}

/// Select the next deliverable batch from `items` (oldest first).
///
/// Shared by every backend.
pub fn select_batch(
    items: impl IntoIterator<Item = QueueItem>,
    held: &HashSet<EntityKey>,
    limit: usize,
) -> Vec<QueueItem> {
    let mut blocked: HashSet<EntityKey> = held.clone();
    let mut batch = Vec::new();

    for item in items {
        if batch.len() >= limit {
            break;
        }
        if blocked.contains(&item.entity) {
            continue;
        }
        match item.status {
            ItemStatus::Pending => batch.push(item),
            ItemStatus::InFlight | ItemStatus::Failed => {
                blocked.insert(item.entity);
            }
            ItemStatus::Acknowledged => {}
        }
    }

    batch
}
