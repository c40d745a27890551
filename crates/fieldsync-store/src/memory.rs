//! In-memory implementation of the storage traits.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::{BTreeMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use fieldsync_core::{
    Checkpoint, ConflictCase, EntityKey, ItemStatus, NewMutation, QueueItem, QueueItemId,
    SyncSession,
};

use crate::error::{Result, StoreError};
use crate::traits::{select_batch, MutationQueue, SyncStateStore};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Queue items indexed (and therefore ordered) by id.
    items: BTreeMap<QueueItemId, QueueItem>,

    /// Last id handed out. Never decremented.
    last_id: i64,

    checkpoint: Checkpoint,

    /// Deferred manual conflicts.
    conflicts: BTreeMap<EntityKey, ConflictCase>,

    /// Session history, oldest first.
    sessions: Vec<SyncSession>,
}

impl MemoryStoreInner {
    fn item_mut(&mut self, id: QueueItemId) -> Result<&mut QueueItem> {
        self.items.get_mut(&id).ok_or(StoreError::NotFound(id))
    }

    fn check(&self, id: QueueItemId, to: ItemStatus) -> Result<()> {
        let item = self.items.get(&id).ok_or(StoreError::NotFound(id))?;
        if item.status.can_transition_to(to) {
            Ok(())
        } else {
            Err(StoreError::InvalidTransition {
                id,
                from: item.status,
                to,
            })
        }
    }

    /// Record a failed attempt on an `InFlight` item.
    fn record_failure(
        &mut self,
        id: QueueItemId,
        to: ItemStatus,
        error: &str,
    ) -> Result<QueueItem> {
        self.check(id, to)?;
        let item = self.item_mut(id)?;
        item.status = to;
        item.retry_count = item.retry_count.saturating_add(1);
        item.last_error = Some(error.to_string());
        Ok(item.clone())
    }
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner.write().map_err(|_| StoreError::LockPoisoned)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MutationQueue for MemoryStore {
    async fn enqueue(&self, mutation: NewMutation) -> Result<QueueItem> {
        let mut inner = self.write()?;
        inner.last_id += 1;
        let id = QueueItemId::new(inner.last_id);
        let item = QueueItem::from_new(id, mutation);
        inner.items.insert(id, item.clone());
        Ok(item)
    }

    async fn peek_batch_excluding(
        &self,
        limit: usize,
        exclude: &HashSet<EntityKey>,
    ) -> Result<Vec<QueueItem>> {
        let inner = self.read()?;
        let mut held = exclude.clone();
        held.extend(inner.conflicts.keys().cloned());
        Ok(select_batch(inner.items.values().cloned(), &held, limit))
    }

    async fn mark_in_flight(&self, ids: &[QueueItemId]) -> Result<()> {
        let mut inner = self.write()?;
        for &id in ids {
            inner.check(id, ItemStatus::InFlight)?;
        }
        for &id in ids {
            inner.item_mut(id)?.status = ItemStatus::InFlight;
        }
        Ok(())
    }

    async fn mark_acknowledged(&self, ids: &[QueueItemId]) -> Result<()> {
        let mut inner = self.write()?;
        for &id in ids {
            inner.check(id, ItemStatus::Acknowledged)?;
        }
        for id in ids {
            inner.items.remove(id);
        }
        Ok(())
    }

    async fn mark_retry(&self, id: QueueItemId, error: &str) -> Result<QueueItem> {
        let mut inner = self.write()?;
        let from = inner.items.get(&id).ok_or(StoreError::NotFound(id))?.status;
        if from != ItemStatus::InFlight {
            return Err(StoreError::InvalidTransition {
                id,
                from,
                to: ItemStatus::Pending,
            });
        }
        inner.record_failure(id, ItemStatus::Pending, error)
    }

    async fn mark_failed(&self, id: QueueItemId, error: &str) -> Result<QueueItem> {
        let mut inner = self.write()?;
        inner.record_failure(id, ItemStatus::Failed, error)
    }

    async fn release_in_flight(&self) -> Result<usize> {
        let mut inner = self.write()?;
        let mut released = 0;
        for item in inner.items.values_mut() {
            if item.status == ItemStatus::InFlight {
                item.status = ItemStatus::Pending;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn retry_failed(&self, id: QueueItemId) -> Result<QueueItem> {
        let mut inner = self.write()?;
        let from = inner.items.get(&id).ok_or(StoreError::NotFound(id))?.status;
        if from != ItemStatus::Failed {
            return Err(StoreError::InvalidTransition {
                id,
                from,
                to: ItemStatus::Pending,
            });
        }
        let item = inner.item_mut(id)?;
        item.status = ItemStatus::Pending;
        item.retry_count = 0;
        Ok(item.clone())
    }

    async fn discard(&self, id: QueueItemId) -> Result<()> {
        let mut inner = self.write()?;
        let status = inner.items.get(&id).ok_or(StoreError::NotFound(id))?.status;
        if status == ItemStatus::InFlight {
            return Err(StoreError::InvalidTransition {
                id,
                from: status,
                to: ItemStatus::Acknowledged,
            });
        }
        inner.items.remove(&id);
        Ok(())
    }

    async fn get(&self, id: QueueItemId) -> Result<Option<QueueItem>> {
        Ok(self.read()?.items.get(&id).cloned())
    }

    async fn size(&self) -> Result<usize> {
        Ok(self.read()?.items.len())
    }

    async fn list_all(&self) -> Result<Vec<QueueItem>> {
        Ok(self.read()?.items.values().cloned().collect())
    }

    async fn list_failed(&self) -> Result<Vec<QueueItem>> {
        let inner = self.read()?;
        Ok(inner
            .items
            .values()
            .filter(|item| item.is_failed())
            .cloned()
            .collect())
    }

    async fn pending_for_entity(&self, entity: &EntityKey) -> Result<Vec<QueueItem>> {
        let inner = self.read()?;
        Ok(inner
            .items
            .values()
            .filter(|item| item.is_pending() && &item.entity == entity)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SyncStateStore for MemoryStore {
    async fn load_checkpoint(&self) -> Result<Checkpoint> {
        Ok(self.read()?.checkpoint.clone())
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.write()?.checkpoint = checkpoint.clone();
        Ok(())
    }

    async fn save_pending_conflict(&self, case: &ConflictCase) -> Result<()> {
        self.write()?
            .conflicts
            .insert(case.entity.clone(), case.clone());
        Ok(())
    }

    async fn get_pending_conflict(&self, entity: &EntityKey) -> Result<Option<ConflictCase>> {
        Ok(self.read()?.conflicts.get(entity).cloned())
    }

    async fn list_pending_conflicts(&self) -> Result<Vec<ConflictCase>> {
        Ok(self.read()?.conflicts.values().cloned().collect())
    }

    async fn remove_pending_conflict(&self, entity: &EntityKey) -> Result<bool> {
        Ok(self.write()?.conflicts.remove(entity).is_some())
    }

    async fn record_session(&self, session: &SyncSession) -> Result<()> {
        self.write()?.sessions.push(session.clone());
        Ok(())
    }

    async fn recent_sessions(&self, limit: usize) -> Result<Vec<SyncSession>> {
        let inner = self.read()?;
        Ok(inner.sessions.iter().rev().take(limit).cloned().collect())
    }
}
