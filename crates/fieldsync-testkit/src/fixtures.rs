//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use fieldsync_core::{
    ConflictStrategy, EntityKey, EntityVersion, NewMutation, Operation, SyncType,
};
use fieldsync_store::MemoryStore;
use fieldsync_sync::{
    EventBus, MemoryLocalStore, MemoryRemote, SyncConfig, SyncOrchestrator, SyncOutcome,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tokio_util::sync::CancellationToken;

/// 2026-01-14T12:00:00Z
pub const BASE_TIME: i64 = 1_768_392_000_000;

/// Orchestrator over the fixture's in-memory collaborators.
pub type MemoryOrchestrator = SyncOrchestrator<MemoryStore, MemoryRemote, MemoryLocalStore>;

/// In-memory store, remote, and local table, plus a fake clock.
pub struct TestFixture {
    pub store: Arc<MemoryStore>,
    pub remote: Arc<MemoryRemote>,
    pub local: Arc<MemoryLocalStore>,
    clock: AtomicI64,
}

impl TestFixture {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            remote: Arc::new(MemoryRemote::new()),
            local: Arc::new(MemoryLocalStore::new()),
            clock: AtomicI64::new(BASE_TIME),
        }
    }

    /// Build an orchestrator wired to this fixture.
    pub fn orchestrator(&self, config: SyncConfig) -> MemoryOrchestrator {
        SyncOrchestrator::new(
            Arc::clone(&self.store),
            Arc::clone(&self.remote),
            Arc::clone(&self.local),
            config,
            EventBus::new(256),
        )
    }

    /// Advance the fake clock by one second and return it.
    pub fn tick(&self) -> i64 {
        self.clock.fetch_add(1_000, Ordering::Relaxed) + 1_000
    }

    /// A local update stamped with the next tick.
    pub fn local_update(&self, entity: EntityKey, payload: &str) -> NewMutation {
        NewMutation::update(entity, payload.to_string()).at(self.tick())
    }

    /// Record an update made by another device, stamped with the next tick.
    pub async fn remote_update(&self, entity: EntityKey, payload: &str) -> EntityVersion {
        let version = EntityVersion::new(Operation::Update, payload.to_string(), self.tick());
        self.remote.remote_edit(entity, version.clone()).await;
        version
    }

    /// Run one delta session that nobody cancels.
    pub async fn sync(
        &self,
        orchestrator: &MemoryOrchestrator,
        strategy: ConflictStrategy,
    ) -> SyncOutcome {
        orchestrator
            .run(SyncType::Delta, strategy, &CancellationToken::new())
            .await
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

pub fn asset(id: u32) -> EntityKey {
    EntityKey::new("Asset", id.to_string())
}

pub fn job(id: u32) -> EntityKey {
    EntityKey::new("Job", id.to_string())
}

pub fn photo(id: u32) -> EntityKey {
    EntityKey::new("Photo", id.to_string())
}

/// `count` entities cycling through assets, jobs and photos.
pub fn field_entities(count: u32) -> Vec<EntityKey> {
    (0..count)
        .map(|i| match i % 3 {
            0 => asset(i),
            1 => job(i),
            _ => photo(i),
        })
        .collect()
}

/// `per_entity` edits for each entity, shuffled across entities.
///
/// Within one entity the payloads count up (`"Asset#0:1"`, `"Asset#0:2"`,
/// ...) in enqueue order, so the final remote payload shows whether
/// per-entity order held. Timestamps count up from [`BASE_TIME`] in
/// shuffled order. Deterministic for a given `seed`.
pub fn interleaved_edits(entities: &[EntityKey], per_entity: u32, seed: u64) -> Vec<NewMutation> {
    let mut slots: Vec<&EntityKey> = entities
        .iter()
        .flat_map(|entity| std::iter::repeat(entity).take(per_entity as usize))
        .collect();
    slots.shuffle(&mut StdRng::seed_from_u64(seed));

    let mut counters = vec![0u32; entities.len()];
    slots
        .into_iter()
        .zip(BASE_TIME..)
        .map(|(entity, queued_at)| {
            let index = entities
                .iter()
                .position(|e| e == entity)
                .unwrap_or_default();
            counters[index] += 1;
            NewMutation::update(entity.clone(), format!("{entity}:{}", counters[index]))
                .at(queued_at)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_store::MutationQueue;

    #[test]
    fn test_interleaving_is_deterministic() {
        let entities = field_entities(4);
        let a = interleaved_edits(&entities, 3, 7);
        let b = interleaved_edits(&entities, 3, 7);
        assert_eq!(a, b);
        assert_eq!(a.len(), 12);
    }

    #[test]
    fn test_clock_advances() {
        let fixture = TestFixture::new();
        let first = fixture.tick();
        let second = fixture.local_update(asset(1), "x").queued_at;
        assert_eq!(first, BASE_TIME + 1_000);
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_per_entity_order_survives_batching() {
        let fixture = TestFixture::new();
        let orchestrator = fixture.orchestrator(SyncConfig {
            batch_size: 4,
            ..SyncConfig::default()
        });
        let entities = field_entities(5);
        for edit in interleaved_edits(&entities, 4, 42) {
            fixture.store.enqueue(edit).await.unwrap();
        }

        let outcome = fixture.sync(&orchestrator, ConflictStrategy::ServerWins).await;
        assert!(outcome.is_completed());
        assert_eq!(outcome.report().unwrap().session.items_pushed, 20);

        for entity in &entities {
            let version = fixture.remote.entity(entity).await.unwrap();
            assert_eq!(version.payload, format!("{entity}:4").into_bytes());
        }
    }

    #[tokio::test]
    async fn test_remote_update_wins_by_default() {
        let fixture = TestFixture::new();
        let orchestrator = fixture.orchestrator(SyncConfig::default());
        fixture
            .store
            .enqueue(fixture.local_update(job(7), "local"))
            .await
            .unwrap();
        let remote = fixture.remote_update(job(7), "remote").await;

        fixture.sync(&orchestrator, ConflictStrategy::default()).await;
        assert_eq!(fixture.local.get(&job(7)).await, Some(remote));
    }
}
