//! Local persistence collaborator: where resolved entity states are written.

use async_trait::async_trait;
use fieldsync_core::{EntityKey, EntityVersion};

use crate::error::Result;

/// Applies resolved entity states to the app's local database.
///
/// `apply` must be idempotent: a crash before the checkpoint advances makes
/// the next session apply the same versions again.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Write `version` as the current state of `entity`.
    async fn apply(&self, entity: &EntityKey, version: &EntityVersion) -> Result<()>;
}

/// In-memory entity table for testing.
pub mod memory {
    use super::*;
    use std::collections::{BTreeMap, HashSet};

    use tokio::sync::Mutex;

    use crate::error::SyncError;

    #[derive(Default)]
    struct LocalState {
        entities: BTreeMap<EntityKey, EntityVersion>,
        failing: HashSet<EntityKey>,
        applies: u32,
    }

    /// Local entity table with per-entity failure injection.
    #[derive(Default)]
    pub struct MemoryLocalStore {
        state: Mutex<LocalState>,
    }

    impl MemoryLocalStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every apply for `entity` fail until [`Self::heal`] is called.
        pub async fn fail_entity(&self, entity: EntityKey) {
            self.state.lock().await.failing.insert(entity);
        }

        pub async fn heal(&self, entity: &EntityKey) {
            self.state.lock().await.failing.remove(entity);
        }

        /// Current local state of an entity.
        pub async fn get(&self, entity: &EntityKey) -> Option<EntityVersion> {
            self.state.lock().await.entities.get(entity).cloned()
        }

        /// Number of successful applies.
        pub async fn apply_count(&self) -> u32 {
            self.state.lock().await.applies
        }
    }

    #[async_trait]
    impl LocalStore for MemoryLocalStore {
        async fn apply(&self, entity: &EntityKey, version: &EntityVersion) -> Result<()> {
            let mut state = self.state.lock().await;
            if state.failing.contains(entity) {
                return Err(SyncError::LocalApply {
                    entity: entity.clone(),
                    reason: "constraint violation".into(),
                });
            }

            if version.is_delete() {
                state.entities.remove(entity);
            } else {
                state.entities.insert(entity.clone(), version.clone());
            }
            state.applies += 1;
            Ok(())
        }
    }

}
