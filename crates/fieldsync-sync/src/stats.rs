//! Aggregated session outcomes for observability and UI display.

use std::sync::{Mutex, PoisonError};

use fieldsync_core::SyncSession;
use fieldsync_store::Store;
use serde::Serialize;

use crate::error::Result;

/// Read-only view of sync health.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatisticsSnapshot {
    pub total_syncs: u64,
    pub successful_syncs: u64,
    pub failed_syncs: u64,
    /// End of the last session (Unix ms).
    pub last_sync_at: Option<i64>,
    pub last_duration_ms: Option<i64>,
    pub conflicts_resolved: u64,
    pub items_pushed: u64,
    pub items_pulled: u64,
    /// Items not yet acknowledged, read live from the queue.
    pub pending_depth: usize,
    /// Items in the dead-letter state, read live.
    pub failed_items: usize,
    /// Conflicts waiting for a manual decision, read live.
    pub pending_conflicts: usize,
}

#[derive(Debug, Default)]
struct Totals {
    total_syncs: u64,
    successful_syncs: u64,
    failed_syncs: u64,
    last_sync_at: Option<i64>,
    last_duration_ms: Option<i64>,
    conflicts_resolved: u64,
    items_pushed: u64,
    items_pulled: u64,
}

/// Accumulates finished sessions.
#[derive(Debug, Default)]
pub struct SyncStatistics {
    totals: Mutex<Totals>,
}

impl SyncStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a finished session into the totals.
    pub fn record(&self, session: &SyncSession) {
        let mut totals = self.totals.lock().unwrap_or_else(PoisonError::into_inner);
        totals.total_syncs += 1;
        if session.success {
            totals.successful_syncs += 1;
        } else {
            totals.failed_syncs += 1;
        }
        totals.conflicts_resolved += u64::from(session.conflicts_resolved);
        totals.items_pushed += u64::from(session.items_pushed);
        totals.items_pulled += u64::from(session.items_pulled);

        let finished = session.completed_at;
        if finished >= totals.last_sync_at {
            totals.last_sync_at = finished;
            totals.last_duration_ms = session.duration_millis();
        }
    }

    /// Seed totals from persisted history (any order).
    pub fn seed<'a>(&self, history: impl IntoIterator<Item = &'a SyncSession>) {
        for session in history {
            self.record(session);
        }
    }

    /// Totals plus live queue figures.
    pub async fn snapshot<S: Store + ?Sized>(&self, store: &S) -> Result<StatisticsSnapshot> {
        let pending_depth = store.size().await?;
        let failed_items = store.list_failed().await?.len();
        let pending_conflicts = store.list_pending_conflicts().await?.len();

        let totals = self.totals.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(StatisticsSnapshot {
            total_syncs: totals.total_syncs,
            successful_syncs: totals.successful_syncs,
            failed_syncs: totals.failed_syncs,
            last_sync_at: totals.last_sync_at,
            last_duration_ms: totals.last_duration_ms,
            conflicts_resolved: totals.conflicts_resolved,
            items_pushed: totals.items_pushed,
            items_pulled: totals.items_pulled,
            pending_depth,
            failed_items,
            pending_conflicts,
        })
    }
}
