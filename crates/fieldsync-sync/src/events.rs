//! Event bus for surfacing sync activity to the UI layer.

use fieldsync_core::{SyncSession, SyncType};
use tokio::sync::broadcast;

/// Sync-related events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A session entered `Syncing`.
    SyncStarted { session_id: u64, sync_type: SyncType },
    /// Work done so far in the running session.
    SyncProgress {
        current: usize,
        total: usize,
        current_item: Option<String>,
    },
    /// A session ended (completed, failed, or cancelled).
    SyncCompleted {
        success: bool,
        message: String,
        stats: SyncSession,
    },
    /// Debounced reachability edge.
    StatusChanged { online: bool },
    /// Conflicts are waiting for a manual decision.
    ConflictsPending { count: usize },
    /// A mutation was enqueued.
    QueueChanged { depth: usize },
}

/// Event bus for broadcasting sync events.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    /// Create a new event bus with specified capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Emit an event.
    pub fn emit(&self, event: SyncEvent) {
        // No receivers is fine
        let _ = self.sender.send(event);
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
