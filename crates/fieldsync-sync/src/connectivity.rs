//! Network reachability with debouncing.
//!
//! The platform reports raw network changes through
//! [`ConnectivityMonitor::report`]. A background task only accepts a new
//! state after it has stayed unchanged for the debounce interval, and emits
//! [`SyncEvent::StatusChanged`] on online/offline edges only.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::events::{EventBus, SyncEvent};

/// Whether the remote can be reached at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reachability {
    Online,
    Offline,
}

/// Kind of link carrying traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionKind {
    None,
    Wifi,
    Ethernet,
    Cellular,
}

/// Snapshot of the device's network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkStatus {
    pub reachability: Reachability,
    pub kind: ConnectionKind,
}

impl NetworkStatus {
    pub const OFFLINE: Self = Self {
        reachability: Reachability::Offline,
        kind: ConnectionKind::None,
    };

    pub const fn online(kind: ConnectionKind) -> Self {
        Self {
            reachability: Reachability::Online,
            kind,
        }
    }

    pub fn is_online(&self) -> bool {
        self.reachability == Reachability::Online
    }

    /// Cellular links are metered.
    pub fn is_metered(&self) -> bool {
        self.kind == ConnectionKind::Cellular
    }
}

/// Debounced view of reachability.
pub struct ConnectivityMonitor {
    raw: watch::Sender<NetworkStatus>,
    stable: watch::Receiver<NetworkStatus>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ConnectivityMonitor {
    /// Start monitoring from `initial`, accepting changes after `debounce`.
    ///
    /// Must be called inside a tokio runtime.
    pub fn spawn(initial: NetworkStatus, debounce: Duration, events: EventBus) -> Self {
        let (raw, raw_rx) = watch::channel(initial);
        let (stable_tx, stable) = watch::channel(initial);
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(debounce_loop(
            raw_rx,
            stable_tx,
            debounce,
            events,
            shutdown.clone(),
        ));

        Self {
            raw,
            stable,
            shutdown,
            task: Some(task),
        }
    }

    /// Feed a raw observation from the platform.
    pub fn report(&self, status: NetworkStatus) {
        self.raw.send_replace(status);
    }

    /// The debounced status.
    pub fn current(&self) -> NetworkStatus {
        *self.stable.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.current().is_online()
    }

    /// Watch the debounced status.
    pub fn subscribe(&self) -> watch::Receiver<NetworkStatus> {
        self.stable.clone()
    }

    /// Stop the debounce task.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "connectivity task ended abnormally");
            }
        }
    }
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn debounce_loop(
    mut raw: watch::Receiver<NetworkStatus>,
    stable: watch::Sender<NetworkStatus>,
    debounce: Duration,
    events: EventBus,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            changed = raw.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }

        // Restart the quiet period on every further change.
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(debounce) => break,
                changed = raw.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }

        let candidate = *raw.borrow_and_update();
        let previous = *stable.borrow();
        if candidate == previous {
            continue;
        }

        stable.send_replace(candidate);
        if candidate.reachability != previous.reachability {
            tracing::info!(online = candidate.is_online(), kind = ?candidate.kind, "connectivity changed");
            events.emit(SyncEvent::StatusChanged {
                online: candidate.is_online(),
            });
        } else {
            tracing::debug!(kind = ?candidate.kind, "connection kind changed");
        }
    }
}
