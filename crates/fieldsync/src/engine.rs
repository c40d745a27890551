//! The engine: the sync service an app constructs once and injects.
//!
//! The engine brings together the queue, the orchestrator, connectivity and
//! the auto-sync scheduler behind an explicit `start`/`stop`/`dispose`
//! lifecycle.

use std::sync::{Arc, Mutex, PoisonError};

use fieldsync_core::{
    ConflictCase, EntityKey, ManualChoice, NewMutation, QueueItem, QueueItemId, ResolvedOutcome,
    SyncType,
};
use fieldsync_store::Store;
use fieldsync_sync::{
    ConnectivityMonitor, EventBus, LocalStore, NetworkStatus, RemoteSyncClient,
    StatisticsSnapshot, SyncConfig, SyncEvent, SyncOrchestrator, SyncOutcome, SyncPhase,
    SyncSettings,
};
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, Result};

/// Configuration for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Engine tuning.
    pub sync: SyncConfig,
    /// User-facing settings at startup.
    pub settings: SyncSettings,
    /// Network status before the platform reports anything.
    pub initial_network: NetworkStatus,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sync: SyncConfig::default(),
            settings: SyncSettings::default(),
            initial_network: NetworkStatus::OFFLINE,
        }
    }
}

/// Why the scheduler wants to sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AutoTrigger {
    Interval,
    ConnectivityRestored,
    Retry,
}

impl AutoTrigger {
    fn permitted(self, settings: &SyncSettings, network: NetworkStatus) -> bool {
        if !settings.auto_sync_enabled || !usable(settings, network) {
            return false;
        }
        // A manual interval leaves only explicit requests.
        settings.auto_sync_period().is_some()
    }
}

/// Online, and not metered when the user asked for wifi only.
fn usable(settings: &SyncSettings, network: NetworkStatus) -> bool {
    network.is_online() && !(settings.wifi_only && network.is_metered())
}

fn interval_deadline(settings: &SyncSettings) -> Option<Instant> {
    settings.auto_sync_period().map(|period| Instant::now() + period)
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[derive(Debug, Default)]
struct Backoff {
    consecutive_failures: u32,
    retry_at: Option<Instant>,
}

/// State shared with the scheduler task.
struct Shared<S, R, L> {
    orchestrator: SyncOrchestrator<S, R, L>,
    settings: watch::Sender<SyncSettings>,
    /// Token for sessions started from now on; replaced on every cancel.
    session_cancel: Mutex<CancellationToken>,
    backoff: Mutex<Backoff>,
    reschedule: Notify,
}

impl<S, R, L> Shared<S, R, L>
where
    S: Store,
    R: RemoteSyncClient,
    L: LocalStore,
{
    async fn run(&self, sync_type: SyncType) -> SyncOutcome {
        let strategy = self.settings.borrow().conflict_strategy;
        let cancel = self
            .session_cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let outcome = self.orchestrator.run(sync_type, strategy, &cancel).await;
        self.after_session(&outcome);
        outcome
    }

    fn cancel_session(&self) {
        let mut token = self
            .session_cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        token.cancel();
        *token = CancellationToken::new();
    }

    /// Update the retry schedule from a session outcome.
    fn after_session(&self, outcome: &SyncOutcome) {
        {
            let mut backoff = self.backoff.lock().unwrap_or_else(PoisonError::into_inner);
            match outcome {
                SyncOutcome::Completed(_) => *backoff = Backoff::default(),
                SyncOutcome::Failed(_) => {
                    let delay = self
                        .orchestrator
                        .config()
                        .retry
                        .next_delay(backoff.consecutive_failures);
                    backoff.consecutive_failures = backoff.consecutive_failures.saturating_add(1);
                    backoff.retry_at = Some(Instant::now() + delay);
                    tracing::info!(
                        failures = backoff.consecutive_failures,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "sync retry scheduled"
                    );
                }
                SyncOutcome::Cancelled(_) | SyncOutcome::AlreadyRunning => return,
            }
        }
        self.reschedule.notify_one();
    }

    fn retry_at(&self) -> Option<Instant> {
        self.backoff
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retry_at
    }

    fn clear_retry(&self) {
        self.backoff
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retry_at = None;
    }
}

struct Scheduler {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

/// The sync engine.
///
/// Provides a unified API for:
/// - Enqueueing local mutations (never waits on the network)
/// - Explicit and automatic sync sessions
/// - Manual conflict resolution
/// - Dead-letter actions (retry, discard)
/// - Statistics and events for the UI layer
pub struct SyncEngine<S, R, L> {
    shared: Arc<Shared<S, R, L>>,
    connectivity: ConnectivityMonitor,
    scheduler: Mutex<Option<Scheduler>>,
}

impl<S, R, L> SyncEngine<S, R, L>
where
    S: Store + 'static,
    R: RemoteSyncClient + 'static,
    L: LocalStore + 'static,
{
    /// Create an engine. Statistics are seeded from the stored history.
    ///
    /// Must be called inside a tokio runtime. The scheduler does not run
    /// until [`Self::start`].
    pub async fn new(
        store: Arc<S>,
        remote: Arc<R>,
        local: Arc<L>,
        config: EngineConfig,
    ) -> Result<Self> {
        let events = EventBus::new(config.sync.event_capacity);
        let history = store.recent_sessions(config.sync.history_limit).await?;

        let connectivity = ConnectivityMonitor::spawn(
            config.initial_network,
            config.sync.connectivity_debounce,
            events.clone(),
        );
        let orchestrator = SyncOrchestrator::new(store, remote, local, config.sync, events);
        orchestrator.statistics().seed(history.iter());
        tracing::debug!(sessions = history.len(), "statistics seeded from history");

        let (settings, _) = watch::channel(config.settings);
        Ok(Self {
            shared: Arc::new(Shared {
                orchestrator,
                settings,
                session_cancel: Mutex::new(CancellationToken::new()),
                backoff: Mutex::new(Backoff::default()),
                reschedule: Notify::new(),
            }),
            connectivity,
            scheduler: Mutex::new(None),
        })
    }

    /// Get the store reference.
    pub fn store(&self) -> &Arc<S> {
        self.shared.orchestrator.store()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Start the auto-sync scheduler.
    pub fn start(&self) -> Result<()> {
        let mut scheduler = self.scheduler.lock().unwrap_or_else(PoisonError::into_inner);
        if scheduler.is_some() {
            return Err(EngineError::AlreadyStarted);
        }

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_scheduler(
            Arc::clone(&self.shared),
            self.connectivity.subscribe(),
            self.shared.settings.subscribe(),
            shutdown.clone(),
        ));
        *scheduler = Some(Scheduler { shutdown, task });
        tracing::info!("sync engine started");
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Stop the scheduler and cancel a running session.
    ///
    /// The engine stays usable for explicit calls and can be started again.
    pub async fn stop(&self) {
        let scheduler = self
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(scheduler) = scheduler else {
            return;
        };

        scheduler.shutdown.cancel();
        self.shared.cancel_session();
        if let Err(e) = scheduler.task.await {
            tracing::warn!(error = %e, "scheduler task ended abnormally");
        }
        tracing::info!("sync engine stopped");
    }

    /// Stop everything and release background tasks.
    pub async fn dispose(self) {
        self.stop().await;
        self.connectivity.shutdown().await;
        tracing::info!("sync engine disposed");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queue
    // ─────────────────────────────────────────────────────────────────────────

    /// Durably enqueue a local mutation.
    pub async fn enqueue(&self, mutation: NewMutation) -> Result<QueueItem> {
        let store = self.store();
        let item = store.enqueue(mutation).await?;
        let depth = store.size().await?;
        tracing::debug!(item = %item.id, entity = %item.entity, depth, "mutation enqueued");
        self.shared
            .orchestrator
            .events()
            .emit(SyncEvent::QueueChanged { depth });
        Ok(item)
    }

    /// Items not yet acknowledged.
    pub async fn queue_depth(&self) -> Result<usize> {
        Ok(self.store().size().await?)
    }

    /// Dead-lettered items.
    pub async fn list_failed(&self) -> Result<Vec<QueueItem>> {
        Ok(self.store().list_failed().await?)
    }

    /// Give a dead-lettered item a fresh set of retries.
    pub async fn retry_item(&self, id: QueueItemId) -> Result<QueueItem> {
        let item = self.store().retry_failed(id).await?;
        tracing::info!(item = %id, "failed item returned to the queue");
        Ok(item)
    }

    /// Remove an item without sending it.
    pub async fn discard_item(&self, id: QueueItemId) -> Result<()> {
        let store = self.store();
        store.discard(id).await?;
        let depth = store.size().await?;
        tracing::info!(item = %id, "item discarded");
        self.shared
            .orchestrator
            .events()
            .emit(SyncEvent::QueueChanged { depth });
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sync
    // ─────────────────────────────────────────────────────────────────────────

    /// Run a delta sync now.
    pub async fn sync_now(&self) -> SyncOutcome {
        self.shared.run(SyncType::Delta).await
    }

    /// Re-pull the full dataset, ignoring the stored checkpoint.
    pub async fn full_sync(&self) -> SyncOutcome {
        self.shared.run(SyncType::Full).await
    }

    /// Cancel the running session, if any.
    pub fn cancel(&self) {
        self.shared.cancel_session();
    }

    pub fn phase(&self) -> SyncPhase {
        self.shared.orchestrator.phase()
    }

    pub fn watch_phase(&self) -> watch::Receiver<SyncPhase> {
        self.shared.orchestrator.watch_phase()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Conflicts
    // ─────────────────────────────────────────────────────────────────────────

    /// Conflicts waiting for a user decision.
    pub async fn pending_conflicts(&self) -> Result<Vec<ConflictCase>> {
        Ok(self.shared.orchestrator.pending_conflicts().await?)
    }

    /// Resolve a deferred conflict.
    pub async fn resolve_conflict(
        &self,
        entity: &EntityKey,
        choice: ManualChoice,
    ) -> Result<ResolvedOutcome> {
        Ok(self.shared.orchestrator.resolve_manual(entity, choice).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Settings, Network, Observability
    // ─────────────────────────────────────────────────────────────────────────

    pub fn settings(&self) -> SyncSettings {
        self.shared.settings.borrow().clone()
    }

    /// Replace the settings. Applies from the next session.
    pub fn update_settings(&self, settings: SyncSettings) {
        tracing::info!(?settings, "sync settings updated");
        self.shared.settings.send_replace(settings);
    }

    /// Feed a raw network observation from the platform.
    pub fn report_network(&self, status: NetworkStatus) {
        self.connectivity.report(status);
    }

    /// Debounced network status.
    pub fn network(&self) -> NetworkStatus {
        self.connectivity.current()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.shared.orchestrator.events().subscribe()
    }

    pub async fn statistics(&self) -> Result<StatisticsSnapshot> {
        let orchestrator = &self.shared.orchestrator;
        Ok(orchestrator
            .statistics()
            .snapshot(orchestrator.store().as_ref())
            .await?)
    }
}

async fn run_scheduler<S, R, L>(
    shared: Arc<Shared<S, R, L>>,
    mut network: watch::Receiver<NetworkStatus>,
    mut settings: watch::Receiver<SyncSettings>,
    shutdown: CancellationToken,
) where
    S: Store,
    R: RemoteSyncClient,
    L: LocalStore,
{
    let mut was_usable = {
        let current = settings.borrow_and_update().clone();
        usable(&current, *network.borrow_and_update())
    };
    let mut next_tick = interval_deadline(&settings.borrow());

    loop {
        let retry_at = shared.retry_at();
        let deadline = match (next_tick, retry_at) {
            (Some(tick), Some(retry)) => Some(tick.min(retry)),
            (tick, retry) => tick.or(retry),
        };

        let trigger = tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = shared.reschedule.notified() => continue,
            changed = settings.changed() => {
                if changed.is_err() {
                    break;
                }
                next_tick = interval_deadline(&settings.borrow_and_update());
                continue;
            }
            changed = network.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = *network.borrow_and_update();
                let now_usable = usable(&settings.borrow(), status);
                let restored = now_usable && !was_usable;
                was_usable = now_usable;
                if !restored {
                    continue;
                }
                AutoTrigger::ConnectivityRestored
            }
            _ = sleep_until(deadline) => {
                if retry_at.is_some_and(|at| at <= Instant::now()) {
                    AutoTrigger::Retry
                } else {
                    AutoTrigger::Interval
                }
            }
        };

        let current = settings.borrow().clone();
        let status = *network.borrow();
        if !trigger.permitted(&current, status) {
            tracing::debug!(?trigger, "automatic sync suppressed");
            match trigger {
                AutoTrigger::Retry => shared.clear_retry(),
                AutoTrigger::Interval => next_tick = interval_deadline(&current),
                AutoTrigger::ConnectivityRestored => {}
            }
            continue;
        }

        tracing::info!(?trigger, "automatic sync triggered");
        if trigger == AutoTrigger::Retry {
            shared.clear_retry();
        }
        shared.run(SyncType::Delta).await;
        next_tick = interval_deadline(&current);
    }

    tracing::debug!("scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use fieldsync_sync::{ConnectionKind, SyncInterval};

    const CELLULAR: NetworkStatus = NetworkStatus::online(ConnectionKind::Cellular);
    const WIFI: NetworkStatus = NetworkStatus::online(ConnectionKind::Wifi);

    #[test]
    fn test_offline_suppresses_everything() {
        let settings = SyncSettings::default();
        for trigger in [
            AutoTrigger::Interval,
            AutoTrigger::ConnectivityRestored,
            AutoTrigger::Retry,
        ] {
            assert!(!trigger.permitted(&settings, NetworkStatus::OFFLINE));
            assert!(trigger.permitted(&settings, WIFI));
        }
    }

    #[test]
    fn test_wifi_only_blocks_metered() {
        let settings = SyncSettings {
            wifi_only: true,
            ..SyncSettings::default()
        };
        assert!(!AutoTrigger::Interval.permitted(&settings, CELLULAR));
        assert!(!AutoTrigger::Retry.permitted(&settings, CELLULAR));
        assert!(AutoTrigger::Interval.permitted(&settings, WIFI));
        assert!(usable(&SyncSettings::default(), CELLULAR));
    }

    #[test]
    fn test_manual_interval_suppresses_automatic_triggers() {
        let settings = SyncSettings {
            interval_minutes: SyncInterval::Manual,
            ..SyncSettings::default()
        };
        assert!(!AutoTrigger::Interval.permitted(&settings, WIFI));
        assert!(!AutoTrigger::ConnectivityRestored.permitted(&settings, WIFI));
        assert!(!AutoTrigger::Retry.permitted(&settings, WIFI));

        let disabled = SyncSettings {
            auto_sync_enabled: false,
            ..SyncSettings::default()
        };
        assert!(!AutoTrigger::Retry.permitted(&disabled, WIFI));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_deadline() {
        let settings = SyncSettings {
            interval_minutes: SyncInterval::Minutes30,
            ..SyncSettings::default()
        };
        let deadline = interval_deadline(&settings).unwrap();
        assert_eq!(deadline - Instant::now(), Duration::from_secs(30 * 60));

        let manual = SyncSettings {
            interval_minutes: SyncInterval::Manual,
            ..SyncSettings::default()
        };
        assert!(interval_deadline(&manual).is_none());
    }
}
