//! Sync session state machine.
//!
//! One session runs at a time:
//!
//! ```text
//! Idle -> Syncing -> Resolving -> Applying -> Idle
//!            \           \            \
//!             +-----------+------------+--> Failed -> Idle
//!             +-----------+------------+--> Cancelling -> Idle
//! ```
//!
//! - **Syncing**: release stale in-flight items, pull the remote delta, then
//!   push every deliverable item whose entity is not in the delta.
//! - **Resolving**: every entity present in both the delta and the pending
//!   queue becomes a [`ConflictCase`]. Items losing to the remote version are
//!   dropped without transmission; local winners are pushed as overwrites.
//! - **Applying**: remote versions are written through [`LocalStore`], unless
//!   an edit enqueued since `Resolving` wins against them. The checkpoint
//!   advances last, and only if every apply succeeded.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use fieldsync_core::{
    now_millis, AckResult, Checkpoint, ConflictCase, ConflictResolver, ConflictStrategy,
    EntityDelta, EntityKey, EntityVersion, FailureKind, ManualChoice, QueueItem, QueueItemId,
    Resolution, ResolvedOutcome, RetryDecision, SyncSession, SyncType, Winner,
};
use fieldsync_store::Store;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::events::{EventBus, SyncEvent};
use crate::local::LocalStore;
use crate::remote::RemoteSyncClient;
use crate::stats::SyncStatistics;

/// Phase of the orchestrator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum SyncPhase {
    #[default]
    Idle,
    Syncing,
    Resolving,
    Applying,
    Failed,
    Cancelling,
}

/// What a finished (or refused) session did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub session_id: u64,
    pub session: SyncSession,
    /// Conflicts left for a manual decision by this session.
    pub deferred_conflicts: usize,
    /// Why the session failed, if it did.
    pub error: Option<String>,
}

/// Result of [`SyncOrchestrator::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Finished; some items may still have failed (partial success).
    Completed(SessionReport),
    /// Another session is running; nothing was done.
    AlreadyRunning,
    /// Stopped on request; checkpoint untouched.
    Cancelled(SessionReport),
    /// Aborted by a transport or storage failure; checkpoint untouched.
    Failed(SessionReport),
}

impl SyncOutcome {
    pub fn report(&self) -> Option<&SessionReport> {
        match self {
            Self::Completed(report) | Self::Cancelled(report) | Self::Failed(report) => {
                Some(report)
            }
            Self::AlreadyRunning => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Mutable state of the running session.
struct SessionRun {
    id: u64,
    session: SyncSession,
    strategy: ConflictStrategy,
    /// Entities with a failed attempt this session. Not pushed again until
    /// the next session, which also keeps later items for them in order.
    backoff: HashSet<EntityKey>,
    deferred: usize,
    progress: usize,
    total: usize,
}

impl SessionRun {
    fn report(&self, error: Option<String>) -> SessionReport {
        SessionReport {
            session_id: self.id,
            session: self.session.clone(),
            deferred_conflicts: self.deferred,
            error,
        }
    }
}

fn saturating_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(SyncError::Cancelled)
    } else {
        Ok(())
    }
}

/// Drives sync sessions end to end.
pub struct SyncOrchestrator<S, R, L> {
    store: Arc<S>,
    remote: Arc<R>,
    local: Arc<L>,
    config: SyncConfig,
    resolver: ConflictResolver,
    events: EventBus,
    stats: Arc<SyncStatistics>,
    phase: watch::Sender<SyncPhase>,
    /// Held for the whole session; also serializes manual resolution.
    session_lock: Mutex<()>,
    sessions: AtomicU64,
}

impl<S, R, L> SyncOrchestrator<S, R, L>
where
    S: Store,
    R: RemoteSyncClient,
    L: LocalStore,
{
    pub fn new(
        store: Arc<S>,
        remote: Arc<R>,
        local: Arc<L>,
        config: SyncConfig,
        events: EventBus,
    ) -> Self {
        let (phase, _) = watch::channel(SyncPhase::Idle);
        Self {
            store,
            remote,
            local,
            config,
            resolver: ConflictResolver::new(),
            events,
            stats: Arc::new(SyncStatistics::new()),
            phase,
            session_lock: Mutex::new(()),
            sessions: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn statistics(&self) -> &Arc<SyncStatistics> {
        &self.stats
    }

    /// Current phase.
    pub fn phase(&self) -> SyncPhase {
        *self.phase.borrow()
    }

    /// Watch phase changes.
    pub fn watch_phase(&self) -> watch::Receiver<SyncPhase> {
        self.phase.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.session_lock.try_lock().is_err()
    }

    /// Conflicts waiting for a manual decision.
    pub async fn pending_conflicts(&self) -> Result<Vec<ConflictCase>> {
        Ok(self.store.list_pending_conflicts().await?)
    }

    /// Run one session.
    ///
    /// Never fails: every problem is reported through the returned
    /// [`SyncOutcome`] and leaves the queue intact. A call made while another
    /// session is running returns [`SyncOutcome::AlreadyRunning`] at once.
    pub async fn run(
        &self,
        sync_type: SyncType,
        strategy: ConflictStrategy,
        cancel: &CancellationToken,
    ) -> SyncOutcome {
        let Ok(_guard) = self.session_lock.try_lock() else {
            tracing::info!("sync already in progress");
            return SyncOutcome::AlreadyRunning;
        };

        let session_id = self.sessions.fetch_add(1, Ordering::Relaxed) + 1;
        let span = tracing::info_span!("sync_session", session_id, sync_type = %sync_type);
        self.run_session(session_id, sync_type, strategy, cancel)
            .instrument(span)
            .await
    }

    async fn run_session(
        &self,
        session_id: u64,
        sync_type: SyncType,
        strategy: ConflictStrategy,
        cancel: &CancellationToken,
    ) -> SyncOutcome {
        let mut run = SessionRun {
            id: session_id,
            session: SyncSession::begin(sync_type, now_millis(), Checkpoint::empty()),
            strategy,
            backoff: HashSet::new(),
            deferred: 0,
            progress: 0,
            total: 0,
        };

        self.set_phase(SyncPhase::Syncing);
        tracing::info!(%strategy, "sync session started");
        self.events.emit(SyncEvent::SyncStarted {
            session_id,
            sync_type,
        });

        let result = self.execute(&mut run, cancel).await;
        let outcome = self.finish(run, result).await;
        self.set_phase(SyncPhase::Idle);
        outcome
    }

    async fn execute(&self, run: &mut SessionRun, cancel: &CancellationToken) -> Result<()> {
        let released = self.store.release_in_flight().await?;
        if released > 0 {
            tracing::warn!(released, "released items left in flight by an earlier session");
        }

        let checkpoint = match run.session.sync_type {
            SyncType::Full => Checkpoint::empty(),
            SyncType::Delta => self.store.load_checkpoint().await?,
        };
        run.session.checkpoint = checkpoint.clone();

        let pull = self
            .call(cancel, "pull", self.remote.pull(&checkpoint))
            .await?;
        let deltas = pull.latest_per_entity();
        run.session.items_pulled = saturating_u32(deltas.len());
        run.total = self.store.size().await? + deltas.len();
        tracing::debug!(changes = deltas.len(), from = %checkpoint, "pulled remote delta");

        let in_delta: HashSet<EntityKey> = deltas.iter().map(|d| d.entity.clone()).collect();
        self.push_pending(run, &in_delta, cancel).await?;

        check_cancelled(cancel)?;
        self.set_phase(SyncPhase::Resolving);
        let to_apply = self.resolve_conflicts(run, deltas).await?;
        // Items enqueued for these entities from here on are settled
        // against the remote version in `apply_remote`.
        let applying: HashSet<EntityKey> = to_apply.iter().map(|d| d.entity.clone()).collect();
        self.push_pending(run, &applying, cancel).await?;

        check_cancelled(cancel)?;
        self.set_phase(SyncPhase::Applying);
        let all_applied = self.apply_remote(run, &to_apply, cancel).await?;

        check_cancelled(cancel)?;
        if all_applied {
            self.store.save_checkpoint(&pull.new_checkpoint).await?;
            run.session.checkpoint = pull.new_checkpoint;
        } else if run.session.sync_type == SyncType::Full {
            // The old cursor would skip the entities that failed to apply.
            self.store.save_checkpoint(&Checkpoint::empty()).await?;
        } else {
            tracing::warn!("checkpoint held back; failed entities will be pulled again");
        }
        Ok(())
    }

    async fn finish(&self, mut run: SessionRun, result: Result<()>) -> SyncOutcome {
        let finished_at = now_millis();
        match result {
            Ok(()) => {
                run.session.finish(true, finished_at);
                let message = if run.session.items_failed > 0 {
                    format!("completed with {} failed item(s)", run.session.items_failed)
                } else {
                    "completed".to_string()
                };
                tracing::info!(
                    pushed = run.session.items_pushed,
                    pulled = run.session.items_pulled,
                    conflicts = run.session.conflicts_resolved,
                    failed = run.session.items_failed,
                    "sync session completed"
                );
                self.close(&run, message).await;
                SyncOutcome::Completed(run.report(None))
            }
            Err(SyncError::Cancelled) => {
                self.set_phase(SyncPhase::Cancelling);
                self.release_in_flight().await;
                run.session.finish(false, finished_at);
                tracing::info!("sync session cancelled");
                self.events.emit(SyncEvent::SyncCompleted {
                    success: false,
                    message: "cancelled".to_string(),
                    stats: run.session.clone(),
                });
                SyncOutcome::Cancelled(run.report(None))
            }
            Err(err) => {
                self.set_phase(SyncPhase::Failed);
                self.release_in_flight().await;
                run.session.finish(false, finished_at);
                tracing::warn!(error = %err, "sync session failed");
                let message = err.to_string();
                self.close(&run, message.clone()).await;
                SyncOutcome::Failed(run.report(Some(message)))
            }
        }
    }

    /// Record history, statistics and the completion event.
    async fn close(&self, run: &SessionRun, message: String) {
        if let Err(e) = self.store.record_session(&run.session).await {
            tracing::warn!(error = %e, "failed to record session history");
        }
        self.stats.record(&run.session);
        self.events.emit(SyncEvent::SyncCompleted {
            success: run.session.success,
            message,
            stats: run.session.clone(),
        });
    }

    async fn release_in_flight(&self) {
        match self.store.release_in_flight().await {
            Ok(0) => {}
            Ok(released) => tracing::debug!(released, "returned in-flight items to pending"),
            Err(e) => tracing::warn!(error = %e, "failed to release in-flight items"),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Push
    // ─────────────────────────────────────────────────────────────────────────

    /// Drain deliverable items in batches, skipping `exclude`.
    async fn push_pending(
        &self,
        run: &mut SessionRun,
        exclude: &HashSet<EntityKey>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        loop {
            check_cancelled(cancel)?;

            let mut skip = exclude.clone();
            skip.extend(run.backoff.iter().cloned());
            let batch = self
                .store
                .peek_batch_excluding(self.config.batch_size, &skip)
                .await?;
            if batch.is_empty() {
                return Ok(());
            }

            let mut sendable = Vec::with_capacity(batch.len());
            for item in batch {
                if run.backoff.contains(&item.entity) {
                    continue;
                }
                if let Err(err) = item.verify_payload() {
                    tracing::warn!(item = %item.id, entity = %item.entity, "payload failed integrity check");
                    self.store.mark_in_flight(&[item.id]).await?;
                    self.store.mark_failed(item.id, &err.to_string()).await?;
                    run.session.items_failed = run.session.items_failed.saturating_add(1);
                    run.backoff.insert(item.entity.clone());
                    continue;
                }
                sendable.push(item);
            }
            if sendable.is_empty() {
                continue;
            }

            let ids: Vec<QueueItemId> = sendable.iter().map(|item| item.id).collect();
            self.store.mark_in_flight(&ids).await?;
            tracing::debug!(items = ids.len(), "pushing batch");

            let ack = match self.call(cancel, "push", self.remote.push(&sendable)).await {
                Ok(ack) => ack,
                Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                Err(err) => {
                    let kind = if err.is_transient() {
                        FailureKind::Transient
                    } else {
                        FailureKind::Permanent
                    };
                    let reason = err.to_string();
                    for item in &sendable {
                        self.record_failure(run, item, kind, &reason).await?;
                    }
                    return Err(err);
                }
            };

            self.settle_batch(run, &sendable, ack).await?;
            run.progress += sendable.len();
            let current = sendable.last().map(|item| item.entity.to_string());
            self.emit_progress(run, current);
        }
    }

    /// Apply a push acknowledgment to the in-flight batch.
    async fn settle_batch(
        &self,
        run: &mut SessionRun,
        sent: &[QueueItem],
        ack: AckResult,
    ) -> Result<()> {
        let by_id: HashMap<QueueItemId, &QueueItem> =
            sent.iter().map(|item| (item.id, item)).collect();
        let mut settled = HashSet::new();

        let acknowledged: Vec<QueueItemId> = ack
            .acknowledged
            .iter()
            .copied()
            .filter(|id| by_id.contains_key(id) && settled.insert(*id))
            .collect();
        self.store.mark_acknowledged(&acknowledged).await?;
        run.session.items_pushed = run
            .session
            .items_pushed
            .saturating_add(saturating_u32(acknowledged.len()));

        for rejected in &ack.rejected {
            let Some(item) = by_id.get(&rejected.id) else {
                continue;
            };
            if !settled.insert(rejected.id) {
                continue;
            }
            let kind = if rejected.retryable {
                FailureKind::Transient
            } else {
                FailureKind::Permanent
            };
            self.record_failure(run, item, kind, &rejected.reason).await?;
        }

        for item in sent {
            if !settled.contains(&item.id) {
                self.record_failure(run, item, FailureKind::Transient, "no acknowledgment from remote")
                    .await?;
            }
        }
        Ok(())
    }

    /// Run a failed attempt through the retry policy.
    async fn record_failure(
        &self,
        run: &mut SessionRun,
        item: &QueueItem,
        kind: FailureKind,
        reason: &str,
    ) -> Result<()> {
        match self.config.retry.decide(item, kind) {
            RetryDecision::Retry { retry_count } => {
                self.store.mark_retry(item.id, reason).await?;
                tracing::warn!(item = %item.id, retry_count, error = reason, "push failed, will retry");
            }
            RetryDecision::GiveUp { retry_count } => {
                self.store.mark_failed(item.id, reason).await?;
                run.session.items_failed = run.session.items_failed.saturating_add(1);
                tracing::warn!(item = %item.id, retry_count, error = reason, "push failed, item dead-lettered");
            }
        }
        run.backoff.insert(item.entity.clone());
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Resolve
    // ─────────────────────────────────────────────────────────────────────────

    /// Resolve overlaps between the delta and pending items.
    ///
    /// Returns the remote changes that should be applied locally.
    async fn resolve_conflicts(
        &self,
        run: &mut SessionRun,
        deltas: Vec<EntityDelta>,
    ) -> Result<Vec<EntityDelta>> {
        let mut to_apply = Vec::with_capacity(deltas.len());

        for delta in deltas {
            let pending = self.store.pending_for_entity(&delta.entity).await?;
            if self.settle_conflict(run, &delta, &pending).await? {
                to_apply.push(delta);
            }
        }

        if run.deferred > 0 {
            let count = self.store.list_pending_conflicts().await?.len();
            self.events.emit(SyncEvent::ConflictsPending { count });
        }
        Ok(to_apply)
    }

    /// Settle one remote change against the entity's pending items.
    ///
    /// Returns whether the remote version should be applied locally.
    async fn settle_conflict(
        &self,
        run: &mut SessionRun,
        delta: &EntityDelta,
        pending: &[QueueItem],
    ) -> Result<bool> {
        let Some(latest) = pending.last() else {
            return Ok(true);
        };

        let case = ConflictCase::new(
            delta.entity.clone(),
            pending.iter().map(|item| item.id).collect(),
            EntityVersion::from_item(latest),
            delta.version.clone(),
        );

        match self.resolver.resolve(&case, run.strategy) {
            Resolution::Resolved(outcome) => {
                run.session.conflicts_resolved = run.session.conflicts_resolved.saturating_add(1);
                self.store.remove_pending_conflict(&case.entity).await?;
                match outcome.winner {
                    Winner::Remote => {
                        self.store.mark_acknowledged(&outcome.local_items).await?;
                        tracing::info!(
                            entity = %case.entity,
                            dropped = outcome.local_items.len(),
                            "remote version wins"
                        );
                        Ok(true)
                    }
                    Winner::Local => {
                        tracing::info!(entity = %case.entity, "local version wins, pushing as overwrite");
                        Ok(false)
                    }
                }
            }
            Resolution::Deferred(case) => {
                self.store.save_pending_conflict(&case).await?;
                run.deferred += 1;
                tracing::info!(entity = %case.entity, "conflict deferred for manual resolution");
                Ok(false)
            }
        }
    }

    /// Complete a deferred conflict with the user's choice.
    ///
    /// `KeepRemote` applies the remote version and drops the local items;
    /// `KeepLocal` releases the items so the next session pushes them.
    /// Waits for a running session to finish first.
    pub async fn resolve_manual(
        &self,
        entity: &EntityKey,
        choice: ManualChoice,
    ) -> Result<ResolvedOutcome> {
        let _guard = self.session_lock.lock().await;

        let case = self
            .store
            .get_pending_conflict(entity)
            .await?
            .ok_or_else(|| SyncError::NoPendingConflict(entity.clone()))?;
        let outcome = self.resolver.resolve_manual(&case, choice);

        if outcome.remote_wins() {
            self.local.apply(entity, &outcome.applied_version).await?;
            let mut superseded = Vec::with_capacity(outcome.local_items.len());
            for id in &outcome.local_items {
                if let Some(item) = self.store.get(*id).await? {
                    if item.is_pending() {
                        superseded.push(*id);
                    }
                }
            }
            self.store.mark_acknowledged(&superseded).await?;
        }
        self.store.remove_pending_conflict(entity).await?;

        let count = self.store.list_pending_conflicts().await?.len();
        tracing::info!(entity = %entity, ?choice, remaining = count, "manual conflict resolved");
        self.events.emit(SyncEvent::ConflictsPending { count });
        Ok(outcome)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Apply
    // ─────────────────────────────────────────────────────────────────────────

    /// Write remote versions locally. Returns whether all of them applied.
    ///
    /// An item enqueued for the entity after `Resolving` is settled against
    /// the remote version first, so a late local edit is never overwritten.
    async fn apply_remote(
        &self,
        run: &mut SessionRun,
        to_apply: &[EntityDelta],
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let mut all_applied = true;
        let deferred = run.deferred;
        for delta in to_apply {
            check_cancelled(cancel)?;
            let late = self.store.pending_for_entity(&delta.entity).await?;
            if !late.is_empty() {
                tracing::debug!(entity = %delta.entity, items = late.len(), "local edit arrived during session");
                if !self.settle_conflict(run, delta, &late).await? {
                    run.progress += 1;
                    self.emit_progress(run, Some(delta.entity.to_string()));
                    continue;
                }
            }
            if let Err(e) = self.local.apply(&delta.entity, &delta.version).await {
                tracing::warn!(entity = %delta.entity, error = %e, "local apply failed");
                run.session.items_failed = run.session.items_failed.saturating_add(1);
                all_applied = false;
            }
            run.progress += 1;
            self.emit_progress(run, Some(delta.entity.to_string()));
        }
        if run.deferred > deferred {
            let count = self.store.list_pending_conflicts().await?.len();
            self.events.emit(SyncEvent::ConflictsPending { count });
        }
        Ok(all_applied)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────────

    /// One network call, bounded by the request timeout and cancellation.
    async fn call<T, F>(&self, cancel: &CancellationToken, operation: &'static str, request: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        check_cancelled(cancel)?;
        let timeout = self.config.request_timeout;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SyncError::Cancelled),
            result = tokio::time::timeout(timeout, request) => match result {
                Ok(result) => result,
                Err(_) => Err(SyncError::Timeout(format!("{operation} exceeded {timeout:?}"))),
            },
        }
    }

    fn set_phase(&self, phase: SyncPhase) {
        self.phase.send_replace(phase);
        tracing::debug!(?phase, "phase changed");
    }

    fn emit_progress(&self, run: &mut SessionRun, current_item: Option<String>) {
        run.total = run.total.max(run.progress);
        self.events.emit(SyncEvent::SyncProgress {
            current: run.progress,
            total: run.total,
            current_item,
        });
    }
}
