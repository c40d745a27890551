//! End-to-end scenarios against the in-memory remote.
//!
//! Timing-sensitive scenarios run on paused tokio time, so debounce, interval
//! and backoff delays elapse instantly once the runtime is idle.

use std::sync::Arc;
use std::time::Duration;

use fieldsync::core::{EntityVersion, SyncSession};
use fieldsync::store::{MemoryStore, MutationQueue, SqliteStore};
use fieldsync::sync::{
    ConnectionKind, MemoryLocalStore, MemoryRemote, NetworkStatus, SyncConfig, SyncInterval,
};
use fieldsync::{
    ConflictStrategy, EngineConfig, EngineError, EntityKey, ItemStatus, ManualChoice,
    NewMutation, Operation, SyncEngine, SyncEvent, SyncOutcome, SyncSettings,
};
use tokio::sync::broadcast::{self, error::RecvError};

type Engine = SyncEngine<MemoryStore, MemoryRemote, MemoryLocalStore>;

struct Fixture {
    engine: Engine,
    remote: Arc<MemoryRemote>,
    local: Arc<MemoryLocalStore>,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

async fn fixture(config: EngineConfig) -> Fixture {
    init_tracing();
    let remote = Arc::new(MemoryRemote::new());
    let local = Arc::new(MemoryLocalStore::new());
    let engine = SyncEngine::new(
        Arc::new(MemoryStore::new()),
        Arc::clone(&remote),
        Arc::clone(&local),
        config,
    )
    .await
    .unwrap();
    Fixture {
        engine,
        remote,
        local,
    }
}

fn settings(configure: impl FnOnce(&mut SyncSettings)) -> EngineConfig {
    let mut config = EngineConfig::default();
    configure(&mut config.settings);
    config
}

fn wifi() -> NetworkStatus {
    NetworkStatus::online(ConnectionKind::Wifi)
}

fn asset_42() -> EntityKey {
    EntityKey::new("Asset", "42")
}

fn job_7() -> EntityKey {
    EntityKey::new("Job", "7")
}

/// Wait for the next session to finish.
async fn next_completion(events: &mut broadcast::Receiver<SyncEvent>) -> (bool, SyncSession) {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(SyncEvent::SyncCompleted { success, stats, .. }) => return (success, stats),
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("event bus closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(60 * 60), wait)
        .await
        .expect("no session completed")
}

// ─────────────────────────────────────────────────────────────────────────────
// Queue and push
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_offline_edit_pushed_when_connectivity_returns() {
    let f = fixture(EngineConfig::default()).await;
    let mut events = f.engine.subscribe();
    f.engine.start().unwrap();

    let item = f
        .engine
        .enqueue(NewMutation::update(asset_42(), r#"{"brand":"Trane"}"#))
        .await
        .unwrap();
    assert_eq!(
        events.recv().await.unwrap(),
        SyncEvent::QueueChanged { depth: 1 }
    );

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(f.remote.push_calls().await, 0);

    f.engine.report_network(wifi());
    let (success, session) = next_completion(&mut events).await;

    assert!(success);
    assert_eq!(session.items_pushed, 1);
    assert_eq!(f.remote.times_received(item.id).await, 1);
    assert_eq!(f.engine.queue_depth().await.unwrap(), 0);
    assert!(f.engine.network().is_online());

    f.engine.dispose().await;
}

#[tokio::test]
async fn test_newer_remote_edit_wins_under_last_write_wins() {
    let f = fixture(settings(|s| s.conflict_strategy = ConflictStrategy::LastWriteWins)).await;
    let local = f
        .engine
        .enqueue(NewMutation::update(job_7(), r#"{"status":"open"}"#).at(1_000))
        .await
        .unwrap();
    let remote_version = EntityVersion::new(Operation::Update, r#"{"status":"closed"}"#, 2_000);
    f.remote.remote_edit(job_7(), remote_version.clone()).await;

    let outcome = f.engine.sync_now().await;
    assert!(outcome.is_completed());
    assert_eq!(outcome.report().unwrap().session.conflicts_resolved, 1);

    assert_eq!(f.remote.times_received(local.id).await, 0);
    assert_eq!(f.local.get(&job_7()).await, Some(remote_version));
    assert_eq!(f.engine.queue_depth().await.unwrap(), 0);
}

#[tokio::test]
async fn test_retry_exhaustion_then_user_retry() {
    let f = fixture(EngineConfig::default()).await;
    let item = f
        .engine
        .enqueue(NewMutation::update(asset_42(), "x"))
        .await
        .unwrap();
    f.remote.fail_next_pushes(5).await;

    for _ in 0..5 {
        f.engine.sync_now().await;
    }

    let failed = f.engine.list_failed().await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, item.id);
    assert_eq!(failed[0].retry_count, 3);
    assert_eq!(f.remote.push_calls().await, 3);

    let retried = f.engine.retry_item(item.id).await.unwrap();
    assert_eq!(retried.status, ItemStatus::Pending);
    assert_eq!(retried.retry_count, 0);

    f.remote.fail_next_pushes(0).await;
    assert!(f.engine.sync_now().await.is_completed());
    assert_eq!(f.engine.queue_depth().await.unwrap(), 0);
    assert_eq!(f.remote.times_received(item.id).await, 1);
}

#[tokio::test]
async fn test_discard_failed_item() {
    let f = fixture(EngineConfig::default()).await;
    let item = f
        .engine
        .enqueue(NewMutation::update(asset_42(), "x"))
        .await
        .unwrap();
    f.remote.reject_item(item.id, "schema violation", false).await;
    f.engine.sync_now().await;
    assert_eq!(f.engine.list_failed().await.unwrap().len(), 1);

    let mut events = f.engine.subscribe();
    f.engine.discard_item(item.id).await.unwrap();

    assert_eq!(f.engine.queue_depth().await.unwrap(), 0);
    assert_eq!(
        events.recv().await.unwrap(),
        SyncEvent::QueueChanged { depth: 0 }
    );
}

#[tokio::test]
async fn test_restart_after_dropped_ack() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fieldsync.db");
    let remote = Arc::new(MemoryRemote::new());
    let local = Arc::new(MemoryLocalStore::new());

    let (first, second) = {
        let engine = SyncEngine::new(
            Arc::new(SqliteStore::open(&path).unwrap()),
            Arc::clone(&remote),
            Arc::clone(&local),
            EngineConfig::default(),
        )
        .await
        .unwrap();
        let first = engine
            .enqueue(NewMutation::update(asset_42(), "a"))
            .await
            .unwrap();
        let second = engine
            .enqueue(NewMutation::create(EntityKey::new("Asset", "43"), "b"))
            .await
            .unwrap();

        remote.drop_next_acks(1).await;
        assert!(engine.sync_now().await.is_failed());
        assert!(remote.was_applied(first.id).await);
        engine.dispose().await;
        (first, second)
    };

    let engine = SyncEngine::new(
        Arc::new(SqliteStore::open(&path).unwrap()),
        Arc::clone(&remote),
        local,
        EngineConfig::default(),
    )
    .await
    .unwrap();

    let items = engine.store().list_all().await.unwrap();
    let ids: Vec<_> = items.iter().map(|item| item.id).collect();
    assert_eq!(ids, vec![first.id, second.id]);
    assert!(items
        .iter()
        .all(|item| item.status == ItemStatus::Pending && item.retry_count == 1));

    let stats = engine.statistics().await.unwrap();
    assert_eq!(stats.total_syncs, 1);
    assert_eq!(stats.failed_syncs, 1);
    assert_eq!(stats.pending_depth, 2);

    assert!(engine.sync_now().await.is_completed());
    assert_eq!(engine.queue_depth().await.unwrap(), 0);
    assert_eq!(remote.times_received(first.id).await, 2);

    let stats = engine.statistics().await.unwrap();
    assert_eq!(stats.total_syncs, 2);
    assert_eq!(stats.successful_syncs, 1);
    assert_eq!(stats.items_pushed, 2);
}

// ─────────────────────────────────────────────────────────────────────────────
// Sessions
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_concurrent_triggers_run_one_session() {
    let f = fixture(EngineConfig::default()).await;
    let item = f
        .engine
        .enqueue(NewMutation::update(asset_42(), "x"))
        .await
        .unwrap();
    f.remote.set_latency(Some(Duration::from_millis(200))).await;

    let (first, second) = tokio::join!(f.engine.sync_now(), f.engine.sync_now());

    let outcomes = [first, second];
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| **o == SyncOutcome::AlreadyRunning)
            .count(),
        1
    );
    assert_eq!(outcomes.iter().filter(|o| o.is_completed()).count(), 1);
    assert_eq!(f.remote.times_received(item.id).await, 1);
    assert_eq!(f.remote.pull_calls().await, 1);
    assert_eq!(f.engine.statistics().await.unwrap().total_syncs, 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_then_resume() {
    let f = fixture(EngineConfig::default()).await;
    let item = f
        .engine
        .enqueue(NewMutation::update(asset_42(), "x"))
        .await
        .unwrap();
    f.remote.set_latency(Some(Duration::from_millis(100))).await;

    let (outcome, _) = tokio::join!(f.engine.sync_now(), async {
        tokio::time::sleep(Duration::from_millis(150)).await;
        f.engine.cancel();
    });
    assert!(matches!(outcome, SyncOutcome::Cancelled(_)));
    assert_eq!(f.engine.queue_depth().await.unwrap(), 1);

    f.remote.set_latency(None).await;
    assert!(f.engine.sync_now().await.is_completed());
    assert_eq!(f.remote.times_received(item.id).await, 1);
    assert_eq!(f.engine.queue_depth().await.unwrap(), 0);
}

#[tokio::test]
async fn test_manual_conflict_needs_attention() {
    let f = fixture(settings(|s| s.conflict_strategy = ConflictStrategy::Manual)).await;
    let local = f
        .engine
        .enqueue(NewMutation::update(job_7(), "local").at(10))
        .await
        .unwrap();
    f.remote
        .remote_edit(job_7(), EntityVersion::new(Operation::Update, "remote", 20))
        .await;

    let outcome = f.engine.sync_now().await;
    assert_eq!(outcome.report().unwrap().deferred_conflicts, 1);

    let pending = f.engine.pending_conflicts().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].entity, job_7());
    assert_eq!(pending[0].local_items, vec![local.id]);

    let stats = f.engine.statistics().await.unwrap();
    assert_eq!(stats.pending_conflicts, 1);
    assert_eq!(stats.pending_depth, 1);

    f.engine
        .resolve_conflict(&job_7(), ManualChoice::KeepRemote)
        .await
        .unwrap();
    assert_eq!(f.engine.queue_depth().await.unwrap(), 0);
    assert_eq!(f.local.get(&job_7()).await.unwrap().payload, "remote");
    assert!(f.engine.pending_conflicts().await.unwrap().is_empty());
    assert_eq!(f.remote.times_received(local.id).await, 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Scheduling
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_interval_triggers_sync() {
    let config = EngineConfig {
        initial_network: wifi(),
        ..settings(|s| s.interval_minutes = SyncInterval::Minutes5)
    };
    let f = fixture(config).await;
    let mut events = f.engine.subscribe();
    f.engine.start().unwrap();

    let started = tokio::time::Instant::now();
    let (success, _) = next_completion(&mut events).await;

    assert!(success);
    assert!(started.elapsed() >= Duration::from_secs(5 * 60));
    assert_eq!(f.remote.pull_calls().await, 1);
    f.engine.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_session_is_retried_with_backoff() {
    let config = EngineConfig {
        initial_network: wifi(),
        ..settings(|s| s.interval_minutes = SyncInterval::Minutes60)
    };
    let f = fixture(config).await;
    let mut events = f.engine.subscribe();
    f.engine.start().unwrap();
    f.remote.fail_next_pulls(1).await;

    assert!(f.engine.sync_now().await.is_failed());
    let (success, _) = next_completion(&mut events).await;
    assert!(!success);

    let (success, _) = next_completion(&mut events).await;
    assert!(success);
    assert_eq!(f.remote.pull_calls().await, 2);
    f.engine.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn test_manual_interval_does_not_retry_on_its_own() {
    let config = EngineConfig {
        initial_network: wifi(),
        ..settings(|s| s.interval_minutes = SyncInterval::Manual)
    };
    let f = fixture(config).await;
    f.engine.start().unwrap();
    f.remote.fail_next_pulls(1).await;

    assert!(f.engine.sync_now().await.is_failed());
    tokio::time::sleep(Duration::from_secs(30 * 60)).await;
    assert_eq!(f.remote.pull_calls().await, 1);

    assert!(f.engine.sync_now().await.is_completed());
    assert_eq!(f.remote.pull_calls().await, 2);
    f.engine.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn test_wifi_only_waits_for_unmetered_link() {
    let f = fixture(settings(|s| s.wifi_only = true)).await;
    let mut events = f.engine.subscribe();
    f.engine.start().unwrap();

    f.engine
        .report_network(NetworkStatus::online(ConnectionKind::Cellular));
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(f.engine.network().is_metered());
    assert_eq!(f.remote.pull_calls().await, 0);

    f.engine.report_network(wifi());
    let (success, _) = next_completion(&mut events).await;
    assert!(success);
    assert_eq!(f.remote.pull_calls().await, 1);
    f.engine.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn test_lifecycle() {
    let f = fixture(EngineConfig::default()).await;
    f.engine.start().unwrap();
    assert!(f.engine.is_started());
    assert!(matches!(f.engine.start(), Err(EngineError::AlreadyStarted)));

    f.engine.stop().await;
    assert!(!f.engine.is_started());

    f.engine.report_network(wifi());
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(f.remote.pull_calls().await, 0);

    // Explicit calls keep working while stopped.
    assert!(f.engine.sync_now().await.is_completed());

    f.engine.start().unwrap();
    f.engine.dispose().await;
}

#[tokio::test]
async fn test_settings_update_applies_to_next_session() {
    let f = fixture(EngineConfig::default()).await;
    assert_eq!(f.engine.settings().conflict_strategy, ConflictStrategy::ServerWins);

    f.engine.update_settings(SyncSettings {
        conflict_strategy: ConflictStrategy::ClientWins,
        ..SyncSettings::default()
    });
    f.engine
        .enqueue(NewMutation::update(job_7(), "local").at(1))
        .await
        .unwrap();
    f.remote
        .remote_edit(job_7(), EntityVersion::new(Operation::Update, "remote", 2))
        .await;

    f.engine.sync_now().await;
    assert_eq!(f.remote.entity(&job_7()).await.unwrap().payload, "local");
}

#[tokio::test]
async fn test_engine_with_custom_config() {
    let config = EngineConfig {
        sync: SyncConfig {
            batch_size: 2,
            ..SyncConfig::default()
        },
        ..EngineConfig::default()
    };
    let f = fixture(config).await;
    for i in 0..5 {
        f.engine
            .enqueue(NewMutation::create(EntityKey::new("Photo", i.to_string()), "jpeg"))
            .await
            .unwrap();
    }

    let outcome = f.engine.sync_now().await;
    assert_eq!(outcome.report().unwrap().session.items_pushed, 5);
    assert_eq!(f.remote.push_calls().await, 3);
}
