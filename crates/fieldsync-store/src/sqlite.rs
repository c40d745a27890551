//! SQLite implementation of the storage traits.
//!
//! This is the primary storage backend. It uses rusqlite with bundled SQLite,
//! wrapped in async via tokio::spawn_blocking. The database runs in WAL mode
//! with `synchronous = FULL`, so every committed transaction survives a crash.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use serde::de::DeserializeOwned;
use serde::Serialize;

use fieldsync_core::{
    now_millis, Checkpoint, ConflictCase, EntityKey, EntityVersion, ItemStatus, NewMutation,
    PayloadDigest, QueueItem, QueueItemId, SyncSession, SyncType,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{select_batch, MutationQueue, SyncStateStore};

const ITEM_COLUMNS: &str = "id, entity_type, entity_id, operation, payload, payload_digest, \
                            queued_at, retry_count, last_error, status";

const CHECKPOINT_KEY: &str = "checkpoint";

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut conn = Connection::open(path)?;
        configure(&conn)?;
        migration::migrate(&mut conn)?;
        tracing::debug!(path = %path.display(), "opened queue database");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking closure against the connection on the blocking pool.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn configure(conn: &Connection) -> Result<()> {
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        tracing::warn!(%mode, "WAL journal mode unavailable");
    }
    conn.pragma_update(None, "synchronous", "FULL")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(())
}

fn conversion_error<E>(column: usize, ty: Type, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, ty, Box::new(err))
}

// Column order follows ITEM_COLUMNS.
fn row_to_item(row: &Row<'_>) -> rusqlite::Result<QueueItem> {
    let operation: String = row.get(3)?;
    let digest: Vec<u8> = row.get(5)?;
    let retry_count: i64 = row.get(7)?;
    let status: String = row.get(9)?;

    Ok(QueueItem {
        id: QueueItemId::new(row.get(0)?),
        entity: EntityKey::new(row.get::<_, String>(1)?, row.get::<_, String>(2)?),
        operation: operation
            .parse()
            .map_err(|e| conversion_error(3, Type::Text, e))?,
        payload: Bytes::from(row.get::<_, Vec<u8>>(4)?),
        payload_digest: PayloadDigest::try_from(digest.as_slice())
            .map_err(|e| conversion_error(5, Type::Blob, e))?,
        queued_at: row.get(6)?,
        retry_count: u32::try_from(retry_count)
            .map_err(|e| conversion_error(7, Type::Integer, e))?,
        last_error: row.get(8)?,
        status: status
            .parse()
            .map_err(|e| conversion_error(9, Type::Text, e))?,
    })
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<SyncSession> {
    let sync_type: String = row.get(0)?;
    let checkpoint: Option<String> = row.get(8)?;

    Ok(SyncSession {
        sync_type: sync_type
            .parse::<SyncType>()
            .map_err(|e| conversion_error(0, Type::Text, e))?,
        started_at: row.get(1)?,
        completed_at: row.get(2)?,
        success: row.get(3)?,
        items_pushed: row.get(4)?,
        items_pulled: row.get(5)?,
        conflicts_resolved: row.get(6)?,
        items_failed: row.get(7)?,
        checkpoint: checkpoint.map(Checkpoint::new).unwrap_or_default(),
    })
}

fn encode_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn decode_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::from_reader(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn load_item(conn: &Connection, id: QueueItemId) -> Result<QueueItem> {
    conn.query_row(
        &format!("SELECT {ITEM_COLUMNS} FROM queue_items WHERE id = ?1"),
        params![id.get()],
        row_to_item,
    )
    .optional()?
    .ok_or(StoreError::NotFound(id))
}

fn load_items(
    conn: &Connection,
    filter: &str,
    args: &[&dyn rusqlite::ToSql],
) -> Result<Vec<QueueItem>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ITEM_COLUMNS} FROM queue_items {filter} ORDER BY id"
    ))?;
    let items = stmt
        .query_map(args, row_to_item)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(items)
}

/// Check that `id` exists and may move to `to`, returning its current status.
fn check_transition(
    tx: &Transaction<'_>,
    id: QueueItemId,
    to: ItemStatus,
) -> Result<ItemStatus> {
    let status: Option<String> = tx
        .query_row(
            "SELECT status FROM queue_items WHERE id = ?1",
            params![id.get()],
            |row| row.get(0),
        )
        .optional()?;
    let from: ItemStatus = status
        .ok_or(StoreError::NotFound(id))?
        .parse()
        .map_err(|e: fieldsync_core::CoreError| StoreError::InvalidData(e.to_string()))?;

    if from.can_transition_to(to) {
        Ok(from)
    } else {
        Err(StoreError::InvalidTransition { id, from, to })
    }
}

/// Record a failed attempt on an `InFlight` item.
fn record_failure(
    conn: &mut Connection,
    id: QueueItemId,
    to: ItemStatus,
    error: &str,
) -> Result<QueueItem> {
    let tx = conn.transaction()?;
    let from = check_transition(&tx, id, to)?;
    if from != ItemStatus::InFlight {
        return Err(StoreError::InvalidTransition { id, from, to });
    }
    tx.execute(
        "UPDATE queue_items
         SET status = ?1, retry_count = retry_count + 1, last_error = ?2
         WHERE id = ?3",
        params![to.as_str(), error, id.get()],
    )?;
    let item = load_item(&tx, id)?;
    tx.commit()?;
    Ok(item)
}

#[async_trait]
impl MutationQueue for SqliteStore {
    async fn enqueue(&self, mutation: NewMutation) -> Result<QueueItem> {
        self.run(move |conn| {
            let digest = mutation.digest();
            conn.execute(
                "INSERT INTO queue_items (
                    entity_type, entity_id, operation, payload, payload_digest,
                    queued_at, retry_count, last_error, status
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, NULL, ?7)",
                params![
                    mutation.entity.entity_type,
                    mutation.entity.entity_id,
                    mutation.operation.as_str(),
                    &mutation.payload[..],
                    digest.as_bytes().as_slice(),
                    mutation.queued_at,
                    ItemStatus::Pending.as_str(),
                ],
            )?;
            let id = QueueItemId::new(conn.last_insert_rowid());
            Ok(QueueItem::from_new(id, mutation))
        })
        .await
    }

    async fn peek_batch_excluding(
        &self,
        limit: usize,
        exclude: &HashSet<EntityKey>,
    ) -> Result<Vec<QueueItem>> {
        let mut held = exclude.clone();
        self.run(move |conn| {
            {
                let mut stmt =
                    conn.prepare("SELECT entity_type, entity_id FROM pending_conflicts")?;
                let keys = stmt
                    .query_map([], |row| {
                        Ok(EntityKey::new(
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                        ))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                held.extend(keys);
            }
            // Rows are read lazily; the scan stops once the batch is full.
            let mut stmt = conn.prepare(&format!(
                "SELECT {ITEM_COLUMNS} FROM queue_items ORDER BY id"
            ))?;
            let mut failure = None;
            let rows = stmt.query_map([], row_to_item)?.map_while(|row| match row {
                Ok(item) => Some(item),
                Err(e) => {
                    failure = Some(e);
                    None
                }
            });
            let batch = select_batch(rows, &held, limit);
            match failure {
                Some(e) => Err(e.into()),
                None => Ok(batch),
            }
        })
        .await
    }

    async fn mark_in_flight(&self, ids: &[QueueItemId]) -> Result<()> {
        let ids = ids.to_vec();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            for id in &ids {
                check_transition(&tx, *id, ItemStatus::InFlight)?;
                tx.execute(
                    "UPDATE queue_items SET status = ?1 WHERE id = ?2",
                    params![ItemStatus::InFlight.as_str(), id.get()],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn mark_acknowledged(&self, ids: &[QueueItemId]) -> Result<()> {
        let ids = ids.to_vec();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            for id in &ids {
                check_transition(&tx, *id, ItemStatus::Acknowledged)?;
                tx.execute("DELETE FROM queue_items WHERE id = ?1", params![id.get()])?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn mark_retry(&self, id: QueueItemId, error: &str) -> Result<QueueItem> {
        let error = error.to_string();
        self.run(move |conn| record_failure(conn, id, ItemStatus::Pending, &error))
            .await
    }

    async fn mark_failed(&self, id: QueueItemId, error: &str) -> Result<QueueItem> {
        let error = error.to_string();
        self.run(move |conn| record_failure(conn, id, ItemStatus::Failed, &error))
            .await
    }

    async fn release_in_flight(&self) -> Result<usize> {
        self.run(|conn| {
            let released = conn.execute(
                "UPDATE queue_items SET status = ?1 WHERE status = ?2",
                params![ItemStatus::Pending.as_str(), ItemStatus::InFlight.as_str()],
            )?;
            Ok(released)
        })
        .await
    }

    async fn retry_failed(&self, id: QueueItemId) -> Result<QueueItem> {
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let from = check_transition(&tx, id, ItemStatus::Pending)?;
            if from != ItemStatus::Failed {
                return Err(StoreError::InvalidTransition {
                    id,
                    from,
                    to: ItemStatus::Pending,
                });
            }
            tx.execute(
                "UPDATE queue_items SET status = ?1, retry_count = 0 WHERE id = ?2",
                params![ItemStatus::Pending.as_str(), id.get()],
            )?;
            let item = load_item(&tx, id)?;
            tx.commit()?;
            Ok(item)
        })
        .await
    }

    async fn discard(&self, id: QueueItemId) -> Result<()> {
        self.run(move |conn| {
            let item = load_item(conn, id)?;
            if item.status == ItemStatus::InFlight {
                return Err(StoreError::InvalidTransition {
                    id,
                    from: item.status,
                    to: ItemStatus::Acknowledged,
                });
            }
            conn.execute("DELETE FROM queue_items WHERE id = ?1", params![id.get()])?;
            Ok(())
        })
        .await
    }

    async fn get(&self, id: QueueItemId) -> Result<Option<QueueItem>> {
        self.run(move |conn| match load_item(conn, id) {
            Ok(item) => Ok(Some(item)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        })
        .await
    }

    async fn size(&self) -> Result<usize> {
        self.run(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM queue_items WHERE status != ?1",
                params![ItemStatus::Acknowledged.as_str()],
                |row| row.get(0),
            )?;
            usize::try_from(count).map_err(|e| StoreError::InvalidData(e.to_string()))
        })
        .await
    }

    async fn list_all(&self) -> Result<Vec<QueueItem>> {
        self.run(|conn| load_items(conn, "", params![])).await
    }

    async fn list_failed(&self) -> Result<Vec<QueueItem>> {
        self.run(|conn| {
            load_items(
                conn,
                "WHERE status = ?1",
                params![ItemStatus::Failed.as_str()],
            )
        })
        .await
    }

    async fn pending_for_entity(&self, entity: &EntityKey) -> Result<Vec<QueueItem>> {
        let entity = entity.clone();
        self.run(move |conn| {
            load_items(
                conn,
                "WHERE status = ?1 AND entity_type = ?2 AND entity_id = ?3",
                params![
                    ItemStatus::Pending.as_str(),
                    entity.entity_type,
                    entity.entity_id,
                ],
            )
        })
        .await
    }
}

type ConflictRow = (String, String, Vec<u8>, Vec<u8>, Vec<u8>);

fn decode_conflict(row: ConflictRow) -> Result<ConflictCase> {
    let (entity_type, entity_id, local_items, local_version, remote_version) = row;
    Ok(ConflictCase::new(
        EntityKey::new(entity_type, entity_id),
        decode_cbor::<Vec<QueueItemId>>(&local_items)?,
        decode_cbor::<EntityVersion>(&local_version)?,
        decode_cbor::<EntityVersion>(&remote_version)?,
    ))
}

fn conflict_row(row: &Row<'_>) -> rusqlite::Result<ConflictRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

#[async_trait]
impl SyncStateStore for SqliteStore {
    async fn load_checkpoint(&self) -> Result<Checkpoint> {
        self.run(|conn| {
            let value: Option<Option<String>> = conn
                .query_row(
                    "SELECT value FROM sync_state WHERE key = ?1",
                    params![CHECKPOINT_KEY],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value.flatten().map(Checkpoint::new).unwrap_or_default())
        })
        .await
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let value = checkpoint.as_str().map(str::to_string);
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO sync_state (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![CHECKPOINT_KEY, value],
            )?;
            Ok(())
        })
        .await
    }

    async fn save_pending_conflict(&self, case: &ConflictCase) -> Result<()> {
        let entity = case.entity.clone();
        let local_items = encode_cbor(&case.local_items)?;
        let local_version = encode_cbor(&case.local_version)?;
        let remote_version = encode_cbor(&case.remote_version)?;
        self.run(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO pending_conflicts (
                    entity_type, entity_id, local_items, local_version, remote_version, detected_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    entity.entity_type,
                    entity.entity_id,
                    local_items,
                    local_version,
                    remote_version,
                    now_millis(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_pending_conflict(&self, entity: &EntityKey) -> Result<Option<ConflictCase>> {
        let entity = entity.clone();
        self.run(move |conn| {
            let row = conn
                .query_row(
                    "SELECT entity_type, entity_id, local_items, local_version, remote_version
                     FROM pending_conflicts WHERE entity_type = ?1 AND entity_id = ?2",
                    params![entity.entity_type, entity.entity_id],
                    conflict_row,
                )
                .optional()?;
            row.map(decode_conflict).transpose()
        })
        .await
    }

    async fn list_pending_conflicts(&self) -> Result<Vec<ConflictCase>> {
        self.run(|conn| {
            let mut stmt = conn.prepare(
                "SELECT entity_type, entity_id, local_items, local_version, remote_version
                 FROM pending_conflicts ORDER BY entity_type, entity_id",
            )?;
            let rows = stmt
                .query_map([], conflict_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(decode_conflict).collect()
        })
        .await
    }

    async fn remove_pending_conflict(&self, entity: &EntityKey) -> Result<bool> {
        let entity = entity.clone();
        self.run(move |conn| {
            let removed = conn.execute(
                "DELETE FROM pending_conflicts WHERE entity_type = ?1 AND entity_id = ?2",
                params![entity.entity_type, entity.entity_id],
            )?;
            Ok(removed > 0)
        })
        .await
    }

    async fn record_session(&self, session: &SyncSession) -> Result<()> {
        let session = session.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO sync_sessions (
                    sync_type, started_at, completed_at, success, items_pushed,
                    items_pulled, conflicts_resolved, items_failed, checkpoint
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    session.sync_type.as_str(),
                    session.started_at,
                    session.completed_at,
                    session.success,
                    session.items_pushed,
                    session.items_pulled,
                    session.conflicts_resolved,
                    session.items_failed,
                    session.checkpoint.as_str(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn recent_sessions(&self, limit: usize) -> Result<Vec<SyncSession>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT sync_type, started_at, completed_at, success, items_pushed,
                        items_pulled, conflicts_resolved, items_failed, checkpoint
                 FROM sync_sessions ORDER BY id DESC LIMIT ?1",
            )?;
            let sessions = stmt
                .query_map(params![limit], row_to_session)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(sessions)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_core::{Operation, QueueItem};
    use proptest::prelude::*;

    fn asset(id: &str) -> EntityKey {
        EntityKey::new("Asset", id)
    }

    #[tokio::test]
    async fn test_enqueue_and_get() {
        let store = SqliteStore::open_memory().unwrap();
        let mutation = NewMutation::update(asset("42"), r#"{"brand":"Trane"}"#).at(1_000);
        let item = store.enqueue(mutation).await.unwrap();

        let stored = store.get(item.id).await.unwrap().unwrap();
        assert_eq!(stored, item);
        assert_eq!(stored.queued_at, 1_000);
        assert!(stored.verify_payload().is_ok());
        assert!(store.get(QueueItemId::new(999)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ack_removes_rows() {
        let store = SqliteStore::open_memory().unwrap();
        let item = store
            .enqueue(NewMutation::update(asset("42"), "x"))
            .await
            .unwrap();

        store.mark_in_flight(&[item.id]).await.unwrap();
        assert_eq!(store.size().await.unwrap(), 1);
        store.mark_acknowledged(&[item.id]).await.unwrap();
        assert_eq!(store.size().await.unwrap(), 0);
        assert!(store.get(item.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_transition_rolls_back_batch() {
        let store = SqliteStore::open_memory().unwrap();
        let a = store.enqueue(NewMutation::update(asset("1"), "a")).await.unwrap();
        let b = store.enqueue(NewMutation::update(asset("2"), "b")).await.unwrap();
        store.mark_in_flight(&[b.id]).await.unwrap();

        // b is already in flight, so the whole batch must be rejected
        let err = store.mark_in_flight(&[a.id, b.id]).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { id, .. } if id == b.id));
        assert_eq!(
            store.get(a.id).await.unwrap().unwrap().status,
            ItemStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_retry_and_dead_letter() {
        let store = SqliteStore::open_memory().unwrap();
        let item = store.enqueue(NewMutation::update(asset("1"), "a")).await.unwrap();

        store.mark_in_flight(&[item.id]).await.unwrap();
        let retried = store.mark_retry(item.id, "timeout").await.unwrap();
        assert_eq!(retried.retry_count, 1);
        assert_eq!(retried.status, ItemStatus::Pending);

        store.mark_in_flight(&[item.id]).await.unwrap();
        let failed = store.mark_failed(item.id, "server rejected").await.unwrap();
        assert_eq!(failed.status, ItemStatus::Failed);
        assert_eq!(failed.retry_count, 2);
        assert_eq!(failed.last_error.as_deref(), Some("server rejected"));

        let failed_items = store.list_failed().await.unwrap();
        assert_eq!(failed_items.len(), 1);

        let revived = store.retry_failed(item.id).await.unwrap();
        assert_eq!(revived.retry_count, 0);
        assert_eq!(revived.status, ItemStatus::Pending);
    }

    #[tokio::test]
    async fn test_pending_for_entity() {
        let store = SqliteStore::open_memory().unwrap();
        store.enqueue(NewMutation::update(asset("1"), "a")).await.unwrap();
        store.enqueue(NewMutation::update(asset("2"), "b")).await.unwrap();
        store.enqueue(NewMutation::update(asset("1"), "c")).await.unwrap();

        let pending = store.pending_for_entity(&asset("1")).await.unwrap();
        let payloads: Vec<&[u8]> = pending.iter().map(|item| &item.payload[..]).collect();
        assert_eq!(payloads, vec![b"a".as_slice(), b"c".as_slice()]);
    }

    #[tokio::test]
    async fn test_pending_conflict_roundtrip() {
        let store = SqliteStore::open_memory().unwrap();
        let case = ConflictCase::new(
            EntityKey::new("Job", "7"),
            vec![QueueItemId::new(3), QueueItemId::new(4)],
            EntityVersion::new(Operation::Update, "local", 100),
            EntityVersion::new(Operation::Delete, Bytes::new(), 200),
        );

        store.save_pending_conflict(&case).await.unwrap();
        store.save_pending_conflict(&case).await.unwrap();

        assert_eq!(store.list_pending_conflicts().await.unwrap(), vec![case.clone()]);
        assert_eq!(
            store.get_pending_conflict(&case.entity).await.unwrap(),
            Some(case.clone())
        );
        assert!(store.remove_pending_conflict(&case.entity).await.unwrap());
        assert!(!store.remove_pending_conflict(&case.entity).await.unwrap());
    }

    #[tokio::test]
    async fn test_session_history_newest_first() {
        let store = SqliteStore::open_memory().unwrap();
        for (started_at, cursor) in [(1, "a"), (2, "b")] {
            let mut session = SyncSession::begin(SyncType::Full, started_at, Checkpoint::new(cursor));
            session.items_pushed = 3;
            session.finish(true, started_at + 10);
            store.record_session(&session).await.unwrap();
        }

        let sessions = store.recent_sessions(10).await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].started_at, 2);
        assert_eq!(sessions[0].checkpoint.as_str(), Some("b"));
        assert_eq!(sessions[0].sync_type, SyncType::Full);
        assert_eq!(sessions[1].items_pushed, 3);
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");

        let (kept, failed) = {
            let store = SqliteStore::open(&path).unwrap();
            let kept = store.enqueue(NewMutation::update(asset("42"), "brand")).await.unwrap();
            let failed = store.enqueue(NewMutation::update(asset("43"), "x")).await.unwrap();
            store.mark_in_flight(&[failed.id]).await.unwrap();
            store.mark_failed(failed.id, "rejected").await.unwrap();
            store.save_checkpoint(&Checkpoint::new("9")).await.unwrap();
            (kept, failed)
        };

        let store = SqliteStore::open(&path).unwrap();
        let kept_after = store.get(kept.id).await.unwrap().unwrap();
        assert_eq!(kept_after, kept);
        let failed_after = store.get(failed.id).await.unwrap().unwrap();
        assert_eq!(failed_after.status, ItemStatus::Failed);
        assert_eq!(failed_after.retry_count, 1);
        assert_eq!(store.load_checkpoint().await.unwrap().as_str(), Some("9"));

        let next = store.enqueue(NewMutation::update(asset("44"), "y")).await.unwrap();
        assert!(next.id > failed.id);
    }

    #[tokio::test]
    async fn test_peek_batch_stops_at_limit() {
        let store = SqliteStore::open_memory().unwrap();
        let blocked = store.enqueue(NewMutation::update(asset("1"), "a")).await.unwrap();
        store.mark_in_flight(&[blocked.id]).await.unwrap();
        let mut expected = Vec::new();
        for i in 0..6 {
            let entity = if i % 2 == 0 { asset("1") } else { asset(&format!("x{i}")) };
            let item = store.enqueue(NewMutation::update(entity, "p")).await.unwrap();
            if i % 2 == 1 {
                expected.push(item.id);
            }
        }

        let batch = store.peek_batch(2).await.unwrap();
        let ids: Vec<QueueItemId> = batch.iter().map(|item| item.id).collect();
        assert_eq!(ids, expected[..2].to_vec());

        let batch = store.peek_batch(10).await.unwrap();
        assert_eq!(batch.len(), 3);
        assert!(batch.iter().all(|item| item.entity != asset("1")));
    }

    fn stored_items(store: &SqliteStore) -> Vec<QueueItem> {
        let conn = store.conn.lock().unwrap();
        load_items(&conn, "", params![]).unwrap()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn test_enqueue_preserves_order(payloads in prop::collection::vec(".{0,16}", 1..20)) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let store = SqliteStore::open_memory().unwrap();

            rt.block_on(async {
                for (i, payload) in payloads.iter().enumerate() {
                    let entity = asset(&(i % 3).to_string());
                    store.enqueue(NewMutation::update(entity, payload.clone())).await.unwrap();
                }
            });

            let items = stored_items(&store);
            prop_assert_eq!(items.len(), payloads.len());
            for (item, payload) in items.iter().zip(&payloads) {
                prop_assert_eq!(&item.payload[..], payload.as_bytes());
            }
            prop_assert!(items.windows(2).all(|pair| pair[0].id < pair[1].id));
        }

        #[test]
        fn test_queue_state_survives_restart(steps in prop::collection::vec(queue_step(), 1..40)) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("queue.db");

            let before = {
                let store = SqliteStore::open(&path).unwrap();
                rt.block_on(async {
                    for step in &steps {
                        apply_step(&store, step).await;
                    }
                });
                stored_items(&store)
            };

            let reopened = SqliteStore::open(&path).unwrap();
            let after = rt.block_on(reopened.list_all()).unwrap();
            prop_assert_eq!(after, before);
        }
    }

    /// One queue operation. Index-based steps pick an existing item by
    /// position, modulo the queue length.
    #[derive(Debug, Clone)]
    enum QueueStep {
        Enqueue { entity: u8, payload: String },
        InFlight(usize),
        Retry(usize),
        Fail(usize),
        Ack(usize),
        Revive(usize),
    }

    fn queue_step() -> impl Strategy<Value = QueueStep> {
        prop_oneof![
            3 => (0u8..4, ".{0,12}")
                .prop_map(|(entity, payload)| QueueStep::Enqueue { entity, payload }),
            2 => any::<usize>().prop_map(QueueStep::InFlight),
            1 => any::<usize>().prop_map(QueueStep::Retry),
            1 => any::<usize>().prop_map(QueueStep::Fail),
            1 => any::<usize>().prop_map(QueueStep::Ack),
            1 => any::<usize>().prop_map(QueueStep::Revive),
        ]
    }

    /// Apply a step when it is a legal transition for the chosen item.
    async fn apply_step(store: &SqliteStore, step: &QueueStep) {
        if let QueueStep::Enqueue { entity, payload } = step {
            store
                .enqueue(NewMutation::update(asset(&entity.to_string()), payload.clone()))
                .await
                .unwrap();
            return;
        }

        let items = store.list_all().await.unwrap();
        if items.is_empty() {
            return;
        }
        let pick = |index: usize| &items[index % items.len()];
        match step {
            QueueStep::Enqueue { .. } => {}
            QueueStep::InFlight(index) => {
                let item = pick(*index);
                if item.status == ItemStatus::Pending {
                    store.mark_in_flight(&[item.id]).await.unwrap();
                }
            }
            QueueStep::Retry(index) => {
                let item = pick(*index);
                if item.status == ItemStatus::InFlight {
                    store.mark_retry(item.id, "timeout").await.unwrap();
                }
            }
            QueueStep::Fail(index) => {
                let item = pick(*index);
                if item.status == ItemStatus::InFlight {
                    store.mark_failed(item.id, "rejected").await.unwrap();
                }
            }
            QueueStep::Ack(index) => {
                let item = pick(*index);
                if item.status == ItemStatus::InFlight {
                    store.mark_acknowledged(&[item.id]).await.unwrap();
                }
            }
            QueueStep::Revive(index) => {
                let item = pick(*index);
                if item.status == ItemStatus::Failed {
                    store.retry_failed(item.id).await.unwrap();
                }
            }
        }
    }
}
