//! Database schema migrations for SQLite.
//!
//! We use a simple versioned migration system. Each migration is a SQL string
//! that transforms the schema from version N to N+1.

use fieldsync_core::now_millis;
use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// This function is idempotent - it can be called multiple times safely.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema v{current} is newer than supported v{CURRENT_VERSION}"
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
            tracing::debug!(version, "applied schema migration");
        }

        tx.commit()?;
    }

    Ok(())
}

/// Apply a specific migration version.
fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Local mutations awaiting transmission. Rows are deleted on ack.
        CREATE TABLE queue_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,  -- never reused
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            operation TEXT NOT NULL,          -- create | update | delete | upload
            payload BLOB NOT NULL,
            payload_digest BLOB NOT NULL,     -- 32 bytes, Blake3 of payload
            queued_at INTEGER NOT NULL,       -- Unix ms
            retry_count INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            status TEXT NOT NULL DEFAULT 'pending'
        );

        -- Single-row key/value state (checkpoint)
        CREATE TABLE sync_state (
            key TEXT PRIMARY KEY,
            value TEXT
        );

        -- Conflicts deferred under the Manual strategy
        CREATE TABLE pending_conflicts (
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            local_items BLOB NOT NULL,        -- CBOR array of queue item ids
            local_version BLOB NOT NULL,      -- CBOR EntityVersion
            remote_version BLOB NOT NULL,     -- CBOR EntityVersion
            detected_at INTEGER NOT NULL,
            PRIMARY KEY (entity_type, entity_id)
        );

        -- Session history
        CREATE TABLE sync_sessions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sync_type TEXT NOT NULL,
            started_at INTEGER NOT NULL,
            completed_at INTEGER,
            success INTEGER NOT NULL,
            items_pushed INTEGER NOT NULL,
            items_pulled INTEGER NOT NULL,
            conflicts_resolved INTEGER NOT NULL,
            items_failed INTEGER NOT NULL,
            checkpoint TEXT
        );

        CREATE INDEX idx_queue_status ON queue_items(status);
        CREATE INDEX idx_queue_entity ON queue_items(entity_type, entity_id);
        "#,
    )?;

    Ok(())
}
