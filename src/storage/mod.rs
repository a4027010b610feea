pub mod purger;
pub mod query;
pub mod sink;

use rusqlite::{Connection, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Shared handle to the SQLite event store.
///
/// One connection, serialized through a mutex; blocking work runs on the
/// blocking thread pool. The sink and the purger each open their own
/// immediate-mode transaction, so their writes serialize at the database.
#[derive(Clone)]
pub struct SqliteService {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteService {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        tracing::debug!(path = %path.as_ref().display(), "Opening SQLite database");
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn connection(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }

    pub async fn init_schema(&self) -> Result<(), StorageError> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS events (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    timestamp TEXT NOT NULL,
                    archived INTEGER NOT NULL DEFAULT 0,
                    escalated INTEGER NOT NULL DEFAULT 0,
                    source TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_events_timestamp
                    ON events (timestamp);
                CREATE INDEX IF NOT EXISTS idx_events_escalated
                    ON events (escalated);",
            )?;
            Ok(())
        })
        .await
    }

    /// Mark an event as archived. Returns false if the id does not exist.
    pub async fn archive_event(&self, id: i64) -> Result<bool, StorageError> {
        self.with_connection(move |conn| {
            let changed =
                conn.execute("UPDATE events SET archived = 1 WHERE id = ?1", [id])?;
            Ok(changed > 0)
        })
        .await
    }

    /// Set or clear the escalated flag. Escalated events are pinned: exempt
    /// from automatic age-based deletion.
    pub async fn set_escalated(&self, id: i64, escalated: bool) -> Result<bool, StorageError> {
        self.with_connection(move |conn| {
            let changed = conn.execute(
                "UPDATE events SET escalated = ?1 WHERE id = ?2",
                rusqlite::params![escalated as i64, id],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    pub async fn event_count(&self) -> Result<u64, StorageError> {
        self.with_connection(|conn| {
            let count: i64 =
                conn.query_row("SELECT count(*) FROM events", [], |row| row.get(0))?;
            Ok(count as u64)
        })
        .await
    }

    pub(crate) async fn with_connection<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StorageError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap();
            f(&mut *conn)
        })
        .await?
    }
}

/// Begin an immediate-mode transaction on a locked connection.
pub(crate) fn immediate_tx(
    conn: &mut Connection,
) -> Result<rusqlite::Transaction<'_>, rusqlite::Error> {
    conn.transaction_with_behavior(TransactionBehavior::Immediate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eve::format_timestamp;
    use chrono::Utc;

    async fn service_with_event() -> (SqliteService, i64) {
        let db = SqliteService::in_memory().unwrap();
        db.init_schema().await.unwrap();
        let id = db
            .with_connection(|conn| {
                conn.execute(
                    "INSERT INTO events (timestamp, source) VALUES (?1, ?2)",
                    rusqlite::params![format_timestamp(Utc::now()), "{}"],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .unwrap();
        (db, id)
    }

    #[tokio::test]
    async fn test_archive_event() {
        let (db, id) = service_with_event().await;
        assert!(db.archive_event(id).await.unwrap());
        assert!(!db.archive_event(id + 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_escalate_and_deescalate() {
        let (db, id) = service_with_event().await;
        assert!(db.set_escalated(id, true).await.unwrap());
        assert!(db.set_escalated(id, false).await.unwrap());
    }

    #[tokio::test]
    async fn test_init_schema_idempotent() {
        let db = SqliteService::in_memory().unwrap();
        db.init_schema().await.unwrap();
        db.init_schema().await.unwrap();
        assert_eq!(db.event_count().await.unwrap(), 0);
    }
}
