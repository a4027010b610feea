use crate::eve::{format_timestamp, EveEvent};
use crate::storage::{immediate_tx, SqliteService};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink unavailable: {0}")]
    Unavailable(String),

    #[error("transaction failed: {0}")]
    Transaction(String),
}

impl From<rusqlite::Error> for SinkError {
    fn from(e: rusqlite::Error) -> Self {
        SinkError::Transaction(e.to_string())
    }
}

/// Destination for decoded events.
///
/// `submit` only queues; nothing reaches the backend until `commit`, which
/// writes the whole accumulated batch as one transaction. Batch boundaries
/// are decided by the ingestion loop, never here.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn submit(&self, event: EveEvent) -> Result<(), SinkError>;

    /// Commit the accumulated batch. Returns the number of records written;
    /// committing an empty batch is a no-op. On failure the batch is
    /// discarded, not retried: the caller cannot distinguish a half-landed
    /// batch, so the error is fatal to the ingestion run.
    async fn commit(&self) -> Result<usize, SinkError>;
}

/// Batched event sink over the SQLite event store.
pub struct SqliteEventSink {
    db: SqliteService,
    batch: Mutex<Vec<EveEvent>>,
}

impl SqliteEventSink {
    pub fn new(db: SqliteService) -> Self {
        Self {
            db,
            batch: Mutex::new(Vec::new()),
        }
    }

    pub fn queued(&self) -> usize {
        self.batch.lock().unwrap().len()
    }
}

#[async_trait]
impl EventSink for SqliteEventSink {
    async fn submit(&self, event: EveEvent) -> Result<(), SinkError> {
        self.batch.lock().unwrap().push(event);
        Ok(())
    }

    async fn commit(&self) -> Result<usize, SinkError> {
        let batch = std::mem::take(&mut *self.batch.lock().unwrap());
        if batch.is_empty() {
            return Ok(0);
        }

        let count = batch.len();
        let conn = self.db.connection();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap();
            let tx = immediate_tx(&mut conn)?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO events (timestamp, archived, escalated, source)
                     VALUES (?1, 0, 0, ?2)",
                )?;
                for event in batch {
                    // Events without a parseable timestamp are ordered by
                    // their ingestion time.
                    let timestamp = event.timestamp().unwrap_or_else(Utc::now);
                    let source = serde_json::to_string(&event.into_value())
                        .map_err(|e| SinkError::Transaction(e.to_string()))?;
                    stmt.execute(rusqlite::params![format_timestamp(timestamp), source])?;
                }
            }
            tx.commit()?;
            Ok::<(), SinkError>(())
        })
        .await
        .map_err(|e| SinkError::Unavailable(e.to_string()))??;

        Ok(count)
    }
}
