use crate::config::RetentionConfig;
use crate::eve::format_timestamp;
use crate::storage::{immediate_tx, SqliteService, StorageError};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{info, warn};

const IDLE_SLEEP: Duration = Duration::from_secs(60);
const BACKLOG_SLEEP: Duration = Duration::from_millis(100);

/// Deletes aged events at a bounded rate so retention never starves
/// ingestion. Runs as an independent task against the shared event store.
pub struct RetentionPurger {
    db: SqliteService,
    period: Duration,
    limit: u64,
}

impl RetentionPurger {
    pub fn new(db: SqliteService, retention: &RetentionConfig) -> Self {
        Self {
            db,
            period: retention.period,
            limit: retention.purge_limit,
        }
    }

    /// Purge loop. Returns immediately when retention is disabled.
    ///
    /// A failed cycle is logged and skipped; retention is housekeeping, not
    /// correctness-critical, so the loop never crashes the process.
    pub async fn run(self) {
        if self.period.is_zero() || self.limit == 0 {
            info!("Retention disabled, purger will not run");
            return;
        }
        info!(
            period = %humantime::format_duration(self.period),
            limit = self.limit,
            "Starting retention purger"
        );
        loop {
            let sleep = match self.purge_cycle().await {
                Ok(deleted) => Self::next_sleep(deleted, self.limit),
                Err(e) => {
                    warn!(error = %e, "Purge cycle failed, skipping");
                    IDLE_SLEEP
                }
            };
            tokio::time::sleep(sleep).await;
        }
    }

    /// One bounded deletion cycle. Deletes up to `limit` events older than
    /// `now - period`, skipping escalated (pinned) events. Returns the
    /// number deleted.
    pub async fn purge_cycle(&self) -> Result<u64, StorageError> {
        // An out-of-range period purges nothing rather than everything.
        let cutoff = chrono::Duration::from_std(self.period)
            .ok()
            .and_then(|d| Utc::now().checked_sub_signed(d))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let cutoff = format_timestamp(cutoff);
        let limit = self.limit;

        let start = std::time::Instant::now();
        let deleted = self
            .db
            .with_connection(move |conn| {
                let tx = immediate_tx(conn)?;
                // Subselect so the delete itself is bounded per cycle.
                let deleted = tx.execute(
                    "DELETE FROM events
                     WHERE id IN
                         (SELECT id FROM events
                          WHERE timestamp < ?1
                          AND escalated = 0
                          LIMIT ?2)",
                    rusqlite::params![cutoff, limit as i64],
                )?;
                tx.commit()?;
                Ok(deleted as u64)
            })
            .await?;

        if deleted > 0 {
            info!(deleted, elapsed = ?start.elapsed(), "Purged events");
        }
        Ok(deleted)
    }

    /// Backoff between cycles. Hitting the cap is treated as a proxy for
    /// remaining backlog, which is an approximation, not a measurement: the
    /// next cycle follows after a short yield to concurrent writers instead
    /// of immediately. Anything under the cap means the backlog is likely
    /// drained, so the purger goes back to its idle interval.
    fn next_sleep(deleted: u64, limit: u64) -> Duration {
        if deleted >= limit {
            BACKLOG_SLEEP
        } else {
            IDLE_SLEEP
        }
    }
}
