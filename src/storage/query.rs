use crate::eve::format_timestamp;
use crate::storage::SqliteService;
use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_SIZE: u64 = 500;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid sort field: {0}")]
    InvalidSort(String),

    #[error("query failed: {reason}")]
    Backend { reason: String },
}

impl From<rusqlite::Error> for QueryError {
    fn from(e: rusqlite::Error) -> Self {
        QueryError::Backend {
            reason: e.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    fn as_sql(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Structured query options translated into a backend-native query.
#[derive(Debug, Clone, Default)]
pub struct EventQueryOptions {
    /// Free-text match against the raw event JSON.
    pub query_string: Option<String>,
    /// Only events newer than `now - time_range`.
    pub time_range: Option<Duration>,
    pub event_type: Option<String>,
    pub min_ts: Option<DateTime<Utc>>,
    pub max_ts: Option<DateTime<Utc>>,
    /// Sort field; defaults to `timestamp`.
    pub sort_by: Option<String>,
    pub order: SortOrder,
    /// Page size; defaults to 500.
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub id: i64,
    pub timestamp: String,
    pub archived: bool,
    pub escalated: bool,
    pub source: serde_json::Value,
}

/// Translate the option set into SQL and run it against the event store.
///
/// `stats` events are bookkeeping output from the sensor and are always
/// excluded, matching the behavior of the original event views.
pub async fn event_query(
    db: &SqliteService,
    options: EventQueryOptions,
) -> Result<Vec<EventRecord>, QueryError> {
    let sort_by = match options.sort_by.as_deref() {
        None | Some("timestamp") => "timestamp",
        Some("id") => "id",
        Some(other) => return Err(QueryError::InvalidSort(other.to_string())),
    };

    let mut sql = String::from(
        "SELECT id, timestamp, archived, escalated, source FROM events
         WHERE coalesce(json_extract(source, '$.event_type'), '') <> 'stats'",
    );
    let mut params: Vec<SqlValue> = Vec::new();

    if let Some(query_string) = options.query_string.filter(|s| !s.is_empty()) {
        sql.push_str(" AND source LIKE ?");
        params.push(SqlValue::from(format!("%{}%", query_string)));
    }
    if let Some(event_type) = options.event_type.filter(|s| !s.is_empty()) {
        sql.push_str(" AND json_extract(source, '$.event_type') = ?");
        params.push(SqlValue::from(event_type));
    }
    if let Some(time_range) = options.time_range {
        let min = chrono::Duration::from_std(time_range)
            .ok()
            .and_then(|d| Utc::now().checked_sub_signed(d))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        sql.push_str(" AND timestamp >= ?");
        params.push(SqlValue::from(format_timestamp(min)));
    }
    if let Some(min_ts) = options.min_ts {
        sql.push_str(" AND timestamp >= ?");
        params.push(SqlValue::from(format_timestamp(min_ts)));
    }
    if let Some(max_ts) = options.max_ts {
        sql.push_str(" AND timestamp <= ?");
        params.push(SqlValue::from(format_timestamp(max_ts)));
    }

    sql.push_str(&format!(
        " ORDER BY {} {} LIMIT ?",
        sort_by,
        options.order.as_sql()
    ));
    params.push(SqlValue::from(options.size.unwrap_or(DEFAULT_SIZE) as i64));

    let conn = db.connection();
    tokio::task::spawn_blocking(move || {
        let conn = conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params), |row| {
                let source_text: String = row.get(4)?;
                let source = serde_json::from_str(&source_text)
                    .unwrap_or(serde_json::Value::Null);
                Ok(EventRecord {
                    id: row.get(0)?,
                    timestamp: row.get(1)?,
                    archived: row.get::<_, i64>(2)? != 0,
                    escalated: row.get::<_, i64>(3)? != 0,
                    source,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok::<_, QueryError>(rows)
    })
    .await
    .map_err(|e| QueryError::Backend {
        reason: e.to_string(),
    })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn seed_db() -> SqliteService {
        let db = SqliteService::in_memory().unwrap();
        db.init_schema().await.unwrap();

        let rows = vec![
            ("2024-01-01T00:00:00.000000Z", "alert", 0),
            ("2024-01-02T00:00:00.000000Z", "dns", 0),
            ("2024-01-03T00:00:00.000000Z", "stats", 0),
            ("2024-01-04T00:00:00.000000Z", "alert", 1),
        ];
        for (ts, event_type, escalated) in rows {
            let source = json!({"timestamp": ts, "event_type": event_type}).to_string();
            let ts = ts.to_string();
            db.with_connection(move |conn| {
                conn.execute(
                    "INSERT INTO events (timestamp, escalated, source) VALUES (?1, ?2, ?3)",
                    rusqlite::params![ts, escalated, source],
                )?;
                Ok(())
            })
            .await
            .unwrap();
        }
        db
    }

    #[tokio::test]
    async fn test_default_query_excludes_stats_sorted_desc() {
        let db = seed_db().await;
        let events = event_query(&db, EventQueryOptions::default()).await.unwrap();
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.source["event_type"] != "stats"));
        assert!(events[0].timestamp > events[1].timestamp);
    }

    #[tokio::test]
    async fn test_event_type_filter() {
        let db = seed_db().await;
        let events = event_query(
            &db,
            EventQueryOptions {
                event_type: Some("alert".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_free_text_query() {
        let db = seed_db().await;
        let events = event_query(
            &db,
            EventQueryOptions {
                query_string: Some("dns".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].source["event_type"], json!("dns"));
    }

    #[tokio::test]
    async fn test_timestamp_bounds() {
        let db = seed_db().await;
        let events = event_query(
            &db,
            EventQueryOptions {
                min_ts: "2024-01-02T00:00:00Z".parse().ok(),
                max_ts: "2024-01-02T12:00:00Z".parse().ok(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].source["event_type"], json!("dns"));
    }

    #[tokio::test]
    async fn test_size_limit_and_order() {
        let db = seed_db().await;
        let events = event_query(
            &db,
            EventQueryOptions {
                size: Some(1),
                order: SortOrder::Asc,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].source["event_type"], json!("alert"));
    }

    #[tokio::test]
    async fn test_invalid_sort_field_is_typed_error() {
        let db = seed_db().await;
        let err = event_query(
            &db,
            EventQueryOptions {
                sort_by: Some("src_ip; DROP TABLE events".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, QueryError::InvalidSort(_)));
    }
}
