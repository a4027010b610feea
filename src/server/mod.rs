use crate::mikrotik::MikrotikClient;
use crate::storage::query::{event_query, EventQueryOptions, QueryError, SortOrder};
use crate::storage::SqliteService;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no free port between {first} and {last}")]
    PortsExhausted { first: u16, last: u16 },
}

/// One step of the port-selection state machine.
pub enum BindOutcome {
    Bound(TcpListener),
    /// Requested port was busy; try this one next.
    Busy(u16),
}

pub async fn try_bind(host: &str, port: u16) -> Result<BindOutcome, ServerError> {
    match TcpListener::bind((host, port)).await {
        Ok(listener) => Ok(BindOutcome::Bound(listener)),
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => match port.checked_add(1) {
            Some(next) => Ok(BindOutcome::Busy(next)),
            None => Err(ServerError::PortsExhausted {
                first: port,
                last: port,
            }),
        },
        Err(e) => Err(e.into()),
    }
}

/// Walk upward from `start_port` until a port binds.
pub async fn bind_with_retry(host: &str, start_port: u16) -> Result<TcpListener, ServerError> {
    let mut port = start_port;
    loop {
        match try_bind(host, port).await {
            Ok(BindOutcome::Bound(listener)) => return Ok(listener),
            Ok(BindOutcome::Busy(next)) => {
                warn!(port, next, "Port busy, trying next");
                port = next;
            }
            Err(ServerError::PortsExhausted { .. }) => {
                return Err(ServerError::PortsExhausted {
                    first: start_port,
                    last: port,
                })
            }
            Err(e) => return Err(e),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db: SqliteService,
    pub mikrotik: Option<Arc<MikrotikClient>>,
}

pub fn build_router(db: SqliteService, mikrotik: Option<Arc<MikrotikClient>>) -> Router {
    let state = Arc::new(AppState { db, mikrotik });
    Router::new()
        .route("/api/1/version", get(get_version))
        .route("/api/1/events", get(get_events))
        .route("/api/1/events/:id/archive", post(archive_event))
        .route("/api/1/events/:id/escalate", post(escalate_event))
        .route("/api/1/events/:id/de-escalate", post(deescalate_event))
        .route("/api/1/firewall/block", post(block_address))
        .route("/api/1/firewall/unblock", post(unblock_address))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until the listener is torn down by process shutdown.
pub async fn run_server(
    db: SqliteService,
    mikrotik: Option<Arc<MikrotikClient>>,
    listener: TcpListener,
) -> Result<(), ServerError> {
    let app = build_router(db, mikrotik);
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct EventsParams {
    query_string: Option<String>,
    /// Duration string, e.g. `24h` or `7d`.
    time_range: Option<String>,
    event_type: Option<String>,
    min_ts: Option<DateTime<Utc>>,
    max_ts: Option<DateTime<Utc>>,
    sort_by: Option<String>,
    order: Option<String>,
    size: Option<u64>,
}

impl EventsParams {
    fn into_options(self) -> Result<EventQueryOptions, String> {
        let time_range = match self.time_range.filter(|s| !s.is_empty()) {
            Some(raw) => Some(
                humantime::parse_duration(&raw)
                    .map_err(|e| format!("bad time_range {:?}: {}", raw, e))?,
            ),
            None => None,
        };
        let order = match self.order.as_deref() {
            None | Some("desc") => SortOrder::Desc,
            Some("asc") => SortOrder::Asc,
            Some(other) => return Err(format!("bad order {:?}", other)),
        };
        Ok(EventQueryOptions {
            query_string: self.query_string,
            time_range,
            event_type: self.event_type,
            min_ts: self.min_ts,
            max_ts: self.max_ts,
            sort_by: self.sort_by,
            order,
            size: self.size,
        })
    }
}

struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({"error": self.1}))).into_response()
    }
}

impl From<QueryError> for ApiError {
    fn from(e: QueryError) -> Self {
        let status = match e {
            QueryError::InvalidSort(_) => StatusCode::BAD_REQUEST,
            QueryError::Backend { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError(status, e.to_string())
    }
}

impl From<crate::storage::StorageError> for ApiError {
    fn from(e: crate::storage::StorageError) -> Self {
        ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}

async fn get_version() -> Json<serde_json::Value> {
    Json(json!({"version": crate::VERSION}))
}

async fn get_events(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EventsParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let options = params
        .into_options()
        .map_err(|reason| ApiError(StatusCode::BAD_REQUEST, reason))?;
    let events = event_query(&state.db, options).await?;
    Ok(Json(json!({"data": events})))
}

async fn archive_event(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if state.db.archive_event(id).await? {
        Ok(StatusCode::OK)
    } else {
        Err(ApiError(StatusCode::NOT_FOUND, format!("no event {}", id)))
    }
}

async fn escalate_event(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if state.db.set_escalated(id, true).await? {
        Ok(StatusCode::OK)
    } else {
        Err(ApiError(StatusCode::NOT_FOUND, format!("no event {}", id)))
    }
}

async fn deescalate_event(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if state.db.set_escalated(id, false).await? {
        Ok(StatusCode::OK)
    } else {
        Err(ApiError(StatusCode::NOT_FOUND, format!("no event {}", id)))
    }
}

#[derive(Debug, Deserialize)]
struct BlockParams {
    address: String,
    #[serde(default)]
    comment: String,
}

fn mikrotik_or_unavailable(state: &AppState) -> Result<&Arc<MikrotikClient>, ApiError> {
    state.mikrotik.as_ref().ok_or_else(|| {
        ApiError(
            StatusCode::SERVICE_UNAVAILABLE,
            "firewall integration not configured".to_string(),
        )
    })
}

async fn block_address(
    State(state): State<Arc<AppState>>,
    Json(params): Json<BlockParams>,
) -> Result<StatusCode, ApiError> {
    let client = mikrotik_or_unavailable(&state)?;
    client
        .add_to_list(&params.address, &params.comment)
        .await
        .map_err(|e| ApiError(StatusCode::BAD_GATEWAY, e.to_string()))?;
    Ok(StatusCode::OK)
}

async fn unblock_address(
    State(state): State<Arc<AppState>>,
    Json(params): Json<BlockParams>,
) -> Result<StatusCode, ApiError> {
    let client = mikrotik_or_unavailable(&state)?;
    client
        .remove_from_list(&params.address)
        .await
        .map_err(|e| ApiError(StatusCode::BAD_GATEWAY, e.to_string()))?;
    Ok(StatusCode::OK)
}
