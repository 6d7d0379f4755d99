use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::{
    extract::{ConnectInfo, Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::{
    error::{AdmissionError, StoreError},
    service::{ScanService, ServiceStats},
    types::{format_timestamp, normalize_address, Admission, ScanState},
};

#[derive(Debug, Clone, Serialize)]
pub struct StatsBody {
    pub uptime_secs: u64,
    pub completed_scans: u64,
    pub average_scan_ms: u64,
    pub queue_len: usize,
}

impl From<ServiceStats> for StatsBody {
    fn from(s: ServiceStats) -> Self {
        Self {
            uptime_secs: s.uptime.as_secs(),
            completed_scans: s.completed_scans,
            average_scan_ms: u64::try_from(s.average_scan_time.as_millis()).unwrap_or(u64::MAX),
            queue_len: s.queue_len,
        }
    }
}

/// Caller's scan state plus the service counters and the last stored report.
#[derive(Debug, Clone, Serialize)]
pub struct StatusBody {
    pub address: String,
    pub state: ScanState,
    pub position: usize,
    pub queue_len: usize,
    /// Scan start (running) or enqueue time (queued), RFC3339.
    pub since: Option<String>,
    pub waited_secs: Option<i64>,
    pub stats: StatsBody,
    pub last_result: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueItem {
    pub address: String,
    pub since: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct QueueBody {
    pub running: Vec<QueueItem>,
    pub queued: Vec<QueueItem>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RouteHelp {
    pub method: &'static str,
    pub path: &'static str,
    pub summary: &'static str,
}

const fn route(method: &'static str, path: &'static str, summary: &'static str) -> RouteHelp {
    RouteHelp {
        method,
        path,
        summary,
    }
}

/// Everything mounted under `/api`, as listed by `GET /api/help`.
pub const ROUTES: &[RouteHelp] = &[
    route("GET", "/api/help", "This list"),
    route("GET", "/api/status", "Caller's scan state, server counters and last report"),
    route("POST", "/api/scan", "Queue a full TCP port scan of the caller's address"),
    route("GET", "/api/queue", "Running and waiting scans"),
    route("GET", "/api/list", "Addresses with a saved report"),
    route("GET", "/api/results/{addr}", "Last report for the given address"),
    route("DELETE", "/api/results", "Remove the caller's saved report"),
];

/// API routes without the trace layer, so tests can drive them directly.
pub fn router(service: ScanService) -> Router {
    let api = Router::new()
        .route("/help", get(get_help))
        .route("/status", get(get_status))
        .route("/scan", post(post_scan))
        .route("/queue", get(get_queue))
        .route("/list", get(get_list))
        .route("/results", delete(delete_result))
        .route("/results/{addr}", get(get_result))
        .with_state(service);

    Router::new().nest("/api", api)
}

pub async fn spawn_server(bind: &str, service: ScanService, cancel: CancellationToken) -> Result<()> {
    let app = router(service).layer(TraceLayer::new_for_http());
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!("serving API on http://{}", listener.local_addr()?);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(cancel.cancelled_owned())
    .await?;
    Ok(())
}

fn caller(peer: SocketAddr) -> String {
    peer.ip().to_canonical().to_string()
}

fn status_body(svc: &ScanService, address: String, adm: Admission) -> Result<StatusBody, StoreError> {
    let last_result = svc
        .last_result(&address)?
        .map(|r| String::from_utf8_lossy(&r).into_owned());
    Ok(StatusBody {
        since: adm.reference_time.map(format_timestamp),
        waited_secs: adm
            .reference_time
            .map(|t| (OffsetDateTime::now_utc() - t).whole_seconds()),
        address,
        state: adm.state,
        position: adm.position,
        queue_len: adm.queue_len,
        stats: svc.stats().into(),
        last_result,
    })
}

fn admission_response(svc: &ScanService, address: String, admit: bool) -> axum::response::Response {
    let adm = match svc.request(&address, admit) {
        Ok(a) => a,
        Err(e @ AdmissionError::QueueFull { .. }) => {
            return (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
        }
    };
    let code = if admit && adm.state != ScanState::Idle {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    match status_body(svc, address, adm) {
        Ok(body) => (code, Json(body)).into_response(),
        Err(e) => {
            error!(error = %e, "failed to read last result");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn get_help(ConnectInfo(peer): ConnectInfo<SocketAddr>) -> impl IntoResponse {
    debug!(address = %caller(peer), "help");
    (StatusCode::OK, Json(ROUTES))
}

async fn get_status(
    State(svc): State<ScanService>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    admission_response(&svc, caller(peer), false)
}

async fn post_scan(
    State(svc): State<ScanService>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    admission_response(&svc, caller(peer), true)
}

async fn get_queue(State(svc): State<ScanService>) -> impl IntoResponse {
    let snap = svc.queue().snapshot();
    let body = QueueBody {
        running: snap
            .in_flight
            .into_iter()
            .map(|e| QueueItem {
                address: e.address,
                since: format_timestamp(e.started_at),
            })
            .collect(),
        queued: snap
            .queued
            .into_iter()
            .map(|e| QueueItem {
                address: e.address,
                since: format_timestamp(e.enqueued_at),
            })
            .collect(),
    };
    (StatusCode::OK, Json(body))
}

async fn get_result(State(svc): State<ScanService>, Path(addr): Path<String>) -> impl IntoResponse {
    let Some(address) = normalize_address(&addr) else {
        return (
            StatusCode::BAD_REQUEST,
            "No IP address specified. The last element of the URL must be an IP address.",
        )
            .into_response();
    };
    match svc.last_result(&address) {
        Ok(Some(report)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            report,
        )
            .into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            format!("No scan results for {address}"),
        )
            .into_response(),
        Err(e) => {
            error!(%address, error = %e, "failed to read result");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn delete_result(
    State(svc): State<ScanService>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    let address = caller(peer);
    let store = svc.store().clone();
    let key = address.clone();
    match tokio::task::spawn_blocking(move || store.delete(&key)).await {
        Ok(Ok(())) => {
            info!(%address, "deleted saved results");
            (StatusCode::OK, "Deleted saved results.".to_string()).into_response()
        }
        Ok(Err(e @ StoreError::NotFound(_))) => (StatusCode::NOT_FOUND, e.to_string()).into_response(),
        Ok(Err(e)) => {
            error!(%address, error = %e, "failed to delete saved results");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn get_list(State(svc): State<ScanService>) -> impl IntoResponse {
    match svc.store().list() {
        Ok(addresses) => (StatusCode::OK, Json(addresses)).into_response(),
        Err(e) => {
            error!(error = %e, "failed to list results");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
