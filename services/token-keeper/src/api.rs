//! Status API for daemon mode
//!
//! Read-only views of the accounts and the scheduler, plus a manual job
//! trigger. Only bound when `[server] listen_addr` is set.
//!
//! Endpoints:
//! - `GET /health`: daemon status and whether the document loads
//! - `GET /metrics`: Prometheus text exposition
//! - `GET /accounts`: token-free account summaries
//! - `GET /status`: scheduler snapshot
//! - `GET /export`: current export entries
//! - `POST /jobs/{job}/run`: start a job now (409 if it is running)

use std::sync::Arc;

use account_manager::{JobKind, Scheduler, TriggerError};
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use tracing::warn;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    scheduler: Arc<Scheduler>,
    prometheus: PrometheusHandle,
}

impl ApiState {
    pub fn new(scheduler: Arc<Scheduler>, prometheus: PrometheusHandle) -> Self {
        Self {
            scheduler,
            prometheus,
        }
    }
}

/// Build the router with a concurrency limit of `max_connections`.
pub fn build_router(state: ApiState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_text))
        .route("/accounts", get(list_accounts))
        .route("/status", get(status))
        .route("/export", get(export))
        .route("/jobs/{job}/run", post(run_job))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

fn error_response(status: StatusCode, message: impl std::fmt::Display) -> Response {
    json_response(status, json!({ "error": message.to_string() }))
}

/// GET /health: 200 when the accounts document loads, 503 otherwise.
async fn health(State(state): State<ApiState>) -> Response {
    let snapshot = state.scheduler.snapshot();
    match state.scheduler.manager().list().await {
        Ok(accounts) => json_response(
            StatusCode::OK,
            json!({
                "status": "healthy",
                "daemon": snapshot.status,
                "uptime_seconds": snapshot.uptime_secs,
                "accounts": accounts.len(),
            }),
        ),
        Err(e) => {
            warn!(error = %e, "health check cannot read accounts document");
            json_response(
                StatusCode::SERVICE_UNAVAILABLE,
                json!({
                    "status": "degraded",
                    "daemon": snapshot.status,
                    "uptime_seconds": snapshot.uptime_secs,
                    "error": e.to_string(),
                }),
            )
        }
    }
}

/// GET /metrics
async fn metrics_text(State(state): State<ApiState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// GET /accounts. Never exposes tokens.
async fn list_accounts(State(state): State<ApiState>) -> Response {
    match state.scheduler.manager().list().await {
        Ok(accounts) => json_response(StatusCode::OK, json!({ "accounts": accounts })),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

/// GET /status
async fn status(State(state): State<ApiState>) -> Response {
    match serde_json::to_value(state.scheduler.snapshot()) {
        Ok(body) => json_response(StatusCode::OK, body),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

/// GET /export
async fn export(State(state): State<ApiState>) -> Response {
    let entries = match state.scheduler.manager().export_entries().await {
        Ok(entries) => entries,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    };
    match serde_json::to_value(entries) {
        Ok(body) => json_response(StatusCode::OK, body),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

/// POST /jobs/{job}/run: 202 when started.
async fn run_job(State(state): State<ApiState>, Path(job): Path<String>) -> Response {
    let Some(kind) = JobKind::from_name(&job) else {
        return error_response(StatusCode::NOT_FOUND, format!("unknown job: {job}"));
    };
    match state.scheduler.trigger(kind) {
        Ok(()) => json_response(
            StatusCode::ACCEPTED,
            json!({ "job": kind.name(), "status": "started" }),
        ),
        Err(TriggerError::Disabled) => {
            error_response(StatusCode::NOT_FOUND, format!("job {job} is disabled"))
        }
        Err(TriggerError::AlreadyRunning) => {
            error_response(StatusCode::CONFLICT, format!("job {job} is already running"))
        }
    }
}
