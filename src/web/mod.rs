//! Metrics and health HTTP server.
//!
//! Binds to `proxy.metrics_port` and exposes:
//!
//! - `GET /metrics`: Prometheus text exposition
//! - `GET /_health`: `200 OK` once the engine is ready, otherwise `503`
//! - `GET /api/stats`: cumulative stats snapshot as JSON

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;

use crate::dlp::engine::RedactionEngine;
use crate::metrics::DlpMetrics;
use crate::stats::StatsAggregator;

/// Shared state for all web handlers.
#[derive(Clone)]
pub struct AppState {
    pub metrics: DlpMetrics,
    pub engine: Arc<RedactionEngine>,
    pub stats: Arc<StatsAggregator>,
}

/// Build the axum router. `health_path` is normally `/_health`.
pub fn router(state: Arc<AppState>, health_path: &str) -> Router {
    Router::new()
        .route("/metrics", get(get_metrics))
        .route(health_path, get(get_health))
        .route("/api/stats", get(get_stats))
        .with_state(state)
}

/// Start the web server on the given address.
pub async fn start(
    listen_addr: &str,
    state: Arc<AppState>,
    health_path: &str,
) -> crate::error::Result<()> {
    let app = router(state, health_path);
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    tracing::info!("Metrics server listening on {}", listen_addr);
    axum::serve(listener, app).await?;
    Ok(())
}

// ─── Handlers ───────────────────────────────────────────────────────────────

/// `GET /metrics`: Prometheus text format.
async fn get_metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.render() {
        Ok(body) => (
            [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// `GET /_health`: readiness of the redaction engine.
async fn get_health(State(state): State<Arc<AppState>>) -> Response {
    if state.engine.is_ready() {
        (StatusCode::OK, "OK").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "DLP engine not ready").into_response()
    }
}

/// `GET /api/stats`: cumulative counters.
async fn get_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.stats.snapshot())
}
