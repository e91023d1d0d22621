use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::background::job_log::JobStats;
use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// `ok`, or `degraded` when the task store is unreachable.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    pub store_healthy: bool,
    /// Tasks currently being polled.
    pub active_pollers: usize,
    pub ws_connections: usize,
    /// Job outcomes since process start.
    pub jobs: JobStats,
}

/// GET /health
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let store_healthy = state.engine.store().ping().await.is_ok();
    let status = if store_healthy { "ok" } else { "degraded" };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        store_healthy,
        active_pollers: state.engine.scheduler().active_count(),
        ws_connections: state.ws_manager.connection_count().await,
        jobs: state.job_log.stats(),
    })
}

/// Mount health check routes (root level, not under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
