use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use serde::Serialize;
use serde_json::json;

use crate::engine::EngineStatus;
use crate::server::error::{ServerError, ServerResult};
use crate::server::state::ServerState;

/// `GET /health`. 200 whenever the process is serving.
pub async fn health_check(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().timestamp(),
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.uptime_seconds(),
    }))
}

#[derive(Debug, Serialize)]
pub struct IndexHealthResponse {
    pub status: &'static str,
    pub connected: bool,
    pub url: Option<String>,
}

/// `GET /health/index`: probe the configured external index.
pub async fn index_health(State(state): State<Arc<ServerState>>) -> Json<IndexHealthResponse> {
    let connected = state.engine.check_backend_health().await;
    Json(IndexHealthResponse {
        status: if connected { "healthy" } else { "unhealthy" },
        connected,
        url: state.config.index.url.clone(),
    })
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    #[serde(flatten)]
    pub engine: EngineStatus,
}

/// `GET /ready`
pub async fn readiness_check(State(state): State<Arc<ServerState>>) -> Json<ReadinessResponse> {
    Json(ReadinessResponse {
        status: "ready",
        engine: state.engine.status(),
    })
}

/// `GET /metrics` in Prometheus text format.
pub async fn metrics(State(state): State<Arc<ServerState>>) -> ServerResult<impl IntoResponse> {
    let handle = state.metrics.as_ref().ok_or(ServerError::MetricsDisabled)?;
    Ok((
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    ))
}
