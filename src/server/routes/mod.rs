//! Route handlers
//!
//! - `health`: liveness, index probe, readiness and metrics
//! - `inference`: the WebSocket session
//! - `admin`: engine reload

pub mod admin;
pub mod health;
pub mod inference;

use axum::Json;
use axum::response::IntoResponse;
use serde_json::json;

use crate::server::error::ServerError;

/// `GET /`
pub async fn api_info() -> impl IntoResponse {
    Json(json!({
        "name": "fretmatch",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "endpoints": [
            "/health",
            "/health/index",
            "/ready",
            "/metrics",
            "/ws/inference"
        ]
    }))
}

/// 404 handler for undefined routes.
pub async fn not_found() -> ServerError {
    ServerError::NotFound
}
