//! HTTP and WebSocket surface.
//!
//! - `GET /` - API information
//! - `GET /health` - liveness
//! - `GET /health/index` (alias `/health/qdrant`) - external index probe
//! - `GET /ready` - backend choice and catalog size
//! - `GET /metrics` - Prometheus exposition
//! - `GET /ws/inference` - WebSocket inference session
//! - `POST /admin/reload` - rebuild catalog and backend (when enabled)

pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::from_fn;
use axum::routing::{get, post};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{FretmatchConfig, ServerConfig};
use crate::engine::InferenceEngine;

pub use error::{ServerError, ServerResult};
pub use state::ServerState;

use middleware::{log_requests, request_id};
use routes::{admin, api_info, health, inference, not_found};

/// Build the router with all routes and middleware.
pub fn build_router(state: Arc<ServerState>) -> Router {
    let server = state.config.server.clone();

    let mut router = Router::new()
        .route("/", get(api_info))
        .route("/health", get(health::health_check))
        .route("/health/index", get(health::index_health))
        .route("/health/qdrant", get(health::index_health))
        .route("/ready", get(health::readiness_check))
        .route("/metrics", get(health::metrics))
        .route("/ws/inference", get(inference::inference_socket));

    if server.enable_admin {
        router = router.route("/admin/reload", post(admin::reload));
    }

    router
        .fallback(not_found)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            server.timeout(),
        ))
        .layer(cors_layer(&server))
        .layer(from_fn(log_requests))
        .layer(from_fn(request_id))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    if !config.enable_cors {
        return CorsLayer::new();
    }

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Install the global tracing subscriber. `RUST_LOG` wins over `level`.
pub fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(err) = result {
        eprintln!("tracing already initialized: {err}");
    }
}

/// Install the process-wide Prometheus recorder and describe our metrics.
pub fn install_metrics_recorder() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    metrics::describe_counter!(
        "fretmatch_inference_total",
        "Inference messages handled, labelled by outcome"
    );
    metrics::describe_counter!(
        "fretmatch_backend_fallback_total",
        "External index failures answered from the in-memory catalog"
    );
    metrics::describe_histogram!(
        "fretmatch_inference_seconds",
        metrics::Unit::Seconds,
        "Pipeline latency per request"
    );
    metrics::describe_gauge!("fretmatch_catalog_entries", "Chords in the active catalog");
    metrics::describe_gauge!("fretmatch_ws_connections", "Open WebSocket sessions");

    Ok(handle)
}

/// Initialize the engine and serve until Ctrl+C or SIGTERM.
pub async fn start_server(
    config: FretmatchConfig,
    metrics: Option<PrometheusHandle>,
) -> anyhow::Result<()> {
    let addr: SocketAddr = config.server.socket_addr()?;

    let engine = Arc::new(InferenceEngine::initialize(config.engine_config()).await?);
    let status = engine.status();
    info!(
        backend = ?status.backend,
        embedding_mode = %status.embedding_mode,
        catalog_entries = status.catalog_entries,
        "inference engine ready"
    );

    let state = Arc::new(ServerState::new(config.clone(), engine, metrics));
    let app = build_router(state);

    info!(
        %addr,
        cors = config.server.enable_cors,
        metrics = config.server.metrics_enabled,
        admin = config.server.enable_admin,
        "starting fretmatch server"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
