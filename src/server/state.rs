use std::sync::Arc;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusHandle;

use crate::config::FretmatchConfig;
use crate::engine::InferenceEngine;

/// Shared application state
#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<FretmatchConfig>,

    /// One engine for every connection.
    pub engine: Arc<InferenceEngine>,

    /// `None` when metrics are disabled or no recorder was installed.
    pub metrics: Option<PrometheusHandle>,

    pub started_at: Instant,
}

impl ServerState {
    pub fn new(
        config: FretmatchConfig,
        engine: Arc<InferenceEngine>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        let metrics = if config.server.metrics_enabled {
            metrics
        } else {
            None
        };
        Self {
            config: Arc::new(config),
            engine,
            metrics,
            started_at: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
