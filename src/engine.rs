//! Inference orchestration.
//!
//! [`InferenceEngine`] owns the projector, the chord catalog and the search
//! backend choice. Requests read an immutable [`EngineState`] snapshot; a
//! reload builds a fresh state off to the side and publishes it with one
//! pointer swap, so in-flight requests never observe a half-built catalog.

use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::catalog::{CatalogSource, ChordCatalog};
use crate::decision::{DecisionPolicy, InferenceOutcome};
use crate::error::InferenceError;
use crate::index::{ChordMatch, InMemoryBackend, IndexError, SearchBackend};
use crate::projection::{Embedding, EmbeddingMode, Projector};
use crate::protocol::InferenceRequest;
use crate::sanitize::{FEATURE_DIM, sanitize};

pub const DEFAULT_TOP_K: usize = 3;
pub const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_millis(500);

/// Connection details for an external vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalIndexConfig {
    pub url: String,
    pub collection: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub embedding_mode: EmbeddingMode,
    pub projection_path: Option<PathBuf>,
    pub catalog: CatalogSource,
    pub policy: DecisionPolicy,
    pub top_k: usize,
    /// Upper bound on every external index call.
    pub search_timeout: Duration,
    /// `None` keeps search in memory.
    pub index: Option<ExternalIndexConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            embedding_mode: EmbeddingMode::Raw,
            projection_path: None,
            catalog: CatalogSource::Builtin,
            policy: DecisionPolicy::default(),
            top_k: DEFAULT_TOP_K,
            search_timeout: DEFAULT_SEARCH_TIMEOUT,
            index: None,
        }
    }
}

/// Which backend answers queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    InMemory,
    External,
}

/// Immutable per-generation state shared by all requests.
pub struct EngineState {
    projector: Projector,
    catalog: Arc<ChordCatalog>,
    memory: InMemoryBackend,
    /// Configured external index, reachable or not. Health probes use it.
    external: Option<Arc<dyn SearchBackend>>,
    kind: BackendKind,
}

impl EngineState {
    fn active_external(&self) -> Option<&Arc<dyn SearchBackend>> {
        match self.kind {
            BackendKind::External => self.external.as_ref(),
            BackendKind::InMemory => None,
        }
    }

    pub fn projector(&self) -> &Projector {
        &self.projector
    }

    pub fn catalog(&self) -> &Arc<ChordCatalog> {
        &self.catalog
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }
}

/// Snapshot reported by `/ready` and the admin reload route.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    pub backend: BackendKind,
    pub backend_name: &'static str,
    pub embedding_mode: EmbeddingMode,
    pub embedding_dim: usize,
    pub catalog_entries: usize,
    pub index_url: Option<String>,
}

pub struct InferenceEngine {
    config: EngineConfig,
    /// Set by [`InferenceEngine::with_external_backend`]; survives reloads.
    injected: Option<Arc<dyn SearchBackend>>,
    state: RwLock<Arc<EngineState>>,
}

impl InferenceEngine {
    /// Build projector and catalog, then probe the external index once.
    ///
    /// An unreachable index is not an error: the engine starts on the
    /// in-memory backend and logs why.
    pub async fn initialize(config: EngineConfig) -> Result<Self, InferenceError> {
        let state = build_state(&config, None).await?;
        Ok(Self {
            config,
            injected: None,
            state: RwLock::new(Arc::new(state)),
        })
    }

    /// Use `backend` as the external index without probing it.
    pub async fn with_external_backend(
        config: EngineConfig,
        backend: Arc<dyn SearchBackend>,
    ) -> Result<Self, InferenceError> {
        let state = build_state(&config, Some(backend.clone())).await?;
        Ok(Self {
            config,
            injected: Some(backend),
            state: RwLock::new(Arc::new(state)),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current state generation.
    pub fn snapshot(&self) -> Arc<EngineState> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Validate, sanitize, project, search and decide.
    pub async fn process(
        &self,
        request: &InferenceRequest,
    ) -> Result<InferenceOutcome, InferenceError> {
        request.validate()?;
        self.process_vector(&request.left_hand_vector).await
    }

    /// Pipeline entry for callers that already hold a raw vector.
    ///
    /// Non-finite values are replaced, not rejected; the range check belongs
    /// to [`InferenceRequest::validate`].
    pub async fn process_vector(&self, raw: &[f32]) -> Result<InferenceOutcome, InferenceError> {
        let started = Instant::now();
        let state = self.snapshot();

        let clean = sanitize(raw, FEATURE_DIM)?;
        let query = state.projector.project(&clean)?;
        let matches = self.search(&state, &query).await?;
        let outcome = self.config.policy.decide(&matches);

        let elapsed = started.elapsed();
        metrics::histogram!("fretmatch_inference_seconds").record(elapsed.as_secs_f64());
        debug!(
            chord_id = %outcome.chord_id,
            confidence = outcome.confidence,
            correction_active = outcome.correction_active,
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "inference complete"
        );
        Ok(outcome)
    }

    async fn search(
        &self,
        state: &EngineState,
        query: &Embedding,
    ) -> Result<Vec<ChordMatch>, InferenceError> {
        if let Some(external) = state.active_external() {
            let timeout = self.config.search_timeout;
            let attempt = tokio::time::timeout(timeout, external.search(query, self.config.top_k))
                .await
                .unwrap_or(Err(IndexError::Timeout(timeout)));

            match attempt {
                Ok(matches) => return Ok(matches),
                Err(err) => {
                    warn!(
                        backend = external.name(),
                        error = %err,
                        "external search failed; falling back to in-memory catalog"
                    );
                    metrics::counter!("fretmatch_backend_fallback_total", "reason" => err.reason())
                        .increment(1);
                }
            }
        }

        Ok(state.memory.rank(query, self.config.top_k)?)
    }

    /// Probe the configured external index. False when none is configured
    /// or the probe fails or times out.
    pub async fn check_backend_health(&self) -> bool {
        let state = self.snapshot();
        let Some(external) = state.external.as_ref() else {
            return false;
        };

        match tokio::time::timeout(self.config.search_timeout, external.health()).await {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                warn!(backend = external.name(), error = %err, "index health probe failed");
                false
            }
            Err(_) => {
                warn!(backend = external.name(), "index health probe timed out");
                false
            }
        }
    }

    /// Rebuild projector, catalog and backend choice, then swap them in.
    ///
    /// On error the current state stays in place.
    pub async fn reload(&self) -> Result<EngineStatus, InferenceError> {
        let next = Arc::new(build_state(&self.config, self.injected.clone()).await?);
        {
            let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
            *guard = next;
        }
        let status = self.status();
        info!(
            backend = ?status.backend,
            catalog_entries = status.catalog_entries,
            "engine reloaded"
        );
        Ok(status)
    }

    pub fn status(&self) -> EngineStatus {
        let state = self.snapshot();
        let backend_name = match state.active_external() {
            Some(external) => external.name(),
            None => state.memory.name(),
        };
        EngineStatus {
            backend: state.kind,
            backend_name,
            embedding_mode: state.projector.mode(),
            embedding_dim: state.catalog.dim(),
            catalog_entries: state.catalog.len(),
            index_url: self.config.index.as_ref().map(|i| i.url.clone()),
        }
    }
}

async fn build_state(
    config: &EngineConfig,
    injected: Option<Arc<dyn SearchBackend>>,
) -> Result<EngineState, InferenceError> {
    let projector =
        Projector::from_mode(config.embedding_mode, config.projection_path.as_deref())?;
    let catalog = Arc::new(ChordCatalog::load(&config.catalog, &projector)?);
    let memory = InMemoryBackend::new(catalog.clone());

    let (external, kind) = match injected {
        Some(backend) => (Some(backend), BackendKind::External),
        None => connect_external(config, projector.output_dim()).await,
    };

    metrics::gauge!("fretmatch_catalog_entries").set(catalog.len() as f64);
    info!(
        backend = ?kind,
        embedding_mode = %projector.mode(),
        catalog_entries = catalog.len(),
        "search backend selected"
    );

    Ok(EngineState {
        projector,
        catalog,
        memory,
        external,
        kind,
    })
}

#[cfg(feature = "qdrant")]
async fn connect_external(
    config: &EngineConfig,
    dim: usize,
) -> (Option<Arc<dyn SearchBackend>>, BackendKind) {
    use crate::index::{QdrantBackend, QdrantConfig};

    let Some(index) = config.index.as_ref() else {
        return (None, BackendKind::InMemory);
    };

    let qdrant_config = QdrantConfig {
        url: index.url.clone(),
        collection: index.collection.clone(),
        timeout: config.search_timeout,
        api_key: index.api_key.clone(),
    };
    let backend = match QdrantBackend::new(qdrant_config, dim) {
        Ok(backend) => backend,
        Err(err) => {
            warn!(url = %index.url, error = %err, "could not build index client; using in-memory catalog");
            return (None, BackendKind::InMemory);
        }
    };

    let kind = match backend.probe().await {
        Ok(()) => BackendKind::External,
        Err(IndexError::MissingCollection(collection)) => {
            warn!(url = %index.url, %collection, "collection not found; using in-memory catalog");
            BackendKind::InMemory
        }
        Err(err) => {
            warn!(url = %index.url, error = %err, "index unreachable; using in-memory catalog");
            BackendKind::InMemory
        }
    };
    let backend: Arc<dyn SearchBackend> = Arc::new(backend);
    (Some(backend), kind)
}

#[cfg(not(feature = "qdrant"))]
async fn connect_external(
    config: &EngineConfig,
    _dim: usize,
) -> (Option<Arc<dyn SearchBackend>>, BackendKind) {
    if let Some(index) = config.index.as_ref() {
        warn!(url = %index.url, "built without the `qdrant` feature; ignoring index url");
    }
    (None, BackendKind::InMemory)
}
