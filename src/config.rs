//! Service configuration.
//!
//! Values come from an optional file (`fretmatch.toml`/`.yaml`/`.json` in the
//! working directory, or an explicit path) and are overridden by environment
//! variables prefixed with `FRETMATCH`, using `__` between path segments:
//!
//! ```text
//! FRETMATCH__SERVER__PORT=9000
//! FRETMATCH__INFERENCE__SCORE_THRESHOLD=0.9
//! FRETMATCH__INDEX__URL=http://localhost:6334
//! FRETMATCH__SERVER__CORS_ORIGINS=http://a.test,http://b.test
//! ```
//!
//! Every field has a default, so an empty environment yields a working
//! in-memory service.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::CatalogSource;
use crate::decision::{DEFAULT_LOW_CONFIDENCE_THRESHOLD, DEFAULT_SCORE_THRESHOLD, DecisionPolicy};
use crate::engine::{DEFAULT_TOP_K, EngineConfig, ExternalIndexConfig};
use crate::projection::EmbeddingMode;

const ENV_PREFIX: &str = "FRETMATCH";
const DEFAULT_FILE_STEM: &str = "fretmatch";
/// Floor for `server.max_message_bytes`; a 63-float request is under 2 KiB.
const MIN_MESSAGE_BYTES: usize = 4096;

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to load configuration: {0}")]
    Source(#[from] config::ConfigError),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FretmatchConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub index: IndexConfig,
}

/// HTTP/WebSocket listener settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Timeout for plain HTTP requests; WebSocket sessions are exempt.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_true")]
    pub enable_cors: bool,

    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// JSON log lines instead of the human-readable format.
    #[serde(default = "default_true")]
    pub json_logs: bool,

    #[serde(default = "default_true")]
    pub metrics_enabled: bool,

    /// Largest WebSocket frame accepted from a client. Larger frames close
    /// the connection, so this stays far above any valid request.
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,

    /// Exposes `POST /admin/reload`.
    #[serde(default)]
    pub enable_admin: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
            timeout_secs: default_timeout_secs(),
            enable_cors: default_true(),
            cors_origins: default_cors_origins(),
            log_level: default_log_level(),
            json_logs: default_true(),
            metrics_enabled: default_true(),
            max_message_bytes: default_max_message_bytes(),
            enable_admin: false,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigLoadError> {
        format!("{}:{}", self.bind_addr, self.port)
            .parse()
            .map_err(|e| ConfigLoadError::Validation(format!("invalid bind address: {e}")))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Pipeline settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceConfig {
    #[serde(default)]
    pub embedding_mode: EmbeddingMode,

    /// JSON weights for the learned projection.
    #[serde(default)]
    pub projection_path: Option<PathBuf>,

    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,

    #[serde(default = "default_low_confidence_threshold")]
    pub low_confidence_threshold: f32,

    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// JSON chord table; the built-in table is used when unset.
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            embedding_mode: EmbeddingMode::default(),
            projection_path: None,
            score_threshold: default_score_threshold(),
            low_confidence_threshold: default_low_confidence_threshold(),
            top_k: default_top_k(),
            catalog_path: None,
        }
    }
}

/// External vector index settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Base URL; search stays in memory when unset.
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_collection")]
    pub collection: String,

    #[serde(default = "default_index_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            url: None,
            collection: default_collection(),
            timeout_ms: default_index_timeout_ms(),
            api_key: None,
        }
    }
}

impl IndexConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl FretmatchConfig {
    /// Load from `path` (required when given) or the optional default file,
    /// then apply `FRETMATCH__*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigLoadError> {
        Self::load_with_env(path, environment())
    }

    fn load_with_env(path: Option<&Path>, env: Environment) -> Result<Self, ConfigLoadError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_FILE_STEM).required(false),
        };
        let config: FretmatchConfig = Config::builder()
            .add_source(file)
            .add_source(env)
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration text, without environment overrides.
    pub fn parse(content: &str, format: FileFormat) -> Result<Self, ConfigLoadError> {
        let config: FretmatchConfig = Config::builder()
            .add_source(File::from_str(content, format))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        let inference = &self.inference;
        for (name, value) in [
            ("score_threshold", inference.score_threshold),
            ("low_confidence_threshold", inference.low_confidence_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigLoadError::Validation(format!(
                    "inference.{name} must be in [0, 1], got {value}"
                )));
            }
        }
        if inference.low_confidence_threshold > inference.score_threshold {
            return Err(ConfigLoadError::Validation(
                "inference.low_confidence_threshold must not exceed score_threshold".into(),
            ));
        }
        if inference.top_k == 0 {
            return Err(ConfigLoadError::Validation(
                "inference.top_k must be at least 1".into(),
            ));
        }
        if inference.embedding_mode == EmbeddingMode::Learned && inference.projection_path.is_none()
        {
            return Err(ConfigLoadError::Validation(
                "inference.projection_path is required for learned embedding mode".into(),
            ));
        }

        if self.index.timeout_ms == 0 {
            return Err(ConfigLoadError::Validation(
                "index.timeout_ms must be positive".into(),
            ));
        }
        if let Some(url) = self.index.url.as_deref()
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            return Err(ConfigLoadError::Validation(format!(
                "index.url must be an http(s) URL, got '{url}'"
            )));
        }
        if self.index.collection.trim().is_empty() {
            return Err(ConfigLoadError::Validation(
                "index.collection must not be empty".into(),
            ));
        }

        if self.server.max_message_bytes < MIN_MESSAGE_BYTES {
            return Err(ConfigLoadError::Validation(format!(
                "server.max_message_bytes must be at least {MIN_MESSAGE_BYTES}, got {}",
                self.server.max_message_bytes
            )));
        }
        self.server.socket_addr()?;
        Ok(())
    }

    /// Engine settings derived from this configuration.
    pub fn engine_config(&self) -> EngineConfig {
        let inference = &self.inference;
        EngineConfig {
            embedding_mode: inference.embedding_mode,
            projection_path: inference.projection_path.clone(),
            catalog: CatalogSource::from_path(inference.catalog_path.as_deref()),
            policy: DecisionPolicy::new(
                inference.score_threshold,
                inference.low_confidence_threshold,
            ),
            top_k: inference.top_k,
            search_timeout: self.index.timeout(),
            index: self.index.url.as_ref().map(|url| ExternalIndexConfig {
                url: url.clone(),
                collection: self.index.collection.clone(),
                api_key: self.index.api_key.clone(),
            }),
        }
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("server.cors_origins")
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://127.0.0.1:3000".to_string(),
    ]
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_message_bytes() -> usize {
    64 * 1024
}

fn default_score_threshold() -> f32 {
    DEFAULT_SCORE_THRESHOLD
}

fn default_low_confidence_threshold() -> f32 {
    DEFAULT_LOW_CONFIDENCE_THRESHOLD
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_collection() -> String {
    "chords_v1".to_string()
}

fn default_index_timeout_ms() -> u64 {
    500
}
