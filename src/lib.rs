//! Real-time guitar chord recognition.
//!
//! A client streams normalized hand-landmark vectors (21 landmarks x 3
//! coordinates); each one is matched against a catalog of chord reference
//! embeddings and answered with the best chord, its fingering and, when the
//! match is confident enough, the MIDI notes to play instead.
//!
//! The pipeline, leaf first:
//!
//! ```text
//! raw vector -> sanitize -> project -> search -> decide -> result
//! ```
//!
//! - [`sanitize`]: length check and non-finite replacement.
//! - [`projection`]: maps into the comparison space and L2-normalizes.
//! - [`catalog`]: chord table with deterministic reference embeddings.
//! - [`index`]: in-memory cosine scan or an external Qdrant collection.
//! - [`decision`]: confidence thresholds.
//! - [`engine`]: composes the above, owns backend selection and reload.
//!
//! [`session`] turns raw JSON messages into replies, and the `server` module
//! (feature `server`) exposes everything over WebSocket and HTTP.
//!
//! # Example
//!
//! ```rust,no_run
//! use fretmatch::{EngineConfig, InferenceEngine, InferenceRequest};
//!
//! # async fn run() -> Result<(), fretmatch::InferenceError> {
//! let engine = InferenceEngine::initialize(EngineConfig::default()).await?;
//! let request = InferenceRequest::new(0, vec![0.1; 63]);
//! let outcome = engine.process(&request).await?;
//! println!("{} ({:.2})", outcome.chord_id, outcome.confidence);
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod config;
pub mod decision;
pub mod engine;
pub mod error;
pub mod index;
pub mod projection;
pub mod protocol;
pub mod sanitize;
#[cfg(feature = "server")]
pub mod server;
pub mod session;

pub use catalog::{
    CatalogError, CatalogSource, ChordCatalog, ChordCategory, ChordDefinition, ChordEntry,
    Fingering, reference_embedding,
};
pub use config::{ConfigLoadError, FretmatchConfig};
pub use decision::{DecisionPolicy, InferenceOutcome};
pub use engine::{
    BackendKind, EngineConfig, EngineStatus, ExternalIndexConfig, InferenceEngine,
};
pub use error::InferenceError;
pub use index::{ChordMatch, InMemoryBackend, IndexError, SearchBackend, cosine_similarity};
pub use projection::{
    Embedding, EmbeddingMode, LinearProjection, Projection, ProjectionError, Projector,
    l2_normalize_in_place,
};
pub use protocol::{
    ErrorCode, ErrorPayload, HandAnchor, InferenceRequest, InferenceResult, ServerMessage,
};
pub use sanitize::{FEATURE_DIM, VALUE_BOUND, check_range, sanitize};
pub use session::handle_message;
