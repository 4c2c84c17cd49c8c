//! Similarity search over chord embeddings.
//!
//! [`SearchBackend`] is the capability the engine depends on. Two
//! implementations ship with the crate:
//!
//! - [`InMemoryBackend`]: exhaustive cosine scan over a [`ChordCatalog`].
//! - `QdrantBackend` (feature `qdrant`): delegates to an external Qdrant
//!   collection through `qdrant-client`.
//!
//! [`ChordCatalog`]: crate::catalog::ChordCatalog

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::Fingering;
use crate::projection::Embedding;

pub mod memory;
#[cfg(feature = "qdrant")]
pub mod qdrant;

pub use memory::InMemoryBackend;
#[cfg(feature = "qdrant")]
pub use qdrant::{QdrantBackend, QdrantConfig};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum IndexError {
    #[error("index unavailable: {0}")]
    Unavailable(String),
    #[error("collection missing: {0}")]
    MissingCollection(String),
    #[error("index call timed out after {0:?}")]
    Timeout(Duration),
    #[error("query has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("failed to decode index response: {0}")]
    Decode(String),
    #[error("backend error: {0}")]
    Backend(String),
}

impl IndexError {
    pub fn backend<E: std::fmt::Display>(err: E) -> Self {
        Self::Backend(err.to_string())
    }

    /// Short label used for the fallback metric.
    pub fn reason(&self) -> &'static str {
        match self {
            IndexError::Unavailable(_) => "unavailable",
            IndexError::MissingCollection(_) => "missing_collection",
            IndexError::Timeout(_) => "timeout",
            IndexError::DimensionMismatch { .. } => "dimension_mismatch",
            IndexError::Decode(_) => "decode",
            IndexError::Backend(_) => "backend",
        }
    }
}

/// One ranked search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChordMatch {
    pub chord_id: String,
    /// Cosine similarity in `[-1, 1]`.
    pub score: f32,
    pub fingering: Fingering,
    pub midi_notes: Vec<u8>,
}

/// Nearest-neighbour search over chord reference embeddings.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Return at most `top_k` matches ordered by score, highest first.
    /// An empty result is valid and means the catalog is empty.
    async fn search(&self, query: &Embedding, top_k: usize)
    -> Result<Vec<ChordMatch>, IndexError>;

    /// Backend label for logs and status reports.
    fn name(&self) -> &'static str;

    /// Lightweight reachability probe.
    async fn health(&self) -> Result<(), IndexError> {
        Ok(())
    }
}

/// Cosine similarity of two vectors.
///
/// Returns `0.0` when the lengths differ, either side is empty or either side
/// has zero norm. The result is clamped to `[-1, 1]`.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_similarity_is_one() {
        let a = [0.3, -1.2, 4.0, 0.0, 2.5];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_vectors_score_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn opposite_vectors_score_minus_one() {
        assert!((cosine_similarity(&[1.0, 2.0], &[-1.0, -2.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn symmetric() {
        let a = [0.1, 0.7, -0.2];
        let b = [0.9, -0.4, 0.3];
        assert_eq!(cosine_similarity(&a, &b), cosine_similarity(&b, &a));
    }

    #[test]
    fn zero_norm_and_mismatched_lengths_score_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn scale_invariant() {
        let a = [1.0, 2.0, 3.0];
        let b = [10.0, 20.0, 30.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
    }
}
