use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;

use super::{ChordMatch, IndexError, SearchBackend, cosine_similarity};
use crate::catalog::ChordCatalog;
use crate::projection::Embedding;

/// Brute-force cosine search over an in-process catalog.
///
/// O(N*D) per query. Ties keep catalog insertion order.
#[derive(Debug, Clone)]
pub struct InMemoryBackend {
    catalog: Arc<ChordCatalog>,
}

impl InMemoryBackend {
    pub fn new(catalog: Arc<ChordCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &Arc<ChordCatalog> {
        &self.catalog
    }

    /// Synchronous ranking used by the async [`SearchBackend`] impl.
    pub fn rank(&self, query: &Embedding, top_k: usize) -> Result<Vec<ChordMatch>, IndexError> {
        if top_k == 0 || self.catalog.is_empty() {
            return Ok(Vec::new());
        }
        if query.dim() != self.catalog.dim() {
            return Err(IndexError::DimensionMismatch {
                expected: self.catalog.dim(),
                actual: query.dim(),
            });
        }

        let mut scored: Vec<(f32, usize)> = self
            .catalog
            .iter()
            .enumerate()
            .map(|(idx, entry)| {
                (
                    cosine_similarity(query.as_slice(), entry.embedding.as_slice()),
                    idx,
                )
            })
            .collect();

        // `sort_by` is stable, so equal scores stay in insertion order.
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
        scored.truncate(top_k);

        let entries: Vec<_> = self.catalog.iter().collect();
        Ok(scored
            .into_iter()
            .map(|(score, idx)| {
                let entry = entries[idx];
                ChordMatch {
                    chord_id: entry.chord_id.clone(),
                    score,
                    fingering: entry.fingering,
                    midi_notes: entry.midi_notes.clone(),
                }
            })
            .collect())
    }
}

#[async_trait]
impl SearchBackend for InMemoryBackend {
    async fn search(
        &self,
        query: &Embedding,
        top_k: usize,
    ) -> Result<Vec<ChordMatch>, IndexError> {
        self.rank(query, top_k)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ChordCategory, ChordEntry, Fingering};
    use crate::projection::Projector;

    fn entry(id: &str, values: Vec<f32>) -> ChordEntry {
        ChordEntry {
            chord_id: id.to_string(),
            fingering: Fingering::NEUTRAL,
            midi_notes: vec![60],
            category: ChordCategory::Other,
            embedding: Embedding::normalized(values),
        }
    }

    fn small_backend() -> InMemoryBackend {
        let catalog = ChordCatalog::from_entries(
            vec![
                entry("x", vec![1.0, 0.0, 0.0]),
                entry("y", vec![0.0, 1.0, 0.0]),
                entry("xy", vec![1.0, 1.0, 0.0]),
                entry("x_again", vec![2.0, 0.0, 0.0]),
            ],
            3,
        )
        .unwrap();
        InMemoryBackend::new(Arc::new(catalog))
    }

    #[test]
    fn results_are_sorted_and_truncated() {
        let backend = small_backend();
        let query = Embedding::normalized(vec![1.0, 0.2, 0.0]);
        let hits = backend.rank(&query, 3).unwrap();
        assert_eq!(hits.len(), 3);
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn ties_keep_insertion_order() {
        let backend = small_backend();
        let query = Embedding::normalized(vec![1.0, 0.0, 0.0]);
        let hits = backend.rank(&query, 2).unwrap();
        assert_eq!(hits[0].chord_id, "x");
        assert_eq!(hits[1].chord_id, "x_again");
        assert_eq!(hits[0].score, hits[1].score);
    }

    #[test]
    fn top_k_zero_returns_nothing() {
        let backend = small_backend();
        let query = Embedding::normalized(vec![1.0, 0.0, 0.0]);
        assert!(backend.rank(&query, 0).unwrap().is_empty());
    }

    #[test]
    fn top_k_larger_than_catalog_returns_everything() {
        let backend = small_backend();
        let query = Embedding::normalized(vec![0.0, 0.0, 1.0]);
        assert_eq!(backend.rank(&query, 50).unwrap().len(), 4);
    }

    #[test]
    fn empty_catalog_yields_empty_result() {
        let catalog = ChordCatalog::from_entries(Vec::new(), 3).unwrap();
        let backend = InMemoryBackend::new(Arc::new(catalog));
        let query = Embedding::normalized(vec![1.0, 0.0, 0.0]);
        assert!(backend.rank(&query, 3).unwrap().is_empty());
    }

    #[test]
    fn dimension_mismatch_is_an_error() {
        let backend = small_backend();
        let query = Embedding::normalized(vec![1.0, 0.0]);
        assert_eq!(
            backend.rank(&query, 3).unwrap_err(),
            IndexError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        );
    }

    #[tokio::test]
    async fn reference_embedding_is_its_own_best_match() {
        let catalog = ChordCatalog::builtin(&Projector::raw()).unwrap();
        let target = catalog.lookup("A_Minor").unwrap().embedding.clone();
        let backend = InMemoryBackend::new(Arc::new(catalog));

        let hits = backend.search(&target, 3).await.unwrap();
        assert_eq!(hits[0].chord_id, "A_Minor");
        assert!(hits[0].score > 0.99);
        assert_eq!(backend.name(), "memory");
    }
}
