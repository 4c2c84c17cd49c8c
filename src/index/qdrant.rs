//! Qdrant-backed search through `qdrant-client`.
//!
//! Collection probing and point search serve queries; collection creation
//! and point upsert serve seeding. Every call is bounded by the configured
//! timeout.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{
    CreateCollectionBuilder, Distance, PointStruct, Query, QueryPointsBuilder, ScoredPoint,
    UpsertPointsBuilder, Value, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant, QdrantError};
use serde_json::json;
use tracing::{debug, info, warn};

use super::{ChordMatch, IndexError, SearchBackend};
use crate::catalog::{ChordCatalog, Fingering};
use crate::projection::Embedding;

pub const DEFAULT_COLLECTION: &str = "chords_v1";

/// Connection settings for a Qdrant instance.
#[derive(Debug, Clone)]
pub struct QdrantConfig {
    /// gRPC URL, e.g. `http://localhost:6334`.
    pub url: String,
    pub collection: String,
    /// Applied to every call.
    pub timeout: Duration,
    pub api_key: Option<String>,
}

impl QdrantConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            collection: DEFAULT_COLLECTION.to_string(),
            timeout: Duration::from_millis(500),
            api_key: None,
        }
    }
}

/// External vector index holding one point per chord.
pub struct QdrantBackend {
    client: Qdrant,
    config: QdrantConfig,
    dim: usize,
}

impl std::fmt::Debug for QdrantBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QdrantBackend")
            .field("url", &self.config.url)
            .field("collection", &self.config.collection)
            .field("dim", &self.dim)
            .finish()
    }
}

impl QdrantBackend {
    /// Build a client without touching the network.
    pub fn new(config: QdrantConfig, dim: usize) -> Result<Self, IndexError> {
        let mut builder = Qdrant::from_url(&config.url)
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .skip_compatibility_check();
        if let Some(key) = config.api_key.clone() {
            builder = builder.api_key(key);
        }
        let client = builder.build().map_err(IndexError::backend)?;
        Ok(Self {
            client,
            config,
            dim,
        })
    }

    /// Build a client and verify that the collection exists.
    pub async fn connect(config: QdrantConfig, dim: usize) -> Result<Self, IndexError> {
        let backend = Self::new(config, dim)?;
        backend.probe().await?;
        info!(
            url = %backend.config.url,
            collection = %backend.config.collection,
            "connected to qdrant"
        );
        Ok(backend)
    }

    pub fn config(&self) -> &QdrantConfig {
        &self.config
    }

    /// Await `call` within the configured timeout.
    async fn bounded<T>(
        &self,
        op: &'static str,
        call: impl Future<Output = Result<T, QdrantError>>,
    ) -> Result<T, IndexError> {
        match tokio::time::timeout(self.config.timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(IndexError::Unavailable(format!(
                "{} {op}: {err}",
                self.config.url
            ))),
            Err(_) => Err(IndexError::Timeout(self.config.timeout)),
        }
    }

    /// Names of all collections on the server.
    pub async fn list_collections(&self) -> Result<Vec<String>, IndexError> {
        let response = self
            .bounded("list_collections", self.client.list_collections())
            .await?;
        Ok(response.collections.into_iter().map(|c| c.name).collect())
    }

    async fn collection_exists(&self) -> Result<bool, IndexError> {
        self.bounded(
            "collection_exists",
            self.client.collection_exists(self.config.collection.as_str()),
        )
        .await
    }

    /// Check that the server answers and our collection is present.
    pub async fn probe(&self) -> Result<(), IndexError> {
        if self.collection_exists().await? {
            Ok(())
        } else {
            Err(IndexError::MissingCollection(self.config.collection.clone()))
        }
    }

    /// Create the collection with cosine distance if it does not exist.
    /// Returns `true` when a collection was created.
    pub async fn ensure_collection(&self) -> Result<bool, IndexError> {
        if self.collection_exists().await? {
            debug!(collection = %self.config.collection, "collection already exists");
            return Ok(false);
        }

        let request = CreateCollectionBuilder::new(self.config.collection.as_str())
            .vectors_config(VectorParamsBuilder::new(self.dim as u64, Distance::Cosine));
        self.bounded("create_collection", self.client.create_collection(request))
            .await?;
        info!(collection = %self.config.collection, dim = self.dim, "created collection");
        Ok(true)
    }

    pub async fn delete_collection(&self) -> Result<(), IndexError> {
        if !self.collection_exists().await? {
            return Ok(());
        }
        self.bounded(
            "delete_collection",
            self.client.delete_collection(self.config.collection.as_str()),
        )
        .await?;
        Ok(())
    }

    /// Upsert every catalog entry as a point with ids `1..=N`.
    pub async fn upsert_catalog(&self, catalog: &ChordCatalog) -> Result<usize, IndexError> {
        if catalog.dim() != self.dim {
            return Err(IndexError::DimensionMismatch {
                expected: self.dim,
                actual: catalog.dim(),
            });
        }

        let mut points = Vec::with_capacity(catalog.len());
        for (idx, entry) in catalog.iter().enumerate() {
            let payload = Payload::try_from(json!({
                "chord_id": entry.chord_id,
                "fingering": entry.fingering,
                "midi_notes": entry.midi_notes,
                "category": entry.category,
            }))
            .map_err(IndexError::backend)?;
            let id = idx as u64 + 1;
            points.push(PointStruct::new(id, entry.embedding.as_slice().to_vec(), payload));
        }
        let count = points.len();

        let request = UpsertPointsBuilder::new(self.config.collection.as_str(), points).wait(true);
        self.bounded("upsert_points", self.client.upsert_points(request))
            .await?;
        info!(collection = %self.config.collection, count, "upserted chord points");
        Ok(count)
    }
}

fn integer(value: &Value) -> Option<i64> {
    match value.kind.as_ref()? {
        Kind::IntegerValue(n) => Some(*n),
        Kind::DoubleValue(x) if x.fract() == 0.0 => Some(*x as i64),
        _ => None,
    }
}

fn integer_list(value: &Value) -> Option<Vec<i64>> {
    match value.kind.as_ref()? {
        Kind::ListValue(list) => list.values.iter().map(integer).collect(),
        _ => None,
    }
}

fn string(value: &Value) -> Option<&str> {
    match value.kind.as_ref()? {
        Kind::StringValue(s) => Some(s.as_str()),
        _ => None,
    }
}

/// Turn a point payload into a match. `chord_id` falls back to `name`.
fn match_from_payload(score: f32, payload: &HashMap<String, Value>) -> Result<ChordMatch, String> {
    let chord_id = payload
        .get("chord_id")
        .or_else(|| payload.get("name"))
        .and_then(string)
        .ok_or("payload has no chord_id")?
        .to_string();

    let frets = payload
        .get("fingering")
        .ok_or("payload has no fingering")?;
    let fingering = integer_list(frets)
        .ok_or("fingering is not a list of integers")
        .and_then(|v| Fingering::try_from(v).map_err(|_| "invalid fingering"))?;

    let midi_notes = match payload.get("midi_notes") {
        Some(v) => integer_list(v)
            .ok_or("midi_notes is not a list of integers")?
            .into_iter()
            .map(|n| u8::try_from(n).map_err(|_| "midi note out of range"))
            .collect::<Result<Vec<u8>, _>>()?,
        None => Vec::new(),
    };

    Ok(ChordMatch {
        chord_id,
        score: score.clamp(-1.0, 1.0),
        fingering,
        midi_notes,
    })
}

/// Convert scored points into matches, best first.
///
/// Unusable points are logged and dropped. Hits that are all unusable are a
/// decode error rather than an empty result, since an empty result means the
/// catalog itself is empty.
pub fn matches_from_points(points: Vec<ScoredPoint>) -> Result<Vec<ChordMatch>, IndexError> {
    let received = points.len();
    let mut matches: Vec<ChordMatch> = points
        .into_iter()
        .filter_map(|point| match match_from_payload(point.score, &point.payload) {
            Ok(m) => Some(m),
            Err(reason) => {
                warn!(reason = %reason, "dropping qdrant point with unusable payload");
                None
            }
        })
        .collect();

    if received > 0 && matches.is_empty() {
        return Err(IndexError::Decode(format!(
            "all {received} points had unusable payloads"
        )));
    }

    matches.sort_by(|a, b| b.score.total_cmp(&a.score));
    Ok(matches)
}

#[async_trait]
impl SearchBackend for QdrantBackend {
    async fn search(
        &self,
        query: &Embedding,
        top_k: usize,
    ) -> Result<Vec<ChordMatch>, IndexError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        if query.dim() != self.dim {
            return Err(IndexError::DimensionMismatch {
                expected: self.dim,
                actual: query.dim(),
            });
        }

        let request = QueryPointsBuilder::new(self.config.collection.as_str())
            .query(Query::new_nearest(query.as_slice().to_vec()))
            .limit(top_k as u64)
            .with_payload(true);
        let response = self.bounded("query", self.client.query(request)).await?;

        let mut matches = matches_from_points(response.result)?;
        matches.truncate(top_k);
        Ok(matches)
    }

    fn name(&self) -> &'static str {
        "qdrant"
    }

    async fn health(&self) -> Result<(), IndexError> {
        self.list_collections().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qdrant_client::qdrant::ListValue;

    fn text(s: &str) -> Value {
        Value {
            kind: Some(Kind::StringValue(s.to_string())),
        }
    }

    fn ints(values: &[i64]) -> Value {
        Value {
            kind: Some(Kind::ListValue(ListValue {
                values: values
                    .iter()
                    .map(|&n| Value {
                        kind: Some(Kind::IntegerValue(n)),
                    })
                    .collect(),
            })),
        }
    }

    fn point(score: f32, fields: Vec<(&str, Value)>) -> ScoredPoint {
        ScoredPoint {
            score,
            payload: fields
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn converts_points_best_first() {
        let points = vec![
            point(
                0.71,
                vec![
                    ("chord_id", text("A_Minor")),
                    ("fingering", ints(&[0, 0, 2, 2, 1, 0])),
                    ("midi_notes", ints(&[45, 52])),
                ],
            ),
            point(
                0.93,
                vec![("name", text("C")), ("fingering", ints(&[-1, 3, 2, 0, 1, 0]))],
            ),
        ];
        let matches = matches_from_points(points).unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].chord_id, "C");
        assert!(matches[0].midi_notes.is_empty());
        assert_eq!(matches[1].chord_id, "A_Minor");
        assert_eq!(matches[1].midi_notes, vec![45, 52]);
    }

    #[test]
    fn drops_points_with_invalid_fingering() {
        let points = vec![
            point(
                0.9,
                vec![("chord_id", text("Bad")), ("fingering", ints(&[0, 99, 0, 0, 0, 0]))],
            ),
            point(0.8, vec![]),
            point(
                0.7,
                vec![("chord_id", text("Ok")), ("fingering", ints(&[0, 0, 0, 0, 0, 0]))],
            ),
        ];
        let matches = matches_from_points(points).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].chord_id, "Ok");
    }

    #[test]
    fn all_unusable_points_are_a_decode_error() {
        let points = vec![
            point(
                0.99,
                vec![("chord_id", text("Bad")), ("fingering", ints(&[0, 99, 0, 0, 0, 0]))],
            ),
            point(0.9, vec![("chord_id", text("NoFrets"))]),
        ];
        let err = matches_from_points(points).unwrap_err();
        assert!(matches!(err, IndexError::Decode(_)));
        assert_eq!(err.reason(), "decode");
    }

    #[test]
    fn no_points_is_an_empty_result() {
        assert!(matches_from_points(Vec::new()).unwrap().is_empty());
    }

    #[test]
    fn out_of_range_midi_note_is_unusable() {
        let points = vec![point(
            0.9,
            vec![
                ("chord_id", text("Loud")),
                ("fingering", ints(&[0, 0, 0, 0, 0, 0])),
                ("midi_notes", ints(&[300])),
            ],
        )];
        assert!(matches_from_points(points).is_err());
    }

    #[tokio::test]
    async fn unreachable_server_is_reported_unavailable() {
        let mut config = QdrantConfig::new("http://127.0.0.1:9");
        config.timeout = Duration::from_millis(200);
        let err = QdrantBackend::connect(config, 63).await.unwrap_err();
        assert!(matches!(
            err,
            IndexError::Unavailable(_) | IndexError::Timeout(_)
        ));
    }

    #[tokio::test]
    async fn query_dimension_is_checked_before_any_request() {
        let backend = QdrantBackend::new(QdrantConfig::new("http://127.0.0.1:9"), 63).unwrap();
        let query = Embedding::normalized(vec![1.0, 0.0]);
        assert_eq!(
            backend.search(&query, 3).await.unwrap_err(),
            IndexError::DimensionMismatch {
                expected: 63,
                actual: 2
            }
        );
    }
}
