//! Embedding projection.
//!
//! A sanitized feature vector is mapped into the comparison space by a
//! [`Projector`] and always leaves as an L2-normalized [`Embedding`]. The
//! `raw` mode is the identity; the `learned` mode plugs in any deterministic
//! [`Projection`], with [`LinearProjection`] as the built-in implementation.

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sanitize::FEATURE_DIM;

/// Errors raised while building or applying a projection.
#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("learned embedding mode requires `projection_path`")]
    MissingPath,
    #[error("failed to read projection weights: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse projection weights: {0}")]
    Parse(String),
    #[error("invalid projection shape: {0}")]
    InvalidShape(String),
    #[error("projection expects {expected} inputs, got {actual}")]
    InputDimension { expected: usize, actual: usize },
}

/// In-place L2 normalization. The zero vector is left untouched.
///
/// Accumulates in f64 so the result sits within f32 rounding of unit length.
pub fn l2_normalize_in_place(v: &mut [f32]) {
    let norm_sq: f64 = v.iter().map(|&x| f64::from(x) * f64::from(x)).sum();
    if norm_sq > 0.0 {
        let norm = norm_sq.sqrt();
        for x in v.iter_mut() {
            *x = (f64::from(*x) / norm) as f32;
        }
    }
}

/// Euclidean norm of `v`, accumulated in f64.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter()
        .map(|&x| f64::from(x) * f64::from(x))
        .sum::<f64>()
        .sqrt() as f32
}

/// A vector in the comparison space.
///
/// Only constructible through [`Embedding::normalized`], so its norm is 1
/// unless every component is zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    pub fn normalized(mut values: Vec<f32>) -> Self {
        l2_normalize_in_place(&mut values);
        Self(values)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }

    pub fn norm(&self) -> f32 {
        l2_norm(&self.0)
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&x| x == 0.0)
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.0
    }
}

impl AsRef<[f32]> for Embedding {
    fn as_ref(&self) -> &[f32] {
        &self.0
    }
}

/// Selects how feature vectors are embedded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingMode {
    /// Identity: the sanitized 63-D vector itself.
    #[default]
    Raw,
    /// A fixed learned transformation loaded at startup.
    #[serde(alias = "mlp")]
    Learned,
}

impl fmt::Display for EmbeddingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmbeddingMode::Raw => f.write_str("raw"),
            EmbeddingMode::Learned => f.write_str("learned"),
        }
    }
}

/// A deterministic, side-effect-free transformation into embedding space.
pub trait Projection: Send + Sync + fmt::Debug {
    fn input_dim(&self) -> usize;
    fn output_dim(&self) -> usize;
    /// Callers guarantee `input.len() == self.input_dim()`.
    fn apply(&self, input: &[f32]) -> Vec<f32>;
}

/// Affine projection `y = W x + b`.
#[derive(Debug, Clone)]
pub struct LinearProjection {
    weights: Array2<f32>,
    bias: Array1<f32>,
}

#[derive(Deserialize)]
struct LinearProjectionFile {
    weights: Vec<Vec<f32>>,
    #[serde(default)]
    bias: Option<Vec<f32>>,
}

impl LinearProjection {
    /// `weights` is `output_dim x input_dim`; a missing bias is all zeros.
    pub fn new(weights: Array2<f32>, bias: Option<Array1<f32>>) -> Result<Self, ProjectionError> {
        let (rows, cols) = weights.dim();
        if rows == 0 || cols == 0 {
            return Err(ProjectionError::InvalidShape(format!(
                "weights must be non-empty, got {rows}x{cols}"
            )));
        }
        if weights.iter().any(|w| !w.is_finite()) {
            return Err(ProjectionError::InvalidShape(
                "weights contain non-finite values".into(),
            ));
        }
        let bias = bias.unwrap_or_else(|| Array1::zeros(rows));
        if bias.len() != rows {
            return Err(ProjectionError::InvalidShape(format!(
                "bias has {} entries for {rows} output rows",
                bias.len()
            )));
        }
        if bias.iter().any(|b| !b.is_finite()) {
            return Err(ProjectionError::InvalidShape(
                "bias contains non-finite values".into(),
            ));
        }
        Ok(Self { weights, bias })
    }

    /// Load `{"weights": [[..], ..], "bias": [..]}` from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ProjectionError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self, ProjectionError> {
        let file: LinearProjectionFile =
            serde_json::from_str(json).map_err(|e| ProjectionError::Parse(e.to_string()))?;

        let rows = file.weights.len();
        let cols = file.weights.first().map_or(0, Vec::len);
        if file.weights.iter().any(|row| row.len() != cols) {
            return Err(ProjectionError::InvalidShape(
                "weight rows have different lengths".into(),
            ));
        }
        let flat: Vec<f32> = file.weights.into_iter().flatten().collect();
        let weights = Array2::from_shape_vec((rows, cols), flat)
            .map_err(|e| ProjectionError::InvalidShape(e.to_string()))?;
        Self::new(weights, file.bias.map(Array1::from))
    }
}

impl Projection for LinearProjection {
    fn input_dim(&self) -> usize {
        self.weights.ncols()
    }

    fn output_dim(&self) -> usize {
        self.weights.nrows()
    }

    fn apply(&self, input: &[f32]) -> Vec<f32> {
        let x = ArrayView1::from(input);
        (self.weights.dot(&x) + &self.bias).to_vec()
    }
}

/// Maps sanitized vectors into the comparison space.
#[derive(Debug, Clone, Default)]
pub enum Projector {
    #[default]
    Raw,
    Learned(Arc<dyn Projection>),
}

impl Projector {
    pub fn raw() -> Self {
        Projector::Raw
    }

    pub fn learned(projection: Arc<dyn Projection>) -> Self {
        Projector::Learned(projection)
    }

    /// Build the projector for `mode`, loading learned weights from `path`.
    pub fn from_mode(mode: EmbeddingMode, path: Option<&Path>) -> Result<Self, ProjectionError> {
        match mode {
            EmbeddingMode::Raw => Ok(Projector::Raw),
            EmbeddingMode::Learned => {
                let path = path.ok_or(ProjectionError::MissingPath)?;
                let projection = LinearProjection::from_json_file(path)?;
                Ok(Projector::Learned(Arc::new(projection)))
            }
        }
    }

    pub fn mode(&self) -> EmbeddingMode {
        match self {
            Projector::Raw => EmbeddingMode::Raw,
            Projector::Learned(_) => EmbeddingMode::Learned,
        }
    }

    /// Dimensionality of the embeddings this projector produces.
    pub fn output_dim(&self) -> usize {
        match self {
            Projector::Raw => FEATURE_DIM,
            Projector::Learned(p) => p.output_dim(),
        }
    }

    pub fn project(&self, vector: &[f32]) -> Result<Embedding, ProjectionError> {
        match self {
            Projector::Raw => Ok(Embedding::normalized(vector.to_vec())),
            Projector::Learned(p) => {
                if vector.len() != p.input_dim() {
                    return Err(ProjectionError::InputDimension {
                        expected: p.input_dim(),
                        actual: vector.len(),
                    });
                }
                Ok(Embedding::normalized(p.apply(vector)))
            }
        }
    }
}
