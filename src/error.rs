use thiserror::Error;

use crate::catalog::CatalogError;
use crate::index::IndexError;
use crate::projection::ProjectionError;
use crate::protocol::ErrorCode;

/// Errors surfaced by the inference pipeline.
///
/// The first three variants are caused by the client and are reported per
/// message; the session stays open. `BackendUnavailable` is normally absorbed by
/// the in-memory fallback and only escapes when no fallback exists.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum InferenceError {
    #[error("invalid vector length: expected {expected} floats, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("vector element {index} out of range [-{bound}, {bound}]: {value}")]
    OutOfRangeValue { index: usize, value: f32, bound: f32 },

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("search backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("internal failure: {0}")]
    Internal(String),
}

impl InferenceError {
    /// Wire code reported to the client for this error.
    pub fn code(&self) -> ErrorCode {
        if self.is_client_error() {
            ErrorCode::BadRequest
        } else {
            ErrorCode::Dependency
        }
    }

    /// True when the request itself was at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            InferenceError::InvalidDimension { .. }
                | InferenceError::OutOfRangeValue { .. }
                | InferenceError::MalformedPayload(_)
        )
    }

    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        InferenceError::Internal(err.to_string())
    }
}

impl From<IndexError> for InferenceError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::Unavailable(msg) | IndexError::MissingCollection(msg) => {
                InferenceError::BackendUnavailable(msg)
            }
            IndexError::Timeout(after) => {
                InferenceError::BackendUnavailable(format!("timed out after {after:?}"))
            }
            other => InferenceError::Internal(other.to_string()),
        }
    }
}

impl From<ProjectionError> for InferenceError {
    fn from(err: ProjectionError) -> Self {
        InferenceError::Internal(err.to_string())
    }
}

impl From<CatalogError> for InferenceError {
    fn from(err: CatalogError) -> Self {
        InferenceError::Internal(err.to_string())
    }
}
