//! WebSocket message types.
//!
//! One JSON object per message in each direction. Requests carry a flattened
//! 63-float hand-landmark vector; responses are either an
//! `inference_result` or an `inference_error` discriminated by `type`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::catalog::Fingering;
use crate::decision::InferenceOutcome;
use crate::error::InferenceError;
use crate::sanitize::{FEATURE_DIM, VALUE_BOUND, check_range};

/// Point the client normalized the landmarks against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandAnchor {
    #[default]
    LeftWrist,
    RightWrist,
    BodyCenter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceMode {
    ChordCorrection,
}

/// Request discriminator; only one value is accepted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    #[default]
    InferenceRequest,
}

/// Client request. Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    #[serde(rename = "type", default)]
    pub kind: RequestKind,
    /// Client clock, milliseconds since the epoch.
    pub timestamp: i64,
    #[serde(default)]
    pub hand_anchor: HandAnchor,
    pub left_hand_vector: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<InferenceMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
}

impl InferenceRequest {
    pub fn new(timestamp: i64, left_hand_vector: Vec<f32>) -> Self {
        Self {
            kind: RequestKind::InferenceRequest,
            timestamp,
            hand_anchor: HandAnchor::default(),
            left_hand_vector,
            mode: None,
            meta: None,
        }
    }

    /// Boundary checks: exact length and every value within `[-10, 10]`.
    pub fn validate(&self) -> Result<(), InferenceError> {
        if self.left_hand_vector.len() != FEATURE_DIM {
            return Err(InferenceError::InvalidDimension {
                expected: FEATURE_DIM,
                actual: self.left_hand_vector.len(),
            });
        }
        check_range(&self.left_hand_vector, VALUE_BOUND)
    }
}

/// Wire error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Webcam permission denied (client side).
    #[serde(rename = "ERR_CAM_001")]
    CameraDenied,
    /// WebSocket unreachable (client side).
    #[serde(rename = "ERR_WS_002")]
    SocketUnreachable,
    /// Low confidence (client side).
    #[serde(rename = "ERR_AI_003")]
    LowConfidence,
    #[serde(rename = "ERR_AI_400")]
    BadRequest,
    #[serde(rename = "ERR_DEP_500")]
    Dependency,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::CameraDenied => "ERR_CAM_001",
            ErrorCode::SocketUnreachable => "ERR_WS_002",
            ErrorCode::LowConfidence => "ERR_AI_003",
            ErrorCode::BadRequest => "ERR_AI_400",
            ErrorCode::Dependency => "ERR_DEP_500",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    /// Server clock, milliseconds since the epoch.
    pub timestamp: i64,
    pub chord_id: String,
    pub confidence: f32,
    pub fingering_map: Fingering,
    pub correction_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_notes: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl InferenceResult {
    pub fn from_outcome(outcome: InferenceOutcome, timestamp: i64) -> Self {
        Self {
            timestamp,
            chord_id: outcome.chord_id,
            confidence: outcome.confidence,
            fingering_map: outcome.fingering,
            correction_active: outcome.correction_active,
            override_notes: outcome.override_notes,
            message: outcome.message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
}

/// Everything the server sends back over the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    InferenceResult(InferenceResult),
    InferenceError(ErrorPayload),
}

impl ServerMessage {
    pub fn result(outcome: InferenceOutcome) -> Self {
        ServerMessage::InferenceResult(InferenceResult::from_outcome(outcome, now_millis()))
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::InferenceError(ErrorPayload {
            code,
            message: message.into(),
        })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ServerMessage::InferenceError(_))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Current wall clock in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_request_json() -> Value {
        json!({
            "type": "inference_request",
            "timestamp": 1_700_000_000_000i64,
            "hand_anchor": "left_wrist",
            "left_hand_vector": vec![0.0; 63],
            "mode": "chord_correction",
            "meta": {"frame_id": 1234, "fps": 60}
        })
    }

    #[test]
    fn parses_full_request() {
        let req: InferenceRequest = serde_json::from_value(valid_request_json()).unwrap();
        assert_eq!(req.left_hand_vector.len(), 63);
        assert_eq!(req.mode, Some(InferenceMode::ChordCorrection));
        assert_eq!(req.meta.as_ref().unwrap()["fps"], 60);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn optional_fields_default() {
        let req: InferenceRequest = serde_json::from_value(json!({
            "timestamp": 1,
            "left_hand_vector": vec![1; 63]
        }))
        .unwrap();
        assert_eq!(req.kind, RequestKind::InferenceRequest);
        assert_eq!(req.hand_anchor, HandAnchor::LeftWrist);
        assert!(req.mode.is_none());
    }

    #[test]
    fn rejects_wrong_type_and_anchor() {
        let mut bad_type = valid_request_json();
        bad_type["type"] = json!("something_else");
        assert!(serde_json::from_value::<InferenceRequest>(bad_type).is_err());

        let mut bad_anchor = valid_request_json();
        bad_anchor["hand_anchor"] = json!("left_elbow");
        assert!(serde_json::from_value::<InferenceRequest>(bad_anchor).is_err());
    }

    #[test]
    fn missing_vector_is_a_schema_error() {
        assert!(serde_json::from_value::<InferenceRequest>(json!({"timestamp": 1})).is_err());
    }

    #[test]
    fn validate_checks_length_and_range() {
        let short = InferenceRequest::new(0, vec![0.0; 50]);
        assert_eq!(
            short.validate().unwrap_err(),
            InferenceError::InvalidDimension {
                expected: 63,
                actual: 50
            }
        );

        let mut values = vec![0.0; 63];
        values[12] = -10.5;
        let out_of_range = InferenceRequest::new(0, values);
        assert!(matches!(
            out_of_range.validate(),
            Err(InferenceError::OutOfRangeValue { index: 12, .. })
        ));
    }

    #[test]
    fn result_serializes_with_type_tag_and_skips_absent_fields() {
        let msg = ServerMessage::InferenceResult(InferenceResult {
            timestamp: 42,
            chord_id: "C_Major".into(),
            confidence: 0.5,
            fingering_map: Fingering::new([0, 3, 2, 0, 1, 0]).unwrap(),
            correction_active: false,
            override_notes: None,
            message: None,
        });
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "inference_result");
        assert_eq!(value["fingering_map"], json!([0, 3, 2, 0, 1, 0]));
        assert!(value.get("override_notes").is_none());
        assert!(value.get("message").is_none());
    }

    #[test]
    fn error_serializes_with_wire_code() {
        let msg = ServerMessage::error(ErrorCode::BadRequest, "bad");
        let value: Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"type": "inference_error", "code": "ERR_AI_400", "message": "bad"})
        );
        assert!(msg.is_error());
    }

    #[test]
    fn error_codes_round_trip_their_names() {
        for code in [
            ErrorCode::CameraDenied,
            ErrorCode::SocketUnreachable,
            ErrorCode::LowConfidence,
            ErrorCode::BadRequest,
            ErrorCode::Dependency,
        ] {
            assert_eq!(serde_json::to_value(code).unwrap(), json!(code.as_str()));
        }
    }
}
