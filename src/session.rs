//! Transport-independent message handling.
//!
//! Every inbound text frame maps to exactly one [`ServerMessage`]. Nothing in
//! here closes a connection; errors become `inference_error` replies and the
//! caller keeps reading.

use serde_json::Value;
use tracing::{error, warn};

use crate::engine::InferenceEngine;
use crate::error::InferenceError;
use crate::protocol::{ErrorCode, InferenceRequest, ServerMessage};

/// Handle one raw message.
pub async fn handle_message(engine: &InferenceEngine, text: &str) -> ServerMessage {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(err) => {
            warn!(error = %err, "failed to parse message as JSON");
            return reject(ErrorCode::BadRequest, format!("Invalid JSON format: {err}"));
        }
    };

    let request: InferenceRequest = match serde_json::from_value(value) {
        Ok(request) => request,
        Err(err) => {
            warn!(error = %err, "request does not match schema");
            return reject(ErrorCode::BadRequest, format!("Invalid request: {err}"));
        }
    };

    handle_request(engine, &request).await
}

/// Handle a request that has already been decoded.
pub async fn handle_request(engine: &InferenceEngine, request: &InferenceRequest) -> ServerMessage {
    if let Err(err) = request.validate() {
        warn!(error = %err, "request failed validation");
        return reject(err.code(), format!("Invalid request: {err}"));
    }

    match engine.process_vector(&request.left_hand_vector).await {
        Ok(outcome) => {
            metrics::counter!("fretmatch_inference_total", "outcome" => "result").increment(1);
            ServerMessage::result(outcome)
        }
        Err(err) => failure(err),
    }
}

fn failure(err: InferenceError) -> ServerMessage {
    if err.is_client_error() {
        warn!(error = %err, "request rejected by pipeline");
        reject(err.code(), format!("Invalid request: {err}"))
    } else {
        error!(error = %err, "inference failed");
        reject(err.code(), format!("Inference failed: {err}"))
    }
}

fn reject(code: ErrorCode, message: String) -> ServerMessage {
    let outcome = match code {
        ErrorCode::BadRequest => "client_error",
        _ => "internal_error",
    };
    metrics::counter!("fretmatch_inference_total", "outcome" => outcome).increment(1);
    ServerMessage::error(code, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::protocol::ErrorPayload;
    use serde_json::json;

    async fn engine() -> InferenceEngine {
        InferenceEngine::initialize(EngineConfig::default())
            .await
            .unwrap()
    }

    fn error_of(msg: ServerMessage) -> ErrorPayload {
        match msg {
            ServerMessage::InferenceError(payload) => payload,
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn invalid_json_is_bad_request() {
        let engine = engine().await;
        let payload = error_of(handle_message(&engine, "{not json").await);
        assert_eq!(payload.code, ErrorCode::BadRequest);
        assert!(payload.message.starts_with("Invalid JSON format:"));
    }

    #[tokio::test]
    async fn schema_violation_is_bad_request() {
        let engine = engine().await;
        let text = json!({"timestamp": "yesterday", "left_hand_vector": [0.0]}).to_string();
        let payload = error_of(handle_message(&engine, &text).await);
        assert_eq!(payload.code, ErrorCode::BadRequest);
        assert!(payload.message.starts_with("Invalid request:"));
    }

    #[tokio::test]
    async fn short_vector_is_bad_request() {
        let engine = engine().await;
        let text = json!({"timestamp": 1, "left_hand_vector": vec![0.1; 50]}).to_string();
        let payload = error_of(handle_message(&engine, &text).await);
        assert_eq!(payload.code, ErrorCode::BadRequest);
        assert!(payload.message.contains("63"));
    }

    #[tokio::test]
    async fn out_of_range_value_is_bad_request() {
        let engine = engine().await;
        let mut vector = vec![0.1; 63];
        vector[3] = 11.0;
        let text = json!({"timestamp": 1, "left_hand_vector": vector}).to_string();
        let payload = error_of(handle_message(&engine, &text).await);
        assert_eq!(payload.code, ErrorCode::BadRequest);
    }

    #[tokio::test]
    async fn valid_request_yields_result() {
        let engine = engine().await;
        let text = json!({
            "type": "inference_request",
            "timestamp": 1,
            "left_hand_vector": vec![0.2; 63]
        })
        .to_string();
        match handle_message(&engine, &text).await {
            ServerMessage::InferenceResult(result) => {
                assert!((0.0..=1.0).contains(&result.confidence));
                assert!(result.timestamp > 0);
            }
            other => panic!("expected result, got {other:?}"),
        }
    }
}
