//! Message-level behavior of an inference session: every frame gets exactly
//! one reply and errors never poison later messages.

use fretmatch::protocol::ErrorCode;
use fretmatch::{
    ChordCategory, EngineConfig, InferenceEngine, ServerMessage, handle_message,
    reference_embedding,
};
use serde_json::{Value, json};

async fn engine() -> InferenceEngine {
    InferenceEngine::initialize(EngineConfig::default())
        .await
        .unwrap()
}

fn request(vector: Vec<f32>) -> String {
    json!({
        "type": "inference_request",
        "timestamp": 1_700_000_000_000i64,
        "hand_anchor": "left_wrist",
        "left_hand_vector": vector,
        "mode": "chord_correction",
        "meta": {"frame_id": 7, "fps": 30}
    })
    .to_string()
}

fn expect_error(reply: ServerMessage, code: ErrorCode) -> String {
    match reply {
        ServerMessage::InferenceError(payload) => {
            assert_eq!(payload.code, code);
            payload.message
        }
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn short_vector_is_rejected_and_session_continues() {
    let engine = engine().await;

    let reply = handle_message(&engine, &request(vec![0.1; 50])).await;
    let message = expect_error(reply, ErrorCode::BadRequest);
    assert!(message.starts_with("Invalid request:"));

    let raw = reference_embedding("C_Major", ChordCategory::Major);
    let reply = handle_message(&engine, &request(raw)).await;
    match reply {
        ServerMessage::InferenceResult(result) => {
            assert_eq!(result.chord_id, "C_Major");
            assert!(result.correction_active);
        }
        other => panic!("expected result, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_json_reports_format_error() {
    let engine = engine().await;
    let reply = handle_message(&engine, "{not json").await;
    let message = expect_error(reply, ErrorCode::BadRequest);
    assert!(message.starts_with("Invalid JSON format:"));
}

#[tokio::test]
async fn missing_vector_field_is_a_schema_error() {
    let engine = engine().await;
    let reply = handle_message(&engine, r#"{"timestamp": 1}"#).await;
    let message = expect_error(reply, ErrorCode::BadRequest);
    assert!(message.starts_with("Invalid request:"));
}

#[tokio::test]
async fn out_of_range_values_are_rejected() {
    let engine = engine().await;
    let mut vector = vec![0.0; 63];
    vector[5] = 25.0;
    let reply = handle_message(&engine, &request(vector)).await;
    expect_error(reply, ErrorCode::BadRequest);
}

#[tokio::test]
async fn minimal_request_is_accepted() {
    let engine = engine().await;
    let text = json!({ "timestamp": 0, "left_hand_vector": vec![0.2; 63] }).to_string();
    let reply = handle_message(&engine, &text).await;
    assert!(!reply.is_error());
}

#[tokio::test]
async fn result_serializes_with_wire_field_names() {
    let engine = engine().await;
    let raw = reference_embedding("A_Minor", ChordCategory::Minor);
    let reply = handle_message(&engine, &request(raw)).await;

    let wire: Value = serde_json::from_str(&reply.to_json().unwrap()).unwrap();
    assert_eq!(wire["type"], "inference_result");
    assert_eq!(wire["chord_id"], "A_Minor");
    assert_eq!(wire["fingering_map"].as_array().unwrap().len(), 6);
    assert!(wire["timestamp"].as_i64().unwrap() > 0);
    assert!(wire["override_notes"].is_array());
}

#[tokio::test]
async fn error_serializes_with_wire_code() {
    let engine = engine().await;
    let reply = handle_message(&engine, "[]").await;
    let wire: Value = serde_json::from_str(&reply.to_json().unwrap()).unwrap();
    assert_eq!(wire["type"], "inference_error");
    assert_eq!(wire["code"], "ERR_AI_400");
}

#[tokio::test]
async fn replies_follow_request_order() {
    let engine = engine().await;
    let chords = [
        ("C_Major", ChordCategory::Major),
        ("D_Minor", ChordCategory::Minor),
        ("G_Seventh", ChordCategory::Seventh),
    ];

    for (chord_id, category) in chords {
        let reply = handle_message(&engine, &request(reference_embedding(chord_id, category))).await;
        match reply {
            ServerMessage::InferenceResult(result) => assert_eq!(result.chord_id, chord_id),
            other => panic!("expected result, got {other:?}"),
        }
    }
}
