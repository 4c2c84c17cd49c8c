//! Concurrent sessions sharing one engine, including reloads mid-stream.

use std::sync::Arc;
use std::thread;

use fretmatch::{
    ChordCatalog, EngineConfig, InferenceEngine, Projector, ServerMessage, handle_message,
};
use serde_json::json;

async fn shared_engine() -> Arc<InferenceEngine> {
    Arc::new(
        InferenceEngine::initialize(EngineConfig::default())
            .await
            .unwrap(),
    )
}

fn reference_vectors() -> Vec<(String, Vec<f32>)> {
    ChordCatalog::builtin(&Projector::raw())
        .unwrap()
        .iter()
        .map(|entry| (entry.chord_id.clone(), entry.embedding.as_slice().to_vec()))
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sessions_get_their_own_answers() {
    let engine = shared_engine().await;
    let references = Arc::new(reference_vectors());

    let handles: Vec<_> = (0..16)
        .map(|session| {
            let engine = Arc::clone(&engine);
            let references = Arc::clone(&references);
            tokio::spawn(async move {
                for round in 0..10 {
                    let (chord_id, vector) = &references[(session + round) % references.len()];
                    let outcome = engine.process_vector(vector).await.unwrap();
                    assert_eq!(&outcome.chord_id, chord_id);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reload_during_processing_never_fails_a_request() {
    let engine = shared_engine().await;
    let references = Arc::new(reference_vectors());

    let reloader = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            for _ in 0..20 {
                engine.reload().await.unwrap();
                tokio::task::yield_now().await;
            }
        })
    };

    let workers: Vec<_> = (0..8)
        .map(|session| {
            let engine = Arc::clone(&engine);
            let references = Arc::clone(&references);
            tokio::spawn(async move {
                for round in 0..25 {
                    let (chord_id, vector) = &references[(session * 3 + round) % references.len()];
                    let text = json!({ "timestamp": round, "left_hand_vector": vector }).to_string();
                    match handle_message(&engine, &text).await {
                        ServerMessage::InferenceResult(result) => {
                            assert_eq!(&result.chord_id, chord_id)
                        }
                        other => panic!("unexpected reply {other:?}"),
                    }
                }
            })
        })
        .collect();

    reloader.await.unwrap();
    for worker in workers {
        worker.await.unwrap();
    }
    assert_eq!(engine.status().catalog_entries, references.len());
}

#[test]
fn catalog_builds_agree_across_threads() {
    let handles: Vec<_> = (0..8)
        .map(|_| thread::spawn(reference_vectors))
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for other in &results[1..] {
        assert_eq!(other, &results[0]);
    }
}
