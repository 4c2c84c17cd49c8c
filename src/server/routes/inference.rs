//! `GET /ws/inference`
//!
//! Each connection runs on its own task and answers messages strictly in
//! order: the next frame is read only after the previous reply was sent.
//!
//! `server.max_message_bytes` is enforced by the WebSocket codec. A frame
//! over it fails the read and the socket closes with status 1009; every
//! other error is answered on the open connection.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::protocol::{ErrorCode, ServerMessage};

/// Sent when a reply cannot be encoded.
const ENCODE_FAILURE_REPLY: &str = r#"{"type":"inference_error","code":"ERR_DEP_500","message":"Inference failed: could not encode reply"}"#;
use crate::server::state::ServerState;
use crate::session::handle_message;

pub async fn inference_socket(
    State(state): State<Arc<ServerState>>,
    ws: WebSocketUpgrade,
) -> Response {
    let limit = state.config.server.max_message_bytes;
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| run_session(socket, state))
}

async fn run_session(mut socket: WebSocket, state: Arc<ServerState>) {
    let connection_id = Uuid::new_v4();
    info!(%connection_id, "websocket connection accepted");
    metrics::gauge!("fretmatch_ws_connections").increment(1.0);

    while let Some(frame) = socket.recv().await {
        let reply = match frame {
            Ok(Message::Text(text)) => handle_message(&state.engine, text.as_str()).await,
            Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                Ok(text) => handle_message(&state.engine, text).await,
                Err(err) => ServerMessage::error(
                    ErrorCode::BadRequest,
                    format!("Invalid JSON format: {err}"),
                ),
            },
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_) | Message::Pong(_)) => continue,
            Err(err) => {
                warn!(%connection_id, error = %err, "websocket receive failed");
                break;
            }
        };

        let payload = match reply.to_json() {
            Ok(payload) => payload,
            Err(err) => {
                error!(%connection_id, error = %err, "failed to encode reply");
                ENCODE_FAILURE_REPLY.to_string()
            }
        };
        if let Err(err) = socket.send(Message::Text(payload.into())).await {
            debug!(%connection_id, error = %err, "websocket send failed");
            break;
        }
    }

    metrics::gauge!("fretmatch_ws_connections").decrement(1.0);
    info!(%connection_id, "websocket disconnected");
}
