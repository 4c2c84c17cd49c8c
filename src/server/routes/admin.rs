use std::sync::Arc;

use axum::Json;
use axum::extract::State;

use crate::engine::EngineStatus;
use crate::server::error::ServerResult;
use crate::server::state::ServerState;

/// `POST /admin/reload`: rebuild catalog and backend choice, then swap.
pub async fn reload(State(state): State<Arc<ServerState>>) -> ServerResult<Json<EngineStatus>> {
    let status = state.engine.reload().await?;
    Ok(Json(status))
}
