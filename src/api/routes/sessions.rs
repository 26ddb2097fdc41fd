//! Client session endpoints

use axum::{
    Json,
    extract::{Path, State},
};

use crate::api::{
    error::ApiResult,
    state::ApiState,
    types::{BroadcastRequest, SendRequest, SendResponse, SessionsResponse},
};
use crate::connections::{BroadcastReport, RegistryStats};
use crate::ids::ClientId;

/// GET /api/v1/sessions
pub async fn list_sessions(State(state): State<ApiState>) -> ApiResult<Json<SessionsResponse>> {
    let sessions = state.registry.sessions().await;
    let stats = state.registry.stats().await;
    Ok(Json(SessionsResponse { sessions, stats }))
}

/// GET /api/v1/sessions/stats
pub async fn stats(State(state): State<ApiState>) -> Json<RegistryStats> {
    Json(state.registry.stats().await)
}

/// POST /api/v1/sessions/:client_id/send
///
/// Messages for absent clients are queued, not rejected.
pub async fn send(
    State(state): State<ApiState>,
    Path(client_id): Path<String>,
    Json(request): Json<SendRequest>,
) -> Json<SendResponse> {
    let delivered = state
        .registry
        .send(&ClientId::from(client_id), request.payload)
        .await;
    Json(SendResponse { delivered })
}

/// POST /api/v1/broadcast
pub async fn broadcast(
    State(state): State<ApiState>,
    Json(request): Json<BroadcastRequest>,
) -> Json<BroadcastReport> {
    Json(
        state
            .registry
            .broadcast(request.payload, &request.exclude)
            .await,
    )
}
