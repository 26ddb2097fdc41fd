//! Hub liveness and target health endpoints

use axum::{
    Json,
    extract::{Path, State},
};

use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::{HealthResponse, PollIntervalRequest, ResetResponse, TargetsResponse},
};
use crate::health::HealthRecord;
use crate::ids::TargetName;

/// GET /api/v1/health
///
/// Returns a simple health check response
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// GET /api/v1/targets
pub async fn list_targets(State(state): State<ApiState>) -> ApiResult<Json<TargetsResponse>> {
    let mut targets: Vec<HealthRecord> = state.health.records().await?.into_values().collect();
    targets.sort_by(|a, b| a.target.cmp(&b.target));

    Ok(Json(TargetsResponse {
        total: targets.len(),
        targets,
    }))
}

/// GET /api/v1/targets/:name
pub async fn get_target(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> ApiResult<Json<HealthRecord>> {
    state
        .health
        .record(TargetName::from(name.as_str()))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("unknown target: {name}")))
}

/// POST /api/v1/targets/:name/reset
pub async fn reset_target(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> ApiResult<Json<ResetResponse>> {
    let reset = state.health.reset_failures(TargetName::from(name)).await?;
    Ok(Json(ResetResponse { reset }))
}

/// PUT /api/v1/poller/interval
pub async fn update_interval(
    State(state): State<ApiState>,
    Json(request): Json<PollIntervalRequest>,
) -> ApiResult<Json<PollIntervalRequest>> {
    state.health.update_interval(request.interval_secs).await?;
    Ok(Json(request))
}
