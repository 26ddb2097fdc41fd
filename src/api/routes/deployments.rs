//! Deployment endpoints

use axum::{Json, extract::State};

use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::{CompleteDeploymentRequest, StartDeploymentRequest},
};
use crate::deployment::DeploymentRun;
use crate::ids::DeploymentId;

/// POST /api/v1/deployments
pub async fn start(
    State(state): State<ApiState>,
    Json(request): Json<StartDeploymentRequest>,
) -> ApiResult<Json<DeploymentRun>> {
    if request.id.trim().is_empty() {
        return Err(ApiError::InvalidRequest("deployment id must not be empty".to_string()));
    }

    let run = state
        .deployments
        .start(DeploymentId::from(request.id), request.version)
        .await?;
    Ok(Json(run))
}

/// GET /api/v1/deployments
///
/// Finished runs, newest first
pub async fn history(State(state): State<ApiState>) -> ApiResult<Json<Vec<DeploymentRun>>> {
    Ok(Json(state.deployments.history().await?))
}

/// GET /api/v1/deployments/current
pub async fn current(State(state): State<ApiState>) -> ApiResult<Json<DeploymentRun>> {
    state
        .deployments
        .current()
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("no deployment is in progress".to_string()))
}

/// POST /api/v1/deployments/current/complete
pub async fn complete(
    State(state): State<ApiState>,
    Json(request): Json<CompleteDeploymentRequest>,
) -> ApiResult<Json<DeploymentRun>> {
    Ok(Json(state.deployments.complete(request.success).await?))
}
