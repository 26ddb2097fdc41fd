//! Alert endpoints

use axum::{
    Json,
    extract::{Path, Query, State},
};

use crate::alerts::{Alert, AlertStats, NewAlert};
use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::{
        AcknowledgeRequest, AlertsResponse, CreateAlertRequest, CreateAlertResponse, HistoryQuery,
        MuteRequest, MuteResponse, SweepResponse,
    },
};
use crate::ids::AlertId;

/// Default number of history entries returned
const DEFAULT_HISTORY_LIMIT: usize = 100;

fn parse_id(id: &str) -> ApiResult<AlertId> {
    id.parse()
        .map_err(|_| ApiError::InvalidRequest(format!("invalid alert id: {id}")))
}

/// GET /api/v1/alerts
pub async fn list_active(State(state): State<ApiState>) -> ApiResult<Json<AlertsResponse>> {
    Ok(Json(state.alerts.active().await?.into()))
}

/// POST /api/v1/alerts
pub async fn create_alert(
    State(state): State<ApiState>,
    Json(request): Json<CreateAlertRequest>,
) -> ApiResult<Json<CreateAlertResponse>> {
    if request.title.trim().is_empty() {
        return Err(ApiError::InvalidRequest("alert title must not be empty".to_string()));
    }

    let mut alert = NewAlert::new(request.severity, request.source, request.title)
        .description(request.description);
    for (key, value) in request.labels {
        alert = alert.label(key, value);
    }

    let outcome = state.alerts.create(alert).await?;
    Ok(Json(CreateAlertResponse {
        suppressed: outcome.was_suppressed(),
        alert: outcome.alert().clone(),
    }))
}

/// GET /api/v1/alerts/history?limit=N
pub async fn history(
    State(state): State<ApiState>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<AlertsResponse>> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    Ok(Json(state.alerts.history(limit).await?.into()))
}

/// GET /api/v1/alerts/stats
pub async fn stats(State(state): State<ApiState>) -> ApiResult<Json<AlertStats>> {
    Ok(Json(state.alerts.stats().await?))
}

/// POST /api/v1/alerts/sweep
///
/// Runs an escalation sweep without waiting for the next tick
pub async fn sweep(State(state): State<ApiState>) -> ApiResult<Json<SweepResponse>> {
    let escalated = state.alerts.sweep_now().await?;
    Ok(Json(SweepResponse { escalated }))
}

/// POST /api/v1/alerts/mute
pub async fn mute(
    State(state): State<ApiState>,
    Json(request): Json<MuteRequest>,
) -> ApiResult<Json<MuteResponse>> {
    state.alerts.mute(request.duration_secs).await?;
    Ok(Json(MuteResponse { muted: true }))
}

/// POST /api/v1/alerts/unmute
pub async fn unmute(State(state): State<ApiState>) -> ApiResult<Json<MuteResponse>> {
    state.alerts.unmute().await?;
    Ok(Json(MuteResponse { muted: false }))
}

/// GET /api/v1/alerts/:id
pub async fn get_alert(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Alert>> {
    let id = parse_id(&id)?;
    state
        .alerts
        .get(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no active alert with id {id}")))
}

/// POST /api/v1/alerts/:id/ack
pub async fn acknowledge(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    request: Option<Json<AcknowledgeRequest>>,
) -> ApiResult<Json<Alert>> {
    let id = parse_id(&id)?;
    let by = request.and_then(|Json(r)| r.by);
    Ok(Json(state.alerts.acknowledge(id, by).await?))
}

/// POST /api/v1/alerts/:id/resolve
pub async fn resolve(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Alert>> {
    let id = parse_id(&id)?;
    Ok(Json(state.alerts.resolve(id).await?))
}
