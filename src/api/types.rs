//! API request and response types

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::alerts::{Alert, Severity};
use crate::connections::{RegistryStats, Session};
use crate::health::HealthRecord;
use crate::ids::ClientId;

// ============================================================================
// Health
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetsResponse {
    pub targets: Vec<HealthRecord>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetResponse {
    pub reset: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollIntervalRequest {
    pub interval_secs: u64,
}

// ============================================================================
// Alerts
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepResponse {
    /// Alerts escalated by this sweep
    pub escalated: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MuteRequest {
    pub duration_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MuteResponse {
    pub muted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertsResponse {
    pub alerts: Vec<Alert>,
    pub total: usize,
}

impl From<Vec<Alert>> for AlertsResponse {
    fn from(alerts: Vec<Alert>) -> Self {
        Self {
            total: alerts.len(),
            alerts,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAlertRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub severity: Severity,
    pub source: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateAlertResponse {
    pub alert: Alert,
    pub suppressed: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AcknowledgeRequest {
    pub by: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

// ============================================================================
// Deployments
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct StartDeploymentRequest {
    pub id: String,
    pub version: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompleteDeploymentRequest {
    pub success: bool,
}

// ============================================================================
// Sessions
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct SessionsResponse {
    pub sessions: Vec<Session>,
    pub stats: RegistryStats,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendRequest {
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendResponse {
    /// `false` if the message was queued for later delivery
    pub delivered: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastRequest {
    pub payload: Value,
    #[serde(default)]
    pub exclude: Vec<ClientId>,
}
