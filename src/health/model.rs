use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::LatencyTiers;
use crate::ids::TargetName;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    /// Never polled
    Unknown,
}

impl HealthStatus {
    /// Tier a successful probe by its latency
    pub fn from_latency(latency: Duration, tiers: LatencyTiers) -> Self {
        let ms = latency.as_millis();
        if ms < u128::from(tiers.healthy_below_ms) {
            HealthStatus::Healthy
        } else if ms < u128::from(tiers.degraded_below_ms) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Latest known health of one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthRecord {
    pub target: TargetName,
    pub status: HealthStatus,
    pub latency_ms: Option<u64>,
    pub last_check: Option<DateTime<Utc>>,
    pub error: Option<String>,

    /// Failed probes since the last successful probe or remediation attempt
    pub consecutive_failures: u32,

    /// Capabilities advertised by the target's health endpoint
    pub capabilities: Option<Vec<String>>,
}

impl HealthRecord {
    pub fn unknown(target: TargetName) -> Self {
        Self {
            target,
            status: HealthStatus::Unknown,
            latency_ms: None,
            last_check: None,
            error: None,
            consecutive_failures: 0,
            capabilities: None,
        }
    }

    pub fn is_failing(&self) -> bool {
        self.consecutive_failures > 0
    }
}

/// Published after every evaluated probe
#[derive(Debug, Clone, Serialize)]
pub struct HealthEvent {
    pub record: HealthRecord,
    pub previous: HealthStatus,

    /// A remediation was attempted as a result of this probe
    pub remediated: bool,
}

impl HealthEvent {
    pub fn status_changed(&self) -> bool {
        self.record.status != self.previous
    }
}
