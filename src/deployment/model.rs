use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::DeploymentThresholds;
use crate::error::{WatchtowerError, WatchtowerResult};
use crate::ids::DeploymentId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    InProgress,
    Success,
    Failed,
    RollingBack,
    RolledBack,
}

impl DeploymentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DeploymentStatus::Success | DeploymentStatus::Failed | DeploymentStatus::RolledBack
        )
    }

    pub fn can_transition_to(self, next: DeploymentStatus) -> bool {
        use DeploymentStatus::*;

        matches!(
            (self, next),
            (Pending, InProgress)
                | (Pending, Failed)
                | (InProgress, Success)
                | (InProgress, RollingBack)
                | (InProgress, Failed)
                | (RollingBack, RolledBack)
                | (RollingBack, Failed)
        )
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::InProgress => "in_progress",
            DeploymentStatus::Success => "success",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::RollingBack => "rolling_back",
            DeploymentStatus::RolledBack => "rolled_back",
        };
        f.write_str(s)
    }
}

/// One sample of deployment health
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeploymentMetrics {
    /// Fraction of successful requests
    pub success_rate: f64,
    pub latency_ms: f64,
    /// Fraction of failed requests
    pub error_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepOutcome {
    pub step: String,
    pub succeeded: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeploymentRun {
    pub id: DeploymentId,
    pub version: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: DeploymentStatus,
    pub rollback_triggered: bool,
    pub last_metrics: Option<DeploymentMetrics>,
    pub failure_reason: Option<String>,
    pub rollback_steps: Vec<StepOutcome>,
}

impl DeploymentRun {
    pub fn new(id: DeploymentId, version: impl Into<String>) -> Self {
        Self {
            id,
            version: version.into(),
            started_at: Utc::now(),
            ended_at: None,
            status: DeploymentStatus::Pending,
            rollback_triggered: false,
            last_metrics: None,
            failure_reason: None,
            rollback_steps: Vec::new(),
        }
    }

    /// Move to `next`, returning the previous status
    ///
    /// Entering a terminal status stamps `ended_at`.
    pub fn transition(&mut self, next: DeploymentStatus) -> WatchtowerResult<DeploymentStatus> {
        if !self.status.can_transition_to(next) {
            return Err(WatchtowerError::InvalidTransition(format!(
                "deployment {} cannot go from {} to {}",
                self.id, self.status, next
            )));
        }

        let previous = self.status;
        self.status = next;
        if next == DeploymentStatus::RollingBack {
            self.rollback_triggered = true;
        }
        if next.is_terminal() {
            self.ended_at = Some(Utc::now());
        }
        Ok(previous)
    }
}

/// Published on every status change of a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeploymentEvent {
    pub deployment: DeploymentId,
    pub from: DeploymentStatus,
    pub to: DeploymentStatus,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    SuccessRate,
    Latency,
    ErrorRate,
}

/// A metric outside its threshold
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Breach {
    pub metric: MetricKind,
    pub value: f64,
    pub limit: f64,

    /// Critical breaches trigger a rollback
    pub critical: bool,
}

impl fmt::Display for Breach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (name, relation) = match self.metric {
            MetricKind::SuccessRate => ("success rate", "below"),
            MetricKind::Latency => ("latency", "above"),
            MetricKind::ErrorRate => ("error rate", "above"),
        };
        write!(f, "{name} {} {relation} {}", self.value, self.limit)?;
        if self.critical {
            f.write_str(" (critical)")?;
        }
        Ok(())
    }
}

/// Check one sample against the thresholds
///
/// Only an error rate above `critical_error_rate` is critical.
pub fn evaluate(metrics: &DeploymentMetrics, thresholds: &DeploymentThresholds) -> Vec<Breach> {
    let mut breaches = Vec::new();

    if metrics.success_rate < thresholds.min_success_rate {
        breaches.push(Breach {
            metric: MetricKind::SuccessRate,
            value: metrics.success_rate,
            limit: thresholds.min_success_rate,
            critical: false,
        });
    }

    if metrics.latency_ms > thresholds.max_latency_ms {
        breaches.push(Breach {
            metric: MetricKind::Latency,
            value: metrics.latency_ms,
            limit: thresholds.max_latency_ms,
            critical: false,
        });
    }

    if metrics.error_rate > thresholds.critical_error_rate {
        breaches.push(Breach {
            metric: MetricKind::ErrorRate,
            value: metrics.error_rate,
            limit: thresholds.critical_error_rate,
            critical: true,
        });
    } else if metrics.error_rate > thresholds.max_error_rate {
        breaches.push(Breach {
            metric: MetricKind::ErrorRate,
            value: metrics.error_rate,
            limit: thresholds.max_error_rate,
            critical: false,
        });
    }

    breaches
}
