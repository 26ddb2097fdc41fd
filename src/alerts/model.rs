//! Alert data model

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::AlertId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
    Emergency,
}

impl Severity {
    /// Severities that notify at creation instead of waiting for the sweep
    pub fn notifies_immediately(self) -> bool {
        matches!(self, Severity::Critical | Severity::Emergency)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
            Severity::Emergency => "emergency",
        }
    }

    pub fn emoji(self) -> &'static str {
        match self {
            Severity::Info => "ℹ️",
            Severity::Warning => "⚠️",
            Severity::Critical => "🔴",
            Severity::Emergency => "🚨",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
    /// A duplicate folded into an existing active alert
    Suppressed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub status: AlertStatus,
    pub escalation_count: u32,

    pub last_escalated_at: Option<DateTime<Utc>>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,

    /// Suppressed duplicates folded into this alert
    pub duplicates: u32,

    /// Whether any notification went out for this alert
    pub notified: bool,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl Alert {
    pub fn is_open(&self) -> bool {
        matches!(self.status, AlertStatus::Active | AlertStatus::Acknowledged)
    }
}

/// Input for creating an alert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAlert {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub severity: Severity,
    pub source: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl NewAlert {
    pub fn new(severity: Severity, source: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            severity,
            source: source.into(),
            labels: BTreeMap::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Result of [`AlertEngine::create`](super::engine::AlertEngine::create)
#[derive(Debug, Clone, PartialEq)]
pub enum AlertOutcome {
    Created(Alert),

    /// A similar active alert from the same source already exists
    Suppressed { existing: Alert, similarity: f64 },
}

impl AlertOutcome {
    pub fn alert(&self) -> &Alert {
        match self {
            AlertOutcome::Created(alert) => alert,
            AlertOutcome::Suppressed { existing, .. } => existing,
        }
    }

    pub fn was_suppressed(&self) -> bool {
        matches!(self, AlertOutcome::Suppressed { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationKind {
    Raised,
    Escalated { level: u32 },
    Resolved,
}

/// What a sink receives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub alert: Alert,
}

impl Notification {
    /// Higher means more urgent; escalations raise urgency by their level
    pub fn urgency(&self) -> u32 {
        let base = match self.alert.severity {
            Severity::Info => 1,
            Severity::Warning => 2,
            Severity::Critical => 3,
            Severity::Emergency => 4,
        };
        match self.kind {
            NotificationKind::Raised => base,
            NotificationKind::Escalated { level } => base + level,
            NotificationKind::Resolved => 0,
        }
    }
}

/// Reporting figures over active alerts and history
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AlertStats {
    pub active: usize,
    pub acknowledged: usize,
    pub created_last_24h: usize,
    pub resolved_last_24h: usize,
    pub suppressed_total: u64,

    /// Mean seconds from creation to resolution over resolved history
    pub average_resolution_secs: Option<f64>,

    /// Fraction of alerts (open and resolved) escalated at least once
    pub escalation_rate: f64,
}
