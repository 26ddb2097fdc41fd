use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::alerts::model::Severity;

/// Top-level configuration of the hub
///
/// Every section is optional in the file; missing sections fall back to
/// their documented defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub connections: ConnectionConfig,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub recovery: RecoveryConfig,

    #[serde(default)]
    pub alerts: AlertConfig,

    #[serde(default)]
    pub deployment: DeploymentConfig,

    /// API server settings (no API server if absent)
    pub api: Option<ApiSettings>,
}

// ============================================================================
// Connections
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    /// Maximum undelivered messages kept per client (oldest evicted first)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Supervisor loop period in seconds
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Seconds without successful activity before a session is torn down
    #[serde(default = "default_staleness")]
    pub staleness_secs: u64,

    /// Deadline for a single write or close on a client transport
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,
}

impl ConnectionConfig {
    /// Never shorter than one second
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }

    pub fn staleness_window(&self) -> Duration {
        Duration::from_secs(self.staleness_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs.max(1))
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            ping_interval_secs: default_ping_interval(),
            staleness_secs: default_staleness(),
            write_timeout_secs: default_write_timeout(),
        }
    }
}

fn default_queue_capacity() -> usize {
    100
}

fn default_ping_interval() -> u64 {
    30
}

fn default_staleness() -> u64 {
    300
}

fn default_write_timeout() -> u64 {
    10
}

// ============================================================================
// Health polling
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Per-probe timeout in seconds
    #[serde(default = "default_poll_timeout")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub tiers: LatencyTiers,

    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

impl HealthConfig {
    /// Never shorter than one second
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            timeout_secs: default_poll_timeout(),
            tiers: LatencyTiers::default(),
            targets: Vec::new(),
        }
    }
}

fn default_poll_interval() -> u64 {
    30
}

fn default_poll_timeout() -> u64 {
    10
}

/// Latency boundaries used to tier a successful probe
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LatencyTiers {
    /// Below this a target is Healthy
    #[serde(default = "default_healthy_ms")]
    pub healthy_below_ms: u64,

    /// Below this (and above the healthy bound) a target is Degraded
    #[serde(default = "default_degraded_ms")]
    pub degraded_below_ms: u64,
}

impl Default for LatencyTiers {
    fn default() -> Self {
        Self {
            healthy_below_ms: default_healthy_ms(),
            degraded_below_ms: default_degraded_ms(),
        }
    }
}

fn default_healthy_ms() -> u64 {
    100
}

fn default_degraded_ms() -> u64 {
    500
}

/// A named remote target to poll
#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    pub name: String,

    /// Health endpoint (e.g. `http://10.0.0.4:8000/health`)
    pub url: String,

    /// Optional regex the response body must match
    pub body_pattern: Option<String>,
}

// ============================================================================
// Auto-recovery
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct RecoveryConfig {
    /// Consecutive failures that trigger remediation
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Minimum seconds between two remediations of the same target
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,

    /// Deadline for a single remediation action
    #[serde(default = "default_remediation_timeout")]
    pub remediation_timeout_secs: u64,

    /// Remediation endpoint (remediation only logs if absent)
    pub remediator: Option<RemediatorConfig>,
}

impl RecoveryConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn remediation_timeout(&self) -> Duration {
        Duration::from_secs(self.remediation_timeout_secs)
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown(),
            remediation_timeout_secs: default_remediation_timeout(),
            remediator: None,
        }
    }
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_cooldown() -> u64 {
    300
}

fn default_remediation_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemediatorConfig {
    pub url: String,
    pub token: Option<String>,
}

// ============================================================================
// Alerts
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct AlertConfig {
    /// Escalation sweep period in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Titles scoring strictly above this are treated as duplicates
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    /// Resolved/suppressed alerts kept for reporting
    #[serde(default = "default_alert_history")]
    pub history_limit: usize,

    /// Deadline for a single sink delivery
    #[serde(default = "default_notify_timeout")]
    pub notify_timeout_secs: u64,

    #[serde(default)]
    pub escalation: EscalationPolicy,

    #[serde(default)]
    pub sinks: Vec<SinkConfig>,
}

impl AlertConfig {
    /// Never shorter than one second
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_secs)
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            similarity_threshold: default_similarity_threshold(),
            history_limit: default_alert_history(),
            notify_timeout_secs: default_notify_timeout(),
            escalation: EscalationPolicy::default(),
            sinks: Vec::new(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_similarity_threshold() -> f64 {
    0.8
}

fn default_alert_history() -> usize {
    1000
}

fn default_notify_timeout() -> u64 {
    10
}

/// Escalation timing for one severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationTier {
    pub escalate_after_mins: i64,
    pub max_escalations: u32,
}

impl EscalationTier {
    /// `None` if the step is too large to represent
    pub fn escalate_after(&self) -> Option<chrono::Duration> {
        chrono::Duration::try_minutes(self.escalate_after_mins)
    }
}

/// Severity → escalation tier mapping
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct EscalationPolicy(HashMap<Severity, EscalationTier>);

impl EscalationPolicy {
    pub fn tier(&self, severity: Severity) -> Option<EscalationTier> {
        self.0.get(&severity).copied()
    }

    pub fn with_tier(mut self, severity: Severity, tier: EscalationTier) -> Self {
        self.0.insert(severity, tier);
        self
    }
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        let tier = |escalate_after_mins, max_escalations| EscalationTier {
            escalate_after_mins,
            max_escalations,
        };

        Self(HashMap::from([
            (Severity::Info, tier(240, 1)),
            (Severity::Warning, tier(60, 2)),
            (Severity::Critical, tier(15, 3)),
            (Severity::Emergency, tier(5, 5)),
        ]))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkConfig {
    /// Write notifications to the tracing log
    Log,
    Webhook(Webhook),
    Discord(Discord),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Webhook {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Discord {
    pub url: String,
    pub user_id: Option<String>,
}

// ============================================================================
// Deployment
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentConfig {
    /// Metric collection period while a run is in progress
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_secs: u64,

    /// A run without critical breaches for this long is marked Success
    #[serde(default = "default_monitoring_window")]
    pub monitoring_window_secs: u64,

    /// Deadline for each rollback step
    #[serde(default = "default_step_timeout")]
    pub step_timeout_secs: u64,

    #[serde(default = "default_deployment_history")]
    pub history_limit: usize,

    /// Ordered rollback steps, each executed through the remediator
    #[serde(default = "default_rollback_steps")]
    pub rollback_steps: Vec<String>,

    #[serde(default)]
    pub thresholds: DeploymentThresholds,

    /// Endpoint serving the current deployment metrics as JSON
    pub metrics_url: Option<String>,
}

impl DeploymentConfig {
    /// Never shorter than one second
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs.max(1))
    }

    pub fn monitoring_window(&self) -> Duration {
        Duration::from_secs(self.monitoring_window_secs)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            monitor_interval_secs: default_monitor_interval(),
            monitoring_window_secs: default_monitoring_window(),
            step_timeout_secs: default_step_timeout(),
            history_limit: default_deployment_history(),
            rollback_steps: default_rollback_steps(),
            thresholds: DeploymentThresholds::default(),
            metrics_url: None,
        }
    }
}

fn default_monitor_interval() -> u64 {
    30
}

fn default_monitoring_window() -> u64 {
    600
}

fn default_step_timeout() -> u64 {
    60
}

fn default_deployment_history() -> usize {
    30
}

fn default_rollback_steps() -> Vec<String> {
    ["drain_traffic", "restore_previous_version", "verify_health", "restore_traffic"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Limits a deployment's metrics are checked against
///
/// Rates are fractions in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DeploymentThresholds {
    #[serde(default = "default_min_success_rate")]
    pub min_success_rate: f64,

    #[serde(default = "default_max_latency")]
    pub max_latency_ms: f64,

    #[serde(default = "default_max_error_rate")]
    pub max_error_rate: f64,

    /// Error rate above which a rollback is triggered
    #[serde(default = "default_critical_error_rate")]
    pub critical_error_rate: f64,
}

impl Default for DeploymentThresholds {
    fn default() -> Self {
        Self {
            min_success_rate: default_min_success_rate(),
            max_latency_ms: default_max_latency(),
            max_error_rate: default_max_error_rate(),
            critical_error_rate: default_critical_error_rate(),
        }
    }
}

fn default_min_success_rate() -> f64 {
    0.95
}

fn default_max_latency() -> f64 {
    500.0
}

fn default_max_error_rate() -> f64 {
    0.05
}

fn default_critical_error_rate() -> f64 {
    0.10
}

// ============================================================================
// API
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ApiSettings {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    #[serde(default = "default_cors")]
    pub enable_cors: bool,
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_cors() -> bool {
    true
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content =
        std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?;
    parse_config(&file_content)
}

pub fn parse_config(content: &str) -> anyhow::Result<Config> {
    let config: Config =
        serde_json::from_str(content).context("Invalid configuration file provided!")?;
    validate(&config)?;
    trace!("loaded config: {config:?}");
    Ok(config)
}

fn validate(config: &Config) -> anyhow::Result<()> {
    let tiers = config.health.tiers;
    if tiers.healthy_below_ms > tiers.degraded_below_ms {
        anyhow::bail!("health.tiers: healthy bound must not exceed degraded bound");
    }

    if !(0.0..=1.0).contains(&config.alerts.similarity_threshold) {
        anyhow::bail!("alerts.similarity_threshold must be within 0.0..=1.0");
    }

    if config.connections.queue_capacity == 0 {
        anyhow::bail!("connections.queue_capacity must be at least 1");
    }

    let intervals = [
        ("connections.ping_interval_secs", config.connections.ping_interval_secs),
        ("connections.write_timeout_secs", config.connections.write_timeout_secs),
        ("health.poll_interval_secs", config.health.poll_interval_secs),
        ("health.timeout_secs", config.health.timeout_secs),
        ("alerts.sweep_interval_secs", config.alerts.sweep_interval_secs),
        ("deployment.monitor_interval_secs", config.deployment.monitor_interval_secs),
    ];
    for (field, secs) in intervals {
        if secs == 0 {
            anyhow::bail!("{field} must be at least 1");
        }
    }

    if config.recovery.failure_threshold == 0 {
        anyhow::bail!("recovery.failure_threshold must be at least 1");
    }

    let mut names = std::collections::HashSet::new();
    for target in &config.health.targets {
        if !names.insert(target.name.as_str()) {
            anyhow::bail!("duplicate health target name: {}", target.name);
        }
        if let Some(pattern) = &target.body_pattern {
            regex::Regex::new(pattern)
                .with_context(|| format!("health target {}: invalid body_pattern", target.name))?;
        }
    }

    Ok(())
}
