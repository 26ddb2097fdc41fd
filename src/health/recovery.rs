//! Auto-recovery: remediate targets that keep failing, at most once per cooldown
//!
//! Remediations run as their own tasks so a slow remediator never holds up
//! the poller. At most one runs per target at a time.
//!
//! Also bridges target health into the alert engine: a Warning alert when a
//! target first reaches the failure threshold, resolved again once the target
//! reports Healthy.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::alerts::{AlertHandle, NewAlert, Severity};
use crate::config::RecoveryConfig;
use crate::error::with_timeout;
use crate::ids::TargetName;
use crate::remediation::{RemediationAction, Remediator};

use super::model::{HealthRecord, HealthStatus};

pub fn health_source(target: &TargetName) -> String {
    format!("health:{target}")
}

pub fn recovery_source(target: &TargetName) -> String {
    format!("recovery:{target}")
}

pub struct AutoRecovery {
    remediator: Arc<dyn Remediator>,
    alerts: Option<AlertHandle>,
    failure_threshold: u32,
    cooldown: Duration,
    remediation_timeout: Duration,
    last_remediated: HashMap<TargetName, Instant>,
    in_flight: HashMap<TargetName, JoinHandle<()>>,

    /// Targets with an open "unhealthy" alert raised by us
    raised: HashSet<TargetName>,
}

impl AutoRecovery {
    pub fn new(config: &RecoveryConfig, remediator: Arc<dyn Remediator>) -> Self {
        Self {
            remediator,
            alerts: None,
            failure_threshold: config.failure_threshold,
            cooldown: config.cooldown(),
            remediation_timeout: config.remediation_timeout(),
            last_remediated: HashMap::new(),
            in_flight: HashMap::new(),
            raised: HashSet::new(),
        }
    }

    pub fn with_alerts(mut self, alerts: AlertHandle) -> Self {
        self.alerts = Some(alerts);
        self
    }

    /// React to a freshly evaluated record
    ///
    /// Returns `true` if a remediation was started, in which case the
    /// record's failure counter has been reset.
    #[instrument(skip(self, record), fields(target = %record.target))]
    pub async fn observe(&mut self, record: &mut HealthRecord) -> bool {
        self.in_flight.retain(|_, task| !task.is_finished());

        if record.status == HealthStatus::Healthy && self.raised.remove(&record.target) {
            self.resolve_unhealthy(&record.target).await;
        }

        if record.consecutive_failures == self.failure_threshold {
            self.raise_unhealthy(record).await;
        }

        if record.consecutive_failures < self.failure_threshold {
            return false;
        }

        let now = Instant::now();
        if let Some(last) = self.last_remediated.get(&record.target)
            && now.duration_since(*last) < self.cooldown
        {
            debug!(
                "{} consecutive failures, remediated {:?} ago, still in cooldown",
                record.consecutive_failures,
                now.duration_since(*last)
            );
            return false;
        }

        if self.in_flight.contains_key(&record.target) {
            debug!("previous remediation still running");
            return false;
        }

        info!(
            "target failed {} consecutive probes, remediating",
            record.consecutive_failures
        );
        let task = tokio::spawn(remediate(
            self.remediator.clone(),
            self.alerts.clone(),
            record.target.clone(),
            self.remediation_timeout,
        ));
        self.in_flight.insert(record.target.clone(), task);

        record.consecutive_failures = 0;
        self.last_remediated.insert(record.target.clone(), now);
        true
    }

    /// When the target was last remediated, if ever
    pub fn last_remediated(&self, target: &TargetName) -> Option<Instant> {
        self.last_remediated.get(target).copied()
    }

    /// Wait for every running remediation to finish
    pub async fn finish_in_flight(&mut self) {
        for (target, task) in self.in_flight.drain() {
            if let Err(e) = task.await {
                warn!("remediation task for {target} ended abnormally: {e}");
            }
        }
    }

    async fn raise_unhealthy(&mut self, record: &HealthRecord) {
        let mut alert = NewAlert::new(
            Severity::Warning,
            health_source(&record.target),
            format!("Target {} unhealthy", record.target),
        )
        .label("target", record.target.as_str());

        if let Some(error) = &record.error {
            alert = alert.description(format!(
                "{} consecutive failed probes, last error: {error}",
                record.consecutive_failures
            ));
        }

        self.raise(alert).await;
        self.raised.insert(record.target.clone());
    }

    async fn resolve_unhealthy(&self, target: &TargetName) {
        let Some(alerts) = &self.alerts else {
            return;
        };

        match alerts.resolve_source(health_source(target)).await {
            Ok(resolved) => debug!("target recovered, resolved {} alert(s)", resolved.len()),
            Err(e) => warn!("failed to resolve alerts for {target}: {e}"),
        }
    }

    async fn raise(&self, alert: NewAlert) {
        raise(self.alerts.as_ref(), alert).await;
    }
}

impl Drop for AutoRecovery {
    fn drop(&mut self) {
        for task in self.in_flight.values() {
            task.abort();
        }
    }
}

async fn remediate(
    remediator: Arc<dyn Remediator>,
    alerts: Option<AlertHandle>,
    target: TargetName,
    limit: Duration,
) {
    let action = RemediationAction::Restart {
        target: target.clone(),
    };

    match with_timeout(limit, remediator.remediate(&action)).await {
        Ok(()) => info!("remediation of {target} completed"),
        Err(e) => {
            error!("remediation of {target} failed: {e}");
            raise(
                alerts.as_ref(),
                NewAlert::new(
                    Severity::Critical,
                    recovery_source(&target),
                    format!("Remediation failed for {target}"),
                )
                .description(e.to_string())
                .label("target", target.as_str()),
            )
            .await;
        }
    }
}

async fn raise(alerts: Option<&AlertHandle>, alert: NewAlert) {
    let Some(alerts) = alerts else {
        return;
    };

    if let Err(e) = alerts.create(alert).await {
        warn!("failed to raise alert: {e}");
    }
}
