//! HealthPoller - probes every target on an interval and keeps their records
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick → probe all targets concurrently → tier by latency → AutoRecovery → publish HealthEvent
//!     ↑
//!     └─── Commands (PollNow, Records, Record, ResetFailures, UpdateInterval, Shutdown)
//! ```
//!
//! Probes run concurrently, each under the configured timeout. Results are
//! then applied one target at a time, so the failure counters and the
//! remediation cooldown only ever change inside this actor.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, interval};
use tracing::{debug, instrument, trace, warn};

use crate::config::{HealthConfig, LatencyTiers, TargetConfig};
use crate::error::{WatchtowerError, WatchtowerResult, with_timeout};
use crate::ids::TargetName;
use crate::util::TaskSlot;

use super::model::{HealthEvent, HealthRecord, HealthStatus};
use super::probe::{Probe, ProbeReport};
use super::recovery::AutoRecovery;

pub type HealthRecords = HashMap<TargetName, HealthRecord>;

#[derive(Debug)]
pub enum PollerCommand {
    /// Poll every target now and return the resulting records
    PollNow {
        respond_to: oneshot::Sender<HealthRecords>,
    },

    Records {
        respond_to: oneshot::Sender<HealthRecords>,
    },

    Record {
        target: TargetName,
        respond_to: oneshot::Sender<Option<HealthRecord>>,
    },

    /// Clear a target's failure counter; responds `false` for unknown targets
    ResetFailures {
        target: TargetName,
        respond_to: oneshot::Sender<bool>,
    },

    UpdateInterval { interval_secs: u64 },

    Shutdown,
}

pub struct HealthPoller {
    targets: Vec<TargetConfig>,
    probe: Arc<dyn Probe>,
    recovery: AutoRecovery,
    records: HealthRecords,
    tiers: LatencyTiers,
    timeout: Duration,
    interval_duration: Duration,
    command_rx: mpsc::Receiver<PollerCommand>,
    event_tx: broadcast::Sender<HealthEvent>,
}

impl HealthPoller {
    pub fn new(
        config: &HealthConfig,
        probe: Arc<dyn Probe>,
        recovery: AutoRecovery,
        command_rx: mpsc::Receiver<PollerCommand>,
        event_tx: broadcast::Sender<HealthEvent>,
    ) -> Self {
        let records = config
            .targets
            .iter()
            .map(|target| {
                let name = TargetName::from(target.name.as_str());
                (name.clone(), HealthRecord::unknown(name))
            })
            .collect();

        Self {
            targets: config.targets.clone(),
            probe,
            recovery,
            records,
            tiers: config.tiers,
            timeout: config.timeout(),
            interval_duration: config.poll_interval(),
            command_rx,
            event_tx,
        }
    }

    #[instrument(skip(self), fields(targets = self.targets.len()))]
    pub async fn run(mut self) {
        debug!("starting health poller");

        let mut ticker = interval(self.interval_duration);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_all().await;
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        PollerCommand::PollNow { respond_to } => {
                            debug!("received PollNow command");
                            self.poll_all().await;
                            let _ = respond_to.send(self.records.clone());
                        }

                        PollerCommand::Records { respond_to } => {
                            let _ = respond_to.send(self.records.clone());
                        }

                        PollerCommand::Record { target, respond_to } => {
                            let _ = respond_to.send(self.records.get(&target).cloned());
                        }

                        PollerCommand::ResetFailures { target, respond_to } => {
                            let found = match self.records.get_mut(&target) {
                                Some(record) => {
                                    record.consecutive_failures = 0;
                                    true
                                }
                                None => false,
                            };
                            let _ = respond_to.send(found);
                        }

                        PollerCommand::UpdateInterval { interval_secs } => {
                            debug!("updating interval to {interval_secs}s");
                            self.interval_duration = Duration::from_secs(interval_secs.max(1));
                            ticker = interval(self.interval_duration);
                        }

                        PollerCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("health poller stopped");
    }

    async fn poll_all(&mut self) {
        trace!("polling {} target(s)", self.targets.len());

        let probes = self.targets.iter().map(|target| {
            let probe = self.probe.clone();
            let timeout = self.timeout;
            async move {
                let start = Instant::now();
                let result = with_timeout(timeout, probe.probe(target)).await;
                (TargetName::from(target.name.as_str()), result, start.elapsed())
            }
        });
        let results = join_all(probes).await;

        for (target, result, latency) in results {
            self.apply(target, result, latency).await;
        }
    }

    async fn apply(
        &mut self,
        target: TargetName,
        result: WatchtowerResult<ProbeReport>,
        latency: Duration,
    ) {
        let previous = self
            .records
            .remove(&target)
            .unwrap_or_else(|| HealthRecord::unknown(target.clone()));

        let mut record = evaluate(previous.clone(), result, latency, self.tiers);
        let remediated = self.recovery.observe(&mut record).await;

        if record.status != previous.status {
            debug!("{} is now {} (was {})", target, record.status, previous.status);
        }

        let event = HealthEvent {
            record: record.clone(),
            previous: previous.status,
            remediated,
        };
        self.records.insert(target, record);

        // no subscribers is fine
        let _ = self.event_tx.send(event);
    }
}

/// Next record for a target given the probe outcome
pub fn evaluate(
    previous: HealthRecord,
    result: WatchtowerResult<ProbeReport>,
    latency: Duration,
    tiers: LatencyTiers,
) -> HealthRecord {
    let last_check = Some(Utc::now());

    match result {
        Ok(report) => HealthRecord {
            status: HealthStatus::from_latency(latency, tiers),
            latency_ms: Some(u64::try_from(latency.as_millis()).unwrap_or(u64::MAX)),
            last_check,
            error: None,
            consecutive_failures: 0,
            capabilities: report.capabilities.or(previous.capabilities),
            target: previous.target,
        },
        Err(e) => {
            warn!("probe of {} failed: {e}", previous.target);
            HealthRecord {
                status: HealthStatus::Unhealthy,
                latency_ms: None,
                last_check,
                error: Some(e.to_string()),
                consecutive_failures: previous.consecutive_failures.saturating_add(1),
                capabilities: previous.capabilities,
                target: previous.target,
            }
        }
    }
}

/// Handle for controlling the HealthPoller
#[derive(Clone)]
pub struct HealthPollerHandle {
    sender: mpsc::Sender<PollerCommand>,
    event_tx: broadcast::Sender<HealthEvent>,
    task: TaskSlot,
}

impl HealthPollerHandle {
    pub fn spawn(config: &HealthConfig, probe: Arc<dyn Probe>, recovery: AutoRecovery) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (event_tx, _) = broadcast::channel(256);

        let actor = HealthPoller::new(config, probe, recovery, cmd_rx, event_tx.clone());
        let task = TaskSlot::new(tokio::spawn(actor.run()));

        Self {
            sender: cmd_tx,
            event_tx,
            task,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HealthEvent> {
        self.event_tx.subscribe()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> PollerCommand,
    ) -> WatchtowerResult<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| WatchtowerError::ActorUnavailable("health poller"))?;
        rx.await
            .map_err(|_| WatchtowerError::ActorUnavailable("health poller"))
    }

    pub async fn poll_now(&self) -> WatchtowerResult<HealthRecords> {
        self.request(|respond_to| PollerCommand::PollNow { respond_to })
            .await
    }

    pub async fn records(&self) -> WatchtowerResult<HealthRecords> {
        self.request(|respond_to| PollerCommand::Records { respond_to })
            .await
    }

    pub async fn record(&self, target: TargetName) -> WatchtowerResult<Option<HealthRecord>> {
        self.request(|respond_to| PollerCommand::Record { target, respond_to })
            .await
    }

    pub async fn reset_failures(&self, target: TargetName) -> WatchtowerResult<bool> {
        self.request(|respond_to| PollerCommand::ResetFailures { target, respond_to })
            .await
    }

    /// Change the polling period; the new ticker fires immediately
    pub async fn update_interval(&self, interval_secs: u64) -> WatchtowerResult<()> {
        if interval_secs == 0 {
            return Err(WatchtowerError::Config(
                "poll interval must be at least 1 second".to_string(),
            ));
        }

        self.sender
            .send(PollerCommand::UpdateInterval { interval_secs })
            .await
            .map_err(|_| WatchtowerError::ActorUnavailable("health poller"))
    }

    pub async fn shutdown(&self) {
        let _ = self.sender.send(PollerCommand::Shutdown).await;
        self.task.join().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecoveryConfig;
    use crate::remediation::LogRemediator;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails for targets in `down`, succeeds for the rest
    #[derive(Default)]
    struct ScriptedProbe {
        down: Mutex<HashSet<String>>,
        calls: AtomicUsize,
    }

    impl ScriptedProbe {
        fn set_down(&self, target: &str, down: bool) {
            let mut set = self.down.lock().unwrap();
            if down {
                set.insert(target.to_string());
            } else {
                set.remove(target);
            }
        }
    }

    #[async_trait]
    impl Probe for ScriptedProbe {
        async fn probe(&self, target: &TargetConfig) -> WatchtowerResult<ProbeReport> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.down.lock().unwrap().contains(&target.name) {
                Err(WatchtowerError::Probe("connection refused".to_string()))
            } else {
                Ok(ProbeReport {
                    capabilities: Some(vec!["restart".to_string()]),
                })
            }
        }
    }

    fn config(names: &[&str]) -> HealthConfig {
        HealthConfig {
            poll_interval_secs: 3600,
            targets: names
                .iter()
                .map(|name| TargetConfig {
                    name: name.to_string(),
                    url: format!("http://{name}.internal/health"),
                    body_pattern: None,
                })
                .collect(),
            ..HealthConfig::default()
        }
    }

    fn recovery() -> AutoRecovery {
        AutoRecovery::new(&RecoveryConfig::default(), Arc::new(LogRemediator))
    }

    #[test]
    fn test_evaluate_counts_consecutive_failures() {
        let tiers = LatencyTiers::default();
        let failure = || Err(WatchtowerError::Probe("refused".to_string()));

        let record = HealthRecord::unknown(TargetName::from("api"));
        let record = evaluate(record, failure(), Duration::ZERO, tiers);
        let record = evaluate(record, failure(), Duration::ZERO, tiers);
        assert_eq!(record.consecutive_failures, 2);
        assert_eq!(record.status, HealthStatus::Unhealthy);

        let record = evaluate(
            record,
            Ok(ProbeReport::default()),
            Duration::from_millis(250),
            tiers,
        );
        assert_eq!(record.consecutive_failures, 0);
        assert_eq!(record.status, HealthStatus::Degraded);
        assert_eq!(record.latency_ms, Some(250));
        assert_eq!(record.error, None);
    }

    #[test]
    fn test_evaluate_saturates_huge_latency() {
        let record = evaluate(
            HealthRecord::unknown(TargetName::from("api")),
            Ok(ProbeReport::default()),
            Duration::MAX,
            LatencyTiers::default(),
        );
        assert_eq!(record.latency_ms, Some(u64::MAX));
    }

    #[tokio::test]
    async fn test_records_start_unknown_and_update_on_poll() {
        let probe = Arc::new(ScriptedProbe::default());
        probe.set_down("db", true);
        let config = config(&["api", "db"]);

        // construct directly so no tick can run before we look
        let (_tx, rx) = mpsc::channel(1);
        let (event_tx, _) = broadcast::channel(16);
        let mut poller = HealthPoller::new(&config, probe.clone(), recovery(), rx, event_tx);

        assert_eq!(
            poller.records[&TargetName::from("api")].status,
            HealthStatus::Unknown
        );

        poller.poll_all().await;

        let api = &poller.records[&TargetName::from("api")];
        assert_eq!(api.status, HealthStatus::Healthy);
        assert_eq!(api.capabilities, Some(vec!["restart".to_string()]));

        let db = &poller.records[&TargetName::from("db")];
        assert_eq!(db.status, HealthStatus::Unhealthy);
        assert_eq!(db.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_handle_poll_now_and_reset() {
        let probe = Arc::new(ScriptedProbe::default());
        probe.set_down("db", true);
        let handle = HealthPollerHandle::spawn(&config(&["db"]), probe.clone(), recovery());
        let mut events = handle.subscribe();

        let records = handle.poll_now().await.unwrap();
        assert!(records[&TargetName::from("db")].consecutive_failures >= 1);

        let event = events.recv().await.unwrap();
        assert_eq!(event.record.target, TargetName::from("db"));

        assert!(handle.reset_failures(TargetName::from("db")).await.unwrap());
        assert!(!handle.reset_failures(TargetName::from("nope")).await.unwrap());

        let record = handle.record(TargetName::from("db")).await.unwrap().unwrap();
        assert_eq!(record.consecutive_failures, 0);

        handle.shutdown().await;
        assert!(handle.records().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_interval_reschedules_polls() {
        let probe = Arc::new(ScriptedProbe::default());
        let handle = HealthPollerHandle::spawn(&config(&["api"]), probe.clone(), recovery());
        let calls = || probe.calls.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(calls(), 1);

        let rejected = handle.update_interval(0).await;
        assert!(matches!(rejected, Err(WatchtowerError::Config(_))));

        handle.update_interval(10).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(calls(), 2);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(calls(), 3);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(calls(), 4);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_remediation_does_not_block_polling() {
        struct StuckRemediator;

        #[async_trait]
        impl crate::remediation::Remediator for StuckRemediator {
            async fn remediate(
                &self,
                _action: &crate::remediation::RemediationAction,
            ) -> WatchtowerResult<()> {
                std::future::pending().await
            }
        }

        let probe = Arc::new(ScriptedProbe::default());
        probe.set_down("api", true);
        let recovery = AutoRecovery::new(
            &RecoveryConfig {
                failure_threshold: 1,
                remediation_timeout_secs: 600,
                ..RecoveryConfig::default()
            },
            Arc::new(StuckRemediator),
        );
        let handle = HealthPollerHandle::spawn(&config(&["api"]), probe.clone(), recovery);

        for _ in 0..2 {
            let records = tokio::time::timeout(Duration::from_secs(5), handle.poll_now())
                .await
                .expect("poll waited on remediation")
                .unwrap();
            assert_eq!(records[&TargetName::from("api")].status, HealthStatus::Unhealthy);
        }

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_probe_times_out() {
        struct StallingProbe;

        #[async_trait]
        impl Probe for StallingProbe {
            async fn probe(&self, _target: &TargetConfig) -> WatchtowerResult<ProbeReport> {
                std::future::pending().await
            }
        }

        let (_tx, rx) = mpsc::channel(1);
        let (event_tx, _) = broadcast::channel(16);
        let mut poller = HealthPoller::new(
            &HealthConfig {
                timeout_secs: 2,
                ..config(&["api"])
            },
            Arc::new(StallingProbe),
            recovery(),
            rx,
            event_tx,
        );

        poller.poll_all().await;

        let record = &poller.records[&TargetName::from("api")];
        assert_eq!(record.status, HealthStatus::Unhealthy);
        assert_eq!(record.error.as_deref(), Some("timed out after 2s"));
    }
}
