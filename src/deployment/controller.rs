//! DeploymentController - watches a deployment and rolls it back on critical breaches
//!
//! ## Message Flow
//!
//! ```text
//! Monitor tick (only while a run is active) → collect metrics → evaluate thresholds
//!     ├─ critical breach  → RollingBack → rollback steps via Remediator → RolledBack | Failed
//!     ├─ other breaches   → Warning alert
//!     └─ window elapsed   → Success
//!     ↑
//!     └─── Commands (Start, Complete, Current, History, Shutdown)
//! ```
//!
//! A run leaves the active slot exactly once, through `finish`, which is what
//! stops monitoring.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::alerts::{AlertHandle, NewAlert, Severity};
use crate::config::{DeploymentConfig, DeploymentThresholds};
use crate::error::{WatchtowerError, WatchtowerResult, with_timeout};
use crate::ids::DeploymentId;
use crate::remediation::{RemediationAction, Remediator};
use crate::util::TaskSlot;

use super::metrics::DeploymentMetricsSource;
use super::model::{DeploymentEvent, DeploymentRun, DeploymentStatus, StepOutcome, evaluate};

#[derive(Debug)]
pub enum DeploymentCommand {
    Start {
        id: DeploymentId,
        version: String,
        respond_to: oneshot::Sender<WatchtowerResult<DeploymentRun>>,
    },

    /// Finalize the active run as reported by the deployer
    Complete {
        success: bool,
        respond_to: oneshot::Sender<WatchtowerResult<DeploymentRun>>,
    },

    Current {
        respond_to: oneshot::Sender<Option<DeploymentRun>>,
    },

    History {
        respond_to: oneshot::Sender<Vec<DeploymentRun>>,
    },

    Shutdown,
}

struct ActiveRun {
    run: DeploymentRun,
    monitoring_since: Instant,
}

pub fn deployment_source(id: &DeploymentId) -> String {
    format!("deployment:{id}")
}

pub struct DeploymentController {
    metrics: Option<Arc<dyn DeploymentMetricsSource>>,
    remediator: Arc<dyn Remediator>,
    alerts: Option<AlertHandle>,
    thresholds: DeploymentThresholds,
    rollback_steps: Vec<String>,
    monitor_interval: Duration,
    monitoring_window: Duration,
    step_timeout: Duration,
    history_limit: usize,
    active: Option<ActiveRun>,
    history: VecDeque<DeploymentRun>,
    command_rx: mpsc::Receiver<DeploymentCommand>,
    event_tx: broadcast::Sender<DeploymentEvent>,
}

impl DeploymentController {
    pub fn new(
        config: &DeploymentConfig,
        metrics: Option<Arc<dyn DeploymentMetricsSource>>,
        remediator: Arc<dyn Remediator>,
        alerts: Option<AlertHandle>,
        command_rx: mpsc::Receiver<DeploymentCommand>,
        event_tx: broadcast::Sender<DeploymentEvent>,
    ) -> Self {
        Self {
            metrics,
            remediator,
            alerts,
            thresholds: config.thresholds,
            rollback_steps: config.rollback_steps.clone(),
            monitor_interval: config.monitor_interval(),
            monitoring_window: config.monitoring_window(),
            step_timeout: config.step_timeout(),
            history_limit: config.history_limit,
            active: None,
            history: VecDeque::new(),
            command_rx,
            event_tx,
        }
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting deployment controller");

        let mut ticker = interval_at(
            Instant::now() + self.monitor_interval,
            self.monitor_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick(), if self.active.is_some() => {
                    self.monitor().await;
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        DeploymentCommand::Start { id, version, respond_to } => {
                            let result = self.start(id, version);
                            if result.is_ok() {
                                ticker.reset();
                            }
                            let _ = respond_to.send(result);
                        }

                        DeploymentCommand::Complete { success, respond_to } => {
                            let _ = respond_to.send(self.complete(success).await);
                        }

                        DeploymentCommand::Current { respond_to } => {
                            let _ = respond_to.send(self.active.as_ref().map(|a| a.run.clone()));
                        }

                        DeploymentCommand::History { respond_to } => {
                            let _ = respond_to.send(self.history.iter().rev().cloned().collect());
                        }

                        DeploymentCommand::Shutdown => {
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

        debug!("deployment controller stopped");
    }

    fn start(&mut self, id: DeploymentId, version: String) -> WatchtowerResult<DeploymentRun> {
        if let Some(active) = &self.active {
            return Err(WatchtowerError::DeploymentActive(active.run.id.to_string()));
        }

        info!("deployment {id} of version {version} started");
        self.active = Some(ActiveRun {
            run: DeploymentRun::new(id, version),
            monitoring_since: Instant::now(),
        });
        self.advance(DeploymentStatus::InProgress)?;

        self.current()
    }

    async fn complete(&mut self, success: bool) -> WatchtowerResult<DeploymentRun> {
        let status = self.current()?.status;
        if status != DeploymentStatus::InProgress {
            return Err(WatchtowerError::InvalidTransition(format!(
                "cannot complete a deployment that is {status}"
            )));
        }

        if success {
            self.finish(DeploymentStatus::Success).await
        } else {
            if let Some(active) = &mut self.active {
                active.run.failure_reason = Some("reported failed by deployer".to_string());
            }
            self.finish(DeploymentStatus::Failed).await
        }
    }

    fn current(&self) -> WatchtowerResult<DeploymentRun> {
        self.active
            .as_ref()
            .map(|a| a.run.clone())
            .ok_or(WatchtowerError::NoActiveDeployment)
    }

    /// One monitoring tick for the active run
    async fn monitor(&mut self) {
        let Some(active) = &self.active else {
            return;
        };
        let run = active.run.clone();
        let window_elapsed = active.monitoring_since.elapsed() >= self.monitoring_window;

        if let Some(source) = &self.metrics {
            match with_timeout(self.step_timeout, source.collect(&run)).await {
                Ok(metrics) => {
                    trace!("deployment {} metrics: {metrics:?}", run.id);
                    if let Some(active) = &mut self.active {
                        active.run.last_metrics = Some(metrics);
                    }

                    let breaches = evaluate(&metrics, &self.thresholds);
                    if let Some(critical) = breaches.iter().find(|b| b.critical) {
                        self.rollback(critical.to_string()).await;
                        return;
                    }

                    if !breaches.is_empty() {
                        let summary: Vec<String> = breaches.iter().map(|b| b.to_string()).collect();
                        warn!("deployment {} breaching thresholds: {}", run.id, summary.join(", "));
                        self.raise(
                            NewAlert::new(
                                Severity::Warning,
                                deployment_source(&run.id),
                                format!("Deployment {} breaching thresholds", run.id),
                            )
                            .description(summary.join("\n"))
                            .label("version", run.version.as_str()),
                        )
                        .await;
                    }
                }
                Err(e) => warn!("failed to collect metrics for deployment {}: {e}", run.id),
            }
        }

        if window_elapsed {
            info!("deployment {} passed its monitoring window", run.id);
            if let Err(e) = self.finish(DeploymentStatus::Success).await {
                error!("failed to finish deployment {}: {e}", run.id);
            }
        }
    }

    #[instrument(skip(self))]
    async fn rollback(&mut self, reason: String) {
        if let Err(e) = self.advance(DeploymentStatus::RollingBack) {
            error!("cannot roll back: {e}");
            return;
        }

        let Ok(run) = self.current() else {
            return;
        };
        if let Some(active) = &mut self.active {
            active.run.failure_reason = Some(reason.clone());
        }

        warn!("rolling back deployment {}: {reason}", run.id);
        self.raise(
            NewAlert::new(
                Severity::Critical,
                deployment_source(&run.id),
                format!("Deployment {} rolling back", run.id),
            )
            .description(reason)
            .label("version", run.version.as_str()),
        )
        .await;

        let mut outcome = DeploymentStatus::RolledBack;
        for step in self.rollback_steps.clone() {
            let action = RemediationAction::RollbackStep {
                deployment: run.id.clone(),
                version: run.version.clone(),
                step: step.clone(),
            };

            debug!("running rollback step {step}");
            let result = with_timeout(self.step_timeout, self.remediator.remediate(&action)).await;

            let failed = result.as_ref().err().map(|e| e.to_string());
            if let Some(active) = &mut self.active {
                active.run.rollback_steps.push(StepOutcome {
                    step: step.clone(),
                    succeeded: failed.is_none(),
                    error: failed.clone(),
                });
            }

            if let Some(e) = failed {
                error!("rollback step {step} of deployment {} failed: {e}", run.id);
                self.raise(
                    NewAlert::new(
                        Severity::Emergency,
                        deployment_source(&run.id),
                        format!("Deployment {} rollback failed", run.id),
                    )
                    .description(format!("step {step} failed: {e}"))
                    .label("version", run.version.as_str()),
                )
                .await;
                outcome = DeploymentStatus::Failed;
                break;
            }
        }

        if let Err(e) = self.finish(outcome).await {
            error!("failed to finish deployment {}: {e}", run.id);
        }
    }

    /// Change the active run's status and publish the change
    fn advance(&mut self, to: DeploymentStatus) -> WatchtowerResult<()> {
        let run = self
            .active
            .as_mut()
            .map(|a| &mut a.run)
            .ok_or(WatchtowerError::NoActiveDeployment)?;

        let from = run.transition(to)?;
        info!("deployment {}: {from} -> {to}", run.id);

        let _ = self.event_tx.send(DeploymentEvent {
            deployment: run.id.clone(),
            from,
            to,
            at: chrono::Utc::now(),
        });
        Ok(())
    }

    /// Move the active run into a terminal status and out of the active slot
    async fn finish(&mut self, to: DeploymentStatus) -> WatchtowerResult<DeploymentRun> {
        debug_assert!(to.is_terminal());
        self.advance(to)?;

        let run = self
            .active
            .take()
            .map(|a| a.run)
            .ok_or(WatchtowerError::NoActiveDeployment)?;

        if to == DeploymentStatus::Success
            && let Some(alerts) = &self.alerts
            && let Err(e) = alerts.resolve_source(deployment_source(&run.id)).await
        {
            warn!("failed to resolve alerts for deployment {}: {e}", run.id);
        }

        self.history.push_back(run.clone());
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }

        Ok(run)
    }

    async fn raise(&self, alert: NewAlert) {
        let Some(alerts) = &self.alerts else {
            return;
        };

        if let Err(e) = alerts.create(alert).await {
            warn!("failed to raise alert: {e}");
        }
    }
}

/// Handle for controlling the DeploymentController
#[derive(Clone)]
pub struct DeploymentHandle {
    sender: mpsc::Sender<DeploymentCommand>,
    event_tx: broadcast::Sender<DeploymentEvent>,
    task: TaskSlot,
}

impl DeploymentHandle {
    pub fn spawn(
        config: &DeploymentConfig,
        metrics: Option<Arc<dyn DeploymentMetricsSource>>,
        remediator: Arc<dyn Remediator>,
        alerts: Option<AlertHandle>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (event_tx, _) = broadcast::channel(64);

        let actor = DeploymentController::new(
            config,
            metrics,
            remediator,
            alerts,
            cmd_rx,
            event_tx.clone(),
        );
        let task = TaskSlot::new(tokio::spawn(actor.run()));

        Self {
            sender: cmd_tx,
            event_tx,
            task,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeploymentEvent> {
        self.event_tx.subscribe()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> DeploymentCommand,
    ) -> WatchtowerResult<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| WatchtowerError::ActorUnavailable("deployment controller"))?;
        rx.await
            .map_err(|_| WatchtowerError::ActorUnavailable("deployment controller"))
    }

    pub async fn start(
        &self,
        id: DeploymentId,
        version: impl Into<String>,
    ) -> WatchtowerResult<DeploymentRun> {
        let version = version.into();
        self.request(|respond_to| DeploymentCommand::Start {
            id,
            version,
            respond_to,
        })
        .await?
    }

    pub async fn complete(&self, success: bool) -> WatchtowerResult<DeploymentRun> {
        self.request(|respond_to| DeploymentCommand::Complete {
            success,
            respond_to,
        })
        .await?
    }

    pub async fn current(&self) -> WatchtowerResult<Option<DeploymentRun>> {
        self.request(|respond_to| DeploymentCommand::Current { respond_to })
            .await
    }

    /// Finished runs, newest first
    pub async fn history(&self) -> WatchtowerResult<Vec<DeploymentRun>> {
        self.request(|respond_to| DeploymentCommand::History { respond_to })
            .await
    }

    pub async fn shutdown(&self) {
        let _ = self.sender.send(DeploymentCommand::Shutdown).await;
        self.task.join().await;
    }
}
