//! AlertActor - owns the alert engine, runs the escalation sweep, dispatches notifications
//!
//! ## Message Flow
//!
//! ```text
//! Commands (Create, Acknowledge, Resolve, ...) ─→ AlertEngine ─→ notifications ─→ [sinks]
//! Sweep tick ─────────────────────────────────────→ AlertEngine ─→ escalations   ─→ [sinks]
//! ```
//!
//! Every state transition happens inside the actor, so transitions are
//! atomic with respect to each other. Notifications are dispatched after the
//! transition; a failing or slow sink (bounded by `notify_timeout`) is logged
//! and never undoes it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, interval_at};
use tracing::{debug, instrument, trace, warn};

use crate::config::AlertConfig;
use crate::error::{WatchtowerError, WatchtowerResult, with_timeout};
use crate::ids::AlertId;
use crate::util::TaskSlot;

use super::engine::AlertEngine;
use super::model::{Alert, AlertOutcome, AlertStats, NewAlert, Notification};
use super::sink::NotificationSink;

/// Commands that can be sent to the AlertActor
#[derive(Debug)]
pub enum AlertCommand {
    Create {
        alert: NewAlert,
        respond_to: oneshot::Sender<AlertOutcome>,
    },

    Acknowledge {
        id: AlertId,
        by: Option<String>,
        respond_to: oneshot::Sender<WatchtowerResult<Alert>>,
    },

    Resolve {
        id: AlertId,
        respond_to: oneshot::Sender<WatchtowerResult<Alert>>,
    },

    /// Resolve every open alert from one source
    ResolveSource {
        source: String,
        respond_to: oneshot::Sender<Vec<Alert>>,
    },

    Get {
        id: AlertId,
        respond_to: oneshot::Sender<Option<Alert>>,
    },

    Active {
        respond_to: oneshot::Sender<Vec<Alert>>,
    },

    History {
        limit: usize,
        respond_to: oneshot::Sender<Vec<Alert>>,
    },

    Stats {
        respond_to: oneshot::Sender<AlertStats>,
    },

    /// Run an escalation sweep immediately; responds with the number escalated
    SweepNow { respond_to: oneshot::Sender<usize> },

    /// Stop sending notifications for a while (state transitions continue)
    Mute {
        duration_secs: u64,
        respond_to: oneshot::Sender<()>,
    },

    Unmute { respond_to: oneshot::Sender<()> },

    Shutdown,
}

pub struct AlertActor {
    engine: AlertEngine,
    sinks: Vec<Arc<dyn NotificationSink>>,
    command_rx: mpsc::Receiver<AlertCommand>,
    sweep_interval: Duration,
    notify_timeout: Duration,
    muted_until: Option<Instant>,
}

impl AlertActor {
    pub fn new(
        config: &AlertConfig,
        sinks: Vec<Arc<dyn NotificationSink>>,
        command_rx: mpsc::Receiver<AlertCommand>,
    ) -> Self {
        Self {
            engine: AlertEngine::new(config),
            sinks,
            command_rx,
            sweep_interval: config.sweep_interval(),
            notify_timeout: config.notify_timeout(),
            muted_until: None,
        }
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting alert actor");

        let mut sweeper = interval_at(Instant::now() + self.sweep_interval, self.sweep_interval);

        loop {
            tokio::select! {
                _ = sweeper.tick() => {
                    let escalated = self.sweep().await;
                    trace!("escalation sweep escalated {escalated} alert(s)");
                }

                Some(cmd) = self.command_rx.recv() => {
                    if !self.handle_command(cmd).await {
                        break;
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("alert actor stopped");
    }

    /// Returns `false` when the actor should stop
    async fn handle_command(&mut self, cmd: AlertCommand) -> bool {
        match cmd {
            AlertCommand::Create { alert, respond_to } => {
                let (outcome, notification) = self.engine.create(alert, Utc::now());
                if let Some(notification) = notification {
                    self.dispatch(vec![notification]).await;
                }
                let _ = respond_to.send(outcome);
            }

            AlertCommand::Acknowledge { id, by, respond_to } => {
                let _ = respond_to.send(self.engine.acknowledge(id, by, Utc::now()));
            }

            AlertCommand::Resolve { id, respond_to } => match self.engine.resolve(id, Utc::now()) {
                Ok((alert, notification)) => {
                    self.dispatch(notification.into_iter().collect()).await;
                    let _ = respond_to.send(Ok(alert));
                }
                Err(e) => {
                    let _ = respond_to.send(Err(e));
                }
            },

            AlertCommand::ResolveSource { source, respond_to } => {
                let (alerts, notifications): (Vec<_>, Vec<_>) = self
                    .engine
                    .resolve_source(&source, Utc::now())
                    .into_iter()
                    .unzip();
                self.dispatch(notifications.into_iter().flatten().collect())
                    .await;
                let _ = respond_to.send(alerts);
            }

            AlertCommand::Get { id, respond_to } => {
                let _ = respond_to.send(self.engine.get(id).cloned());
            }

            AlertCommand::Active { respond_to } => {
                let _ = respond_to.send(self.engine.active());
            }

            AlertCommand::History { limit, respond_to } => {
                let _ = respond_to.send(self.engine.history(limit));
            }

            AlertCommand::Stats { respond_to } => {
                let _ = respond_to.send(self.engine.stats(Utc::now()));
            }

            AlertCommand::SweepNow { respond_to } => {
                let escalated = self.sweep().await;
                let _ = respond_to.send(escalated);
            }

            AlertCommand::Mute {
                duration_secs,
                respond_to,
            } => {
                debug!("muting notifications for {duration_secs}s");
                self.muted_until = Some(Instant::now() + Duration::from_secs(duration_secs));
                let _ = respond_to.send(());
            }

            AlertCommand::Unmute { respond_to } => {
                debug!("unmuting notifications");
                self.muted_until = None;
                let _ = respond_to.send(());
            }

            AlertCommand::Shutdown => {
                debug!("received shutdown command");
                return false;
            }
        }

        true
    }

    async fn sweep(&mut self) -> usize {
        let notifications = self.engine.sweep(Utc::now());
        let escalated = notifications.len();
        self.dispatch(notifications).await;
        escalated
    }

    fn is_muted(&mut self) -> bool {
        match self.muted_until {
            Some(until) if Instant::now() < until => true,
            Some(_) => {
                debug!("mute window elapsed");
                self.muted_until = None;
                false
            }
            None => false,
        }
    }

    async fn dispatch(&mut self, notifications: Vec<Notification>) {
        if notifications.is_empty() {
            return;
        }

        if self.is_muted() {
            debug!("muted, dropping {} notification(s)", notifications.len());
            return;
        }

        let notify_timeout = self.notify_timeout;
        for notification in &notifications {
            let deliveries = self.sinks.iter().map(|sink| async move {
                let result = with_timeout(notify_timeout, sink.notify(notification)).await;
                if let Err(e) = result {
                    warn!(
                        "{}: notification for alert {} failed: {e}",
                        sink.name(),
                        notification.alert.id
                    );
                }
            });
            join_all(deliveries).await;
        }
    }
}

/// Handle for controlling the AlertActor
#[derive(Clone)]
pub struct AlertHandle {
    sender: mpsc::Sender<AlertCommand>,
    task: TaskSlot,
}

impl AlertHandle {
    pub fn spawn(config: &AlertConfig, sinks: Vec<Arc<dyn NotificationSink>>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);

        let actor = AlertActor::new(config, sinks, cmd_rx);
        let task = TaskSlot::new(tokio::spawn(actor.run()));

        Self {
            sender: cmd_tx,
            task,
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> AlertCommand,
    ) -> WatchtowerResult<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| WatchtowerError::ActorUnavailable("alert engine"))?;
        rx.await
            .map_err(|_| WatchtowerError::ActorUnavailable("alert engine"))
    }

    /// Create an alert; Critical/Emergency alerts are notified before this returns
    pub async fn create(&self, alert: NewAlert) -> WatchtowerResult<AlertOutcome> {
        self.request(|respond_to| AlertCommand::Create { alert, respond_to })
            .await
    }

    pub async fn acknowledge(&self, id: AlertId, by: Option<String>) -> WatchtowerResult<Alert> {
        self.request(|respond_to| AlertCommand::Acknowledge { id, by, respond_to })
            .await?
    }

    pub async fn resolve(&self, id: AlertId) -> WatchtowerResult<Alert> {
        self.request(|respond_to| AlertCommand::Resolve { id, respond_to })
            .await?
    }

    pub async fn resolve_source(&self, source: impl Into<String>) -> WatchtowerResult<Vec<Alert>> {
        let source = source.into();
        self.request(|respond_to| AlertCommand::ResolveSource { source, respond_to })
            .await
    }

    pub async fn get(&self, id: AlertId) -> WatchtowerResult<Option<Alert>> {
        self.request(|respond_to| AlertCommand::Get { id, respond_to })
            .await
    }

    pub async fn active(&self) -> WatchtowerResult<Vec<Alert>> {
        self.request(|respond_to| AlertCommand::Active { respond_to })
            .await
    }

    pub async fn history(&self, limit: usize) -> WatchtowerResult<Vec<Alert>> {
        self.request(|respond_to| AlertCommand::History { limit, respond_to })
            .await
    }

    pub async fn stats(&self) -> WatchtowerResult<AlertStats> {
        self.request(|respond_to| AlertCommand::Stats { respond_to })
            .await
    }

    pub async fn sweep_now(&self) -> WatchtowerResult<usize> {
        self.request(|respond_to| AlertCommand::SweepNow { respond_to })
            .await
    }

    /// Drop notifications for `duration_secs`; alerts still change state
    pub async fn mute(&self, duration_secs: u64) -> WatchtowerResult<()> {
        self.request(|respond_to| AlertCommand::Mute {
            duration_secs,
            respond_to,
        })
        .await
    }

    pub async fn unmute(&self) -> WatchtowerResult<()> {
        self.request(|respond_to| AlertCommand::Unmute { respond_to })
            .await
    }

    /// Stop the actor and wait for it to exit
    pub async fn shutdown(&self) {
        let _ = self.sender.send(AlertCommand::Shutdown).await;
        self.task.join().await;
    }
}
