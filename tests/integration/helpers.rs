//! Helper types for integration tests

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Notify;
use watchtower::{
    WatchtowerError, WatchtowerResult,
    alerts::{Notification, NotificationKind, NotificationSink},
    config::TargetConfig,
    deployment::{DeploymentMetrics, DeploymentMetricsSource, DeploymentRun},
    health::{Probe, ProbeReport},
    remediation::{RemediationAction, Remediator},
    transport::{OutboundMessage, Transport},
};

pub fn target_config(name: &str) -> TargetConfig {
    TargetConfig {
        name: name.to_string(),
        url: format!("http://{name}.internal/health"),
        body_pattern: None,
    }
}

/// Probe that fails for targets marked down and counts every call
#[derive(Default)]
pub struct ScriptedProbe {
    down: Mutex<HashSet<String>>,
    pub calls: AtomicUsize,
}

impl ScriptedProbe {
    pub fn set_down(&self, target: &str, down: bool) {
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
            Ok(ProbeReport::default())
        }
    }
}

/// Remediator that records every action it is asked to perform
#[derive(Default)]
pub struct RecordingRemediator {
    actions: Mutex<Vec<RemediationAction>>,
}

impl RecordingRemediator {
    pub fn actions(&self) -> Vec<RemediationAction> {
        self.actions.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.actions.lock().unwrap().len()
    }
}

#[async_trait]
impl Remediator for RecordingRemediator {
    async fn remediate(&self, action: &RemediationAction) -> WatchtowerResult<()> {
        self.actions.lock().unwrap().push(action.clone());
        Ok(())
    }
}

/// Notification sink that keeps everything it receives
#[derive(Default)]
pub struct RecordingSink {
    received: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn kinds(&self) -> Vec<NotificationKind> {
        self.received.lock().unwrap().iter().map(|n| n.kind).collect()
    }

    pub fn titles(&self) -> Vec<String> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .map(|n| n.alert.title.clone())
            .collect()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn notify(&self, notification: &Notification) -> WatchtowerResult<()> {
        self.received.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Metrics source returning a fixed sample and counting collections
pub struct CountingMetrics {
    sample: DeploymentMetrics,
    pub calls: AtomicUsize,
}

impl CountingMetrics {
    pub fn with_error_rate(error_rate: f64) -> Self {
        Self {
            sample: DeploymentMetrics {
                success_rate: 1.0 - error_rate,
                latency_ms: 90.0,
                error_rate,
            },
            calls: AtomicUsize::new(0),
        }
    }

    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeploymentMetricsSource for CountingMetrics {
    async fn collect(&self, _run: &DeploymentRun) -> WatchtowerResult<DeploymentMetrics> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.sample)
    }
}

/// Transport whose ping never completes; signals when a ping has started
pub struct StallingTransport {
    pub ping_started: Arc<Notify>,
    pub sent: Mutex<Vec<OutboundMessage>>,
}

impl StallingTransport {
    pub fn new() -> Self {
        Self {
            ping_started: Arc::new(Notify::new()),
            sent: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Transport for StallingTransport {
    async fn send(&self, message: &OutboundMessage) -> WatchtowerResult<()> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn ping(&self) -> WatchtowerResult<()> {
        self.ping_started.notify_one();
        std::future::pending().await
    }

    async fn close(&self) -> WatchtowerResult<()> {
        Ok(())
    }
}
