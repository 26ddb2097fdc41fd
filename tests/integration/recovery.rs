//! Health polling driving auto-recovery and the alert bridge

use std::sync::Arc;
use std::time::Duration;

use watchtower::{
    TargetName,
    alerts::{AlertHandle, AlertStatus, Severity},
    config::{AlertConfig, HealthConfig, RecoveryConfig},
    health::{AutoRecovery, HealthPollerHandle, HealthStatus},
    remediation::RemediationAction,
};

use crate::helpers::{RecordingRemediator, ScriptedProbe, target_config};

fn health_config() -> HealthConfig {
    HealthConfig {
        poll_interval_secs: 30,
        targets: vec![target_config("api"), target_config("db")],
        ..HealthConfig::default()
    }
}

fn recovery_config() -> RecoveryConfig {
    RecoveryConfig {
        failure_threshold: 3,
        cooldown_secs: 300,
        ..RecoveryConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_exactly_one_remediation_within_cooldown() {
    let probe = Arc::new(ScriptedProbe::default());
    probe.set_down("api", true);
    let remediator = Arc::new(RecordingRemediator::default());

    let recovery = AutoRecovery::new(&recovery_config(), remediator.clone());
    let poller = HealthPollerHandle::spawn(&health_config(), probe.clone(), recovery);

    // polls at 0s, 30s, ..., 330s: threshold reached at 60s, next allowed at 360s
    tokio::time::sleep(Duration::from_secs(345)).await;
    assert_eq!(
        remediator.actions(),
        vec![RemediationAction::Restart {
            target: TargetName::from("api")
        }]
    );

    let db = poller.record(TargetName::from("db")).await.unwrap().unwrap();
    assert_eq!(db.status, HealthStatus::Healthy);
    assert_eq!(db.consecutive_failures, 0);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(remediator.count(), 2);

    poller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_remediation_resets_failure_counter() {
    let probe = Arc::new(ScriptedProbe::default());
    probe.set_down("api", true);
    let remediator = Arc::new(RecordingRemediator::default());

    let recovery = AutoRecovery::new(&recovery_config(), remediator.clone());
    let poller = HealthPollerHandle::spawn(&health_config(), probe, recovery);

    // polls at 0s, 30s, 60s (remediation), 90s
    tokio::time::sleep(Duration::from_secs(100)).await;

    let api = poller.record(TargetName::from("api")).await.unwrap().unwrap();
    assert_eq!(api.status, HealthStatus::Unhealthy);
    assert_eq!(api.consecutive_failures, 1);
    assert_eq!(remediator.count(), 1);

    poller.shutdown().await;
}

#[tokio::test]
async fn test_unhealthy_target_raises_and_resolves_alert() {
    let probe = Arc::new(ScriptedProbe::default());
    probe.set_down("api", true);

    let alerts = AlertHandle::spawn(&AlertConfig::default(), vec![]);
    let recovery = AutoRecovery::new(
        &RecoveryConfig {
            failure_threshold: 2,
            ..recovery_config()
        },
        Arc::new(RecordingRemediator::default()),
    )
    .with_alerts(alerts.clone());

    let poller = HealthPollerHandle::spawn(
        &HealthConfig {
            poll_interval_secs: 3600,
            targets: vec![target_config("api")],
            ..HealthConfig::default()
        },
        probe.clone(),
        recovery,
    );

    // the first tick may or may not have run yet; poll until the threshold is hit
    while alerts.active().await.unwrap().is_empty() {
        poller.poll_now().await.unwrap();
    }

    let active = alerts.active().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].severity, Severity::Warning);
    assert_eq!(active[0].title, "Target api unhealthy");

    probe.set_down("api", false);
    let records = poller.poll_now().await.unwrap();
    assert_eq!(records[&TargetName::from("api")].status, HealthStatus::Healthy);

    assert!(alerts.active().await.unwrap().is_empty());
    let resolved = alerts.history(1).await.unwrap();
    assert_eq!(resolved[0].status, AlertStatus::Resolved);

    poller.shutdown().await;
    alerts.shutdown().await;
}
