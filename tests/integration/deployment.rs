//! Deployment rollback lifecycle

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use watchtower::{
    DeploymentId,
    alerts::{AlertHandle, Severity},
    config::{AlertConfig, DeploymentConfig},
    deployment::{DeploymentHandle, DeploymentStatus},
    remediation::RemediationAction,
};

use crate::helpers::{CountingMetrics, RecordingRemediator};

#[tokio::test(start_paused = true)]
async fn test_critical_error_rate_rolls_back_and_stops_monitoring() {
    let metrics = Arc::new(CountingMetrics::with_error_rate(0.25));
    let remediator = Arc::new(RecordingRemediator::default());
    let alerts = AlertHandle::spawn(&AlertConfig::default(), vec![]);

    let deployments = DeploymentHandle::spawn(
        &DeploymentConfig::default(),
        Some(metrics.clone()),
        remediator.clone(),
        Some(alerts.clone()),
    );
    let mut events = deployments.subscribe();

    let run = deployments
        .start(DeploymentId::from("deploy-42"), "3.1.0")
        .await
        .unwrap();
    assert_eq!(run.status, DeploymentStatus::InProgress);

    // first monitoring tick at 30s
    tokio::time::sleep(Duration::from_secs(31)).await;

    let mut transitions = Vec::new();
    while let Ok(event) = events.try_recv() {
        transitions.push((event.from, event.to));
    }
    assert_eq!(
        transitions,
        vec![
            (DeploymentStatus::Pending, DeploymentStatus::InProgress),
            (DeploymentStatus::InProgress, DeploymentStatus::RollingBack),
            (DeploymentStatus::RollingBack, DeploymentStatus::RolledBack),
        ]
    );

    let steps: Vec<String> = remediator
        .actions()
        .into_iter()
        .map(|action| match action {
            RemediationAction::RollbackStep { step, .. } => step,
            other => panic!("unexpected action {other:?}"),
        })
        .collect();
    assert_eq!(
        steps,
        vec![
            "drain_traffic",
            "restore_previous_version",
            "verify_health",
            "restore_traffic"
        ]
    );

    let history = deployments.history().await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, DeploymentStatus::RolledBack);
    assert!(history[0].rollback_triggered);
    assert!(history[0].ended_at.is_some());
    assert!(deployments.current().await.unwrap().is_none());

    let collected = metrics.count();
    assert_eq!(collected, 1);

    // no further collection once the run has ended
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(metrics.count(), collected);

    let active = alerts.active().await.unwrap();
    assert!(active.iter().any(|a| a.severity == Severity::Critical));

    deployments.shutdown().await;
    alerts.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_moderate_error_rate_warns_without_rollback() {
    let metrics = Arc::new(CountingMetrics::with_error_rate(0.07));
    let remediator = Arc::new(RecordingRemediator::default());
    let alerts = AlertHandle::spawn(&AlertConfig::default(), vec![]);

    let deployments = DeploymentHandle::spawn(
        &DeploymentConfig::default(),
        Some(metrics.clone()),
        remediator.clone(),
        Some(alerts.clone()),
    );

    deployments
        .start(DeploymentId::from("deploy-43"), "3.1.1")
        .await
        .unwrap();

    // three ticks, one deduplicated warning
    tokio::time::sleep(Duration::from_secs(95)).await;

    let run = deployments.current().await.unwrap().unwrap();
    assert_eq!(run.status, DeploymentStatus::InProgress);
    assert!(!run.rollback_triggered);
    assert_eq!(remediator.count(), 0);

    let active = alerts.active().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].severity, Severity::Warning);
    assert_eq!(active[0].duplicates, 2);

    // completing successfully resolves the deployment's warnings
    let finished = deployments.complete(true).await.unwrap();
    assert_eq!(finished.status, DeploymentStatus::Success);
    assert!(alerts.active().await.unwrap().is_empty());

    deployments.shutdown().await;
    alerts.shutdown().await;
}
