//! Alert dedupe, escalation and notification fan-out

use std::sync::Arc;

use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use watchtower::{
    alerts::{AlertEngine, AlertHandle, AlertStatus, NewAlert, NotificationKind, Severity},
    config::AlertConfig,
};

use crate::helpers::RecordingSink;

#[tokio::test]
async fn test_trailing_space_duplicate_is_suppressed() {
    let sink = Arc::new(RecordingSink::default());
    let alerts = AlertHandle::spawn(&AlertConfig::default(), vec![sink.clone()]);

    let first = alerts
        .create(NewAlert::new(Severity::Critical, "host-a", "Disk space low on host A"))
        .await
        .unwrap();
    let second = alerts
        .create(NewAlert::new(Severity::Critical, "host-a", "Disk space low on host A "))
        .await
        .unwrap();

    assert!(!first.was_suppressed());
    assert!(second.was_suppressed());
    assert_eq!(second.alert().id, first.alert().id);

    let active = alerts.active().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].duplicates, 1);

    // only the original was notified
    assert_eq!(sink.kinds(), vec![NotificationKind::Raised]);

    let history = alerts.history(10).await.unwrap();
    assert_eq!(history[0].status, AlertStatus::Suppressed);
    assert_eq!(alerts.stats().await.unwrap().suppressed_total, 1);

    alerts.shutdown().await;
}

#[tokio::test]
async fn test_same_title_from_other_source_is_not_suppressed() {
    let alerts = AlertHandle::spawn(&AlertConfig::default(), vec![]);

    alerts
        .create(NewAlert::new(Severity::Warning, "host-a", "Disk space low"))
        .await
        .unwrap();
    let other = alerts
        .create(NewAlert::new(Severity::Warning, "host-b", "Disk space low"))
        .await
        .unwrap();

    assert!(!other.was_suppressed());
    assert_eq!(alerts.active().await.unwrap().len(), 2);

    alerts.shutdown().await;
}

#[test]
fn test_critical_escalates_at_15_30_45_minutes_only() {
    let mut engine = AlertEngine::new(&AlertConfig::default());
    let created = Utc::now();

    let (outcome, notification) = engine.create(
        NewAlert::new(Severity::Critical, "db", "Replication lag critical"),
        created,
    );
    assert!(notification.is_some());
    let id = outcome.alert().id;

    let mut levels = Vec::new();
    for minute in 1..=75 {
        for notification in engine.sweep(created + Duration::minutes(minute)) {
            if let NotificationKind::Escalated { level } = notification.kind {
                levels.push((minute, level));
            }
        }
    }

    assert_eq!(levels, vec![(15, 1), (30, 2), (45, 3)]);
    assert_eq!(engine.get(id).unwrap().escalation_count, 3);
}

#[tokio::test]
async fn test_acknowledged_alert_resolves_with_notification() {
    let sink = Arc::new(RecordingSink::default());
    let alerts = AlertHandle::spawn(&AlertConfig::default(), vec![sink.clone()]);

    let outcome = alerts
        .create(NewAlert::new(Severity::Emergency, "payments", "Payment processor down"))
        .await
        .unwrap();
    let id = outcome.alert().id;

    let acked = alerts
        .acknowledge(id, Some("oncall".to_string()))
        .await
        .unwrap();
    assert_eq!(acked.status, AlertStatus::Acknowledged);
    assert_eq!(acked.acknowledged_by.as_deref(), Some("oncall"));

    let resolved = alerts.resolve(id).await.unwrap();
    assert_eq!(resolved.status, AlertStatus::Resolved);
    assert!(resolved.resolved_at.is_some());

    assert_eq!(
        sink.kinds(),
        vec![NotificationKind::Raised, NotificationKind::Resolved]
    );
    assert!(alerts.get(id).await.unwrap().is_none());

    let stats = alerts.stats().await.unwrap();
    assert_eq!(stats.active, 0);
    assert_eq!(stats.resolved_last_24h, 1);

    alerts.shutdown().await;
}
