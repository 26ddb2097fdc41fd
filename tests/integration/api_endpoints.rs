//! Integration tests for API endpoints
//!
//! These tests verify that:
//! - Alert endpoints create, acknowledge and resolve alerts
//! - Component errors map to the right status codes
//! - Deployment endpoints enforce a single active run
//! - Messages for absent clients are queued
//! - Poller and alert controls validate their input

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use serde_json::{Value, json};
use watchtower::{
    alerts::AlertHandle,
    api::{ApiState, spawn_api_server},
    config::{AlertConfig, ApiSettings, ConnectionConfig, DeploymentConfig, HealthConfig, RecoveryConfig},
    connections::ConnectionRegistry,
    deployment::DeploymentHandle,
    health::{AutoRecovery, HealthPollerHandle},
};

use crate::helpers::{RecordingRemediator, ScriptedProbe, target_config};

// Helper to create test API server
async fn spawn_test_api() -> SocketAddr {
    let remediator = Arc::new(RecordingRemediator::default());
    let alerts = AlertHandle::spawn(&AlertConfig::default(), vec![]);

    let health = HealthPollerHandle::spawn(
        &HealthConfig {
            targets: vec![target_config("api")],
            ..HealthConfig::default()
        },
        Arc::new(ScriptedProbe::default()),
        AutoRecovery::new(&RecoveryConfig::default(), remediator.clone()),
    );
    let deployments = DeploymentHandle::spawn(
        &DeploymentConfig::default(),
        None,
        remediator,
        Some(alerts.clone()),
    );

    let state = ApiState::new(
        ConnectionRegistry::new(ConnectionConfig::default()),
        health,
        alerts,
        deployments,
    );

    let settings = ApiSettings {
        bind: "127.0.0.1:0".parse().unwrap(), // Random port
        enable_cors: true,
    };

    let (addr, _task) = spawn_api_server(&settings, state).await.unwrap();
    addr
}

#[tokio::test]
async fn test_health_endpoint_returns_ok() {
    let addr = spawn_test_api().await;

    let response = reqwest::get(format!("http://{addr}/api/v1/health"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let json: Value = response.json().await.unwrap();
    assert_eq!(json["status"], "ok");
    assert!(json["timestamp"].is_string());
}

#[tokio::test]
async fn test_alert_lifecycle_over_http() {
    let addr = spawn_test_api().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{addr}/api/v1/alerts"))
        .json(&json!({
            "title": "Queue depth above limit",
            "severity": "critical",
            "source": "worker-3",
            "labels": { "queue": "emails" }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let created: Value = response.json().await.unwrap();
    assert_eq!(created["suppressed"], false);
    assert_eq!(created["alert"]["status"], "active");
    let id = created["alert"]["id"].as_str().unwrap().to_string();

    let listed: Value = client
        .get(format!("http://{addr}/api/v1/alerts"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["total"], 1);

    let acked: Value = client
        .post(format!("http://{addr}/api/v1/alerts/{id}/ack"))
        .json(&json!({ "by": "oncall" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(acked["status"], "acknowledged");
    assert_eq!(acked["acknowledged_by"], "oncall");

    let response = client
        .post(format!("http://{addr}/api/v1/alerts/{id}/resolve"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // resolved alerts are no longer open
    let response = client
        .get(format!("http://{addr}/api/v1/alerts/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let stats: Value = client
        .get(format!("http://{addr}/api/v1/alerts/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["active"], 0);
    assert_eq!(stats["resolved_last_24h"], 1);
}

#[tokio::test]
async fn test_alert_errors_map_to_status_codes() {
    let addr = spawn_test_api().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{addr}/api/v1/alerts/not-an-id/resolve"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let unknown = uuid::Uuid::new_v4();
    let response = client
        .post(format!("http://{addr}/api/v1/alerts/{unknown}/resolve"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let json: Value = response.json().await.unwrap();
    assert!(json["error"].is_string());

    let response = client
        .post(format!("http://{addr}/api/v1/alerts"))
        .json(&json!({ "title": "  ", "severity": "info", "source": "x" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_second_deployment_conflicts() {
    let addr = spawn_test_api().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("http://{addr}/api/v1/deployments/current"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let started: Value = client
        .post(format!("http://{addr}/api/v1/deployments"))
        .json(&json!({ "id": "release-7", "version": "2.4.0" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(started["status"], "in_progress");

    let response = client
        .post(format!("http://{addr}/api/v1/deployments"))
        .json(&json!({ "id": "release-8", "version": "2.4.1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let current: Value = client
        .get(format!("http://{addr}/api/v1/deployments/current"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(current["id"], "release-7");

    let finished: Value = client
        .post(format!("http://{addr}/api/v1/deployments/current/complete"))
        .json(&json!({ "success": true }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(finished["status"], "success");

    let history: Value = client
        .get(format!("http://{addr}/api/v1/deployments"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_message_for_absent_client_is_queued() {
    let addr = spawn_test_api().await;
    let client = reqwest::Client::new();

    let sent: Value = client
        .post(format!("http://{addr}/api/v1/sessions/agent-9/send"))
        .json(&json!({ "payload": { "command": "refresh" } }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(sent["delivered"], false);

    let stats: Value = client
        .get(format!("http://{addr}/api/v1/sessions/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["sessions"], 0);
    assert_eq!(stats["queued_messages"], 1);
}

#[tokio::test]
async fn test_targets_endpoint_lists_configured_targets() {
    let addr = spawn_test_api().await;
    let client = reqwest::Client::new();

    let targets: Value = client
        .get(format!("http://{addr}/api/v1/targets"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(targets["total"], 1);
    assert_eq!(targets["targets"][0]["target"], "api");

    let response = client
        .get(format!("http://{addr}/api/v1/targets/unknown"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_poll_interval_can_be_changed() {
    let addr = spawn_test_api().await;
    let client = reqwest::Client::new();

    let response = client
        .put(format!("http://{addr}/api/v1/poller/interval"))
        .json(&json!({ "interval_secs": 0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let updated: Value = client
        .put(format!("http://{addr}/api/v1/poller/interval"))
        .json(&json!({ "interval_secs": 5 }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(updated["interval_secs"], 5);
}

#[tokio::test]
async fn test_alert_sweep_and_mute_controls() {
    let addr = spawn_test_api().await;
    let client = reqwest::Client::new();

    let swept: Value = client
        .post(format!("http://{addr}/api/v1/alerts/sweep"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(swept["escalated"], 0);

    let muted: Value = client
        .post(format!("http://{addr}/api/v1/alerts/mute"))
        .json(&json!({ "duration_secs": 600 }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(muted["muted"], true);

    // alerts still open while notifications are muted
    let response = client
        .post(format!("http://{addr}/api/v1/alerts"))
        .json(&json!({ "title": "Disk nearly full", "severity": "warning", "source": "db-1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let unmuted: Value = client
        .post(format!("http://{addr}/api/v1/alerts/unmute"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(unmuted["muted"], false);
}
