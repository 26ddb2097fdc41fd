//! Loading the hub configuration from disk

use std::io::Write;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tempfile::NamedTempFile;
use watchtower::config::{SinkConfig, read_config_file};

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_full_config_file_is_loaded() {
    let file = write_config(
        r#"{
            "connections": { "queue_capacity": 10, "ping_interval_secs": 5 },
            "health": {
                "poll_interval_secs": 15,
                "targets": [
                    { "name": "api", "url": "http://api.internal/health", "body_pattern": "ok" },
                    { "name": "db", "url": "http://db.internal/health" }
                ]
            },
            "recovery": {
                "failure_threshold": 5,
                "remediator": { "url": "http://ops.internal/remediate", "token": "secret" }
            },
            "alerts": {
                "sinks": [{ "type": "discord", "url": "http://discord.test/hook", "user_id": "42" }]
            },
            "deployment": {
                "metrics_url": "http://metrics.internal/deployment",
                "thresholds": { "critical_error_rate": 0.2 }
            },
            "api": { "bind": "0.0.0.0:9000" }
        }"#,
    );

    let config = read_config_file(file.path().to_str().unwrap()).unwrap();

    assert_eq!(config.connections.queue_capacity, 10);
    assert_eq!(config.connections.ping_interval(), Duration::from_secs(5));
    assert_eq!(config.health.poll_interval(), Duration::from_secs(15));
    assert_eq!(config.health.targets[0].body_pattern.as_deref(), Some("ok"));
    assert_eq!(config.recovery.failure_threshold, 5);
    assert_eq!(
        config.recovery.remediator.as_ref().unwrap().token.as_deref(),
        Some("secret")
    );

    match &config.alerts.sinks[0] {
        SinkConfig::Discord(discord) => assert_eq!(discord.user_id.as_deref(), Some("42")),
        other => panic!("expected discord sink, got {other:?}"),
    }

    let thresholds = config.deployment.thresholds;
    assert_eq!(thresholds.critical_error_rate, 0.2);
    assert_eq!(thresholds.max_error_rate, 0.05);

    let api = config.api.unwrap();
    assert_eq!(api.bind.port(), 9000);
    assert!(api.enable_cors);
}

#[test]
fn test_missing_file_names_the_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing.json");
    let path = path.to_str().unwrap();

    let error = read_config_file(path).unwrap_err();
    assert!(error.to_string().contains(path));
}

#[test]
fn test_invalid_json_is_rejected() {
    let file = write_config(r#"{ "health": { "targets": [ }"#);
    assert!(read_config_file(file.path().to_str().unwrap()).is_err());
}

#[test]
fn test_zero_queue_capacity_is_rejected() {
    let file = write_config(r#"{ "connections": { "queue_capacity": 0 } }"#);

    let error = read_config_file(file.path().to_str().unwrap()).unwrap_err();
    assert!(error.to_string().contains("queue_capacity"));
}

#[test]
fn test_similarity_threshold_out_of_range_is_rejected() {
    let file = write_config(r#"{ "alerts": { "similarity_threshold": 1.5 } }"#);
    assert!(read_config_file(file.path().to_str().unwrap()).is_err());
}

#[test]
fn test_zero_intervals_are_rejected() {
    let cases = [
        (r#"{ "connections": { "ping_interval_secs": 0 } }"#, "ping_interval_secs"),
        (r#"{ "connections": { "write_timeout_secs": 0 } }"#, "write_timeout_secs"),
        (r#"{ "health": { "poll_interval_secs": 0 } }"#, "poll_interval_secs"),
        (r#"{ "health": { "timeout_secs": 0 } }"#, "timeout_secs"),
        (r#"{ "alerts": { "sweep_interval_secs": 0 } }"#, "sweep_interval_secs"),
        (r#"{ "deployment": { "monitor_interval_secs": 0 } }"#, "monitor_interval_secs"),
    ];

    for (content, field) in cases {
        let file = write_config(content);
        let error = read_config_file(file.path().to_str().unwrap()).unwrap_err();
        assert!(format!("{error:#}").contains(field), "{field} accepted as 0");
    }
}

#[test]
fn test_interval_accessors_never_return_zero() {
    let config = watchtower::config::Config {
        connections: watchtower::config::ConnectionConfig {
            ping_interval_secs: 0,
            write_timeout_secs: 0,
            ..Default::default()
        },
        ..Default::default()
    };

    assert_eq!(config.connections.ping_interval(), Duration::from_secs(1));
    assert_eq!(config.connections.write_timeout(), Duration::from_secs(1));
}
