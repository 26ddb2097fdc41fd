use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde_json::json;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};
use watchtower::{
    alerts::{AlertHandle, LogSink, NotificationSink, build_sinks},
    config::{Config, read_config_file},
    connections::ConnectionRegistry,
    deployment::{DeploymentEvent, DeploymentHandle, DeploymentMetricsSource, HttpMetricsSource},
    health::{AutoRecovery, HealthEvent, HealthPollerHandle, HttpProbe},
    remediation::build_remediator,
    util::{get_config_path, get_log_level},
};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file (defaults to $WATCHTOWER_CONFIG or ./watchtower.json)
    #[arg(short, long)]
    file: Option<String>,

    /// Bind address of the API server (overrides the config file)
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

fn init(level: LevelFilter) {
    let filter = filter::Targets::new().with_targets(vec![
        ("watchtower", level),
        ("watchtower_hub", level),
        ("tower_http", level),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

fn parse_level(level: Option<String>) -> anyhow::Result<LevelFilter> {
    match level {
        Some(level) => level
            .parse()
            .with_context(|| format!("invalid log level: {level}")),
        None => Ok(LevelFilter::INFO),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    init(parse_level(args.log_level.clone().or_else(get_log_level))?);
    trace!("started with args: {args:?}");

    let path = args.file.clone().unwrap_or_else(get_config_path);
    let config = read_config_file(&path)?;
    info!("loaded configuration from {path}");

    let hub = Hub::start(&config);

    #[cfg(feature = "api")]
    let api_task = match api_settings(&config, args.bind) {
        Some(settings) => {
            let state = watchtower::api::ApiState::new(
                hub.registry.clone(),
                hub.health.clone(),
                hub.alerts.clone(),
                hub.deployments.clone(),
            );
            let (addr, task) = watchtower::api::spawn_api_server(&settings, state).await?;
            debug!("API server bound to {addr}");
            Some(task)
        }
        None => None,
    };
    #[cfg(not(feature = "api"))]
    let api_task: Option<JoinHandle<()>> = None;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutting down");

    if let Some(task) = api_task {
        task.abort();
    }

    hub.shutdown().await;

    Ok(())
}

#[cfg(feature = "api")]
fn api_settings(
    config: &Config,
    bind: Option<SocketAddr>,
) -> Option<watchtower::config::ApiSettings> {
    match (config.api.clone(), bind) {
        (Some(settings), Some(bind)) => {
            Some(watchtower::config::ApiSettings { bind, ..settings })
        }
        (Some(settings), None) => Some(settings),
        (None, Some(bind)) => Some(watchtower::config::ApiSettings {
            bind,
            enable_cors: true,
        }),
        (None, None) => None,
    }
}

/// Every long-running component of the hub
struct Hub {
    registry: ConnectionRegistry,
    health: HealthPollerHandle,
    alerts: AlertHandle,
    deployments: DeploymentHandle,
    forwarder: JoinHandle<()>,
}

impl Hub {
    fn start(config: &Config) -> Self {
        let mut sinks = build_sinks(&config.alerts.sinks);
        if sinks.is_empty() {
            warn!("no notification sinks configured, notifications go to the log only");
            sinks.push(Arc::new(LogSink) as Arc<dyn NotificationSink>);
        }
        let alerts = AlertHandle::spawn(&config.alerts, sinks);

        let remediator = build_remediator(config.recovery.remediator.as_ref());

        let recovery =
            AutoRecovery::new(&config.recovery, remediator.clone()).with_alerts(alerts.clone());
        let health =
            HealthPollerHandle::spawn(&config.health, Arc::new(HttpProbe::default()), recovery);

        let metrics = config.deployment.metrics_url.as_ref().map(|url| {
            Arc::new(HttpMetricsSource::new(reqwest::Client::new(), url))
                as Arc<dyn DeploymentMetricsSource>
        });
        if metrics.is_none() {
            warn!("no deployment metrics_url configured, deployments are not monitored");
        }
        let deployments = DeploymentHandle::spawn(
            &config.deployment,
            metrics,
            remediator,
            Some(alerts.clone()),
        );

        let registry = ConnectionRegistry::new(config.connections.clone());

        let forwarder = tokio::spawn(forward_events(
            registry.clone(),
            health.subscribe(),
            deployments.subscribe(),
        ));

        info!(
            "hub started with {} target(s) and {} sink(s)",
            config.health.targets.len(),
            config.alerts.sinks.len()
        );

        Self {
            registry,
            health,
            alerts,
            deployments,
            forwarder,
        }
    }

    async fn shutdown(self) {
        self.forwarder.abort();
        let _ = self.forwarder.await;

        self.registry.shutdown().await;
        self.health.shutdown().await;
        self.deployments.shutdown().await;
        self.alerts.shutdown().await;
    }
}

/// Push health changes and deployment transitions to every connected client
async fn forward_events(
    registry: ConnectionRegistry,
    mut health_rx: broadcast::Receiver<HealthEvent>,
    mut deployment_rx: broadcast::Receiver<DeploymentEvent>,
) {
    loop {
        let payload = tokio::select! {
            event = health_rx.recv() => match event {
                Ok(event) if event.status_changed() => json!({
                    "type": "health",
                    "event": event,
                }),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("event forwarder lagged behind by {n} health event(s)");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },

            event = deployment_rx.recv() => match event {
                Ok(event) => json!({
                    "type": "deployment",
                    "event": event,
                }),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("event forwarder lagged behind by {n} deployment event(s)");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };

        let report = registry.broadcast(payload, &[]).await;
        trace!("forwarded event to {}/{} session(s)", report.delivered, report.total);
    }

    debug!("event forwarder stopped");
}
