//! Notification sinks
//!
//! A sink delivers a [`Notification`] somewhere an operator will see it.
//! Sink failures are reported to the caller, who logs them; they never
//! affect alert state.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::json;
use tracing::{error, info, instrument, warn};

use crate::config::{SinkConfig, Webhook};
use crate::error::{WatchtowerError, WatchtowerResult};

use super::discord::DiscordSink;
use super::model::{Notification, NotificationKind, Severity};

#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    async fn notify(&self, notification: &Notification) -> WatchtowerResult<()>;
}

/// Build the sinks listed in the configuration
pub fn build_sinks(configs: &[SinkConfig]) -> Vec<Arc<dyn NotificationSink>> {
    let client = Client::new();
    configs
        .iter()
        .map(|config| -> Arc<dyn NotificationSink> {
            match config {
                SinkConfig::Log => Arc::new(LogSink),
                SinkConfig::Webhook(webhook) => {
                    Arc::new(WebhookSink::new(client.clone(), webhook.clone()))
                }
                SinkConfig::Discord(discord) => {
                    Arc::new(DiscordSink::new(client.clone(), discord.clone()))
                }
            }
        })
        .collect()
}

/// One-line human readable summary, shared by the text-based sinks
pub fn format_message(notification: &Notification) -> String {
    let alert = &notification.alert;
    let emoji = alert.severity.emoji();

    match notification.kind {
        NotificationKind::Raised => format!(
            "{emoji} **{} alert**: {} (source `{}`)",
            alert.severity, alert.title, alert.source
        ),
        NotificationKind::Escalated { level } => format!(
            "{emoji} **Escalation {level}**: {} is still unresolved (source `{}`, {} alert)",
            alert.title, alert.source, alert.severity
        ),
        NotificationKind::Resolved => format!(
            "✅ **Resolved**: {} (source `{}`)",
            alert.title, alert.source
        ),
    }
}

/// Writes notifications to the tracing log
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, notification: &Notification) -> WatchtowerResult<()> {
        let message = format_message(notification);
        match notification.alert.severity {
            Severity::Info => info!(alert = %notification.alert.id, "{message}"),
            Severity::Warning => warn!(alert = %notification.alert.id, "{message}"),
            Severity::Critical | Severity::Emergency => {
                error!(alert = %notification.alert.id, "{message}")
            }
        }
        Ok(())
    }
}

/// POSTs a JSON document to a generic webhook
pub struct WebhookSink {
    client: Client,
    webhook: Webhook,
}

impl WebhookSink {
    pub fn new(client: Client, webhook: Webhook) -> Self {
        Self { client, webhook }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    #[instrument(skip(self, notification), fields(alert = %notification.alert.id))]
    async fn notify(&self, notification: &Notification) -> WatchtowerResult<()> {
        let payload = json!({
            "message": format_message(notification),
            "urgency": notification.urgency(),
            "notification": notification,
            "timestamp": Utc::now().to_rfc3339()
        });

        let response = self
            .client
            .post(&self.webhook.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| WatchtowerError::Notification(e.to_string()))?;

        if response.status().is_success() {
            info!("Successfully sent webhook notification");
            Ok(())
        } else {
            Err(WatchtowerError::Notification(format!(
                "webhook responded with status {}",
                response.status()
            )))
        }
    }
}
