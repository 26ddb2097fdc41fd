use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use tracing::{error, info, instrument};

use crate::config::Discord;
use crate::error::{WatchtowerError, WatchtowerResult};

use super::model::{Notification, NotificationKind, Severity};
use super::sink::NotificationSink;

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Default)]
pub struct MessageBuilder {
    content: Option<String>,
    embeds: Vec<Embed>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(mut self, content: impl ToString) -> Self {
        self.content = Some(content.to_string());
        self
    }

    pub fn add_embed(mut self, embed: Embed) -> Self {
        self.embeds.push(embed);
        self
    }

    pub fn build(self) -> Message {
        Message {
            content: self.content,
            embeds: self.embeds,
        }
    }
}

/// Posts alert notifications as Discord embeds
pub struct DiscordSink {
    client: Client,
    discord: Discord,
}

impl DiscordSink {
    pub fn new(client: Client, discord: Discord) -> Self {
        Self { client, discord }
    }

    pub fn build_message(&self, notification: &Notification) -> Message {
        let mut builder = MessageBuilder::new().add_embed(build_embed(notification));

        // only page someone for things that need a human
        if let Some(user_id) = &self.discord.user_id
            && notification.kind != NotificationKind::Resolved
            && notification.alert.severity >= Severity::Critical
        {
            builder = builder.content(format!(
                "{} `{}` <@{user_id}>",
                notification.alert.severity.emoji(),
                notification.alert.title
            ));
        }

        builder.build()
    }
}

#[async_trait]
impl NotificationSink for DiscordSink {
    fn name(&self) -> &str {
        "discord"
    }

    #[instrument(skip(self, notification), fields(alert = %notification.alert.id))]
    async fn notify(&self, notification: &Notification) -> WatchtowerResult<()> {
        let message = self.build_message(notification);

        let response = self
            .client
            .post(&self.discord.url)
            .json(&message)
            .send()
            .await
            .map_err(|e| WatchtowerError::Notification(e.to_string()))?;

        if response.status().is_success() {
            info!("Successfully sent Discord message");
            return Ok(());
        }

        let status = response.status();
        error!("Discord message failed with status: {}", status);
        if let Ok(error_text) = response.text().await {
            error!("Discord API error response: {}", error_text);
        }
        Err(WatchtowerError::Notification(format!(
            "discord responded with status {status}"
        )))
    }
}

fn build_embed(notification: &Notification) -> Embed {
    let alert = &notification.alert;

    let (title, color) = match notification.kind {
        NotificationKind::Raised => (
            format!("{} {}", alert.severity.emoji(), alert.title),
            severity_color(alert.severity),
        ),
        NotificationKind::Escalated { level } => (
            format!("⏫ Escalation {level}: {}", alert.title),
            severity_color(alert.severity),
        ),
        NotificationKind::Resolved => (
            format!("✅ Resolved: {}", alert.title),
            3066993, // Green
        ),
    };

    let mut fields = vec![
        EmbedField {
            name: "Severity".to_string(),
            value: alert.severity.to_string(),
            inline: true,
        },
        EmbedField {
            name: "Source".to_string(),
            value: alert.source.clone(),
            inline: true,
        },
        EmbedField {
            name: "Open since".to_string(),
            value: alert.created_at.format("%Y-%m-%d %H:%M UTC").to_string(),
            inline: true,
        },
    ];

    if alert.duplicates > 0 {
        fields.push(EmbedField {
            name: "Duplicates".to_string(),
            value: alert.duplicates.to_string(),
            inline: true,
        });
    }

    Embed {
        title: Some(title),
        description: (!alert.description.is_empty()).then(|| alert.description.clone()),
        color: Some(color),
        fields,
        footer: Some(EmbedFooter {
            text: format!("Alert {}", alert.id),
        }),
        timestamp: Some(Utc::now().to_rfc3339()),
    }
}

fn severity_color(severity: Severity) -> u32 {
    match severity {
        Severity::Info => 5793266,       // Light blue
        Severity::Warning => 15105570,   // Orange
        Severity::Critical => 15158332,  // Red
        Severity::Emergency => 10038562, // Dark red
    }
}
