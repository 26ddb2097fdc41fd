//! Remediation actions and the adapters that carry them out
//!
//! Auto-recovery asks for a target restart; the deployment controller asks for
//! each rollback step. Both go through the same [`Remediator`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::config::RemediatorConfig;
use crate::error::{WatchtowerError, WatchtowerResult};
use crate::ids::{DeploymentId, TargetName};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RemediationAction {
    /// Restart an unhealthy target
    Restart { target: TargetName },

    /// One step of a deployment rollback
    RollbackStep {
        deployment: DeploymentId,
        version: String,
        step: String,
    },
}

impl fmt::Display for RemediationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemediationAction::Restart { target } => write!(f, "restart {target}"),
            RemediationAction::RollbackStep {
                deployment, step, ..
            } => write!(f, "rollback step {step} of {deployment}"),
        }
    }
}

#[async_trait]
pub trait Remediator: Send + Sync {
    async fn remediate(&self, action: &RemediationAction) -> WatchtowerResult<()>;
}

/// Remediator for the configured endpoint, or a log-only one if none is set
pub fn build_remediator(config: Option<&RemediatorConfig>) -> Arc<dyn Remediator> {
    match config {
        Some(config) => Arc::new(WebhookRemediator::new(Client::new(), config.clone())),
        None => {
            warn!("no remediator configured, remediation actions will only be logged");
            Arc::new(LogRemediator)
        }
    }
}

/// POSTs the action as JSON to a remediation endpoint
pub struct WebhookRemediator {
    client: Client,
    config: RemediatorConfig,
}

impl WebhookRemediator {
    pub fn new(client: Client, config: RemediatorConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl Remediator for WebhookRemediator {
    #[instrument(skip(self), fields(action = %action))]
    async fn remediate(&self, action: &RemediationAction) -> WatchtowerResult<()> {
        let mut request = self.client.post(&self.config.url).json(action);
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| WatchtowerError::Remediation(e.to_string()))?;

        if response.status().is_success() {
            info!("remediation accepted");
            Ok(())
        } else {
            Err(WatchtowerError::Remediation(format!(
                "remediator responded with status {}",
                response.status()
            )))
        }
    }
}

/// Logs actions without performing them
pub struct LogRemediator;

#[async_trait]
impl Remediator for LogRemediator {
    async fn remediate(&self, action: &RemediationAction) -> WatchtowerResult<()> {
        info!("remediation requested: {action}");
        Ok(())
    }
}
