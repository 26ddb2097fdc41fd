use async_trait::async_trait;
use reqwest::Client;
use tracing::{instrument, trace};

use crate::error::{WatchtowerError, WatchtowerResult};

use super::model::{DeploymentMetrics, DeploymentRun};

/// Where the controller reads a running deployment's health from
#[async_trait]
pub trait DeploymentMetricsSource: Send + Sync {
    async fn collect(&self, run: &DeploymentRun) -> WatchtowerResult<DeploymentMetrics>;
}

/// GETs `{url}?deployment=<id>&version=<version>` and parses [`DeploymentMetrics`] JSON
pub struct HttpMetricsSource {
    client: Client,
    url: String,
}

impl HttpMetricsSource {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl DeploymentMetricsSource for HttpMetricsSource {
    #[instrument(skip(self, run), fields(deployment = %run.id))]
    async fn collect(&self, run: &DeploymentRun) -> WatchtowerResult<DeploymentMetrics> {
        trace!("collecting deployment metrics from {}", self.url);

        let response = self
            .client
            .get(&self.url)
            .query(&[("deployment", run.id.as_str()), ("version", run.version.as_str())])
            .send()
            .await
            .map_err(|e| WatchtowerError::Metrics(e.to_string()))?;

        if !response.status().is_success() {
            return Err(WatchtowerError::Metrics(format!(
                "metrics endpoint responded with status {}",
                response.status()
            )));
        }

        response
            .json::<DeploymentMetrics>()
            .await
            .map_err(|e| WatchtowerError::Metrics(format!("failed to parse metrics: {e}")))
    }
}
