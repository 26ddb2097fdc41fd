//! Probes check one target and report whether it answered correctly
//!
//! Latency is measured by the poller around the call, so probes only decide
//! success or failure.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde_json::Value;
use tracing::{instrument, trace};

use crate::config::TargetConfig;
use crate::error::{WatchtowerError, WatchtowerResult};

/// What a successful probe learned about the target
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeReport {
    pub capabilities: Option<Vec<String>>,
}

#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, target: &TargetConfig) -> WatchtowerResult<ProbeReport>;
}

/// HTTP GET probe
///
/// Any 2xx status is a success. If the target has a `body_pattern` the body
/// must match it. A JSON body carrying a `capabilities` string array is
/// reported back. Body patterns are compiled once and cached.
#[derive(Clone, Default)]
pub struct HttpProbe {
    client: Client,
    patterns: Arc<Mutex<HashMap<String, Regex>>>,
}

impl HttpProbe {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            patterns: Arc::default(),
        }
    }

    fn pattern(&self, pattern: &str) -> WatchtowerResult<Regex> {
        let mut patterns = self.patterns.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(re) = patterns.get(pattern) {
            return Ok(re.clone());
        }

        let re = Regex::new(pattern).map_err(|e| {
            WatchtowerError::Config(format!("invalid body pattern '{pattern}': {e}"))
        })?;
        patterns.insert(pattern.to_string(), re.clone());
        Ok(re)
    }
}

#[async_trait]
impl Probe for HttpProbe {
    #[instrument(skip(self, target), fields(target = %target.name))]
    async fn probe(&self, target: &TargetConfig) -> WatchtowerResult<ProbeReport> {
        trace!("probing {}", target.url);

        let response = self
            .client
            .get(&target.url)
            .send()
            .await
            .map_err(|e| WatchtowerError::Probe(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(WatchtowerError::Probe(format!(
                "unexpected status code: {}",
                status.as_u16()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| WatchtowerError::Probe(format!("failed to read response body: {e}")))?;

        if let Some(pattern) = &target.body_pattern {
            if !self.pattern(pattern)?.is_match(&body) {
                return Err(WatchtowerError::Probe(format!(
                    "body does not match '{pattern}'"
                )));
            }
        }

        Ok(ProbeReport {
            capabilities: parse_capabilities(&body),
        })
    }
}

fn parse_capabilities(body: &str) -> Option<Vec<String>> {
    let value: Value = serde_json::from_str(body).ok()?;
    let capabilities = value.get("capabilities")?.as_array()?;
    Some(
        capabilities
            .iter()
            .filter_map(|c| c.as_str().map(String::from))
            .collect(),
    )
}
