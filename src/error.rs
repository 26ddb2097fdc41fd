//! Error taxonomy for the resilience core
//!
//! None of these are fatal. Every operation touching a remote resource returns
//! a `WatchtowerResult` and the caller decides how to recover (queue, count,
//! alert, log).

use std::fmt;
use std::time::Duration;

use crate::ids::AlertId;

/// Result type alias for resilience operations
pub type WatchtowerResult<T> = Result<T, WatchtowerError>;

/// Errors that can occur inside the resilience core
#[derive(Debug)]
pub enum WatchtowerError {
    /// Writing to or pinging a client transport failed
    Transport(String),

    /// A health probe failed (connection error, bad status, bad body)
    Probe(String),

    /// An operation did not finish within its deadline
    Timeout(Duration),

    /// A remediation action reported an error
    Remediation(String),

    /// A notification sink rejected or could not receive a notification
    Notification(String),

    /// Deployment metrics could not be collected
    Metrics(String),

    /// No active alert with this id
    UnknownAlert(AlertId),

    /// The requested state transition is not allowed from the current state
    InvalidTransition(String),

    /// A deployment run is already in progress
    DeploymentActive(String),

    /// No deployment run is currently active
    NoActiveDeployment,

    /// The owning actor has shut down
    ActorUnavailable(&'static str),

    /// Invalid configuration
    Config(String),
}

impl fmt::Display for WatchtowerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchtowerError::Transport(msg) => write!(f, "transport failure: {}", msg),
            WatchtowerError::Probe(msg) => write!(f, "probe failure: {}", msg),
            WatchtowerError::Timeout(after) => write!(f, "timed out after {:?}", after),
            WatchtowerError::Remediation(msg) => write!(f, "remediation failure: {}", msg),
            WatchtowerError::Notification(msg) => write!(f, "notification failure: {}", msg),
            WatchtowerError::Metrics(msg) => write!(f, "metrics collection failed: {}", msg),
            WatchtowerError::UnknownAlert(id) => write!(f, "no active alert with id {}", id),
            WatchtowerError::InvalidTransition(msg) => write!(f, "invalid transition: {}", msg),
            WatchtowerError::DeploymentActive(id) => {
                write!(f, "deployment {} is still in progress", id)
            }
            WatchtowerError::NoActiveDeployment => write!(f, "no deployment is in progress"),
            WatchtowerError::ActorUnavailable(name) => write!(f, "{} is not running", name),
            WatchtowerError::Config(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for WatchtowerError {}

/// Run `future` under `limit`, mapping an elapsed deadline to [`WatchtowerError::Timeout`]
pub async fn with_timeout<T, F>(limit: Duration, future: F) -> WatchtowerResult<T>
where
    F: std::future::Future<Output = WatchtowerResult<T>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(WatchtowerError::Timeout(limit)),
    }
}
