pub mod alerts;
#[cfg(feature = "api")]
pub mod api;
pub mod config;
pub mod connections;
pub mod deployment;
pub mod error;
pub mod health;
pub mod ids;
pub mod remediation;
pub mod transport;
pub mod util;

pub use error::{WatchtowerError, WatchtowerResult};
pub use ids::{AlertId, ClientId, DeploymentId, TargetName};
