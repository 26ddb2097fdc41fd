//! Deployment monitoring and automatic rollback

pub mod controller;
pub mod metrics;
pub mod model;

pub use controller::{DeploymentCommand, DeploymentController, DeploymentHandle};
pub use metrics::{DeploymentMetricsSource, HttpMetricsSource};
pub use model::{
    Breach, DeploymentEvent, DeploymentMetrics, DeploymentRun, DeploymentStatus, MetricKind,
    StepOutcome, evaluate,
};
