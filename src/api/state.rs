//! API shared state containing component handles

use crate::alerts::AlertHandle;
use crate::connections::ConnectionRegistry;
use crate::deployment::DeploymentHandle;
use crate::health::HealthPollerHandle;

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    pub registry: ConnectionRegistry,
    pub health: HealthPollerHandle,
    pub alerts: AlertHandle,
    pub deployments: DeploymentHandle,
}

impl ApiState {
    pub fn new(
        registry: ConnectionRegistry,
        health: HealthPollerHandle,
        alerts: AlertHandle,
        deployments: DeploymentHandle,
    ) -> Self {
        Self {
            registry,
            health,
            alerts,
            deployments,
        }
    }
}
