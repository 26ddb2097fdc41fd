//! Route handlers, grouped by component

pub mod alerts;
pub mod deployments;
pub mod health;
pub mod sessions;
