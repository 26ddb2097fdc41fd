//! Client sessions with guaranteed in-order delivery across reconnects
//!
//! - [`registry::ConnectionRegistry`] owns sessions and the delivery queue
//! - [`supervisor::ConnectionSupervisor`] is the per-session watchdog
//! - [`queue::DeliveryQueue`] buffers messages for absent clients

pub mod queue;
pub mod registry;
pub mod supervisor;

pub use queue::{DeliveryQueue, QueuedMessage};
pub use registry::{
    BroadcastReport, ConnectionRegistry, RegistryStats, Session, SessionHandle, SessionState,
};
