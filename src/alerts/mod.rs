//! Alert lifecycle: dedupe, escalation, acknowledgement, resolution, history
//!
//! [`engine::AlertEngine`] holds the state machine and is driven with an
//! explicit clock. [`actor::AlertHandle`] wraps it in an actor that runs the
//! escalation sweep and fans notifications out to the configured sinks.

pub mod actor;
pub mod discord;
pub mod engine;
pub mod model;
pub mod similarity;
pub mod sink;

pub use actor::{AlertCommand, AlertHandle};
pub use engine::AlertEngine;
pub use model::{
    Alert, AlertOutcome, AlertStats, AlertStatus, NewAlert, Notification, NotificationKind,
    Severity,
};
pub use similarity::title_similarity;
pub use sink::{LogSink, NotificationSink, WebhookSink, build_sinks};
