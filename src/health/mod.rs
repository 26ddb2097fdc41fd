//! Target health polling and auto-recovery

pub mod model;
pub mod poller;
pub mod probe;
pub mod recovery;

pub use model::{HealthEvent, HealthRecord, HealthStatus};
pub use poller::{HealthPoller, HealthPollerHandle, HealthRecords, PollerCommand};
pub use probe::{HttpProbe, Probe, ProbeReport};
pub use recovery::AutoRecovery;
