//! Per-session watchdog
//!
//! ```text
//! sleep(ping_interval) → session gone/replaced?        → exit
//!                      → transport marked failed?      → tear down
//!                      → idle longer than staleness?   → tear down
//!                      → ping (bounded by interval)    → error: tear down, ok: touch
//! ```
//!
//! The registry aborts the task on `unregister`, and the task also exits on
//! its own as soon as it notices its session is no longer current.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, instrument, trace};

use crate::ids::ClientId;

use super::registry::{ConnectionRegistry, SessionState};

enum Verdict {
    Alive,
    Gone,
    TearDown(String),
}

pub struct ConnectionSupervisor {
    registry: ConnectionRegistry,
    client_id: ClientId,
    session_id: u64,
    ping_interval: Duration,
    staleness: Duration,
}

impl ConnectionSupervisor {
    pub fn new(
        registry: ConnectionRegistry,
        client_id: ClientId,
        session_id: u64,
        ping_interval: Duration,
        staleness: Duration,
    ) -> Self {
        Self {
            registry,
            client_id,
            session_id,
            ping_interval,
            staleness,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    #[instrument(skip(self), fields(client = %self.client_id, session = self.session_id))]
    async fn run(self) {
        debug!("supervisor started");

        loop {
            sleep(self.ping_interval).await;

            match self.check().await {
                Verdict::Alive => continue,
                Verdict::Gone => {
                    trace!("session no longer current");
                    break;
                }
                Verdict::TearDown(reason) => {
                    self.registry
                        .end_session(&self.client_id, self.session_id, &reason)
                        .await;
                    break;
                }
            }
        }

        debug!("supervisor stopped");
    }

    async fn check(&self) -> Verdict {
        let Some(view) = self.registry.liveness(&self.client_id, self.session_id).await else {
            return Verdict::Gone;
        };

        if view.state == SessionState::Disconnected {
            return Verdict::TearDown("transport failed".to_string());
        }

        let idle = Instant::now().saturating_duration_since(view.last_activity);
        if idle > self.staleness {
            return Verdict::TearDown(format!("no activity for {}s", idle.as_secs()));
        }

        match timeout(self.ping_interval, view.transport.ping()).await {
            Ok(Ok(())) => {
                trace!("ping ok");
                self.registry
                    .touch(&self.client_id, self.session_id)
                    .await;
                Verdict::Alive
            }
            Ok(Err(e)) => Verdict::TearDown(format!("ping failed: {e}")),
            Err(_) => Verdict::TearDown("ping timed out".to_string()),
        }
    }
}
