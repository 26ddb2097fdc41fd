//! Connection registry
//!
//! Tracks one [`Session`] per client and routes outgoing messages to the
//! client's transport. When a client is absent or its transport fails, the
//! message lands in the [`DeliveryQueue`] and is replayed in order on the
//! next `register`.
//!
//! ## Ordering
//!
//! Each session owns a *delivery lane* (an async mutex). `register` holds the
//! lane while it drains the backlog, so live sends for that client wait until
//! every queued message has been replayed. A failed write flips the session to
//! `Disconnected`; later sends go straight to the queue instead of racing
//! ahead of the message that failed.
//!
//! Every write and close on a transport runs under the configured write
//! timeout. A stalled client counts as a failed one.
//!
//! Lock order is always `sessions` before `queue`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::ConnectionConfig;
use crate::error::with_timeout;
use crate::ids::ClientId;
use crate::transport::{OutboundMessage, Transport};

use super::queue::{DeliveryQueue, QueuedMessage};
use super::supervisor::ConnectionSupervisor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Registered, backlog being drained
    Connecting,
    Connected,
    /// Transport failed; waiting for the supervisor to tear it down
    Disconnected,
    /// Replaced a previous session of the same client, backlog being drained
    Reconnecting,
}

/// Snapshot of one live session
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub client_id: ClientId,
    pub session_id: u64,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub messages_sent: u64,

    #[serde(skip_serializing)]
    pub last_activity: Instant,
}

/// Returned from [`ConnectionRegistry::register`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub client_id: ClientId,
    pub session_id: u64,

    /// Backlog messages delivered during registration
    pub replayed: usize,

    /// Backlog messages still queued because the drain failed part-way
    pub pending: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub sessions: usize,
    pub queued_messages: usize,
    pub evicted_messages: u64,
}

/// What the supervisor needs to judge a session's liveness
pub(crate) struct LivenessView {
    pub state: SessionState,
    pub last_activity: Instant,
    pub transport: Arc<dyn Transport>,
}

struct SessionEntry {
    session: Session,
    transport: Arc<dyn Transport>,
    lane: Arc<Mutex<()>>,
    supervisor: Option<JoinHandle<()>>,
}

struct RegistryInner {
    config: ConnectionConfig,
    sessions: Mutex<HashMap<ClientId, SessionEntry>>,
    queue: Mutex<DeliveryQueue>,
    next_session_id: AtomicU64,
}

/// Shared handle to the connection registry
///
/// Cloning is cheap; all clones see the same sessions and queues.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new(config: ConnectionConfig) -> Self {
        let queue = DeliveryQueue::new(config.queue_capacity);
        Self {
            inner: Arc::new(RegistryInner {
                config,
                sessions: Mutex::new(HashMap::new()),
                queue: Mutex::new(queue),
                next_session_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register a client's transport
    ///
    /// Any existing session for the same client is torn down first. The
    /// client's backlog is replayed before any new traffic reaches it.
    #[instrument(skip(self, transport), fields(client = %client_id))]
    pub async fn register(
        &self,
        client_id: ClientId,
        transport: Arc<dyn Transport>,
    ) -> SessionHandle {
        let replaced = self.unregister(&client_id).await;

        let session_id = self.inner.next_session_id.fetch_add(1, Ordering::Relaxed);
        let lane = Arc::new(Mutex::new(()));
        // fresh mutex, nobody else can hold it yet
        let lane_guard = lane.clone().lock_owned().await;

        let now = Utc::now();
        let entry = SessionEntry {
            session: Session {
                client_id: client_id.clone(),
                session_id,
                state: if replaced {
                    SessionState::Reconnecting
                } else {
                    SessionState::Connecting
                },
                created_at: now,
                last_activity_at: now,
                messages_sent: 0,
                last_activity: Instant::now(),
            },
            transport: transport.clone(),
            lane,
            supervisor: None,
        };

        {
            let mut sessions = self.inner.sessions.lock().await;
            if let Some(previous) = sessions.insert(client_id.clone(), entry) {
                // a concurrent register slipped in between unregister and insert
                warn!("replacing session {} registered concurrently", previous.session.session_id);
                if let Some(handle) = previous.supervisor {
                    handle.abort();
                }
                self.spawn_close(client_id.clone(), previous.transport);
            }
        }

        let (replayed, pending) = self.drain_backlog(&client_id, session_id, transport.as_ref()).await;

        let state = if pending == 0 {
            SessionState::Connected
        } else {
            SessionState::Disconnected
        };
        self.update_session(&client_id, session_id, |session| {
            session.state = state;
            session.messages_sent += replayed as u64;
            if replayed > 0 {
                session.last_activity = Instant::now();
                session.last_activity_at = Utc::now();
            }
        })
        .await;
        drop(lane_guard);

        let supervisor = ConnectionSupervisor::new(
            self.clone(),
            client_id.clone(),
            session_id,
            self.inner.config.ping_interval(),
            self.inner.config.staleness_window(),
        )
        .spawn();
        self.attach_supervisor(&client_id, session_id, supervisor).await;

        info!("session {session_id} registered (replayed {replayed}, pending {pending})");

        SessionHandle {
            client_id,
            session_id,
            replayed,
            pending,
        }
    }

    /// Send a payload to one client
    ///
    /// Returns `true` if the transport accepted it. Otherwise the message is
    /// queued for the client's next registration and `false` is returned.
    pub async fn send(&self, client_id: &ClientId, payload: Value) -> bool {
        let Some((session_id, transport, lane)) = self.route_or_enqueue(client_id, &payload).await
        else {
            trace!("{client_id}: not connected, message queued");
            return false;
        };

        let _lane = lane.lock().await;

        // the session may have failed while we waited for the lane
        if !self.is_deliverable(client_id, session_id).await {
            self.enqueue(client_id, QueuedMessage::new(payload)).await;
            return false;
        }

        let outbound = OutboundMessage::live(payload.clone());
        let write = transport.send(&outbound);
        match with_timeout(self.write_timeout(), write).await {
            Ok(()) => {
                self.update_session(client_id, session_id, |session| {
                    session.messages_sent += 1;
                    session.last_activity = Instant::now();
                    session.last_activity_at = Utc::now();
                })
                .await;
                true
            }
            Err(e) => {
                warn!("{client_id}: send failed, queueing message: {e}");
                self.update_session(client_id, session_id, |session| {
                    session.state = SessionState::Disconnected;
                })
                .await;

                let mut message = QueuedMessage::new(payload);
                message.attempts = 1;
                self.enqueue(client_id, message).await;
                false
            }
        }
    }

    /// Send a payload to every registered client not in `exclude`
    #[instrument(skip(self, payload, exclude))]
    pub async fn broadcast(&self, payload: Value, exclude: &[ClientId]) -> BroadcastReport {
        let excluded: HashSet<&ClientId> = exclude.iter().collect();
        let recipients: Vec<ClientId> = {
            let sessions = self.inner.sessions.lock().await;
            sessions
                .keys()
                .filter(|id| !excluded.contains(id))
                .cloned()
                .collect()
        };

        let results = join_all(
            recipients
                .iter()
                .map(|client_id| self.send(client_id, payload.clone())),
        )
        .await;

        let report = BroadcastReport {
            delivered: results.iter().filter(|delivered| **delivered).count(),
            total: recipients.len(),
        };
        debug!("broadcast delivered to {}/{}", report.delivered, report.total);
        report
    }

    /// Remove a client's session
    ///
    /// Idempotent. The session's supervisor has stopped by the time this
    /// returns; the client's queue is kept for a later `register`.
    #[instrument(skip(self), fields(client = %client_id))]
    pub async fn unregister(&self, client_id: &ClientId) -> bool {
        let Some(entry) = self.remove(client_id, None).await else {
            return false;
        };

        let session_id = entry.session.session_id;
        self.retire(client_id, entry).await;
        info!("session {session_id} unregistered");
        true
    }

    /// Remove a session if it is still the one identified by `session_id`
    ///
    /// Used when the client side goes away. Stops the supervisor like
    /// `unregister` does but leaves a newer registration alone.
    #[instrument(skip(self), fields(client = %client_id))]
    pub async fn close_session(&self, client_id: &ClientId, session_id: u64, reason: &str) -> bool {
        let Some(entry) = self.remove(client_id, Some(session_id)).await else {
            return false;
        };

        self.retire(client_id, entry).await;
        info!("session {session_id} closed: {reason}");
        true
    }

    /// Tear down every session (queues are kept)
    pub async fn shutdown(&self) {
        let clients: Vec<ClientId> = self.inner.sessions.lock().await.keys().cloned().collect();
        for client_id in clients {
            self.unregister(&client_id).await;
        }
    }

    pub async fn session(&self, client_id: &ClientId) -> Option<Session> {
        let sessions = self.inner.sessions.lock().await;
        sessions.get(client_id).map(|entry| entry.session.clone())
    }

    pub async fn sessions(&self) -> Vec<Session> {
        let sessions = self.inner.sessions.lock().await;
        let mut list: Vec<Session> = sessions.values().map(|e| e.session.clone()).collect();
        list.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        list
    }

    /// Messages waiting for a client
    pub async fn queued(&self, client_id: &ClientId) -> usize {
        self.inner.queue.lock().await.len(client_id)
    }

    pub async fn stats(&self) -> RegistryStats {
        let sessions = self.inner.sessions.lock().await.len();
        let queue = self.inner.queue.lock().await;
        RegistryStats {
            sessions,
            queued_messages: queue.total(),
            evicted_messages: queue.evicted(),
        }
    }

    // ========================================================================
    // Supervisor hooks
    // ========================================================================

    pub(crate) async fn liveness(&self, client_id: &ClientId, session_id: u64) -> Option<LivenessView> {
        let sessions = self.inner.sessions.lock().await;
        sessions
            .get(client_id)
            .filter(|entry| entry.session.session_id == session_id)
            .map(|entry| LivenessView {
                state: entry.session.state,
                last_activity: entry.session.last_activity,
                transport: entry.transport.clone(),
            })
    }

    /// Record activity on a session (an answered ping or any inbound message)
    pub async fn touch(&self, client_id: &ClientId, session_id: u64) {
        self.update_session(client_id, session_id, |session| {
            session.last_activity = Instant::now();
            session.last_activity_at = Utc::now();
        })
        .await;
    }

    /// Tear down the session a supervisor was spawned for
    ///
    /// Only removes the session if it is still the one identified by
    /// `session_id`; a newer registration of the same client is left alone.
    pub(crate) async fn end_session(&self, client_id: &ClientId, session_id: u64, reason: &str) {
        // the caller is the supervisor itself, so its handle is dropped, not awaited
        if let Some(entry) = self.remove(client_id, Some(session_id)).await {
            warn!("{client_id}: session {session_id} torn down: {reason}");
            self.close(client_id, entry.transport.as_ref()).await;
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn write_timeout(&self) -> Duration {
        self.inner.config.write_timeout()
    }

    async fn retire(&self, client_id: &ClientId, entry: SessionEntry) {
        if let Some(handle) = entry.supervisor {
            handle.abort();
            // cancelled is the expected outcome
            let _ = handle.await;
        }
        self.close(client_id, entry.transport.as_ref()).await;
    }

    async fn remove(&self, client_id: &ClientId, session_id: Option<u64>) -> Option<SessionEntry> {
        let mut sessions = self.inner.sessions.lock().await;
        let matches = sessions
            .get(client_id)
            .is_some_and(|entry| session_id.is_none_or(|id| entry.session.session_id == id));
        if matches {
            sessions.remove(client_id)
        } else {
            None
        }
    }

    /// Look up a deliverable session, or queue the payload while still holding
    /// the session lock so a concurrent `register` cannot miss it
    async fn route_or_enqueue(
        &self,
        client_id: &ClientId,
        payload: &Value,
    ) -> Option<(u64, Arc<dyn Transport>, Arc<Mutex<()>>)> {
        let sessions = self.inner.sessions.lock().await;
        match sessions.get(client_id) {
            Some(entry) if entry.session.state != SessionState::Disconnected => Some((
                entry.session.session_id,
                entry.transport.clone(),
                entry.lane.clone(),
            )),
            _ => {
                self.inner
                    .queue
                    .lock()
                    .await
                    .enqueue(client_id, QueuedMessage::new(payload.clone()));
                None
            }
        }
    }

    async fn is_deliverable(&self, client_id: &ClientId, session_id: u64) -> bool {
        let sessions = self.inner.sessions.lock().await;
        sessions.get(client_id).is_some_and(|entry| {
            entry.session.session_id == session_id
                && entry.session.state != SessionState::Disconnected
        })
    }

    async fn enqueue(&self, client_id: &ClientId, message: QueuedMessage) {
        self.inner.queue.lock().await.enqueue(client_id, message);
    }

    /// Replay the backlog in order; returns (delivered, left in queue)
    async fn drain_backlog(
        &self,
        client_id: &ClientId,
        session_id: u64,
        transport: &dyn Transport,
    ) -> (usize, usize) {
        let mut backlog = self.inner.queue.lock().await.take(client_id);
        if backlog.is_empty() {
            return (0, 0);
        }

        debug!("session {session_id}: replaying {} queued message(s)", backlog.len());
        let mut delivered = 0;

        while let Some(mut message) = backlog.pop_front() {
            let outbound = message.next_attempt();
            if let Err(e) = with_timeout(self.write_timeout(), transport.send(&outbound)).await {
                warn!("{client_id}: replay failed at attempt {}: {e}", outbound.attempt);
                let mut remaining = VecDeque::with_capacity(backlog.len() + 1);
                remaining.push_back(message);
                remaining.extend(backlog);
                let pending = remaining.len();
                self.inner.queue.lock().await.requeue_front(client_id, remaining);
                return (delivered, pending);
            }
            delivered += 1;
        }

        (delivered, 0)
    }

    async fn update_session(
        &self,
        client_id: &ClientId,
        session_id: u64,
        update: impl FnOnce(&mut Session),
    ) {
        let mut sessions = self.inner.sessions.lock().await;
        if let Some(entry) = sessions
            .get_mut(client_id)
            .filter(|entry| entry.session.session_id == session_id)
        {
            update(&mut entry.session);
        }
    }

    async fn attach_supervisor(&self, client_id: &ClientId, session_id: u64, handle: JoinHandle<()>) {
        let mut sessions = self.inner.sessions.lock().await;
        match sessions
            .get_mut(client_id)
            .filter(|entry| entry.session.session_id == session_id)
        {
            Some(entry) => {
                if entry.supervisor.is_some() {
                    error!("{client_id}: session {session_id} already has a supervisor");
                    debug_assert!(false, "duplicate supervisor for one session");
                    handle.abort();
                } else {
                    entry.supervisor = Some(handle);
                }
            }
            // unregistered while we were draining
            None => handle.abort(),
        }
    }

    async fn close(&self, client_id: &ClientId, transport: &dyn Transport) {
        if let Err(e) = with_timeout(self.write_timeout(), transport.close()).await {
            debug!("{client_id}: error closing transport: {e}");
        }
    }

    fn spawn_close(&self, client_id: ClientId, transport: Arc<dyn Transport>) {
        let registry = self.clone();
        tokio::spawn(async move {
            registry.close(&client_id, transport.as_ref()).await;
        });
    }
}
