//! Client transport abstraction
//!
//! The core never speaks a wire protocol itself. Anything that can write a
//! message to a client and close the channel can carry a session: the axum
//! WebSocket adapter in `api::websocket`, or the in-process [`ChannelTransport`]
//! used by embedders and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{WatchtowerError, WatchtowerResult};

/// A message as written to a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub payload: Value,

    /// Delivery attempt (1 for a live send, higher when replayed from the queue)
    pub attempt: u32,

    /// When the message was first queued, if it was
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queued_at: Option<DateTime<Utc>>,
}

impl OutboundMessage {
    pub fn live(payload: Value) -> Self {
        Self {
            payload,
            attempt: 1,
            queued_at: None,
        }
    }
}

/// A bidirectional channel to one client
///
/// Any error returned here is treated as a liveness failure of the session.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> WatchtowerResult<()>;

    /// Liveness check; defaults to sending a `{"type":"ping"}` message
    async fn ping(&self) -> WatchtowerResult<()> {
        self.send(&OutboundMessage::live(serde_json::json!({ "type": "ping" })))
            .await
    }

    async fn close(&self) -> WatchtowerResult<()>;
}

/// Frames produced by a [`ChannelTransport`]
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Message(OutboundMessage),
    Ping,
    Close,
}

/// Transport backed by a tokio mpsc channel
///
/// Sends fail once the receiving side is dropped, which is how an in-process
/// client "disconnects".
pub struct ChannelTransport {
    sender: mpsc::Sender<Frame>,
}

impl ChannelTransport {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (sender, receiver) = mpsc::channel(buffer);
        (Self { sender }, receiver)
    }

    async fn push(&self, frame: Frame) -> WatchtowerResult<()> {
        self.sender
            .send(frame)
            .await
            .map_err(|_| WatchtowerError::Transport("channel closed".to_string()))
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, message: &OutboundMessage) -> WatchtowerResult<()> {
        self.push(Frame::Message(message.clone())).await
    }

    async fn ping(&self) -> WatchtowerResult<()> {
        self.push(Frame::Ping).await
    }

    async fn close(&self) -> WatchtowerResult<()> {
        // closing an already-dropped channel is fine
        let _ = self.sender.send(Frame::Close).await;
        Ok(())
    }
}
