//! WebSocket client sessions
//!
//! Each connection is registered with the [`ConnectionRegistry`] as the
//! client's transport. Queued messages are replayed on connect; inbound
//! frames count as activity for the session's supervisor.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{
    SinkExt,
    stream::{SplitSink, StreamExt},
};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::api::state::ApiState;
use crate::error::{WatchtowerError, WatchtowerResult};
use crate::ids::ClientId;
use crate::transport::{OutboundMessage, Transport};

/// Write half of an axum WebSocket
pub struct WebSocketTransport {
    sink: Mutex<SplitSink<WebSocket, Message>>,
}

impl WebSocketTransport {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }

    async fn write(&self, message: Message) -> WatchtowerResult<()> {
        self.sink
            .lock()
            .await
            .send(message)
            .await
            .map_err(|e| WatchtowerError::Transport(e.to_string()))
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&self, message: &OutboundMessage) -> WatchtowerResult<()> {
        let text = serde_json::to_string(message)
            .map_err(|e| WatchtowerError::Transport(format!("failed to encode message: {e}")))?;
        self.write(Message::Text(text)).await
    }

    async fn ping(&self) -> WatchtowerResult<()> {
        self.write(Message::Ping(Vec::new())).await
    }

    async fn close(&self) -> WatchtowerResult<()> {
        let mut sink = self.sink.lock().await;
        let _ = sink.send(Message::Close(None)).await;
        sink.close()
            .await
            .map_err(|e| WatchtowerError::Transport(e.to_string()))
    }
}

/// WebSocket upgrade handler
///
/// GET /api/v1/connect/:client_id
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Path(client_id): Path<String>,
    State(state): State<ApiState>,
) -> Response {
    let client_id = ClientId::from(client_id);
    ws.on_upgrade(move |socket| handle_websocket(socket, client_id, state))
}

async fn handle_websocket(socket: WebSocket, client_id: ClientId, state: ApiState) {
    info!("WebSocket client {client_id} connected");

    let (sender, mut receiver) = socket.split();
    let transport = Arc::new(WebSocketTransport::new(sender));

    let session = state.registry.register(client_id.clone(), transport).await;
    debug!(
        "session {} for {client_id} replayed {} queued message(s)",
        session.session_id, session.replayed
    );

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Close(_) => break,
            // Pong is automatically sent by axum
            _ => state.registry.touch(&client_id, session.session_id).await,
        }
    }

    state
        .registry
        .close_session(&client_id, session.session_id, "client closed the connection")
        .await;

    info!("WebSocket client {client_id} disconnected");
}
