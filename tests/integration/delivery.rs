//! Delivery guarantees of the connection registry
//!
//! - Messages for an absent client are replayed in order on reconnect
//! - The per-client queue keeps only the newest messages
//! - Unregistering while a ping is in flight leaves no task behind

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use watchtower::{
    ClientId,
    config::ConnectionConfig,
    connections::{ConnectionRegistry, SessionState},
    transport::{ChannelTransport, Frame, Transport},
};

use crate::helpers::StallingTransport;

fn registry(queue_capacity: usize) -> ConnectionRegistry {
    ConnectionRegistry::new(ConnectionConfig {
        queue_capacity,
        ..ConnectionConfig::default()
    })
}

async fn next_message(rx: &mut tokio::sync::mpsc::Receiver<Frame>) -> (serde_json::Value, u32) {
    match rx.recv().await {
        Some(Frame::Message(message)) => (message.payload, message.attempt),
        other => panic!("expected a message frame, got {other:?}"),
    }
}

#[tokio::test]
async fn test_backlog_replayed_in_order_then_live_traffic() {
    let registry = registry(100);
    let client = ClientId::from("dashboard-1");

    for seq in 1..=3 {
        assert!(!registry.send(&client, json!({ "seq": seq })).await);
    }
    assert_eq!(registry.queued(&client).await, 3);

    let (transport, mut rx) = ChannelTransport::new(16);
    let session = registry.register(client.clone(), Arc::new(transport)).await;
    assert_eq!(session.replayed, 3);
    assert_eq!(session.pending, 0);

    assert!(registry.send(&client, json!({ "seq": 4 })).await);

    for seq in 1..=3 {
        assert_eq!(next_message(&mut rx).await, (json!({ "seq": seq }), 1));
    }
    assert_eq!(next_message(&mut rx).await, (json!({ "seq": 4 }), 1));

    let state = registry.session(&client).await.unwrap().state;
    assert_eq!(state, SessionState::Connected);
    assert_eq!(registry.queued(&client).await, 0);
}

#[tokio::test]
async fn test_queue_cap_keeps_newest_messages() {
    let registry = registry(3);
    let client = ClientId::from("dashboard-1");

    for seq in 1..=5 {
        registry.send(&client, json!({ "seq": seq })).await;
    }

    let stats = registry.stats().await;
    assert_eq!(stats.queued_messages, 3);
    assert_eq!(stats.evicted_messages, 2);

    let (transport, mut rx) = ChannelTransport::new(16);
    registry.register(client, Arc::new(transport)).await;

    for seq in 3..=5 {
        assert_eq!(next_message(&mut rx).await.0, json!({ "seq": seq }));
    }
}

#[tokio::test]
async fn test_dropped_client_messages_queue_until_reconnect() {
    let registry = registry(100);
    let client = ClientId::from("agent-7");

    let (transport, rx) = ChannelTransport::new(16);
    registry.register(client.clone(), Arc::new(transport)).await;
    drop(rx);

    assert!(!registry.send(&client, json!({ "seq": 1 })).await);
    assert!(!registry.send(&client, json!({ "seq": 2 })).await);

    let (transport, mut rx) = ChannelTransport::new(16);
    let session = registry.register(client.clone(), Arc::new(transport)).await;
    assert_eq!(session.replayed, 2);

    // the failed live send counts as the first attempt
    assert_eq!(next_message(&mut rx).await, (json!({ "seq": 1 }), 2));
    assert_eq!(next_message(&mut rx).await, (json!({ "seq": 2 }), 1));
}

#[tokio::test]
async fn test_unregister_during_ping_leaves_no_task() {
    let registry = ConnectionRegistry::new(ConnectionConfig {
        ping_interval_secs: 1,
        ..ConnectionConfig::default()
    });
    let client = ClientId::from("agent-1");

    let transport = Arc::new(StallingTransport::new());
    let ping_started = transport.ping_started.clone();
    registry
        .register(client.clone(), transport.clone() as Arc<dyn Transport>)
        .await;

    tokio::time::timeout(Duration::from_secs(5), ping_started.notified())
        .await
        .expect("supervisor never pinged");

    assert!(registry.unregister(&client).await);
    assert!(!registry.unregister(&client).await);

    // the registry and the aborted supervisor released their references
    assert_eq!(Arc::strong_count(&transport), 1);
    assert!(registry.session(&client).await.is_none());

    registry.send(&client, json!({ "seq": 1 })).await;
    registry.send(&client, json!({ "seq": 2 })).await;
    assert_eq!(registry.queued(&client).await, 2);

    let (replacement, mut rx) = ChannelTransport::new(16);
    let session = registry.register(client.clone(), Arc::new(replacement)).await;
    assert_eq!(session.replayed, 2);
    assert_eq!(next_message(&mut rx).await.0, json!({ "seq": 1 }));
}
