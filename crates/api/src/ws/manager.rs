use std::collections::HashMap;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::ws::Message;
use synth_core::types::{OwnerId, Timestamp};
use synth_events::NotificationChannel;
use tokio::sync::{mpsc, RwLock};

/// Channel sender half for pushing messages to a WebSocket connection.
pub type WsSender = mpsc::UnboundedSender<Message>;

/// Metadata for a single WebSocket connection.
pub struct WsConnection {
    /// Owner whose job events this connection receives.
    pub owner_id: OwnerId,
    pub sender: WsSender,
    pub connected_at: Timestamp,
}

/// Manages all active WebSocket connections.
///
/// Thread-safe via interior `RwLock`; wrapped in `Arc` and shared across
/// the application. An owner may hold several connections (tabs, devices).
pub struct WsManager {
    connections: RwLock<HashMap<String, WsConnection>>,
}

impl WsManager {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new connection.
    ///
    /// Returns the receiver half of the message channel so the caller can
    /// forward messages to the WebSocket sink.
    pub async fn add(&self, conn_id: String, owner_id: OwnerId) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = WsConnection {
            owner_id,
            sender: tx,
            connected_at: chrono::Utc::now(),
        };
        self.connections.write().await.insert(conn_id, conn);
        rx
    }

    pub async fn remove(&self, conn_id: &str) {
        self.connections.write().await.remove(conn_id);
    }

    /// Send a message to every connection of one owner.
    ///
    /// Returns the number of connections the message was queued on. Closed
    /// channels are skipped; their receive loop removes them.
    pub async fn send_to_owner(&self, owner_id: &str, message: Message) -> usize {
        let conns = self.connections.read().await;
        let mut count = 0;
        for conn in conns.values().filter(|c| c.owner_id == owner_id) {
            if conn.sender.send(message.clone()).is_ok() {
                count += 1;
            }
        }
        count
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Send a Close frame to every connection, then clear the map.
    pub async fn shutdown_all(&self) {
        let mut conns = self.connections.write().await;
        let count = conns.len();
        for conn in conns.values() {
            let _ = conn.sender.send(Message::Close(None));
        }
        conns.clear();
        tracing::info!(count, "Closed all WebSocket connections");
    }

    /// Send a Ping frame to every connected client.
    pub async fn ping_all(&self) {
        let conns = self.connections.read().await;
        for conn in conns.values() {
            let _ = conn.sender.send(Message::Ping(Bytes::new()));
        }
    }
}

impl Default for WsManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Text frame pushed to clients: `{"event": "...", "data": {...}}`.
pub fn event_frame(event_name: &str, payload: &serde_json::Value) -> Message {
    let body = serde_json::json!({
        "event": event_name,
        "data": payload,
    });
    Message::Text(body.to_string().into())
}

#[async_trait]
impl NotificationChannel for WsManager {
    fn name(&self) -> &'static str {
        "ws"
    }

    async fn send(&self, owner_id: &str, event_name: &str, payload: &serde_json::Value) {
        let delivered = self
            .send_to_owner(owner_id, event_frame(event_name, payload))
            .await;
        tracing::debug!(owner_id, event = event_name, delivered, "WebSocket notification");
    }
}
