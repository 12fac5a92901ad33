//! ConnectionRegistry - Active WebSocket Sessions
//!
//! ## Responsibilities
//!
//! - Track active client sessions (created at process start, one entry per connection)
//! - Hand each session its outbound message channel
//! - Fan-out broadcast
//! - Cleanup on disconnect
//!
//! Each session's outbound channel is a single FIFO, so per-session message
//! order is preserved. No ordering holds across sessions.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Registered connection
struct ClientConnection {
    id: Uuid,
    tx: mpsc::UnboundedSender<String>,
}

/// Handles returned to a newly registered session
pub struct SessionChannel {
    pub id: Uuid,
    /// Outbound sender (session replies)
    pub tx: mpsc::UnboundedSender<String>,
    /// Outbound receiver, drained by the socket writer
    pub rx: mpsc::UnboundedReceiver<String>,
}

/// ConnectionRegistry instance
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<Uuid, ClientConnection>>,
    connection_count: AtomicU64,
}

impl ConnectionRegistry {
    /// Create new ConnectionRegistry
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            connection_count: AtomicU64::new(0),
        }
    }

    /// Register a new client
    pub async fn register(&self) -> SessionChannel {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let mut connections = self.connections.write().await;
            connections.insert(id, ClientConnection { id, tx: tx.clone() });
        }

        self.connection_count.fetch_add(1, Ordering::Relaxed);

        tracing::info!(session_id = %id, "Client connected");

        SessionChannel { id, tx, rx }
    }

    /// Unregister a client
    pub async fn unregister(&self, id: &Uuid) {
        let mut connections = self.connections.write().await;
        if connections.remove(id).is_some() {
            self.connection_count.fetch_sub(1, Ordering::Relaxed);
            tracing::info!(session_id = %id, "Client disconnected");
        }
    }

    /// Broadcast message to all clients; returns how many accepted it
    pub async fn broadcast<T: Serialize>(&self, message: &T) -> usize {
        let json = match serde_json::to_string(message) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize message");
                return 0;
            }
        };

        let connections = self.connections.read().await;
        tracing::debug!(client_count = connections.len(), "Broadcasting message to clients");

        let mut delivered = 0;
        for conn in connections.values() {
            match conn.tx.send(json.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(session_id = %conn.id, error = %e, "Failed to send message");
                }
            }
        }
        delivered
    }

    /// Get connection count
    pub fn connection_count(&self) -> u64 {
        self.connection_count.load(Ordering::Relaxed)
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_register_unregister() {
        let registry = ConnectionRegistry::new();
        let a = registry.register().await;
        let b = registry.register().await;
        assert_ne!(a.id, b.id);
        assert_eq!(registry.connection_count(), 2);

        registry.unregister(&a.id).await;
        registry.unregister(&a.id).await;
        assert_eq!(registry.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all() {
        let registry = ConnectionRegistry::new();
        let mut a = registry.register().await;
        let mut b = registry.register().await;

        let delivered = registry.broadcast(&json!({ "type": "notice" })).await;
        assert_eq!(delivered, 2);
        assert_eq!(a.rx.recv().await.unwrap(), r#"{"type":"notice"}"#);
        assert_eq!(b.rx.recv().await.unwrap(), r#"{"type":"notice"}"#);
    }

    #[tokio::test]
    async fn test_broadcast_preserves_order() {
        let registry = ConnectionRegistry::new();
        let mut a = registry.register().await;

        for i in 0..5 {
            assert_eq!(registry.broadcast(&json!({ "n": i })).await, 1);
        }
        for i in 0..5 {
            let msg: serde_json::Value = serde_json::from_str(&a.rx.recv().await.unwrap()).unwrap();
            assert_eq!(msg["n"], i);
        }
    }

    #[tokio::test]
    async fn test_broadcast_skips_closed_receivers() {
        let registry = ConnectionRegistry::new();
        let a = registry.register().await;
        let _b = registry.register().await;
        drop(a.rx);

        assert_eq!(registry.broadcast(&json!({ "x": 1 })).await, 1);
    }
}
