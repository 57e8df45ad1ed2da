//! Server connection registry
//!
//! Maps each live connection's `ClientId` to the writer feeding its socket and
//! fans messages out to them. The map lives behind a `parking_lot::RwLock`
//! that is never held across an `.await`: broadcast copies a snapshot of the
//! recipients and releases the lock before writing.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::error::{ChatError, Result};
use crate::feed::Feed;
use crate::message::WireMessage;
use crate::types::ClientId;

/// Write side of one registered connection
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn write(&self, message: WireMessage) -> Result<()>;
}

/// Feeds the connection's write task
#[async_trait]
impl MessageSink for mpsc::Sender<WireMessage> {
    async fn write(&self, message: WireMessage) -> Result<()> {
        self.send(message)
            .await
            .map_err(|_| ChatError::Transport("connection writer closed".to_string()))
    }
}

/// Concurrency-safe id -> writer map with isolated fan-out
pub struct ConnectionRegistry {
    clients: RwLock<HashMap<ClientId, Arc<dyn MessageSink>>>,
    count_changes: Feed<usize>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            count_changes: Feed::default(),
        }
    }

    /// Add a writer under a fresh id and publish the new count
    pub fn register(&self, writer: Arc<dyn MessageSink>) -> ClientId {
        let mut clients = self.clients.write();

        let client_id = loop {
            let id = ClientId::new();
            if !clients.contains_key(&id) {
                break id;
            }
        };

        clients.insert(client_id, writer);
        self.count_changes.publish(clients.len());
        debug!("Registered {}, total clients: {}", client_id, clients.len());

        client_id
    }

    /// Remove `client_id` if present
    ///
    /// Publishes the current count either way. Returns whether it was present.
    pub fn unregister(&self, client_id: ClientId) -> bool {
        let mut clients = self.clients.write();
        let removed = clients.remove(&client_id).is_some();
        self.count_changes.publish(clients.len());

        if removed {
            debug!("Unregistered {}, total clients: {}", client_id, clients.len());
        }
        removed
    }

    pub fn connected_count(&self) -> usize {
        self.clients.read().len()
    }

    pub fn contains(&self, client_id: ClientId) -> bool {
        self.clients.read().contains_key(&client_id)
    }

    /// Subscribe to the live connection count
    pub fn count_changes(&self) -> broadcast::Receiver<usize> {
        self.count_changes.subscribe()
    }

    /// Write `message` to every registered connection except `exclude`
    ///
    /// A failed write only affects its own recipient: delivery to the rest
    /// continues, and failed recipients are unregistered after the pass.
    /// Returns the number of successful deliveries.
    pub async fn broadcast(&self, message: &WireMessage, exclude: Option<ClientId>) -> usize {
        let recipients: Vec<(ClientId, Arc<dyn MessageSink>)> = self
            .clients
            .read()
            .iter()
            .filter(|(id, _)| Some(**id) != exclude)
            .map(|(id, writer)| (*id, Arc::clone(writer)))
            .collect();

        let mut delivered = 0;
        let mut failed = Vec::new();

        for (client_id, writer) in recipients {
            match writer.write(message.clone()).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!("Write to {} failed: {}", client_id, e);
                    failed.push(client_id);
                }
            }
        }

        for client_id in failed {
            self.unregister(client_id);
        }

        delivered
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
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        received: Mutex<Vec<WireMessage>>,
    }

    impl RecordingSink {
        fn contents(&self) -> Vec<String> {
            self.received.lock().iter().map(|m| m.content.clone()).collect()
        }
    }

    #[async_trait]
    impl MessageSink for RecordingSink {
        async fn write(&self, message: WireMessage) -> Result<()> {
            self.received.lock().push(message);
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl MessageSink for FailingSink {
        async fn write(&self, _message: WireMessage) -> Result<()> {
            Err(ChatError::Transport("broken pipe".to_string()))
        }
    }

    fn message(content: &str) -> WireMessage {
        WireMessage {
            content: content.to_string(),
            sender: "Server".to_string(),
            timestamp: 0,
        }
    }

    #[test]
    fn test_count_tracks_register_and_unregister() {
        let registry = ConnectionRegistry::new();
        let mut ids = Vec::new();

        for _ in 0..5 {
            ids.push(registry.register(Arc::new(RecordingSink::default())));
        }
        assert_eq!(registry.connected_count(), 5);

        assert!(registry.unregister(ids[1]));
        assert!(registry.unregister(ids[3]));
        assert_eq!(registry.connected_count(), 3);

        // Unknown and repeated ids are no-ops
        assert!(!registry.unregister(ids[1]));
        assert!(!registry.unregister(ClientId::new()));
        assert_eq!(registry.connected_count(), 3);
    }

    #[tokio::test]
    async fn test_count_published_on_every_change() {
        let registry = ConnectionRegistry::new();
        let mut counts = registry.count_changes();

        let a = registry.register(Arc::new(RecordingSink::default()));
        let _b = registry.register(Arc::new(RecordingSink::default()));
        registry.unregister(a);
        registry.unregister(a);

        assert_eq!(counts.recv().await.unwrap(), 1);
        assert_eq!(counts.recv().await.unwrap(), 2);
        assert_eq!(counts.recv().await.unwrap(), 1);
        assert_eq!(counts.recv().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_isolates_failing_recipient() {
        let registry = ConnectionRegistry::new();
        let first = Arc::new(RecordingSink::default());
        let third = Arc::new(RecordingSink::default());

        registry.register(first.clone());
        let broken = registry.register(Arc::new(FailingSink));
        registry.register(third.clone());
        assert_eq!(registry.connected_count(), 3);

        let delivered = registry.broadcast(&message("ping"), None).await;

        assert_eq!(delivered, 2);
        assert_eq!(first.contents(), vec!["ping"]);
        assert_eq!(third.contents(), vec!["ping"]);
        assert!(!registry.contains(broken));
        assert_eq!(registry.connected_count(), 2);
    }

    #[tokio::test]
    async fn test_broadcast_excludes_sender() {
        let registry = ConnectionRegistry::new();
        let sender = Arc::new(RecordingSink::default());
        let other = Arc::new(RecordingSink::default());

        let sender_id = registry.register(sender.clone());
        registry.register(other.clone());

        let delivered = registry.broadcast(&message("hello"), Some(sender_id)).await;

        assert_eq!(delivered, 1);
        assert!(sender.contents().is_empty());
        assert_eq!(other.contents(), vec!["hello"]);
    }

    #[tokio::test]
    async fn test_broadcast_to_empty_registry() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.broadcast(&message("nobody"), None).await, 0);
    }

    #[tokio::test]
    async fn test_channel_sink_reports_closed_writer() {
        let (tx, rx) = mpsc::channel::<WireMessage>(1);
        drop(rx);

        let registry = ConnectionRegistry::new();
        let id = registry.register(Arc::new(tx));

        assert_eq!(registry.broadcast(&message("lost"), None).await, 0);
        assert!(!registry.contains(id));
    }

    #[tokio::test]
    async fn test_concurrent_registration() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut tasks = Vec::new();

        for _ in 0..32 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                let id = registry.register(Arc::new(RecordingSink::default()));
                registry.broadcast(&message("hi"), Some(id)).await;
                id
            }));
        }

        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap());
        }
        assert_eq!(registry.connected_count(), 32);

        for id in ids.iter().take(10) {
            registry.unregister(*id);
        }
        assert_eq!(registry.connected_count(), 22);
    }
}
