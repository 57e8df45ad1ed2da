//! Server broadcast service
//!
//! Facade over the registry and the stream handler: sends server messages to
//! every client and exposes decoded inbound messages and the live count.

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::codec;
use crate::error::Result;
use crate::feed::Feed;
use crate::message::{ChatMessage, SERVER_SENDER};
use crate::server::handler::StreamHandler;

pub struct BroadcastService {
    handler: Arc<StreamHandler>,
    messages: Feed<ChatMessage>,
    forwarder: JoinHandle<()>,
}

impl BroadcastService {
    /// Must be called inside a tokio runtime; spawns the decoding task
    pub fn new(handler: Arc<StreamHandler>) -> Self {
        let messages = Feed::default();
        let mut raw = handler.inbound();
        let decoded = messages.clone();

        let forwarder = tokio::spawn(async move {
            loop {
                match raw.recv().await {
                    Ok(wire) => match codec::decode(wire) {
                        Ok(message) => decoded.publish(message),
                        Err(e) => warn!("Discarding undecodable inbound message: {}", e),
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Inbound feed lagged, {} messages skipped", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Self {
            handler,
            messages,
            forwarder,
        }
    }

    /// Send `content` from the server to every connected client
    ///
    /// Failed recipients are dropped from the registry; they never fail the call.
    pub async fn broadcast_message(&self, content: &str) -> Result<ChatMessage> {
        let message = ChatMessage::new(content, SERVER_SENDER);
        let delivered = self
            .handler
            .registry()
            .broadcast(&codec::encode(&message), None)
            .await;

        debug!("Server message delivered to {} clients", delivered);
        Ok(message)
    }

    /// Messages received from clients
    pub fn messages(&self) -> broadcast::Receiver<ChatMessage> {
        self.messages.subscribe()
    }

    pub fn connected_count(&self) -> usize {
        self.handler.registry().connected_count()
    }

    pub fn connected_count_changes(&self) -> broadcast::Receiver<usize> {
        self.handler.registry().count_changes()
    }
}

impl Drop for BroadcastService {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}
