//! Client message service
//!
//! Runs one background receive loop over the transport and exposes the
//! decoded messages as a feed. Sends go straight to the transport.

use std::sync::Arc;

use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::transport::ClientTransport;
use crate::codec;
use crate::error::{ChatError, Result};
use crate::feed::Feed;
use crate::message::{ChatMessage, CLIENT_SENDER};

struct ReceiveLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Client-side send/receive facade
pub struct MessageService {
    transport: Arc<ClientTransport>,
    messages: Feed<ChatMessage>,
    receiving: Mutex<Option<ReceiveLoop>>,
}

impl MessageService {
    pub fn new(transport: Arc<ClientTransport>) -> Self {
        Self {
            transport,
            messages: Feed::default(),
            receiving: Mutex::new(None),
        }
    }

    /// Subscribe to messages received from the server
    pub fn messages(&self) -> broadcast::Receiver<ChatMessage> {
        self.messages.subscribe()
    }

    /// Start the background receive loop
    ///
    /// No-op while a loop is still running. A fault on the stream ends the
    /// loop quietly; subscribers just stop getting messages.
    pub fn start_receiving(&self) {
        let mut receiving = self.receiving.lock();
        if let Some(active) = receiving.as_ref() {
            if !active.handle.is_finished() {
                debug!("Receive loop already running");
                return;
            }
        }

        let cancel = CancellationToken::new();
        let stream = self.transport.receive(cancel.clone());
        let messages = self.messages.clone();

        let handle = tokio::spawn(async move {
            tokio::pin!(stream);
            while let Some(wire) = stream.next().await {
                match codec::decode(wire) {
                    Ok(message) => messages.publish(message),
                    Err(e) => warn!("Discarding undecodable message: {}", e),
                }
            }
            debug!("Receive loop ended");
        });

        *receiving = Some(ReceiveLoop { cancel, handle });
    }

    /// Cancel the receive loop; does nothing when idle
    pub fn stop_receiving(&self) {
        if let Some(active) = self.receiving.lock().take() {
            active.cancel.cancel();
        }
    }

    pub fn is_receiving(&self) -> bool {
        self.receiving
            .lock()
            .as_ref()
            .is_some_and(|active| !active.handle.is_finished())
    }

    /// Send `content` stamped as a client message
    ///
    /// Returns the message that was sent so the caller can show its own copy;
    /// the server does not echo it back.
    pub async fn send_message(&self, content: &str) -> Result<ChatMessage> {
        if !self.transport.is_stream_active() {
            return Err(ChatError::NotConnected);
        }

        let message = ChatMessage::new(content, CLIENT_SENDER);
        self.transport.send(&codec::encode(&message)).await?;
        Ok(message)
    }
}

impl Drop for MessageService {
    fn drop(&mut self) {
        self.stop_receiving();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_without_stream_is_not_connected() {
        let service = MessageService::new(Arc::new(ClientTransport::new()));
        let result = service.send_message("hi").await;
        assert!(matches!(result, Err(ChatError::NotConnected)));
    }

    #[tokio::test]
    async fn test_stop_receiving_when_idle() {
        let service = MessageService::new(Arc::new(ClientTransport::new()));
        service.stop_receiving();
        service.stop_receiving();
        assert!(!service.is_receiving());
    }

    #[tokio::test]
    async fn test_start_then_stop() {
        let service = MessageService::new(Arc::new(ClientTransport::new()));
        service.start_receiving();
        service.start_receiving();
        service.stop_receiving();
        assert!(!service.is_receiving());
    }
}
