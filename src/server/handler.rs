//! WebSocket stream handler
//!
//! Runs one accepted connection: WebSocket handshake, registration, the read
//! loop that fans inbound messages out through the registry, and cleanup.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::codec::{self, Frame};
use crate::config::CONNECTION_BUFFER_SIZE;
use crate::error::Result;
use crate::feed::Feed;
use crate::message::WireMessage;
use crate::server::registry::ConnectionRegistry;
use crate::types::ClientId;

/// How long the write task gets to flush and send its close frame
const WRITE_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Per-connection read loop shared by all accepted connections
pub struct StreamHandler {
    registry: Arc<ConnectionRegistry>,
    inbound: Feed<WireMessage>,
    max_message_size: usize,
}

impl StreamHandler {
    pub fn new(registry: Arc<ConnectionRegistry>, max_message_size: usize) -> Self {
        Self {
            registry,
            inbound: Feed::default(),
            max_message_size,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Raw messages received from any client
    pub fn inbound(&self) -> broadcast::Receiver<WireMessage> {
        self.inbound.subscribe()
    }

    /// Handle a new TCP connection until it ends or `shutdown` fires
    ///
    /// The connection is unregistered on every exit path once registered.
    pub async fn handle_connection(
        &self,
        stream: TcpStream,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        debug!("New TCP connection from {}", peer_addr);

        // WebSocket handshake
        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(self.max_message_size);
        config.max_frame_size = Some(self.max_message_size);
        let ws_stream = tokio_tungstenite::accept_async_with_config(stream, Some(config)).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        // Channel for registry -> client messages
        let (msg_tx, mut msg_rx) = mpsc::channel::<WireMessage>(CONNECTION_BUFFER_SIZE);

        // Write task (WireMessage -> WebSocket); ends once the registry drops the sender
        let mut write_task = tokio::spawn(async move {
            while let Some(msg) = msg_rx.recv().await {
                match codec::to_frame(&msg) {
                    Ok(frame) => {
                        if ws_sender.send(frame).await.is_err() {
                            debug!("WebSocket send failed, ending write task");
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Failed to serialize message: {}", e);
                    }
                }
            }

            // Send close frame when done
            let _ = ws_sender.close().await;
        });

        let registration = Registration::new(&self.registry, Arc::new(msg_tx));
        let client_id = registration.client_id;
        info!("Client {} connected from {}", client_id, peer_addr);

        let mut write_finished = false;
        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Shutdown ends read loop for {}", client_id);
                    break;
                }
                _ = &mut write_task => {
                    debug!("Write task ended for {}", client_id);
                    write_finished = true;
                    break;
                }
                next = ws_receiver.next() => next,
            };

            match next {
                Some(Ok(frame)) => match codec::from_frame(frame) {
                    Ok(Frame::Message(wire)) => tokio::select! {
                        _ = shutdown.cancelled() => {
                            debug!("Shutdown interrupts broadcast from {}", client_id);
                            break;
                        }
                        _ = self.forward(client_id, wire) => {}
                    },
                    Ok(Frame::Control) => {}
                    Ok(Frame::Close) => {
                        debug!("Client {} sent close frame", client_id);
                        break;
                    }
                    Err(e) => {
                        warn!("Invalid message from {}: {}", client_id, e);
                    }
                },
                Some(Err(e)) => {
                    error!("WebSocket error for {}: {}", client_id, e);
                    break;
                }
                None => break,
            }
        }

        drop(registration);

        if !write_finished {
            if tokio::time::timeout(WRITE_DRAIN_TIMEOUT, &mut write_task)
                .await
                .is_err()
            {
                warn!("Write task for {} did not drain, aborting", client_id);
                write_task.abort();
            }
        }

        info!("Client {} disconnected", client_id);
        Ok(())
    }

    /// Fan an inbound message out to every other client, then publish it locally
    async fn forward(&self, sender_id: ClientId, wire: WireMessage) {
        let delivered = self.registry.broadcast(&wire, Some(sender_id)).await;
        debug!("Message from {} delivered to {} clients", sender_id, delivered);
        self.inbound.publish(wire);
    }
}

/// Keeps a connection registered until dropped
struct Registration<'a> {
    registry: &'a ConnectionRegistry,
    client_id: ClientId,
}

impl<'a> Registration<'a> {
    fn new(registry: &'a ConnectionRegistry, writer: Arc<mpsc::Sender<WireMessage>>) -> Self {
        let client_id = registry.register(writer);
        Self {
            registry,
            client_id,
        }
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.registry.unregister(self.client_id);
    }
}
