//! Connection lifecycle controller
//!
//! Drives the client status state machine and delegates stream setup to the
//! shared `ClientTransport`.

use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::client::channel::{Channel, ChannelOptions};
use crate::client::transport::ClientTransport;
use crate::error::{ChatError, Result};
use crate::feed::StateCell;
use crate::types::ConnectionStatus;

/// Owns the client connection lifecycle
pub struct ConnectionController {
    transport: Arc<ClientTransport>,
    options: ChannelOptions,
    /// Current channel; the lock also serializes connect/disconnect
    channel: Mutex<Option<Channel>>,
    status: StateCell<ConnectionStatus>,
}

impl ConnectionController {
    pub fn new(transport: Arc<ClientTransport>, options: ChannelOptions) -> Self {
        Self {
            transport,
            options,
            channel: Mutex::new(None),
            status: StateCell::new(ConnectionStatus::Disconnected),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.get()
    }

    /// Change-only feed of status transitions
    pub fn status_changes(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// Connect to the server at `address`
    pub async fn connect(&self, address: &str) -> Result<()> {
        let mut channel = self.channel.lock().await;

        match self.status.get() {
            ConnectionStatus::Connected => return Err(ChatError::AlreadyConnected),
            ConnectionStatus::Error => {
                self.status.transition(ConnectionStatus::Disconnected);
            }
            _ => {}
        }

        self.status.transition(ConnectionStatus::Connecting);
        info!("Connecting to {}", address);

        match self.open_channel(address).await {
            Ok(opened) => {
                *channel = Some(opened);
                self.status.transition(ConnectionStatus::Connected);
                info!("Connected to {}", address);
                Ok(())
            }
            Err(e) => {
                self.status.transition(ConnectionStatus::Error);
                warn!("Connection to {} failed: {}", address, e);
                Err(e)
            }
        }
    }

    async fn open_channel(&self, address: &str) -> Result<Channel> {
        let channel = Channel::for_address(address, self.options.clone())?;
        self.transport.initialize(&channel).await?;
        Ok(channel)
    }

    /// Close the stream and return to Disconnected
    ///
    /// Safe to call in any state, any number of times.
    pub async fn disconnect(&self) {
        let mut channel = self.channel.lock().await;

        if let Some(closed) = channel.take() {
            self.transport.close().await;
            debug!("Channel to {} torn down", closed.url());
        }

        if self.status.transition(ConnectionStatus::Disconnected) {
            info!("Disconnected");
        }
    }
}
