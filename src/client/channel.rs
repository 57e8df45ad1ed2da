//! Client channel configuration
//!
//! A `Channel` is a validated server endpoint plus the limits the transport
//! applies when it opens a stream to it.

use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::warn;

use crate::config::MAX_MESSAGE_SIZE;
use crate::error::{ChatError, Result};

/// How far the client trusts the transport to the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportTrust {
    /// Only `https://` / `wss://` endpoints are accepted
    Verified,
    /// Plaintext `http://` / `ws://` endpoints are accepted.
    ///
    /// INSECURE: traffic is unencrypted and the server is not authenticated.
    /// Development use only; never ship this in production.
    InsecureDevelopment,
}

/// Limits and trust mode for a channel
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    pub max_send_message_size: usize,
    pub max_receive_message_size: usize,
    pub trust: TransportTrust,
}

impl ChannelOptions {
    /// Development posture: 5 MiB each way, plaintext allowed
    pub fn development() -> Self {
        Self {
            max_send_message_size: MAX_MESSAGE_SIZE,
            max_receive_message_size: MAX_MESSAGE_SIZE,
            trust: TransportTrust::InsecureDevelopment,
        }
    }
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self::development()
    }
}

/// A configured connection target
#[derive(Debug, Clone)]
pub struct Channel {
    url: String,
    options: ChannelOptions,
}

impl Channel {
    /// Build a channel for `address`
    ///
    /// `http`/`ws` map to `ws://`, `https`/`wss` map to `wss://`.
    pub fn for_address(address: &str, options: ChannelOptions) -> Result<Self> {
        let (url, secure) = websocket_url(address)?;

        if !secure {
            match options.trust {
                TransportTrust::Verified => {
                    return Err(ChatError::Connection(format!(
                        "plaintext address {} refused by verified transport",
                        address
                    )));
                }
                TransportTrust::InsecureDevelopment => {
                    warn!("Using insecure plaintext transport to {} (development only)", url);
                }
            }
        }

        Ok(Self { url, options })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn options(&self) -> &ChannelOptions {
        &self.options
    }

    /// WebSocket limits for the inbound direction
    pub fn websocket_config(&self) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(self.options.max_receive_message_size);
        config.max_frame_size = Some(self.options.max_receive_message_size);
        config
    }
}

fn websocket_url(address: &str) -> Result<(String, bool)> {
    let address = address.trim();
    let (scheme, rest) = address
        .split_once("://")
        .ok_or_else(|| ChatError::Connection(format!("address {} has no scheme", address)))?;

    let secure = match scheme.to_ascii_lowercase().as_str() {
        "http" | "ws" => false,
        "https" | "wss" => true,
        other => {
            return Err(ChatError::Connection(format!(
                "unsupported scheme {}",
                other
            )))
        }
    };

    if rest.is_empty() || rest.starts_with('/') {
        return Err(ChatError::Connection(format!(
            "address {} has no host",
            address
        )));
    }

    let scheme = if secure { "wss" } else { "ws" };
    Ok((format!("{}://{}", scheme, rest), secure))
}
