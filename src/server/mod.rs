//! Server side of the chat core
//!
//! One `ConnectionRegistry` is shared by the `StreamHandler` (one read loop
//! per accepted connection), the `BroadcastService` facade and, through the
//! handler, the `ServerHost` that accepts connections.

pub mod broadcast;
pub mod handler;
pub mod host;
pub mod registry;

use std::sync::Arc;

use crate::config::ServerConfig;

pub use broadcast::BroadcastService;
pub use handler::StreamHandler;
pub use host::ServerHost;
pub use registry::{ConnectionRegistry, MessageSink};

/// Wire a host and its broadcast facade around one shared registry
///
/// Must be called inside a tokio runtime.
pub fn build(config: ServerConfig) -> (ServerHost, BroadcastService) {
    let registry = Arc::new(ConnectionRegistry::new());
    let handler = Arc::new(StreamHandler::new(registry, config.max_message_size));
    let broadcast = BroadcastService::new(Arc::clone(&handler));
    (ServerHost::new(config, handler), broadcast)
}
