//! Broadcast Chat over WebSocket Duplex Streams
//!
//! Many clients keep one persistent WebSocket stream each to a central
//! server. The server re-broadcasts every client message to all *other*
//! connected clients and tracks the live connection count.
//!
//! # Architecture
//! Server side:
//! - `ConnectionRegistry` maps each live connection to its writer and fans
//!   messages out, isolating per-recipient write failures
//! - `StreamHandler` runs one read loop per accepted connection
//! - `BroadcastService` is the facade for server messages and feeds
//! - `ServerHost` binds the listener and drains connections on stop
//!
//! Client side:
//! - `ClientTransport` owns the duplex stream (serialized sends, cancellable receive)
//! - `ConnectionController` drives the connection status state machine
//! - `MessageService` runs the background receive loop and sends messages
//!
//! State changes, counts and messages are published through
//! `tokio::sync::broadcast` subscriptions so any number of observers can follow them.
//!
//! # Example
//! ```ignore
//! use duplex_chat::{server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let (host, broadcast) = server::build(ServerConfig::default());
//!     host.start().await.unwrap();
//!
//!     let mut messages = broadcast.messages();
//!     while let Ok(message) = messages.recv().await {
//!         println!("{}: {}", message.sender(), message.content());
//!     }
//! }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod feed;
pub mod message;
pub mod server;
pub mod types;

// Re-export main types for convenience
pub use client::{
    Channel, ChannelOptions, ClientTransport, ConnectionController, MessageService, TransportTrust,
};
pub use config::{ClientConfig, ServerConfig};
pub use error::{ChatError, Result};
pub use feed::{Feed, StateCell};
pub use message::{ChatMessage, WireMessage};
pub use server::{BroadcastService, ConnectionRegistry, MessageSink, ServerHost, StreamHandler};
pub use types::{ClientId, ConnectionStatus, Lifecycle, ServerStatus};
