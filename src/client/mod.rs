//! Client side of the chat core
//!
//! `ConnectionController` and `MessageService` share one `ClientTransport`:
//! the controller opens and closes the stream, the service sends on it and
//! runs the receive loop.

pub mod channel;
pub mod connection;
pub mod messages;
pub mod transport;

pub use channel::{Channel, ChannelOptions, TransportTrust};
pub use connection::ConnectionController;
pub use messages::MessageService;
pub use transport::ClientTransport;
