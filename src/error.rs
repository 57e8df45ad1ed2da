//! Error types for the chat core
//!
//! Every core operation returns [`Result`]; low-level WebSocket, IO and JSON
//! faults are converted into one of these variants at the lowest boundary.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Result alias used across the crate
pub type Result<T, E = ChatError> = std::result::Result<T, E>;

/// Chat errors
///
/// Covers connection setup, faults on an established stream, and server
/// hosting failures.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Connection setup failed (bad address, handshake refused, ...)
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Read or write fault on an established stream
    #[error("Transport error: {0}")]
    Transport(String),

    /// Operation attempted without an active stream
    #[error("Not connected")]
    NotConnected,

    /// Connect attempted while already connected
    #[error("Already connected")]
    AlreadyConnected,

    /// Server failed to start
    #[error("Failed to start server: {0}")]
    ServerStart(String),

    /// Server failed to stop cleanly
    #[error("Stop failed: {0}")]
    ServerStop(String),

    /// Wire message could not be converted into a domain message
    #[error("Invalid message: {0}")]
    Codec(String),

    /// WebSocket protocol error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChatError {
    /// True for failures that mean "there is no stream to use"
    pub fn is_not_connected(&self) -> bool {
        matches!(self, ChatError::NotConnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_text() {
        assert_eq!(ChatError::NotConnected.to_string(), "Not connected");
        assert_eq!(
            ChatError::ServerStart("port in use".to_string()).to_string(),
            "Failed to start server: port in use"
        );
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "busy");
        let err: ChatError = io.into();
        assert!(matches!(err, ChatError::Io(_)));
        assert!(!err.is_not_connected());
    }
}
