//! Message definitions
//!
//! `WireMessage` is what travels over the WebSocket as a JSON text frame.
//! `ChatMessage` is the domain value handed to feeds and callers; it is
//! immutable once built.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Sender name stamped on messages originating from the server
pub const SERVER_SENDER: &str = "Server";

/// Sender name stamped on messages originating from a client
pub const CLIENT_SENDER: &str = "Client";

/// Wire representation of a chat message
///
/// `timestamp` is milliseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    pub content: String,
    pub sender: String,
    pub timestamp: i64,
}

/// Domain chat message
///
/// Timestamps are truncated to millisecond precision on construction so the
/// value survives a trip through the wire format unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    content: String,
    sender: String,
    timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// Create a message stamped with the current UTC time
    pub fn new(content: impl Into<String>, sender: impl Into<String>) -> Self {
        Self::with_timestamp(content, sender, Utc::now())
    }

    /// Create a message with an explicit timestamp
    pub fn with_timestamp(
        content: impl Into<String>,
        sender: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            content: content.into(),
            sender: sender.into(),
            timestamp: timestamp.trunc_subsecs(3),
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}
