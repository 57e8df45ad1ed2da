//! Message codec
//!
//! Converts between the domain `ChatMessage` and `WireMessage`, and between
//! `WireMessage` and WebSocket frames.

use chrono::DateTime;
use tokio_tungstenite::tungstenite::Message;

use crate::error::{ChatError, Result};
use crate::message::{ChatMessage, WireMessage};

/// A decoded inbound WebSocket frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A chat message
    Message(WireMessage),
    /// Peer sent a close frame
    Close,
    /// Ping, pong, binary or raw frames; carry no chat payload
    Control,
}

/// Domain message to wire message
pub fn encode(message: &ChatMessage) -> WireMessage {
    WireMessage {
        content: message.content().to_string(),
        sender: message.sender().to_string(),
        timestamp: message.timestamp().timestamp_millis(),
    }
}

/// Wire message to domain message
///
/// Fails only when the timestamp is outside the representable date range.
pub fn decode(wire: WireMessage) -> Result<ChatMessage> {
    let timestamp = DateTime::from_timestamp_millis(wire.timestamp)
        .ok_or_else(|| ChatError::Codec(format!("timestamp {} out of range", wire.timestamp)))?;
    Ok(ChatMessage::with_timestamp(wire.content, wire.sender, timestamp))
}

/// Serialize a wire message into a JSON text frame
pub fn to_frame(wire: &WireMessage) -> Result<Message> {
    let json = serde_json::to_string(wire)?;
    Ok(Message::Text(json.into()))
}

/// Interpret an inbound WebSocket frame
pub fn from_frame(frame: Message) -> Result<Frame> {
    match frame {
        Message::Text(text) => Ok(Frame::Message(serde_json::from_str(&text)?)),
        Message::Close(_) => Ok(Frame::Close),
        _ => Ok(Frame::Control),
    }
}
