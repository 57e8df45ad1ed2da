//! Client transport
//!
//! Owns one WebSocket duplex stream split into a write half and a read half.
//! Sends are serialized by an async mutex around the write half only, so a
//! long write never holds up the receive direction.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::stream::{self, SplitSink, SplitStream};
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::channel::Channel;
use crate::codec::{self, Frame};
use crate::error::{ChatError, Result};
use crate::message::WireMessage;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Read half of one stream generation; `None` once that stream is gone
type ReadSlot = Arc<Mutex<Option<ReadHalf>>>;

struct WriteHalf {
    sink: SplitSink<WsStream, Message>,
    max_message_size: usize,
}

struct ReadHalf {
    stream: SplitStream<WsStream>,
    /// Cancelled when the transport is closed or re-initialized
    closed: CancellationToken,
}

fn empty_slot() -> ReadSlot {
    Arc::new(Mutex::new(None))
}

/// One duplex stream to the chat server
pub struct ClientTransport {
    writer: Mutex<Option<WriteHalf>>,
    reader: parking_lot::Mutex<ReadSlot>,
    closed: parking_lot::Mutex<CancellationToken>,
    active: AtomicBool,
}

impl ClientTransport {
    pub fn new() -> Self {
        Self {
            writer: Mutex::new(None),
            reader: parking_lot::Mutex::new(empty_slot()),
            closed: parking_lot::Mutex::new(CancellationToken::new()),
            active: AtomicBool::new(false),
        }
    }

    /// Open the duplex stream described by `channel`
    ///
    /// Any previous stream is replaced and its receivers end.
    pub async fn initialize(&self, channel: &Channel) -> Result<()> {
        let (ws_stream, _) = tokio_tungstenite::connect_async_with_config(
            channel.url(),
            Some(channel.websocket_config()),
            true,
        )
        .await
        .map_err(|e| ChatError::Connection(format!("failed to initialize stream: {}", e)))?;

        let (sink, stream) = ws_stream.split();

        let closed = CancellationToken::new();
        let previous = std::mem::replace(&mut *self.closed.lock(), closed.clone());
        previous.cancel();

        // Receivers of the previous generation keep their own slot and end on `previous`
        *self.reader.lock() = Arc::new(Mutex::new(Some(ReadHalf { stream, closed })));
        *self.writer.lock().await = Some(WriteHalf {
            sink,
            max_message_size: channel.options().max_send_message_size,
        });
        self.active.store(true, Ordering::SeqCst);

        info!("Stream to {} initialized", channel.url());
        Ok(())
    }

    /// True while an initialized, not yet closed stream exists
    pub fn is_stream_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Write one message
    ///
    /// Concurrent callers are serialized; their frames never interleave.
    pub async fn send(&self, message: &WireMessage) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(ChatError::NotConnected)?;

        let frame = codec::to_frame(message)?;
        if frame.len() > writer.max_message_size {
            return Err(ChatError::Transport(format!(
                "message of {} bytes exceeds the {} byte limit",
                frame.len(),
                writer.max_message_size
            )));
        }

        writer
            .sink
            .send(frame)
            .await
            .map_err(|e| ChatError::Transport(format!("failed to send message: {}", e)))
    }

    /// Inbound messages until `cancel` fires
    ///
    /// The sequence also ends, without an error, on a read fault, a close
    /// frame, end of stream, or when the transport is closed. It ends
    /// immediately if no stream was initialized. The read half is locked only
    /// while an item is being read, never between items.
    pub fn receive(
        &self,
        cancel: CancellationToken,
    ) -> impl Stream<Item = WireMessage> + Send + 'static {
        let slot = Arc::clone(&*self.reader.lock());

        stream::unfold((slot, cancel), |(slot, cancel)| async move {
            let mut half = tokio::select! {
                _ = cancel.cancelled() => return None,
                half = slot.lock() => half,
            };
            let message = next_message(&mut half, &cancel).await;
            drop(half);

            message.map(|message| (message, (slot, cancel)))
        })
    }

    /// Half-close the outbound direction and release the stream
    ///
    /// Best effort: errors while closing are logged and dropped.
    pub async fn close(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.closed.lock().cancel();

        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.sink.close().await {
                debug!("Ignoring error while closing stream: {}", e);
            }
        }

        let slot = std::mem::replace(&mut *self.reader.lock(), empty_slot());
        // A receive mid-read holds the slot; it drops the half itself on `closed`
        if let Ok(mut half) = slot.try_lock() {
            half.take();
        };
    }
}

impl Default for ClientTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Read the next chat message from `half`
///
/// Cancellation by the caller leaves the half in place for a later receive.
/// Any other end releases it so the socket is dropped.
async fn next_message(
    half: &mut Option<ReadHalf>,
    cancel: &CancellationToken,
) -> Option<WireMessage> {
    let read = half.as_mut()?;

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Receive cancelled");
                return None;
            }
            _ = read.closed.cancelled() => break,
            next = read.stream.next() => next,
        };

        match next {
            Some(Ok(frame)) => match codec::from_frame(frame) {
                Ok(Frame::Message(wire)) => return Some(wire),
                Ok(Frame::Control) => continue,
                Ok(Frame::Close) => {
                    debug!("Server closed the stream");
                    break;
                }
                Err(e) => {
                    warn!("Dropping malformed frame: {}", e);
                }
            },
            Some(Err(e)) => {
                debug!("Read fault ends receive: {}", e);
                break;
            }
            None => break,
        }
    }

    half.take();
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;

    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    use crate::client::channel::ChannelOptions;
    use crate::config::MAX_MESSAGE_SIZE;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn message(content: &str) -> WireMessage {
        WireMessage {
            content: content.to_string(),
            sender: "Client".to_string(),
            timestamp: 0,
        }
    }

    /// Local peer: greets each connection with "one", then reports every
    /// text frame it receives and keeps the stream open
    async fn spawn_peer() -> (Channel, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                        return;
                    };
                    let greeting = codec::to_frame(&message("one")).unwrap();
                    if ws.send(greeting).await.is_err() {
                        return;
                    }
                    while let Some(Ok(frame)) = ws.next().await {
                        if let Message::Text(text) = frame {
                            let _ = tx.send(text.to_string());
                        }
                    }
                });
            }
        });

        let channel =
            Channel::for_address(&format!("http://{}", addr), ChannelOptions::development())
                .unwrap();
        (channel, rx)
    }

    #[tokio::test]
    async fn test_send_uninitialized_is_not_connected() {
        let transport = ClientTransport::new();
        assert!(!transport.is_stream_active());

        let result = transport.send(&message("hi")).await;
        assert!(matches!(result, Err(ChatError::NotConnected)));
    }

    #[tokio::test]
    async fn test_receive_uninitialized_ends_immediately() {
        let transport = ClientTransport::new();
        let stream = transport.receive(CancellationToken::new());
        tokio::pin!(stream);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_receive_cancelled_ends() {
        let transport = ClientTransport::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let stream = transport.receive(cancel);
        tokio::pin!(stream);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_initialize_failure_is_connection_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let channel = Channel::for_address(
            &format!("http://127.0.0.1:{}", port),
            ChannelOptions::development(),
        )
        .unwrap();

        let transport = ClientTransport::new();
        let result = transport.initialize(&channel).await;
        assert!(matches!(result, Err(ChatError::Connection(_))));
        assert!(!transport.is_stream_active());
    }

    #[tokio::test]
    async fn test_close_uninitialized_is_silent() {
        let transport = ClientTransport::new();
        transport.close().await;
        transport.close().await;
        assert!(!transport.is_stream_active());
    }

    #[tokio::test]
    async fn test_reinitialize_while_idle_receive_stream_is_held() {
        let (channel, _frames) = spawn_peer().await;
        let transport = ClientTransport::new();
        transport.initialize(&channel).await.unwrap();

        let old = transport.receive(CancellationToken::new());
        tokio::pin!(old);
        let first = timeout(TIMEOUT, old.next()).await.unwrap();
        assert_eq!(first.map(|m| m.content), Some("one".to_string()));

        // `old` is kept but not polled across close and re-initialize
        transport.close().await;
        timeout(Duration::from_secs(3), transport.initialize(&channel))
            .await
            .expect("initialize blocked by an idle receive stream")
            .unwrap();
        assert!(transport.is_stream_active());

        // The old stream belongs to the closed generation
        assert!(timeout(TIMEOUT, old.next()).await.unwrap().is_none());

        let fresh = transport.receive(CancellationToken::new());
        tokio::pin!(fresh);
        let greeting = timeout(TIMEOUT, fresh.next()).await.unwrap();
        assert_eq!(greeting.map(|m| m.content), Some("one".to_string()));

        transport.close().await;
    }

    #[tokio::test]
    async fn test_reinitialize_ends_previous_receive_stream() {
        let (channel, _frames) = spawn_peer().await;
        let transport = ClientTransport::new();
        transport.initialize(&channel).await.unwrap();

        let old = transport.receive(CancellationToken::new());
        tokio::pin!(old);
        assert!(timeout(TIMEOUT, old.next()).await.unwrap().is_some());

        timeout(Duration::from_secs(3), transport.initialize(&channel))
            .await
            .expect("initialize blocked by an idle receive stream")
            .unwrap();
        assert!(timeout(TIMEOUT, old.next()).await.unwrap().is_none());

        transport.close().await;
    }

    #[tokio::test]
    async fn test_oversized_send_is_rejected() {
        let (channel, mut frames) = spawn_peer().await;
        let transport = ClientTransport::new();
        transport.initialize(&channel).await.unwrap();

        // Content alone fills the limit; the JSON envelope pushes it over
        let oversized = message(&"x".repeat(MAX_MESSAGE_SIZE));
        let result = transport.send(&oversized).await;
        assert!(matches!(result, Err(ChatError::Transport(_))));

        // The stream stays usable
        assert!(transport.is_stream_active());
        transport.send(&message("small")).await.unwrap();

        let text = timeout(TIMEOUT, frames.recv()).await.unwrap().unwrap();
        let wire: WireMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(wire.content, "small");

        transport.close().await;
    }

    #[tokio::test]
    async fn test_concurrent_sends_arrive_intact() {
        const SENDERS: usize = 32;

        let (channel, mut frames) = spawn_peer().await;
        let transport = Arc::new(ClientTransport::new());
        transport.initialize(&channel).await.unwrap();

        let body = "y".repeat(64 * 1024);
        let mut tasks = Vec::new();
        for i in 0..SENDERS {
            let transport = Arc::clone(&transport);
            let content = format!("{}:{}", i, body);
            tasks.push(tokio::spawn(async move {
                transport.send(&message(&content)).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let mut seen = HashSet::new();
        for _ in 0..SENDERS {
            let text = timeout(TIMEOUT, frames.recv()).await.unwrap().unwrap();
            let wire: WireMessage = serde_json::from_str(&text).expect("interleaved frame");
            let (index, rest) = wire.content.split_once(':').unwrap();
            assert_eq!(rest, body);
            seen.insert(index.parse::<usize>().unwrap());
        }
        assert_eq!(seen, (0..SENDERS).collect::<HashSet<_>>());

        transport.close().await;
    }
}
