//! Realtime transport: WebSocket binding plus an in-process test transport
//!
//! The transport splits into an owned write half (an mpsc sender feeding a
//! writer task) and a locked read half, so a shared client can send from
//! several tasks while one event loop drains inbound events.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::client::generate_key;

use super::events::{ServerEvent, parse_event};
use crate::config::SessionConfig;
use crate::{Error, Result};

/// Buffered outbound frames before send backpressure
const WRITE_CHANNEL_CAPACITY: usize = 64;

/// Buffered inbound events before read backpressure
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Bidirectional realtime event stream
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a client event.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is gone.
    async fn send(&self, event: Value) -> Result<()>;

    /// Receive the next server event; `None` when the stream has closed
    async fn recv(&self) -> Option<Result<ServerEvent>>;

    /// Close the connection
    async fn close(&self);
}

/// Establishes transports for a session endpoint
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a fresh transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    async fn connect(&self) -> Result<Box<dyn Transport>>;
}

/// WebSocket connector for the realtime backend
pub struct WsConnector {
    url: String,
    api_key: String,
    model: String,
}

impl WsConnector {
    /// Build a connector from session configuration
    #[must_use]
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            url: config.url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>> {
        let endpoint = format!("{}?model={}", self.url, self.model);
        let parsed = url::Url::parse(&endpoint)
            .map_err(|e| Error::Transport(format!("bad realtime url: {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| Error::Transport("realtime url has no host".to_string()))?;

        let request = http::Request::builder()
            .uri(&endpoint)
            .header("Host", host)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("OpenAI-Beta", "realtime=v1")
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header("Sec-WebSocket-Key", generate_key())
            .body(())
            .map_err(|e| Error::Transport(format!("bad handshake request: {e}")))?;

        let (stream, _response) = connect_async(request).await?;
        tracing::debug!(url = %self.url, model = %self.model, "realtime websocket connected");

        let (mut sink, mut source) = stream.split();
        let (write_tx, mut write_rx) = mpsc::channel::<Message>(WRITE_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            while let Some(message) = write_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if sink.send(message).await.is_err() || closing {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            while let Some(message) = source.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        if event_tx.send(parse_event(&text)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        let _ = event_tx.send(Err(e.into())).await;
                        break;
                    }
                }
            }
        });

        Ok(Box::new(WsTransport {
            write_tx,
            event_rx: Mutex::new(event_rx),
        }))
    }
}

/// WebSocket-backed transport
pub struct WsTransport {
    write_tx: mpsc::Sender<Message>,
    event_rx: Mutex<mpsc::Receiver<Result<ServerEvent>>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&self, event: Value) -> Result<()> {
        self.write_tx
            .send(Message::Text(event.to_string().into()))
            .await
            .map_err(|_| Error::Transport("connection closed".to_string()))
    }

    async fn recv(&self) -> Option<Result<ServerEvent>> {
        self.event_rx.lock().await.recv().await
    }

    async fn close(&self) {
        let _ = self.write_tx.send(Message::Close(None)).await;
    }
}

/// In-process transport over channels, for tests and local development
pub struct ChannelTransport {
    outgoing: mpsc::UnboundedSender<Value>,
    incoming: Mutex<mpsc::UnboundedReceiver<Result<ServerEvent>>>,
}

/// Far end of a [`ChannelTransport`]: observe client frames, inject server
/// events
pub struct ChannelRemote {
    /// Frames the client sent
    pub sent: mpsc::UnboundedReceiver<Value>,
    /// Push server events to the client
    pub events: mpsc::UnboundedSender<Result<ServerEvent>>,
}

impl ChannelTransport {
    /// Create a connected transport/remote pair
    #[must_use]
    pub fn pair() -> (Self, ChannelRemote) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                outgoing: out_tx,
                incoming: Mutex::new(event_rx),
            },
            ChannelRemote {
                sent: out_rx,
                events: event_tx,
            },
        )
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, event: Value) -> Result<()> {
        self.outgoing
            .send(event)
            .map_err(|_| Error::Transport("connection closed".to_string()))
    }

    async fn recv(&self) -> Option<Result<ServerEvent>> {
        self.incoming.lock().await.recv().await
    }

    async fn close(&self) {}
}

/// Connector producing [`ChannelTransport`]s; each connect hands the remote
/// end to the paired receiver
pub struct ChannelConnector {
    remotes: mpsc::UnboundedSender<ChannelRemote>,
}

impl ChannelConnector {
    /// Create a connector and the stream of remotes, one per connect call
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ChannelRemote>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { remotes: tx }, rx)
    }
}

#[async_trait]
impl Connector for ChannelConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>> {
        let (transport, remote) = ChannelTransport::pair();
        self.remotes
            .send(remote)
            .map_err(|_| Error::Transport("remote receiver dropped".to_string()))?;
        Ok(Box::new(transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn channel_transport_delivers_both_ways() {
        let (transport, mut remote) = ChannelTransport::pair();

        transport.send(json!({"type": "ping"})).await.unwrap();
        let frame = remote.sent.recv().await.unwrap();
        assert_eq!(frame.get("type").unwrap(), "ping");

        remote.events.send(Ok(ServerEvent::ResponseDone)).unwrap();
        let event = transport.recv().await.unwrap().unwrap();
        assert_eq!(event, ServerEvent::ResponseDone);
    }

    #[tokio::test]
    async fn recv_ends_when_remote_drops() {
        let (transport, remote) = ChannelTransport::pair();
        drop(remote);
        assert!(transport.recv().await.is_none());
    }
}
