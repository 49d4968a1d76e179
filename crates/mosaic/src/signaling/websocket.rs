//! WebSocket signaling client

use super::{SignalingMessage, SignalingSink, SignalingTransport};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Signaling over a WebSocket relay
///
/// Outbound messages are queued to a sender task; inbound frames are parsed
/// on a receiver task and forwarded to a [`SignalingSink`].
///
/// The client can be shared (`Arc`) with the connection manager before it
/// connects, since the sink comes from that manager.
pub struct WsSignalingClient {
    /// Signaling server URL
    url: String,

    /// Outgoing message sender, replaced on every connect
    tx: RwLock<mpsc::UnboundedSender<Message>>,

    /// Set while the socket is up
    connected: Arc<AtomicBool>,
}

impl WsSignalingClient {
    /// Create a new, unconnected client
    ///
    /// # Arguments
    ///
    /// * `url` - WebSocket signaling server URL (ws:// or wss://)
    pub fn new(url: &str) -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();

        Self {
            url: url.to_string(),
            tx: RwLock::new(tx),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether the socket is currently up
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Connect to the signaling server
    ///
    /// Establishes the WebSocket connection and starts background tasks for
    /// sending and receiving messages. Inbound messages go to `sink`.
    pub async fn connect(&self, sink: SignalingSink) -> Result<()> {
        info!("Connecting to signaling server: {}", self.url);

        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| Error::WebSocketError(format!("Failed to connect: {}", e)))?;

        info!("Connected to signaling server");

        let (write, read) = ws_stream.split();

        let (tx, rx) = mpsc::unbounded_channel();
        *self.tx.write() = tx;
        self.connected.store(true, Ordering::Release);

        tokio::spawn(Self::sender_task(write, rx));
        tokio::spawn(Self::receiver_task(read, sink, Arc::clone(&self.connected)));

        Ok(())
    }

    /// Sender task: sends messages from channel to WebSocket
    async fn sender_task(
        mut write: futures::stream::SplitSink<WsStream, Message>,
        mut rx: mpsc::UnboundedReceiver<Message>,
    ) {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = write.send(msg).await {
                error!("Failed to send WebSocket message: {}", e);
                break;
            }
        }

        debug!("Sender task terminated");
    }

    /// Receiver task: parses frames and forwards the relevant ones
    async fn receiver_task(
        mut read: futures::stream::SplitStream<WsStream>,
        sink: SignalingSink,
        connected: Arc<AtomicBool>,
    ) {
        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(Message::Text(text)) => match SignalingMessage::from_json(&text) {
                    Ok(Some(message)) => sink.deliver(message),
                    Ok(None) => debug!("Ignoring unrelated signaling frame"),
                    Err(e) => warn!("Failed to handle signaling message: {}", e),
                },
                Ok(Message::Close(_)) => {
                    info!("WebSocket connection closed");
                    break;
                }
                Err(e) => {
                    error!("WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }

        connected.store(false, Ordering::Release);
        debug!("Receiver task terminated");
    }
}

#[async_trait]
impl SignalingTransport for WsSignalingClient {
    async fn send_message(&self, message: SignalingMessage) -> Result<()> {
        let json = message.to_json()?;
        debug!(kind = message.kind(), robot_id = %message.robot_id(), "Sending signaling message");

        self.tx
            .read()
            .send(Message::Text(json))
            .map_err(|e| Error::SignalingError(format!("Failed to send message: {}", e)))
    }
}
