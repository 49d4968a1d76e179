//! webrtc-rs data channel bound to a connector label

use super::{ChannelLink, DataChannelState, PeerEvent, PeerEventSink};
use crate::config::DataChannelMode;
use crate::payload::Payload;
use crate::{Error, Result};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::peer_connection::RTCPeerConnection;

/// Data channel wrapper
///
/// Sends are handed to a writer task so stores can send from synchronous
/// code. State is tracked from the native open/close callbacks.
pub struct RtcChannelLink {
    /// Channel label/name
    label: String,
    /// The underlying RTCDataChannel
    rtc_channel: Arc<RTCDataChannel>,
    /// Channel mode (reliable/unreliable)
    mode: DataChannelMode,
    /// Current channel state
    state: Arc<RwLock<DataChannelState>>,
    /// Queue drained by the writer task
    outbound: mpsc::UnboundedSender<Payload>,
    messages_sent: AtomicU64,
    bytes_sent: AtomicU64,
    messages_received: Arc<AtomicU64>,
}

impl RtcChannelLink {
    /// Create a new data channel on an existing peer connection
    ///
    /// # Arguments
    /// * `peer_connection` - The RTCPeerConnection to create the channel on
    /// * `label` - Channel label (serialized connector)
    /// * `mode` - Delivery mode (reliable or unreliable)
    /// * `events` - Sink receiving open/message/close events
    pub async fn new(
        peer_connection: &RTCPeerConnection,
        label: &str,
        mode: DataChannelMode,
        events: PeerEventSink,
    ) -> Result<Arc<Self>> {
        let init = RTCDataChannelInit {
            ordered: Some(mode.ordered()),
            max_retransmits: mode.max_retransmits(),
            ..Default::default()
        };

        let rtc_channel = peer_connection
            .create_data_channel(label, Some(init))
            .await
            .map_err(|e| {
                Error::DataChannelError(format!("Failed to create data channel {}: {}", label, e))
            })?;

        let (outbound, rx) = mpsc::unbounded_channel();

        let link = Arc::new(Self {
            label: label.to_string(),
            rtc_channel: Arc::clone(&rtc_channel),
            mode,
            state: Arc::new(RwLock::new(DataChannelState::Connecting)),
            outbound,
            messages_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            messages_received: Arc::new(AtomicU64::new(0)),
        });

        link.setup_handlers(events);
        tokio::spawn(Self::writer_task(rtc_channel, label.to_string(), rx));

        debug!(label = %label, ?mode, "Created data channel");
        Ok(link)
    }

    fn setup_handlers(&self, events: PeerEventSink) {
        let state = Arc::clone(&self.state);
        let label = self.label.clone();
        let sink = events.clone();
        self.rtc_channel.on_open(Box::new(move || {
            let state = Arc::clone(&state);
            let label = label.clone();
            let sink = sink.clone();
            Box::pin(async move {
                debug!("Data channel '{}' opened", label);
                *state.write() = DataChannelState::Open;
                sink.emit(PeerEvent::ChannelOpen { label });
            })
        }));

        let state = Arc::clone(&self.state);
        let label = self.label.clone();
        let sink = events.clone();
        self.rtc_channel.on_close(Box::new(move || {
            let state = Arc::clone(&state);
            let label = label.clone();
            let sink = sink.clone();
            Box::pin(async move {
                debug!("Data channel '{}' closed", label);
                *state.write() = DataChannelState::Closed;
                sink.emit(PeerEvent::ChannelClosed { label });
            })
        }));

        let label = self.label.clone();
        self.rtc_channel.on_error(Box::new(move |err| {
            let label = label.clone();
            Box::pin(async move {
                error!("Data channel '{}' error: {}", label, err);
            })
        }));

        let label = self.label.clone();
        let received = Arc::clone(&self.messages_received);
        self.rtc_channel
            .on_message(Box::new(move |msg: DataChannelMessage| {
                let payload = if msg.is_string {
                    Payload::Text(String::from_utf8_lossy(&msg.data).into_owned())
                } else {
                    Payload::Binary(msg.data.clone())
                };
                received.fetch_add(1, Ordering::Relaxed);
                events.emit(PeerEvent::ChannelMessage {
                    label: label.clone(),
                    payload,
                });
                Box::pin(async {})
            }));
    }

    /// Writer task: drains queued payloads into the native channel
    async fn writer_task(
        rtc_channel: Arc<RTCDataChannel>,
        label: String,
        mut rx: mpsc::UnboundedReceiver<Payload>,
    ) {
        while let Some(payload) = rx.recv().await {
            let result = match payload {
                Payload::Text(text) => rtc_channel.send_text(text).await,
                Payload::Binary(bytes) => rtc_channel.send(&bytes).await,
            };
            if let Err(e) = result {
                warn!("Failed to send on data channel '{}': {}", label, e);
            }
        }

        debug!("Writer task for '{}' terminated", label);
    }

    pub fn mode(&self) -> DataChannelMode {
        self.mode
    }

    /// (messages sent, bytes sent, messages received)
    pub fn stats(&self) -> (u64, u64, u64) {
        (
            self.messages_sent.load(Ordering::Relaxed),
            self.bytes_sent.load(Ordering::Relaxed),
            self.messages_received.load(Ordering::Relaxed),
        )
    }
}

impl ChannelLink for RtcChannelLink {
    fn label(&self) -> &str {
        &self.label
    }

    fn state(&self) -> DataChannelState {
        *self.state.read()
    }

    fn send(&self, payload: Payload) -> Result<()> {
        let state = self.state();
        if state != DataChannelState::Open {
            return Err(Error::DataChannelError(format!(
                "Data channel '{}' is not open (state: {:?})",
                self.label, state
            )));
        }

        let size = payload.len() as u64;
        self.outbound.send(payload).map_err(|_| {
            Error::DataChannelError(format!("Writer for '{}' has stopped", self.label))
        })?;
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(size, Ordering::Relaxed);
        Ok(())
    }

    fn close(&self) {
        {
            let mut state = self.state.write();
            if *state == DataChannelState::Closed {
                return;
            }
            *state = DataChannelState::Closing;
        }

        let rtc_channel = Arc::clone(&self.rtc_channel);
        let label = self.label.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = rtc_channel.close().await {
                        warn!("Error closing data channel '{}': {}", label, e);
                    }
                });
            }
            Err(_) => warn!("No runtime to close data channel '{}'", label),
        }
    }
}
