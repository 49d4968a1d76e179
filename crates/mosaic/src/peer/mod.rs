//! Native peer connection abstraction
//!
//! Connections talk to the WebRTC stack only through these traits. Every
//! native callback (ICE candidate, state change, data channel open/message/
//! close, remote track) becomes a [`PeerEvent`] pushed into the connection
//! manager's single event queue through a [`PeerEventSink`].

mod data_channel;
mod rtc;

pub use data_channel::RtcChannelLink;
pub use rtc::{RtcPeer, RtcPeerFactory};

use crate::config::DataChannelMode;
use crate::payload::Payload;
use crate::signaling::IceCandidate;
use crate::webrtc::ManagerEvent;
use crate::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Data channel state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DataChannelState {
    /// Channel is being created
    Connecting,
    /// Channel is open and ready for messages
    Open,
    /// Channel is closing
    Closing,
    /// Channel is closed
    Closed,
}

/// One data channel as seen by stores
///
/// `send` never blocks: implementations enqueue to a writer task.
pub trait ChannelLink: Send + Sync {
    /// Channel label (the serialized connector)
    fn label(&self) -> &str;

    fn state(&self) -> DataChannelState;

    fn is_open(&self) -> bool {
        self.state() == DataChannelState::Open
    }

    /// Queue a payload for delivery
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::DataChannelError`] if the channel is not open.
    fn send(&self, payload: Payload) -> Result<()>;

    /// Start closing the channel; returns immediately
    fn close(&self);
}

impl fmt::Debug for dyn ChannelLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelLink")
            .field("label", &self.label())
            .field("state", &self.state())
            .finish()
    }
}

/// Native peer connection state, as reported by the WebRTC stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

/// Remote media track description handed to media stores
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaStreamInfo {
    /// Stream id (msid); robots use the media connector id here
    pub stream_id: String,
    pub track_id: String,
    pub kind: MediaKind,
}

/// Receive counters for one inbound video stream
///
/// Stacks that do not decode video leave the frame and jitter fields empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InboundVideoStats {
    pub track_id: String,
    pub ssrc: u32,
    pub packets_received: u64,
    pub bytes_received: u64,
    pub nack_count: u64,
    /// Seconds
    pub jitter: Option<f64>,
    pub frame_width: Option<u32>,
    pub frame_height: Option<u32>,
    pub frames_per_second: Option<f64>,
}

/// Callback from the native peer, in queue form
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// Locally gathered ICE candidate, to relay immediately
    IceCandidate(IceCandidate),
    StateChanged(PeerState),
    ChannelOpen { label: String },
    ChannelMessage { label: String, payload: Payload },
    ChannelClosed { label: String },
    Track(MediaStreamInfo),
}

/// A peer event tagged with the connection attempt that produced it
#[derive(Debug, Clone)]
pub struct PeerEnvelope {
    pub robot_id: String,
    /// Attempt counter; events from torn-down attempts are ignored
    pub generation: u64,
    pub event: PeerEvent,
}

/// Handle native callbacks use to enqueue events
#[derive(Clone)]
pub struct PeerEventSink {
    robot_id: String,
    generation: u64,
    tx: mpsc::UnboundedSender<ManagerEvent>,
}

impl PeerEventSink {
    pub(crate) fn new(
        robot_id: String,
        generation: u64,
        tx: mpsc::UnboundedSender<ManagerEvent>,
    ) -> Self {
        Self {
            robot_id,
            generation,
            tx,
        }
    }

    pub fn robot_id(&self) -> &str {
        &self.robot_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn emit(&self, event: PeerEvent) {
        let envelope = PeerEnvelope {
            robot_id: self.robot_id.clone(),
            generation: self.generation,
            event,
        };
        if self.tx.send(ManagerEvent::Peer(envelope)).is_err() {
            debug!(robot_id = %self.robot_id, "Event queue closed, dropping peer event");
        }
    }
}

/// One native peer connection
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Create a data channel; its events are reported through the sink
    async fn create_data_channel(
        &self,
        label: &str,
        mode: DataChannelMode,
    ) -> Result<Arc<dyn ChannelLink>>;

    /// Add receive-only video transceivers so the offer requests `count` tracks
    async fn add_recvonly_video(&self, count: usize) -> Result<()>;

    /// Create an offer, set it as local description and return its SDP
    async fn create_offer(&self) -> Result<String>;

    async fn set_remote_answer(&self, sdp: String) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Counters for every inbound video stream
    async fn inbound_video_stats(&self) -> Result<Vec<InboundVideoStats>> {
        Ok(Vec::new())
    }

    async fn close(&self) -> Result<()>;
}

/// Creates native peers for robots
#[async_trait]
pub trait PeerFactory: Send + Sync {
    async fn create_peer(
        &self,
        robot_id: &str,
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerTransport>>;
}
