//! Signaling messages relayed between this client and robots
//!
//! The relay speaks JSON objects tagged by `type`. Outbound messages carry
//! the target `robot_id`; inbound ones additionally name the `user_id` the
//! relay routed them for. Inbound messages are not handled on the socket
//! task: they are pushed into the connection manager's event queue through
//! a [`SignalingSink`], where they are filtered by `robot_id`.

pub mod websocket;

pub use websocket::WsSignalingClient;

use crate::webrtc::ManagerEvent;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// ICE candidate as exchanged with the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
}

/// Signaling message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalingMessage {
    /// Offer for a robot (outbound)
    SendSdpOffer { robot_id: String, sdp_offer: String },

    /// Robot's answer to our offer (inbound)
    ReceiveSdpAnswer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        robot_id: String,
        sdp_answer: String,
    },

    /// Locally gathered candidate (outbound)
    SendIceCandidate {
        robot_id: String,
        ice_candidate: IceCandidate,
    },

    /// Robot's candidate (inbound)
    ReceiveIceCandidate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        robot_id: String,
        ice_candidate: IceCandidate,
    },

    /// Ask the robot to release its side of the peer connection (outbound)
    SendClosePeerConnection { robot_id: String },
}

impl SignalingMessage {
    /// Robot this message concerns
    pub fn robot_id(&self) -> &str {
        match self {
            SignalingMessage::SendSdpOffer { robot_id, .. }
            | SignalingMessage::ReceiveSdpAnswer { robot_id, .. }
            | SignalingMessage::SendIceCandidate { robot_id, .. }
            | SignalingMessage::ReceiveIceCandidate { robot_id, .. }
            | SignalingMessage::SendClosePeerConnection { robot_id } => robot_id,
        }
    }

    /// Wire name of the message (`type` tag)
    pub fn kind(&self) -> &'static str {
        match self {
            SignalingMessage::SendSdpOffer { .. } => "send_sdp_offer",
            SignalingMessage::ReceiveSdpAnswer { .. } => "receive_sdp_answer",
            SignalingMessage::SendIceCandidate { .. } => "send_ice_candidate",
            SignalingMessage::ReceiveIceCandidate { .. } => "receive_ice_candidate",
            SignalingMessage::SendClosePeerConnection { .. } => "send_close_peer_connection",
        }
    }

    /// Whether this message travels from a robot to us
    pub fn is_inbound(&self) -> bool {
        matches!(
            self,
            SignalingMessage::ReceiveSdpAnswer { .. } | SignalingMessage::ReceiveIceCandidate { .. }
        )
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::SerializationError(format!("Failed to serialize message: {}", e)))
    }

    /// Parse a relay frame
    ///
    /// Returns `Ok(None)` for well-formed frames of a type this core does not
    /// handle, so the relay can share the socket with other traffic.
    pub fn from_json(text: &str) -> Result<Option<Self>> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let known = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .is_some_and(|kind| {
                matches!(
                    kind,
                    "send_sdp_offer"
                        | "receive_sdp_answer"
                        | "send_ice_candidate"
                        | "receive_ice_candidate"
                        | "send_close_peer_connection"
                )
            });
        if !known {
            return Ok(None);
        }
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| Error::SignalingError(format!("Invalid signaling message: {}", e)))
    }
}

/// Outbound half of the signaling relay
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Send one message; never batches
    async fn send_message(&self, message: SignalingMessage) -> Result<()>;
}

/// Inbound half: hands relay messages to the connection manager's queue
#[derive(Clone)]
pub struct SignalingSink {
    tx: mpsc::UnboundedSender<ManagerEvent>,
}

impl SignalingSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<ManagerEvent>) -> Self {
        Self { tx }
    }

    /// Enqueue an inbound message; outbound kinds are ignored
    pub fn deliver(&self, message: SignalingMessage) {
        if !message.is_inbound() {
            debug!(kind = message.kind(), "Ignoring outbound signaling message");
            return;
        }
        if self.tx.send(ManagerEvent::Signaling(message)).is_err() {
            debug!("Event queue closed, dropping signaling message");
        }
    }
}
