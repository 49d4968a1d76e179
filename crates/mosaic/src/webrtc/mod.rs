//! Per-robot WebRTC connections
//!
//! A [`WebRtcConnection`] owns one native peer for a robot and wires each
//! data channel to the store that required it. The
//! [`WebRtcConnectionManager`] owns every connection, keyed by robot id, and
//! drains the single event queue that native callbacks and inbound
//! signaling feed.

mod connection;
mod lifecycle;
mod manager;
mod state;

pub use connection::{ConnectionPlan, WebRtcConnection};
pub use lifecycle::ReconnectionPolicy;
pub use manager::{ConnectionStateChange, WebRtcConnectionManager};
pub use state::ConnectionState;

use crate::peer::PeerEnvelope;
use crate::signaling::SignalingMessage;

/// Item on the connection manager's event queue
#[derive(Debug, Clone)]
pub enum ManagerEvent {
    /// Callback from a native peer or one of its data channels
    Peer(PeerEnvelope),
    /// Inbound relay message (answer or remote candidate)
    Signaling(SignalingMessage),
}
