//! Per-robot connection state machine

use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection state
///
/// ```text
/// DISCONNECTED ──► CONNECTING ──► CONNECTED
///      ▲               │  │           │  │
///      │               │  └──► FAILED ◄──┘
///      │               ▼         │     │
///      └────────── DISCONNECTING ◄─────┘
/// ```
///
/// `FAILED` may also return straight to `DISCONNECTED` once cleanup ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// No peer connection (initial and terminal state)
    Disconnected,
    /// Offer sent, waiting for the transport to come up
    Connecting,
    /// Peer connection reported connected
    Connected,
    /// Transport error; stores report not-connected
    Failed,
    /// Teardown in progress
    Disconnecting,
}

impl ConnectionState {
    /// Whether the state machine allows moving to `next`
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Failed)
                | (Connecting, Disconnecting)
                | (Connected, Failed)
                | (Connected, Disconnecting)
                | (Failed, Disconnecting)
                | (Failed, Disconnected)
                | (Disconnecting, Disconnected)
        )
    }

    /// Connecting or connected
    pub fn is_active(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }

    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Disconnected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Failed => "FAILED",
            ConnectionState::Disconnecting => "DISCONNECTING",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    #[test]
    fn test_happy_path() {
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Disconnecting));
        assert!(Disconnecting.can_transition_to(Disconnected));
    }

    #[test]
    fn test_rejected_transitions() {
        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Connected.can_transition_to(Connecting));
        assert!(!Disconnecting.can_transition_to(Connected));
        assert!(!Connected.can_transition_to(Connected));
    }

    #[test]
    fn test_serialized_names() {
        assert_eq!(serde_json::to_string(&Disconnecting).unwrap(), "\"DISCONNECTING\"");
        assert_eq!(Failed.to_string(), "FAILED");
    }
}
