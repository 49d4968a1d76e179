//! Error types for the mosaic transport core

/// Result type alias using the mosaic Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in mosaic transport operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serialized connector string could not be parsed
    #[error("Malformed connector: {0}")]
    MalformedConnector(String),

    /// A store was requested for a data type no factory is registered for
    #[error("Unsupported data type: {0}")]
    UnsupportedDataType(String),

    /// The robot configuration does not declare the requested connector
    #[error("Unknown connector {connector_id} for robot {robot_id}")]
    UnknownConnector {
        robot_id: String,
        connector_id: String,
    },

    /// No robot configuration or connection is known for this id
    #[error("Robot not found: {0}")]
    RobotNotFound(String),

    /// A connector already has a different store bound to it
    #[error("Connector already bound to another store: {0}")]
    ConnectorAlreadyBound(String),

    /// Store exists but has a different concrete type than requested
    #[error("Store type mismatch for {connector}: expected {expected}")]
    StoreTypeMismatch {
        connector: String,
        expected: &'static str,
    },

    /// Connection state machine rejected a transition
    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidStateTransition {
        from: crate::webrtc::ConnectionState,
        to: crate::webrtc::ConnectionState,
    },

    /// Signaling connection error
    #[error("Signaling error: {0}")]
    SignalingError(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// WebRTC peer connection error
    #[error("Peer connection error: {0}")]
    PeerConnectionError(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidateError(String),

    /// SDP negotiation error
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// Data channel error
    #[error("Data channel error: {0}")]
    DataChannelError(String),

    /// Reconnection attempts exhausted
    #[error("Reconnection attempts exhausted for {robot_id} after {attempts} attempts")]
    ReconnectExhausted { robot_id: String, attempts: u32 },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::SignalingError(_)
                | Error::WebSocketError(_)
                | Error::PeerConnectionError(_)
                | Error::IoError(_)
        )
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }

    /// Check if this error indicates a wiring bug in the caller
    ///
    /// These are raised immediately instead of degrading into a
    /// non-connected status.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Error::MalformedConnector(_)
                | Error::UnsupportedDataType(_)
                | Error::UnknownConnector { .. }
                | Error::RobotNotFound(_)
                | Error::ConnectorAlreadyBound(_)
                | Error::StoreTypeMismatch { .. }
        )
    }

    /// Check if this error is a transport-level failure
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Error::PeerConnectionError(_)
                | Error::IceCandidateError(_)
                | Error::SdpError(_)
                | Error::DataChannelError(_)
                | Error::WebRtcError(_)
                | Error::SignalingError(_)
                | Error::WebSocketError(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}

/// Failure to decode an inbound channel payload
///
/// Never crosses the store boundary: stores log it and drop the record.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Payload was binary where text was expected (or the reverse)
    #[error("unexpected {0} payload")]
    UnexpectedPayload(&'static str),

    /// Payload is not valid JSON
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Required field missing or of the wrong runtime type
    #[error("field `{0}` missing or not a {1}")]
    Field(&'static str, &'static str),

    /// Protobuf envelope could not be decoded
    #[error("invalid protobuf: {0}")]
    Protobuf(#[from] prost::DecodeError),

    /// Structurally valid but semantically inconsistent data
    #[error("invalid data: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidConfig("test".to_string());
        assert_eq!(err.to_string(), "Invalid configuration: test");

        let err = Error::UnknownConnector {
            robot_id: "r1".to_string(),
            connector_id: "gps".to_string(),
        };
        assert_eq!(err.to_string(), "Unknown connector gps for robot r1");
    }

    #[test]
    fn test_error_is_retryable() {
        assert!(Error::SignalingError("test".to_string()).is_retryable());
        assert!(!Error::InvalidConfig("test".to_string()).is_retryable());
        assert!(!Error::MalformedConnector("x".to_string()).is_retryable());
    }

    #[test]
    fn test_usage_errors() {
        assert!(Error::MalformedConnector("abc".to_string()).is_usage_error());
        assert!(Error::UnsupportedDataType("foo".to_string()).is_usage_error());
        assert!(!Error::SdpError("bad".to_string()).is_usage_error());
        assert!(Error::SdpError("bad".to_string()).is_transport_error());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::IoError(_)));
    }

    #[test]
    fn test_decode_error_display() {
        let err = DecodeError::Field("longitude", "number");
        assert_eq!(err.to_string(), "field `longitude` missing or not a number");
    }
}
