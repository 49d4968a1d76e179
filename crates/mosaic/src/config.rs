//! Configuration types for the mosaic transport core

use crate::webrtc::ReconnectionPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration shared by the store, channel and connection managers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MosaicConfig {
    /// WebSocket signaling server URL (ws:// or wss://)
    pub signaling_url: String,

    /// STUN server URLs
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// Default bounded history size for every store (default: 1000)
    pub history_size: usize,

    /// Partial point-cloud messages older than this are swept (default: 5000ms)
    pub chunk_timeout_ms: u64,

    /// Maximum partial point-cloud messages held at once (default: 15)
    pub max_concurrent_chunk_messages: usize,

    /// Number of decode timestamps kept for frame-rate estimation (default: 10)
    pub fps_window: usize,

    /// Minimum interval between frame-rate recomputations (default: 1000ms)
    pub fps_log_interval_ms: u64,

    /// Interval between liveness pings on connection-check channels (default: 1000ms)
    pub connection_check_interval_ms: u64,

    /// Pings without a reply after this long count as lost (default: 3000ms)
    pub connection_check_timeout_ms: u64,

    /// Interval between receive-stats samples of attached video streams (default: 1000ms)
    pub video_stats_interval_ms: u64,

    /// How long a send issued before the channel opened stays queued (default: 2000ms)
    pub send_queue_ttl_ms: u64,

    /// Maximum queued sends per sendable store (default: 64, 0 disables queueing)
    pub send_queue_capacity: usize,

    /// Reconnection backoff policy
    pub reconnection: ReconnectionPolicy,
}

/// TURN server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn:// or turns://)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

/// Data channel delivery mode
///
/// High-rate telemetry may opt into lossy delivery; everything else is
/// ordered and reliable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataChannelMode {
    /// Reliable, ordered delivery (default)
    #[default]
    Reliable,
    /// Unreliable, unordered delivery (low latency)
    ///
    /// Messages may arrive out of order or be lost.
    Unreliable,
}

impl DataChannelMode {
    /// Get the ordered setting for webrtc-rs
    pub fn ordered(&self) -> bool {
        match self {
            DataChannelMode::Reliable => true,
            DataChannelMode::Unreliable => false,
        }
    }

    /// Get the max retransmits setting for webrtc-rs
    pub fn max_retransmits(&self) -> Option<u16> {
        match self {
            DataChannelMode::Reliable => None,      // Unlimited retransmits
            DataChannelMode::Unreliable => Some(0), // No retransmits
        }
    }
}

impl Default for MosaicConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:8080/ws".to_string(),
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_servers: Vec::new(),
            history_size: 1000,
            chunk_timeout_ms: 5000,
            max_concurrent_chunk_messages: 15,
            fps_window: 10,
            fps_log_interval_ms: 1000,
            connection_check_interval_ms: 1000,
            connection_check_timeout_ms: 3000,
            video_stats_interval_ms: 1000,
            send_queue_ttl_ms: 2000,
            send_queue_capacity: 64,
            reconnection: ReconnectionPolicy::default(),
        }
    }
}

impl MosaicConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - neither STUN nor TURN servers are configured
    /// - `history_size` or `max_concurrent_chunk_messages` is zero
    /// - `fps_window` is below 2
    /// - any interval or timeout is zero
    /// - `connection_check_timeout_ms` is shorter than the ping interval
    /// - `signaling_url` is not a valid WebSocket URL
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.stun_servers.is_empty() && self.turn_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one STUN or TURN server is required".to_string(),
            ));
        }

        if let Some(turn) = self
            .turn_servers
            .iter()
            .find(|t| !t.url.starts_with("turn:") && !t.url.starts_with("turns:"))
        {
            return Err(Error::InvalidConfig(format!(
                "TURN server url must start with turn: or turns:, got {}",
                turn.url
            )));
        }

        if self.history_size == 0 {
            return Err(Error::InvalidConfig(
                "history_size must be at least 1".to_string(),
            ));
        }

        if self.max_concurrent_chunk_messages == 0 {
            return Err(Error::InvalidConfig(
                "max_concurrent_chunk_messages must be at least 1".to_string(),
            ));
        }

        if self.fps_window < 2 {
            return Err(Error::InvalidConfig(format!(
                "fps_window must be at least 2, got {}",
                self.fps_window
            )));
        }

        for (name, value) in [
            ("chunk_timeout_ms", self.chunk_timeout_ms),
            ("fps_log_interval_ms", self.fps_log_interval_ms),
            ("connection_check_interval_ms", self.connection_check_interval_ms),
            ("connection_check_timeout_ms", self.connection_check_timeout_ms),
            ("video_stats_interval_ms", self.video_stats_interval_ms),
            ("send_queue_ttl_ms", self.send_queue_ttl_ms),
        ] {
            if value == 0 {
                return Err(Error::InvalidConfig(format!("{} must be positive", name)));
            }
        }

        if self.connection_check_timeout_ms < self.connection_check_interval_ms {
            return Err(Error::InvalidConfig(format!(
                "connection_check_timeout_ms ({}) must not be shorter than connection_check_interval_ms ({})",
                self.connection_check_timeout_ms, self.connection_check_interval_ms
            )));
        }

        if !self.signaling_url.starts_with("ws://") && !self.signaling_url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "signaling_url must start with ws:// or wss://, got {}",
                self.signaling_url
            )));
        }

        self.reconnection.validate()
    }

    /// Parse and validate a TOML configuration document
    ///
    /// Missing fields fall back to their defaults.
    ///
    /// # Example
    ///
    /// ```
    /// use mosaic_rtc::MosaicConfig;
    ///
    /// let config = MosaicConfig::from_toml_str(r#"
    ///     signaling_url = "wss://mosaic.example.com/ws"
    ///     history_size = 200
    /// "#).unwrap();
    /// assert_eq!(config.history_size, 200);
    /// assert_eq!(config.chunk_timeout_ms, 5000);
    /// ```
    pub fn from_toml_str(source: &str) -> crate::Result<Self> {
        let config: Self = toml::from_str(source)
            .map_err(|e| crate::Error::InvalidConfig(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML configuration file
    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let source = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&source)
    }

    /// Use a different signaling server
    pub fn with_signaling_url(mut self, url: impl Into<String>) -> Self {
        self.signaling_url = url.into();
        self
    }

    /// Add TURN servers to this configuration
    ///
    /// # Example
    ///
    /// ```
    /// use mosaic_rtc::{MosaicConfig, TurnServerConfig};
    ///
    /// let config = MosaicConfig::default().with_turn_servers(vec![TurnServerConfig {
    ///     url: "turn:turn.example.com:3478".to_string(),
    ///     username: "user".to_string(),
    ///     credential: "pass".to_string(),
    /// }]);
    /// assert_eq!(config.turn_servers.len(), 1);
    /// assert!(config.validate().is_ok());
    /// ```
    pub fn with_turn_servers(mut self, turn_servers: Vec<TurnServerConfig>) -> Self {
        self.turn_servers = turn_servers;
        self
    }

    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_millis(self.chunk_timeout_ms)
    }

    pub fn fps_log_interval(&self) -> Duration {
        Duration::from_millis(self.fps_log_interval_ms)
    }

    pub fn connection_check_interval(&self) -> Duration {
        Duration::from_millis(self.connection_check_interval_ms)
    }

    pub fn connection_check_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_check_timeout_ms)
    }

    pub fn video_stats_interval(&self) -> Duration {
        Duration::from_millis(self.video_stats_interval_ms)
    }

    pub fn send_queue_ttl(&self) -> Duration {
        Duration::from_millis(self.send_queue_ttl_ms)
    }
}
