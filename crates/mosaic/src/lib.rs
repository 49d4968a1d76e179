//! Mosaic: per-robot WebRTC transport core
//!
//! One peer connection per robot multiplexes many logical streams
//! (telemetry, point clouds, commands, video). Each stream is a
//! *connector* of the robot; its data channel is labelled
//! `"robot_id:connector_id"` and feeds exactly one typed store.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  Mosaic (context passed to widgets)                      │
//! │  ├─ ChannelManager   requirements + active channels      │
//! │  ├─ StoreManager     one ref-counted store per connector │
//! │  └─ WebRtcConnectionManager                              │
//! │      ├─ event queue  ◄── PeerEvent / SignalingMessage    │
//! │      └─ WebRtcConnection (per robot)                     │
//! │          ├─ PeerTransport (webrtc-rs)                    │
//! │          └─ data channels ──► stores (weak refs)         │
//! │                                                          │
//! │  SignalingTransport (WebSocket relay)                    │
//! │      send_sdp_offer / send_ice_candidate ─►              │
//! │      ◄─ receive_sdp_answer / receive_ice_candidate       │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use mosaic_rtc::{MosaicConfig, RobotConnector};
//!
//! let config = MosaicConfig::default();
//! assert!(config.validate().is_ok());
//!
//! let connector = RobotConnector::deserialize("r1:gps").unwrap();
//! assert_eq!(connector.connector_id(), "gps");
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use mosaic_rtc::{
//!     ChannelRequirement, GpsStore, Mosaic, MosaicConfig, RobotConfig, RobotConnector,
//!     WsSignalingClient,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> mosaic_rtc::Result<()> {
//! let config = MosaicConfig::default();
//! let signaling = Arc::new(WsSignalingClient::new(&config.signaling_url));
//! let mosaic = Mosaic::with_webrtc(config, signaling.clone())?;
//! signaling.connect(mosaic.connections().signaling_sink()).await?;
//! mosaic.set_ws_connected(true);
//! mosaic.update_robot_info(RobotConfig::new("r1", "Rover").with_connector("gps", "osm_gps_map"));
//!
//! let gps: Arc<GpsStore> = mosaic.get_or_create_typed(&RobotConnector::new("r1", "gps"))?;
//! mosaic
//!     .add_channel_requirement(ChannelRequirement::for_store(gps.clone()))
//!     .await?;
//! mosaic.connections().spawn();
//! mosaic.create_connection("r1").await?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod channel;
pub mod config;
pub mod connector;
pub mod error;
pub mod mosaic;
pub mod parser;
pub mod payload;
pub mod peer;
pub mod signaling;
pub mod store;
pub mod webrtc;

pub use channel::{ChannelInfo, ChannelManager, ChannelRequirement, ChannelType};
pub use config::{DataChannelMode, MosaicConfig, TurnServerConfig};
pub use connector::{ConnectorConfig, RobotConfig, RobotConnector, RobotInfo};
pub use error::{DecodeError, Error, Result};
pub use mosaic::Mosaic;
pub use payload::Payload;
pub use peer::{ChannelLink, PeerFactory, PeerTransport, RtcPeerFactory};
pub use signaling::{IceCandidate, SignalingMessage, SignalingTransport, WsSignalingClient};
pub use store::{
    ConnectionCheckStore, Go2LowStateStore, GpsStore, MosaicStore, PointCloudStore,
    Pose2DStore, RemoteControlPadStore, StoreManager, TurtlesimStore, VideoRecorderStore,
    VideoStore,
};
pub use webrtc::{
    ConnectionState, ReconnectionPolicy, WebRtcConnection, WebRtcConnectionManager,
};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
