//! Widget-facing entry point
//!
//! [`Mosaic`] bundles the store, channel and connection managers and is
//! passed explicitly to whoever needs it.

use crate::channel::{ChannelManager, ChannelRequirement};
use crate::config::MosaicConfig;
use crate::connector::{RobotConfig, RobotConnector, RobotInfo};
use crate::peer::{PeerFactory, RtcPeerFactory};
use crate::signaling::SignalingTransport;
use crate::store::{MosaicStore, StoreManager};
use crate::webrtc::{ConnectionState, WebRtcConnection, WebRtcConnectionManager};
use crate::{Error, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

pub struct Mosaic {
    config: Arc<MosaicConfig>,
    robots: RwLock<BTreeMap<String, RobotConfig>>,
    ws_connected: AtomicBool,
    stores: StoreManager,
    channels: Arc<ChannelManager>,
    connections: Arc<WebRtcConnectionManager>,
}

impl Mosaic {
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `config` does not validate.
    pub fn new(
        config: MosaicConfig,
        peer_factory: Arc<dyn PeerFactory>,
        signaling: Arc<dyn SignalingTransport>,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let channels = Arc::new(ChannelManager::new());
        let connections = Arc::new(WebRtcConnectionManager::new(
            Arc::clone(&config),
            peer_factory,
            signaling,
            Arc::clone(&channels),
        ));

        Ok(Self {
            stores: StoreManager::new(Arc::clone(&config)),
            config,
            robots: RwLock::new(BTreeMap::new()),
            ws_connected: AtomicBool::new(false),
            channels,
            connections,
        })
    }

    /// Use webrtc-rs peers configured from `config`
    pub fn with_webrtc(config: MosaicConfig, signaling: Arc<dyn SignalingTransport>) -> Result<Self> {
        let factory = Arc::new(RtcPeerFactory::new(Arc::new(config.clone())));
        Self::new(config, factory, signaling)
    }

    pub fn config(&self) -> &MosaicConfig {
        &self.config
    }

    pub fn stores(&self) -> &StoreManager {
        &self.stores
    }

    pub fn channels(&self) -> &Arc<ChannelManager> {
        &self.channels
    }

    pub fn connections(&self) -> &Arc<WebRtcConnectionManager> {
        &self.connections
    }

    /// Add or replace a robot's configuration (keyed by id)
    pub fn update_robot_info(&self, robot: RobotConfig) -> Option<RobotConfig> {
        debug!(robot_id = %robot.id, connectors = robot.connectors.len(), "Robot config updated");
        self.robots.write().insert(robot.id.clone(), robot)
    }

    pub fn remove_robot(&self, robot_id: &str) -> Option<RobotConfig> {
        self.robots.write().remove(robot_id)
    }

    pub fn robot(&self, robot_id: &str) -> Option<RobotConfig> {
        self.robots.read().get(robot_id).cloned()
    }

    fn require_robot(&self, robot_id: &str) -> Result<RobotConfig> {
        self.robot(robot_id)
            .ok_or_else(|| Error::RobotNotFound(robot_id.to_string()))
    }

    /// Record whether the signaling socket is up
    pub fn set_ws_connected(&self, connected: bool) {
        self.ws_connected.store(connected, Ordering::Relaxed);
    }

    /// Fresh snapshots of every known robot
    pub async fn robot_infos(&self) -> Vec<RobotInfo> {
        let states = self.connections.connection_states().await;
        let ws_connected = self.ws_connected.load(Ordering::Relaxed);
        self.robots
            .read()
            .values()
            .map(|robot| RobotInfo {
                id: robot.id.clone(),
                name: robot.name.clone(),
                ws_connected,
                rtc_state: states.get(&robot.id).copied().unwrap_or_default(),
                robot_config: robot.clone(),
            })
            .collect()
    }

    /// # Errors
    ///
    /// Returns [`Error::RobotNotFound`] for an unregistered robot.
    pub async fn robot_info(&self, robot_id: &str) -> Result<RobotInfo> {
        let robot = self.require_robot(robot_id)?;
        let rtc_state = self
            .connections
            .get_connection(robot_id)
            .await
            .map_or(ConnectionState::Disconnected, |c| c.state());
        Ok(RobotInfo {
            id: robot.id.clone(),
            name: robot.name.clone(),
            ws_connected: self.ws_connected.load(Ordering::Relaxed),
            rtc_state,
            robot_config: robot,
        })
    }

    /// Store for `connector`, created from the robot's declared data type
    ///
    /// # Errors
    ///
    /// Fails fast on an unregistered robot, an undeclared connector or a
    /// data type without a store.
    pub fn get_or_create_store(&self, connector: &RobotConnector) -> Result<Arc<dyn MosaicStore>> {
        let robot = self.require_robot(connector.robot_id())?;
        self.stores.get_or_create_store(connector, &robot)
    }

    pub fn get_or_create_typed<T: MosaicStore>(&self, connector: &RobotConnector) -> Result<Arc<T>> {
        let robot = self.require_robot(connector.robot_id())?;
        self.stores.get_or_create_typed::<T>(connector, &robot)
    }

    pub fn release_store(&self, connector: &RobotConnector) -> bool {
        self.stores.release_store(connector)
    }

    /// Declare that a store must be fed from its connector
    ///
    /// If the robot already has a live connection the channel is added to
    /// it right away.
    pub async fn add_channel_requirement(&self, requirement: ChannelRequirement) -> Result<bool> {
        self.require_robot(requirement.robot_id())?;
        let added = self.channels.add_channel_requirement(requirement.clone())?;
        if !added {
            return Ok(false);
        }

        if let Some(connection) = self.connections.get_connection(requirement.robot_id()).await {
            if connection.state().is_active() {
                connection.add_requirements(&[requirement]).await?;
            }
        }
        Ok(true)
    }

    /// Withdraw a requirement and close its channel on the live connection
    pub async fn remove_channel_requirement(&self, requirement: &ChannelRequirement) -> bool {
        if !self.channels.remove_channel_requirement(requirement) {
            return false;
        }
        if let Some(connection) = self.connections.get_connection(requirement.robot_id()).await {
            connection.remove_data_channel(requirement.connector());
        }
        true
    }

    /// Connect to a robot with every requirement declared for it
    ///
    /// # Errors
    ///
    /// Returns [`Error::RobotNotFound`] for an unregistered robot.
    pub async fn create_connection(&self, robot_id: &str) -> Result<Arc<WebRtcConnection>> {
        self.require_robot(robot_id)?;
        let requirements = self.channels.requirements(robot_id);
        info!(robot_id = %robot_id, requirements = requirements.len(), "Connecting robot");
        self.connections
            .create_connection(robot_id, requirements)
            .await
    }

    pub async fn disconnect_connection(&self, robot_id: &str) -> Result<()> {
        self.connections.disconnect_connection(robot_id).await
    }

    pub async fn reconnect(&self, robot_id: &str) -> Result<Arc<WebRtcConnection>> {
        self.connections.reconnect(robot_id).await
    }
}
