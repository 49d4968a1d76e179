//! Channel requirements and active channel registry

use crate::connector::RobotConnector;
use crate::peer::{ChannelLink, MediaStreamInfo};
use crate::store::MosaicStore;
use crate::{Error, Result};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A consumer's need for `store` to be fed from `connector`
#[derive(Clone)]
pub struct ChannelRequirement {
    store: Arc<dyn MosaicStore>,
    connector: RobotConnector,
}

impl ChannelRequirement {
    pub fn new(store: Arc<dyn MosaicStore>, connector: RobotConnector) -> Self {
        Self { store, connector }
    }

    /// Requirement for the connector the store was created for
    pub fn for_store(store: Arc<dyn MosaicStore>) -> Self {
        let connector = store.connector().clone();
        Self { store, connector }
    }

    pub fn store(&self) -> &Arc<dyn MosaicStore> {
        &self.store
    }

    pub fn connector(&self) -> &RobotConnector {
        &self.connector
    }

    pub fn robot_id(&self) -> &str {
        self.connector.robot_id()
    }

    /// Same store instance and same connector
    pub fn same_as(&self, other: &ChannelRequirement) -> bool {
        self.connector == other.connector && same_store(&self.store, &other.store)
    }
}

impl fmt::Debug for ChannelRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelRequirement")
            .field("connector", &self.connector.serialize())
            .field("data_type", &self.store.data_type())
            .finish()
    }
}

pub(crate) fn same_store(a: &Arc<dyn MosaicStore>, b: &Arc<dyn MosaicStore>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChannelType {
    #[serde(rename = "datachannel")]
    DataChannel,
    #[serde(rename = "media")]
    Media,
}

/// Runtime record of an open channel
#[derive(Debug, Clone)]
pub struct ChannelInfo {
    pub channel_type: ChannelType,
    pub connector: RobotConnector,
    /// Connection attempt the channel belongs to
    pub connection_id: String,
    pub link: Option<Arc<dyn ChannelLink>>,
    pub media: Option<MediaStreamInfo>,
}

/// Registry of requirements per robot and of channels currently open
///
/// Readers always get copies; nothing returned here changes afterwards.
#[derive(Default)]
pub struct ChannelManager {
    active_channels: RwLock<HashMap<String, ChannelInfo>>,
    requirements: RwLock<HashMap<String, Vec<ChannelRequirement>>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a requirement
    ///
    /// Returns `Ok(false)` if the identical requirement is already present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectorAlreadyBound`] if a different store already
    /// requires the same connector.
    pub fn add_channel_requirement(&self, requirement: ChannelRequirement) -> Result<bool> {
        let mut requirements = self.requirements.write();
        let list = requirements
            .entry(requirement.robot_id().to_string())
            .or_default();

        if let Some(existing) = list.iter().find(|r| r.connector == requirement.connector) {
            if same_store(&existing.store, &requirement.store) {
                return Ok(false);
            }
            return Err(Error::ConnectorAlreadyBound(requirement.connector.serialize()));
        }

        debug!(connector = %requirement.connector, "Added channel requirement");
        list.push(requirement);
        Ok(true)
    }

    /// Remove a requirement; returns whether it was present
    pub fn remove_channel_requirement(&self, requirement: &ChannelRequirement) -> bool {
        let mut requirements = self.requirements.write();
        let Some(list) = requirements.get_mut(requirement.robot_id()) else {
            return false;
        };
        let before = list.len();
        list.retain(|r| !r.same_as(requirement));
        let removed = list.len() != before;
        if list.is_empty() {
            requirements.remove(requirement.robot_id());
        }
        if removed {
            debug!(connector = %requirement.connector, "Removed channel requirement");
        }
        removed
    }

    pub fn requirements(&self, robot_id: &str) -> Vec<ChannelRequirement> {
        self.requirements
            .read()
            .get(robot_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Record an open channel, replacing any stale entry for its connector
    pub fn register_active_channel(&self, info: ChannelInfo) {
        debug!(connector = %info.connector, channel_type = ?info.channel_type, "Channel active");
        self.active_channels
            .write()
            .insert(info.connector.serialize(), info);
    }

    pub fn unregister_active_channel(&self, connector: &RobotConnector) -> Option<ChannelInfo> {
        self.active_channels.write().remove(&connector.serialize())
    }

    pub fn get_active_channel(&self, connector: &RobotConnector) -> Option<ChannelInfo> {
        self.active_channels
            .read()
            .get(&connector.serialize())
            .cloned()
    }

    pub fn get_all_active_channels(&self, robot_id: &str) -> Vec<ChannelInfo> {
        let mut channels: Vec<ChannelInfo> = self
            .active_channels
            .read()
            .values()
            .filter(|info| info.connector.robot_id() == robot_id)
            .cloned()
            .collect();
        channels.sort_by_key(|info| info.connector.serialize());
        channels
    }

    /// Forget every active channel of a robot; returns how many were removed
    pub fn clear_robot(&self, robot_id: &str) -> usize {
        let mut active = self.active_channels.write();
        let before = active.len();
        active.retain(|_, info| info.connector.robot_id() != robot_id);
        before - active.len()
    }
}
