//! One store per connector, reference counted

use super::{downcast_store, MosaicStore, StoreFactory};
use crate::config::MosaicConfig;
use crate::connector::{RobotConfig, RobotConnector};
use crate::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

struct StoreEntry {
    store: Arc<dyn MosaicStore>,
    refs: usize,
}

/// Owns every store instance
///
/// Each [`RobotConnector`] maps to exactly one store, created on first
/// request and torn down when the last holder releases it. Reconnections
/// reuse the same instance, so history survives them.
pub struct StoreManager {
    factory: StoreFactory,
    config: Arc<MosaicConfig>,
    stores: RwLock<HashMap<RobotConnector, StoreEntry>>,
}

impl StoreManager {
    pub fn new(config: Arc<MosaicConfig>) -> Self {
        Self::with_factory(config, StoreFactory::with_defaults())
    }

    pub fn with_factory(config: Arc<MosaicConfig>, factory: StoreFactory) -> Self {
        Self {
            factory,
            config,
            stores: RwLock::new(HashMap::new()),
        }
    }

    pub fn factory(&self) -> &StoreFactory {
        &self.factory
    }

    /// Return the store for `connector`, creating it on first use
    ///
    /// Every successful call takes one reference; pair it with
    /// [`StoreManager::release_store`].
    ///
    /// # Errors
    ///
    /// - [`Error::RobotNotFound`] if `robot` is not the connector's robot
    /// - [`Error::UnknownConnector`] if the robot does not declare it
    /// - [`Error::UnsupportedDataType`] if no store exists for its data type
    pub fn get_or_create_store(
        &self,
        connector: &RobotConnector,
        robot: &RobotConfig,
    ) -> Result<Arc<dyn MosaicStore>> {
        let mut stores = self.stores.write();
        if let Some(entry) = stores.get_mut(connector) {
            entry.refs += 1;
            debug!(connector = %connector, refs = entry.refs, "Reusing store");
            return Ok(Arc::clone(&entry.store));
        }

        robot.data_type_of(connector)?;
        let connector_config = robot.connector(connector.connector_id()).ok_or_else(|| {
            Error::UnknownConnector {
                robot_id: robot.id.clone(),
                connector_id: connector.connector_id().to_string(),
            }
        })?;
        let store = self.factory.create(connector, connector_config, &self.config)?;

        info!(
            connector = %connector,
            data_type = %connector_config.data_type,
            "Created store"
        );
        stores.insert(
            connector.clone(),
            StoreEntry {
                store: Arc::clone(&store),
                refs: 1,
            },
        );
        Ok(store)
    }

    /// Typed variant of [`StoreManager::get_or_create_store`]
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreTypeMismatch`] (without taking a reference) if
    /// the store for this connector is not a `T`.
    pub fn get_or_create_typed<T: MosaicStore>(
        &self,
        connector: &RobotConnector,
        robot: &RobotConfig,
    ) -> Result<Arc<T>> {
        let store = self.get_or_create_store(connector, robot)?;
        match downcast_store::<T>(store) {
            Some(typed) => Ok(typed),
            None => {
                self.release_store(connector);
                Err(Error::StoreTypeMismatch {
                    connector: connector.serialize(),
                    expected: std::any::type_name::<T>(),
                })
            }
        }
    }

    /// Lookup without taking a reference
    pub fn get_store(&self, connector: &RobotConnector) -> Option<Arc<dyn MosaicStore>> {
        self.stores
            .read()
            .get(connector)
            .map(|entry| Arc::clone(&entry.store))
    }

    /// Drop one reference; returns true if the store was torn down
    pub fn release_store(&self, connector: &RobotConnector) -> bool {
        let removed = {
            let mut stores = self.stores.write();
            let Some(entry) = stores.get_mut(connector) else {
                return false;
            };
            entry.refs = entry.refs.saturating_sub(1);
            if entry.refs > 0 {
                return false;
            }
            stores.remove(connector)
        };

        if let Some(entry) = removed {
            entry.store.detach_all();
            info!(connector = %connector, "Released store");
        }
        true
    }

    pub fn ref_count(&self, connector: &RobotConnector) -> usize {
        self.stores
            .read()
            .get(connector)
            .map_or(0, |entry| entry.refs)
    }

    /// All live stores for a robot
    pub fn stores_for_robot(&self, robot_id: &str) -> Vec<Arc<dyn MosaicStore>> {
        self.stores
            .read()
            .iter()
            .filter(|(connector, _)| connector.robot_id() == robot_id)
            .map(|(_, entry)| Arc::clone(&entry.store))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.stores.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.read().is_empty()
    }
}
