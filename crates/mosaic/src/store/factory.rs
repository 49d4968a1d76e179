//! Data-type to store constructor table

use super::connection_check::{ConnectionCheckStore, CONNECTION_CHECK_DATA_TYPE};
use super::video::{VideoStore, MEDIA_DATA_TYPES};
use super::{MosaicStore, ReadOnlyStore, WriteOnlyStore};
use crate::config::MosaicConfig;
use crate::connector::{ConnectorConfig, RobotConnector};
use crate::parser::{
    Go2LowStateDecoder, GpsDecoder, PayloadDecoder, PayloadEncoder, PointCloudDecoder,
    Pose2DDecoder, RemotePadEncoder, TurtlesimDecoder, VideoRecorderEncoder,
};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Builds a store for one connector
pub type StoreConstructor = Arc<
    dyn Fn(&RobotConnector, &ConnectorConfig, &MosaicConfig) -> Arc<dyn MosaicStore>
        + Send
        + Sync,
>;

/// Registry of store constructors keyed by connector data type
#[derive(Clone)]
pub struct StoreFactory {
    constructors: HashMap<String, StoreConstructor>,
}

fn constructor<F>(make: F) -> StoreConstructor
where
    F: Fn(&RobotConnector, &ConnectorConfig, &MosaicConfig) -> Arc<dyn MosaicStore>
        + Send
        + Sync
        + 'static,
{
    Arc::new(make)
}

/// `history_size` connector parameter, else the configured default
fn history_size(connector: &ConnectorConfig, config: &MosaicConfig) -> usize {
    connector
        .params
        .get("history_size")
        .and_then(serde_json::Value::as_u64)
        .map(|size| size as usize)
        .unwrap_or(config.history_size)
}

impl StoreFactory {
    /// Empty factory
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Factory with every built-in data type registered
    pub fn with_defaults() -> Self {
        let mut factory = Self::new();
        factory.register_decoder(|| GpsDecoder);
        factory.register_decoder(|| Pose2DDecoder);
        factory.register_decoder(|| Go2LowStateDecoder);
        factory.register_decoder(|| TurtlesimDecoder);
        factory.register_encoder(|| VideoRecorderEncoder);
        factory.register_encoder(|| RemotePadEncoder);

        factory.register(
            PointCloudDecoder::DATA_TYPE,
            constructor(|connector, params, config| -> Arc<dyn MosaicStore> {
                let store = Arc::new(ReadOnlyStore::new(
                    connector.clone(),
                    PointCloudDecoder::new(config),
                    history_size(params, config),
                ));
                store.spawn_sweeper();
                store
            }),
        );

        factory.register(
            CONNECTION_CHECK_DATA_TYPE,
            constructor(|connector, _params, config| -> Arc<dyn MosaicStore> {
                ConnectionCheckStore::new(connector.clone(), config)
            }),
        );

        for data_type in MEDIA_DATA_TYPES {
            factory.register(
                data_type,
                constructor(|connector, params, config| -> Arc<dyn MosaicStore> {
                    VideoStore::new(
                        connector.clone(),
                        params.data_type.clone(),
                        history_size(params, config),
                        config.video_stats_interval(),
                    )
                }),
            );
        }

        factory
    }

    /// Register (or replace) the constructor for a data type
    pub fn register(&mut self, data_type: &str, constructor: StoreConstructor) {
        self.constructors.insert(data_type.to_string(), constructor);
    }

    /// Register a receive-only store for a decoder
    pub fn register_decoder<D, F>(&mut self, make: F)
    where
        D: PayloadDecoder,
        F: Fn() -> D + Send + Sync + 'static,
    {
        self.register(
            D::DATA_TYPE,
            constructor(move |connector, params, config| -> Arc<dyn MosaicStore> {
                Arc::new(ReadOnlyStore::new(
                    connector.clone(),
                    make(),
                    history_size(params, config),
                ))
            }),
        );
    }

    /// Register a send-only store for an encoder
    pub fn register_encoder<E, F>(&mut self, make: F)
    where
        E: PayloadEncoder,
        F: Fn() -> E + Send + Sync + 'static,
    {
        self.register(
            E::DATA_TYPE,
            constructor(move |connector, _params, config| -> Arc<dyn MosaicStore> {
                Arc::new(WriteOnlyStore::new(connector.clone(), make(), config))
            }),
        );
    }

    pub fn supports(&self, data_type: &str) -> bool {
        self.constructors.contains_key(data_type)
    }

    /// Registered data types, sorted
    pub fn data_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.constructors.keys().cloned().collect();
        types.sort();
        types
    }

    /// Create the store for a connector declared on `connector_config`
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedDataType`] when no constructor is
    /// registered for the connector's data type.
    pub fn create(
        &self,
        connector: &RobotConnector,
        connector_config: &ConnectorConfig,
        config: &MosaicConfig,
    ) -> Result<Arc<dyn MosaicStore>> {
        let constructor = self
            .constructors
            .get(&connector_config.data_type)
            .ok_or_else(|| Error::UnsupportedDataType(connector_config.data_type.clone()))?;
        Ok(constructor(connector, connector_config, config))
    }
}

impl Default for StoreFactory {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreKind;

    #[test]
    fn test_defaults_cover_known_data_types() {
        let factory = StoreFactory::with_defaults();
        for data_type in [
            "osm_gps_map",
            "ros_2d_map_pose",
            "go2_low_state",
            "turtlesim_position",
            "lidar_pointcloud",
            "remote_control_pad",
            "video_recorder",
            "connection_check",
            "video_stream",
            "video_stream_v2",
        ] {
            assert!(factory.supports(data_type), "{data_type}");
        }
    }

    #[test]
    fn test_create_picks_kind_by_data_type() {
        let factory = StoreFactory::with_defaults();
        let config = MosaicConfig::default();
        let connector = RobotConnector::new("r1", "x");

        let kinds = [
            ("osm_gps_map", StoreKind::Receivable),
            ("video_recorder", StoreKind::Sendable),
            ("connection_check", StoreKind::Bidirectional),
            ("video_stream_v2", StoreKind::Media),
        ];
        for (data_type, kind) in kinds {
            let store = factory
                .create(&connector, &ConnectorConfig::new("x", data_type), &config)
                .unwrap();
            assert_eq!(store.kind(), kind);
            assert_eq!(store.data_type(), data_type);
        }
    }

    #[test]
    fn test_unsupported_data_type() {
        let factory = StoreFactory::with_defaults();
        let err = factory
            .create(
                &RobotConnector::new("r1", "x"),
                &ConnectorConfig::new("x", "thermal_camera"),
                &MosaicConfig::default(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedDataType(ref t) if t == "thermal_camera"));
    }
}
