//! Robot connector identity and robot configuration records

use crate::webrtc::ConnectionState;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

const SEPARATOR: char = ':';

/// One logical channel endpoint on a robot
///
/// Serializes to `"robot_id:connector_id"`, which is also the data channel
/// label. Equality and hashing use only the two identifiers; `parallel` is
/// a delivery hint carried along with the value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobotConnector {
    robot_id: String,
    connector_id: String,
    #[serde(default)]
    parallel: bool,
}

impl RobotConnector {
    pub fn new(robot_id: impl Into<String>, connector_id: impl Into<String>) -> Self {
        Self {
            robot_id: robot_id.into(),
            connector_id: connector_id.into(),
            parallel: false,
        }
    }

    /// Build a connector whose label parses back to the same ids
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedConnector`] when either id is empty or the
    /// robot id contains `:`.
    pub fn try_new(robot_id: impl Into<String>, connector_id: impl Into<String>) -> Result<Self> {
        let connector = Self::new(robot_id, connector_id);
        connector.validate()?;
        Ok(connector)
    }

    /// Check that [`serialize`](Self::serialize) round-trips through
    /// [`deserialize`](Self::deserialize)
    pub fn validate(&self) -> Result<()> {
        if self.robot_id.is_empty()
            || self.connector_id.is_empty()
            || self.robot_id.contains(SEPARATOR)
        {
            return Err(Error::MalformedConnector(self.serialize()));
        }
        Ok(())
    }

    /// Mark this connector as fed by several parallel channels
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn robot_id(&self) -> &str {
        &self.robot_id
    }

    pub fn connector_id(&self) -> &str {
        &self.connector_id
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    /// Serialized form, used as the data channel label
    pub fn serialize(&self) -> String {
        format!("{}{}{}", self.robot_id, SEPARATOR, self.connector_id)
    }

    /// Parse a serialized connector, splitting on the first `:`
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedConnector`] when the separator is missing or
    /// either side is empty.
    pub fn deserialize(s: &str) -> Result<Self> {
        match s.split_once(SEPARATOR) {
            Some((robot_id, connector_id)) if !robot_id.is_empty() && !connector_id.is_empty() => {
                Ok(Self::new(robot_id, connector_id))
            }
            _ => Err(Error::MalformedConnector(s.to_string())),
        }
    }
}

impl PartialEq for RobotConnector {
    fn eq(&self, other: &Self) -> bool {
        self.robot_id == other.robot_id && self.connector_id == other.connector_id
    }
}

impl Eq for RobotConnector {}

impl Hash for RobotConnector {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.robot_id.hash(state);
        self.connector_id.hash(state);
    }
}

impl fmt::Display for RobotConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.robot_id, SEPARATOR, self.connector_id)
    }
}

impl FromStr for RobotConnector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::deserialize(s)
    }
}

/// Declared connector on a robot: which data type flows over it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    pub connector_id: String,
    pub data_type: String,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl ConnectorConfig {
    pub fn new(connector_id: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            connector_id: connector_id.into(),
            data_type: data_type.into(),
            params: serde_json::Map::new(),
        }
    }
}

/// Robot with its connector table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub connectors: Vec<ConnectorConfig>,
}

impl RobotConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            connectors: Vec::new(),
        }
    }

    pub fn with_connector(mut self, connector_id: &str, data_type: &str) -> Self {
        self.connectors
            .push(ConnectorConfig::new(connector_id, data_type));
        self
    }

    pub fn connector(&self, connector_id: &str) -> Option<&ConnectorConfig> {
        self.connectors
            .iter()
            .find(|c| c.connector_id == connector_id)
    }

    /// Data type configured for a connector on this robot
    pub fn data_type_of(&self, connector: &RobotConnector) -> Result<&str> {
        connector.validate()?;
        if connector.robot_id() != self.id {
            return Err(Error::RobotNotFound(connector.robot_id().to_string()));
        }
        self.connector(connector.connector_id())
            .map(|c| c.data_type.as_str())
            .ok_or_else(|| Error::UnknownConnector {
                robot_id: self.id.clone(),
                connector_id: connector.connector_id().to_string(),
            })
    }
}

/// Read-only snapshot of a robot as seen by consumers
///
/// Rebuilt on every query; holding one never observes later changes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RobotInfo {
    pub id: String,
    pub name: String,
    pub ws_connected: bool,
    pub rtc_state: ConnectionState,
    pub robot_config: RobotConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_serialize_label() {
        let connector = RobotConnector::new("r1", "gps");
        assert_eq!(connector.serialize(), "r1:gps");
        assert_eq!(connector.to_string(), "r1:gps");
    }

    #[test]
    fn test_deserialize_splits_on_first_separator() {
        let connector = RobotConnector::deserialize("r1:cam:front").unwrap();
        assert_eq!(connector.robot_id(), "r1");
        assert_eq!(connector.connector_id(), "cam:front");
    }

    #[test]
    fn test_deserialize_rejects_malformed() {
        for input in ["", "r1", "r1:", ":gps"] {
            let err = RobotConnector::deserialize(input).unwrap_err();
            assert!(matches!(err, Error::MalformedConnector(_)), "{input}");
        }
    }

    #[test]
    fn test_try_new_rejects_ids_that_do_not_round_trip() {
        for (robot_id, connector_id) in [("site:r1", "gps"), ("", "gps"), ("r1", "")] {
            let err = RobotConnector::try_new(robot_id, connector_id).unwrap_err();
            assert!(matches!(err, Error::MalformedConnector(_)), "{robot_id}/{connector_id}");
        }
        let nested = RobotConnector::try_new("r1", "cam:front").unwrap();
        assert_eq!(RobotConnector::deserialize(&nested.serialize()).unwrap(), nested);
    }

    #[test]
    fn test_data_type_lookup_rejects_malformed_connector() {
        let robot = RobotConfig::new("site:r1", "Rover").with_connector("gps", "osm_gps_map");
        assert!(matches!(
            robot.data_type_of(&RobotConnector::new("site:r1", "gps")),
            Err(Error::MalformedConnector(_))
        ));
    }

    #[test]
    fn test_equality_ignores_parallel_flag() {
        let a = RobotConnector::new("r1", "lidar");
        let b = RobotConnector::new("r1", "lidar").with_parallel(true);
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_robot_config_data_type_lookup() {
        let robot = RobotConfig::new("r1", "Rover").with_connector("gps", "osm_gps_map");
        let gps = RobotConnector::new("r1", "gps");
        assert_eq!(robot.data_type_of(&gps).unwrap(), "osm_gps_map");

        let missing = RobotConnector::new("r1", "camera");
        assert!(matches!(
            robot.data_type_of(&missing),
            Err(Error::UnknownConnector { .. })
        ));

        let other_robot = RobotConnector::new("r2", "gps");
        assert!(matches!(
            robot.data_type_of(&other_robot),
            Err(Error::RobotNotFound(_))
        ));
    }

    #[test]
    fn test_robot_config_json_shape() {
        let robot: RobotConfig = serde_json::from_str(
            r#"{"id":"r1","name":"Go2","connectors":[{"connector_id":"state","data_type":"go2_low_state"}]}"#,
        )
        .unwrap();
        assert_eq!(robot.connectors[0].data_type, "go2_low_state");
        assert!(robot.connectors[0].params.is_empty());
    }

    proptest! {
        #[test]
        fn prop_serialize_round_trip(
            robot_id in "[^:]{1,16}",
            connector_id in ".{1,16}",
        ) {
            let connector = RobotConnector::try_new(robot_id, connector_id).unwrap();
            let parsed = RobotConnector::deserialize(&connector.serialize()).unwrap();
            prop_assert_eq!(parsed, connector);
        }

        #[test]
        fn prop_try_new_accepts_exactly_what_round_trips(
            robot_id in "[a-z:]{0,6}",
            connector_id in "[a-z:]{0,6}",
        ) {
            let built = RobotConnector::try_new(robot_id.clone(), connector_id.clone());
            let parsed = RobotConnector::deserialize(&format!("{}:{}", robot_id, connector_id));
            let round_trips = matches!(
                &parsed,
                Ok(c) if c.robot_id() == robot_id && c.connector_id() == connector_id
            );
            prop_assert_eq!(built.is_ok(), round_trips);
        }
    }
}
