//! JSON telemetry decoders

use super::{array, number, numbers, object, parse_json, PayloadDecoder};
use crate::config::DataChannelMode;
use crate::error::DecodeError;
use crate::payload::Payload;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// GPS fix from a `osm_gps_map` connector
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GpsCoordinate {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct GpsDecoder;

impl PayloadDecoder for GpsDecoder {
    type Output = GpsCoordinate;
    const DATA_TYPE: &'static str = "osm_gps_map";

    fn decode(&self, payload: &Payload) -> Result<Option<GpsCoordinate>, DecodeError> {
        let json = parse_json(payload)?;
        Ok(Some(GpsCoordinate {
            latitude: number(&json, "latitude")?,
            longitude: number(&json, "longitude")?,
            timestamp: Utc::now(),
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

/// Map pose from a `ros_2d_map_pose` connector
///
/// The covariance matrix is not transmitted and is always empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pose2DWithCovariance {
    pub position: Point3,
    pub orientation: Quaternion,
    pub covariance: Vec<f64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct Pose2DDecoder;

impl PayloadDecoder for Pose2DDecoder {
    type Output = Pose2DWithCovariance;
    const DATA_TYPE: &'static str = "ros_2d_map_pose";

    fn decode(&self, payload: &Payload) -> Result<Option<Pose2DWithCovariance>, DecodeError> {
        let json = parse_json(payload)?;
        let pose = object(&json, "pose")?;
        let position = object(pose, "position")?;
        let orientation = object(pose, "orientation")?;

        Ok(Some(Pose2DWithCovariance {
            position: Point3 {
                x: number(position, "x")?,
                y: number(position, "y")?,
                z: number(position, "z")?,
            },
            orientation: Quaternion {
                x: number(orientation, "x")?,
                y: number(orientation, "y")?,
                z: number(orientation, "z")?,
                w: number(orientation, "w")?,
            },
            covariance: Vec::new(),
            timestamp: Utc::now(),
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImuState {
    pub quaternion: [f64; 4],
    pub gyroscope: [f64; 3],
    pub accelerometer: [f64; 3],
    pub rpy: [f64; 3],
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MotorState {
    pub q: f64,
    pub dq: f64,
    pub ddq: f64,
    pub tau_est: f64,
}

/// Low-level state of a Unitree Go2 quadruped
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Go2LowState {
    pub imu_state: ImuState,
    pub motor_state: Vec<MotorState>,
    pub foot_force: [f64; 4],
    pub foot_force_est: [f64; 4],
    pub power_v: f64,
    pub power_a: f64,
    pub timestamp: DateTime<Utc>,
}

/// Decoder for `go2_low_state`; published at high rate over a lossy channel
#[derive(Debug, Default)]
pub struct Go2LowStateDecoder;

impl PayloadDecoder for Go2LowStateDecoder {
    type Output = Go2LowState;
    const DATA_TYPE: &'static str = "go2_low_state";
    const CHANNEL_MODE: DataChannelMode = DataChannelMode::Unreliable;

    fn decode(&self, payload: &Payload) -> Result<Option<Go2LowState>, DecodeError> {
        let json = parse_json(payload)?;

        let imu = object(&json, "imu_state")?;
        let imu_state = ImuState {
            quaternion: numbers(imu, "quaternion")?,
            gyroscope: numbers(imu, "gyroscope")?,
            accelerometer: numbers(imu, "accelerometer")?,
            rpy: numbers(imu, "rpy")?,
        };

        let motor_state = array(&json, "motor_state")?
            .iter()
            .map(|motor| -> Result<MotorState, DecodeError> {
                Ok(MotorState {
                    q: number(motor, "q")?,
                    dq: number(motor, "dq")?,
                    ddq: number(motor, "ddq")?,
                    tau_est: number(motor, "tau_est")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(Go2LowState {
            imu_state,
            motor_state,
            foot_force: numbers(&json, "foot_force")?,
            foot_force_est: numbers(&json, "foot_force_est")?,
            power_v: number(&json, "power_v")?,
            power_a: number(&json, "power_a")?,
            timestamp: Utc::now(),
        }))
    }
}

/// Turtle pose from a `turtlesim_position` connector
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurtlesimPosition {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct TurtlesimDecoder;

impl PayloadDecoder for TurtlesimDecoder {
    type Output = TurtlesimPosition;
    const DATA_TYPE: &'static str = "turtlesim_position";

    fn decode(&self, payload: &Payload) -> Result<Option<TurtlesimPosition>, DecodeError> {
        let json = parse_json(payload)?;
        Ok(Some(TurtlesimPosition {
            x: number(&json, "x")?,
            y: number(&json, "y")?,
            theta: number(&json, "theta")?,
            timestamp: Utc::now(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text(value: serde_json::Value) -> Payload {
        Payload::text(value.to_string())
    }

    #[test]
    fn test_gps_decode() {
        let record = GpsDecoder
            .decode(&text(json!({"latitude": 37.5, "longitude": 127.0})))
            .unwrap()
            .unwrap();
        assert_eq!(record.latitude, 37.5);
        assert_eq!(record.longitude, 127.0);
        assert!((Utc::now() - record.timestamp).num_seconds() < 5);
    }

    #[test]
    fn test_gps_requires_numeric_fields() {
        assert!(GpsDecoder.decode(&text(json!({"latitude": 1.0}))).is_err());
        assert!(GpsDecoder
            .decode(&text(json!({"latitude": "1.0", "longitude": 2.0})))
            .is_err());
        assert!(GpsDecoder.decode(&Payload::text("not json")).is_err());
    }

    #[test]
    fn test_pose_decode() {
        let payload = text(json!({
            "pose": {
                "position": {"x": 1.0, "y": 2.0, "z": 0.0},
                "orientation": {"x": 0.0, "y": 0.0, "z": 0.7071, "w": 0.7071}
            }
        }));
        let record = Pose2DDecoder.decode(&payload).unwrap().unwrap();
        assert_eq!(record.position, Point3 { x: 1.0, y: 2.0, z: 0.0 });
        assert_eq!(record.orientation.w, 0.7071);
        assert!(record.covariance.is_empty());
    }

    #[test]
    fn test_pose_requires_orientation() {
        let payload = text(json!({"pose": {"position": {"x": 1.0, "y": 2.0, "z": 0.0}}}));
        assert!(matches!(
            Pose2DDecoder.decode(&payload),
            Err(DecodeError::Field("orientation", "object"))
        ));
    }

    fn go2_payload() -> serde_json::Value {
        json!({
            "imu_state": {
                "quaternion": [1.0, 0.0, 0.0, 0.0],
                "gyroscope": [0.1, 0.2, 0.3],
                "accelerometer": [0.0, 0.0, 9.81],
                "rpy": [0.0, 0.0, 0.0]
            },
            "motor_state": [
                {"q": 0.1, "dq": 0.0, "ddq": 0.0, "tau_est": 1.5},
                {"q": -0.2, "dq": 0.1, "ddq": 0.0, "tau_est": 0.5}
            ],
            "foot_force": [10, 11, 12, 13],
            "foot_force_est": [9, 10, 11, 12],
            "power_v": 28.5,
            "power_a": 1.25
        })
    }

    #[test]
    fn test_go2_decode() {
        let record = Go2LowStateDecoder
            .decode(&text(go2_payload()))
            .unwrap()
            .unwrap();
        assert_eq!(record.motor_state.len(), 2);
        assert_eq!(record.motor_state[0].tau_est, 1.5);
        assert_eq!(record.foot_force, [10.0, 11.0, 12.0, 13.0]);
        assert_eq!(record.imu_state.accelerometer[2], 9.81);
        assert_eq!(Go2LowStateDecoder::CHANNEL_MODE, DataChannelMode::Unreliable);
    }

    #[test]
    fn test_go2_rejects_short_imu_vector() {
        let mut payload = go2_payload();
        payload["imu_state"]["gyroscope"] = json!([0.1, 0.2]);
        assert!(Go2LowStateDecoder.decode(&text(payload)).is_err());
    }

    #[test]
    fn test_go2_rejects_bad_motor_entry() {
        let mut payload = go2_payload();
        payload["motor_state"][1]["tau_est"] = json!(null);
        assert!(Go2LowStateDecoder.decode(&text(payload)).is_err());
    }

    #[test]
    fn test_turtlesim_decode() {
        let record = TurtlesimDecoder
            .decode(&text(json!({"x": 5.5, "y": 4.0, "theta": 1.57})))
            .unwrap()
            .unwrap();
        assert_eq!(record.theta, 1.57);
        assert!(TurtlesimDecoder
            .decode(&text(json!({"x": 5.5, "y": 4.0})))
            .is_err());
    }
}
