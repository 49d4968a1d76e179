//! Payload codecs, one per wire payload kind
//!
//! Every decoder checks each required field's runtime type, not just its
//! presence. A decoder returns `Ok(None)` only when the payload is valid but
//! does not yet complete a record (chunked point clouds).

pub mod command;
pub mod pointcloud;
pub mod telemetry;

use crate::config::DataChannelMode;
use crate::error::DecodeError;
use crate::payload::Payload;
use serde_json::Value;

pub use command::{
    PadDirection, RemoteControlPadCommand, RemotePadEncoder, VideoRecorderEncoder,
    VideoRecordingCommand, VideoRecordingCommandType,
};
pub use pointcloud::{LidarPoint, LidarPointCloud, PointCloudDecoder};
pub use telemetry::{
    GpsCoordinate, GpsDecoder, Go2LowState, Go2LowStateDecoder, ImuState, MotorState, Point3,
    Pose2DWithCovariance, Pose2DDecoder, Quaternion, TurtlesimDecoder, TurtlesimPosition,
};

/// Turns inbound payloads into typed records
pub trait PayloadDecoder: Send + Sync + 'static {
    /// Decoded record type held in the store history
    type Output: Clone + Send + Sync + std::fmt::Debug + 'static;

    /// Connector data type this decoder serves
    const DATA_TYPE: &'static str;

    /// Delivery mode requested for channels feeding this decoder
    const CHANNEL_MODE: DataChannelMode = DataChannelMode::Reliable;

    fn decode(&self, payload: &Payload) -> Result<Option<Self::Output>, DecodeError>;

    /// Drop any per-channel partial state (called when channels detach)
    fn reset(&self) {}
}

/// Turns outbound values into payloads
pub trait PayloadEncoder: Send + Sync + 'static {
    type Input: Clone + Send + Sync + std::fmt::Debug + 'static;

    const DATA_TYPE: &'static str;

    fn encode(&self, value: &Self::Input) -> crate::Result<Payload>;
}

pub(crate) fn parse_json(payload: &Payload) -> Result<Value, DecodeError> {
    let text = payload
        .as_text()
        .ok_or(DecodeError::UnexpectedPayload("binary"))?;
    Ok(serde_json::from_str(text)?)
}

pub(crate) fn number(value: &Value, field: &'static str) -> Result<f64, DecodeError> {
    value
        .get(field)
        .and_then(Value::as_f64)
        .ok_or(DecodeError::Field(field, "number"))
}

pub(crate) fn object<'a>(value: &'a Value, field: &'static str) -> Result<&'a Value, DecodeError> {
    value
        .get(field)
        .filter(|v| v.is_object())
        .ok_or(DecodeError::Field(field, "object"))
}

pub(crate) fn array<'a>(value: &'a Value, field: &'static str) -> Result<&'a [Value], DecodeError> {
    value
        .get(field)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .ok_or(DecodeError::Field(field, "array"))
}

/// Fixed-length numeric array field
pub(crate) fn numbers<const N: usize>(
    value: &Value,
    field: &'static str,
) -> Result<[f64; N], DecodeError> {
    let items = array(value, field)?;
    if items.len() != N {
        return Err(DecodeError::Invalid(format!(
            "`{}` has {} elements, expected {}",
            field,
            items.len(),
            N
        )));
    }
    let mut out = [0.0; N];
    for (slot, item) in out.iter_mut().zip(items) {
        *slot = item.as_f64().ok_or(DecodeError::Field(field, "number array"))?;
    }
    Ok(out)
}
