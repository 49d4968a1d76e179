//! Outbound control commands

use super::PayloadEncoder;
use crate::payload::Payload;
use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoRecordingCommandType {
    Start,
    Stop,
    Pause,
    Resume,
}

/// Command for the robot-side video recorder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoRecordingCommand {
    pub command: VideoRecordingCommandType,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl VideoRecordingCommand {
    /// Command stamped with the current time
    pub fn now(command: VideoRecordingCommandType) -> Self {
        Self {
            command,
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

#[derive(Debug, Default)]
pub struct VideoRecorderEncoder;

impl PayloadEncoder for VideoRecorderEncoder {
    type Input = VideoRecordingCommand;
    const DATA_TYPE: &'static str = "video_recorder";

    fn encode(&self, value: &VideoRecordingCommand) -> crate::Result<Payload> {
        Ok(Payload::Text(serde_json::to_string(value)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PadDirection {
    Up,
    Down,
    Left,
    Right,
    Stop,
}

/// Directional drive command from an on-screen control pad
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteControlPadCommand {
    pub direction: PadDirection,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl RemoteControlPadCommand {
    pub fn now(direction: PadDirection) -> Self {
        Self {
            direction,
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

#[derive(Debug, Default)]
pub struct RemotePadEncoder;

impl PayloadEncoder for RemotePadEncoder {
    type Input = RemoteControlPadCommand;
    const DATA_TYPE: &'static str = "remote_control_pad";

    fn encode(&self, value: &RemoteControlPadCommand) -> crate::Result<Payload> {
        Ok(Payload::Text(serde_json::to_string(value)?))
    }
}
