//! Chunked LiDAR point cloud decoding
//!
//! Robots split each serialized `PointCloud2` into `DataChunk` envelopes that
//! fit a data channel message. Chunks of one message may arrive in any order;
//! a message completes once every declared index has been seen.
//!
//! ```text
//! DataChunk{id, index, total, payload}  ──►  ChunkAssembler  ──►  PointCloud2  ──►  LidarPointCloud
//!                                              ▲
//!                              periodic sweep ─┘ (drops partial messages idle past the timeout)
//! ```

use super::PayloadDecoder;
use crate::config::MosaicConfig;
use crate::error::DecodeError;
use crate::payload::Payload;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use prost::Message;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::debug;

/// `chunking.DataChunk`
#[derive(Clone, PartialEq, Message)]
pub struct DataChunk {
    #[prost(string, tag = "1")]
    pub message_id: String,
    #[prost(uint32, tag = "2")]
    pub chunk_index: u32,
    #[prost(uint32, tag = "3")]
    pub total_chunks: u32,
    #[prost(int64, tag = "4")]
    pub timestamp: i64,
    #[prost(bytes = "vec", tag = "5")]
    pub payload: Vec<u8>,
}

/// `pointcloud.Header`
#[derive(Clone, PartialEq, Message)]
pub struct Header {
    #[prost(double, tag = "1")]
    pub stamp: f64,
    #[prost(string, tag = "2")]
    pub frame_id: String,
}

/// `pointcloud.PointField`
#[derive(Clone, PartialEq, Message)]
pub struct PointField {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(uint32, tag = "2")]
    pub offset: u32,
    #[prost(uint32, tag = "3")]
    pub datatype: u32,
    #[prost(uint32, tag = "4")]
    pub count: u32,
}

/// `pointcloud.PointCloud2`
#[derive(Clone, PartialEq, Message)]
pub struct PointCloud2 {
    #[prost(message, optional, tag = "1")]
    pub header: Option<Header>,
    #[prost(uint32, tag = "2")]
    pub height: u32,
    #[prost(uint32, tag = "3")]
    pub width: u32,
    #[prost(message, repeated, tag = "4")]
    pub fields: Vec<PointField>,
    #[prost(bool, tag = "5")]
    pub is_bigendian: bool,
    #[prost(uint32, tag = "6")]
    pub point_step: u32,
    #[prost(uint32, tag = "7")]
    pub row_step: u32,
    #[prost(bytes = "vec", tag = "8")]
    pub data: Vec<u8>,
    #[prost(bool, tag = "9")]
    pub is_dense: bool,
}

/// Split a serialized message into chunk envelopes of at most `chunk_size` bytes
pub fn chunk_payload(
    message_id: &str,
    data: &[u8],
    chunk_size: usize,
    timestamp: i64,
) -> Vec<DataChunk> {
    let pieces: Vec<&[u8]> = if data.is_empty() {
        vec![data]
    } else {
        data.chunks(chunk_size.max(1)).collect()
    };
    let total_chunks = pieces.len() as u32;
    pieces
        .into_iter()
        .enumerate()
        .map(|(i, piece)| DataChunk {
            message_id: message_id.to_string(),
            chunk_index: i as u32,
            total_chunks,
            timestamp,
            payload: piece.to_vec(),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LidarPoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub intensity: f32,
}

/// Fully reassembled and decoded point cloud
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LidarPointCloud {
    pub message_id: String,
    pub stamp: f64,
    pub frame_id: String,
    pub height: u32,
    pub width: u32,
    pub is_bigendian: bool,
    pub point_step: u32,
    pub row_step: u32,
    pub is_dense: bool,
    pub points: Vec<LidarPoint>,
    pub timestamp: DateTime<Utc>,
}

impl LidarPointCloud {
    fn from_message(message_id: String, cloud: PointCloud2) -> Result<Self, DecodeError> {
        let offset_of = |name: &'static str| {
            cloud
                .fields
                .iter()
                .find(|f| f.name == name)
                .map(|f| f.offset as usize)
                .ok_or(DecodeError::Field(name, "point field"))
        };
        let offsets = [
            offset_of("x")?,
            offset_of("y")?,
            offset_of("z")?,
            offset_of("intensity")?,
        ];

        let step = cloud.point_step as usize;
        let count = (cloud.width as usize)
            .checked_mul(cloud.height as usize)
            .ok_or_else(|| DecodeError::Invalid("point count overflows".to_string()))?;
        if count > 0 && step == 0 {
            return Err(DecodeError::Invalid("point_step is 0".to_string()));
        }
        // Dimensions come from the wire: bound them by the bytes actually sent
        match count.checked_mul(step) {
            Some(needed) if needed <= cloud.data.len() => {}
            _ => {
                return Err(DecodeError::Invalid(format!(
                    "{}x{} points of {} bytes exceed {} data bytes",
                    cloud.width,
                    cloud.height,
                    step,
                    cloud.data.len()
                )))
            }
        }
        let mut points = Vec::with_capacity(count);
        for i in 0..count {
            let base = i * step;
            let mut values = [0f32; 4];
            for (value, offset) in values.iter_mut().zip(offsets) {
                *value = read_f32(&cloud.data, base + offset, cloud.is_bigendian)?;
            }
            points.push(LidarPoint {
                x: values[0],
                y: values[1],
                z: values[2],
                intensity: values[3],
            });
        }

        let header = cloud.header.unwrap_or_default();
        Ok(Self {
            message_id,
            stamp: header.stamp,
            frame_id: header.frame_id,
            height: cloud.height,
            width: cloud.width,
            is_bigendian: cloud.is_bigendian,
            point_step: cloud.point_step,
            row_step: cloud.row_step,
            is_dense: cloud.is_dense,
            points,
            timestamp: Utc::now(),
        })
    }
}

/// Non-finite samples are reported as 0
fn read_f32(data: &[u8], at: usize, big_endian: bool) -> Result<f32, DecodeError> {
    let bytes: [u8; 4] = data
        .get(at..at + 4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| {
            DecodeError::Invalid(format!(
                "point data too short: need {} bytes, have {}",
                at + 4,
                data.len()
            ))
        })?;
    let value = if big_endian {
        f32::from_be_bytes(bytes)
    } else {
        f32::from_le_bytes(bytes)
    };
    Ok(if value.is_finite() { value } else { 0.0 })
}

struct PartialMessage {
    chunks: BTreeMap<u32, Vec<u8>>,
    total_chunks: u32,
    started_at: Instant,
    last_chunk_at: Instant,
}

/// Reassembly state keyed by message id
pub struct ChunkAssembler {
    partial: HashMap<String, PartialMessage>,
    max_concurrent: usize,
    timeout: Duration,
}

impl ChunkAssembler {
    pub fn new(max_concurrent: usize, timeout: Duration) -> Self {
        Self {
            partial: HashMap::new(),
            max_concurrent: max_concurrent.max(1),
            timeout,
        }
    }

    /// Store one chunk; returns the concatenated message when it completes
    ///
    /// Completing a message also discards every partial message that
    /// started no later than it did.
    pub fn push(
        &mut self,
        chunk: DataChunk,
        now: Instant,
    ) -> Result<Option<(String, Vec<u8>)>, DecodeError> {
        if chunk.total_chunks == 0 || chunk.chunk_index >= chunk.total_chunks {
            return Err(DecodeError::Invalid(format!(
                "chunk {} of {} for message {}",
                chunk.chunk_index, chunk.total_chunks, chunk.message_id
            )));
        }

        if !self.partial.contains_key(&chunk.message_id) {
            if self.partial.len() >= self.max_concurrent {
                self.evict_oldest();
            }
            self.partial.insert(
                chunk.message_id.clone(),
                PartialMessage {
                    chunks: BTreeMap::new(),
                    total_chunks: chunk.total_chunks,
                    started_at: now,
                    last_chunk_at: now,
                },
            );
        }

        let Some(entry) = self.partial.get_mut(&chunk.message_id) else {
            return Ok(None);
        };
        if entry.total_chunks != chunk.total_chunks {
            return Err(DecodeError::Invalid(format!(
                "message {} declared {} chunks, chunk says {}",
                chunk.message_id, entry.total_chunks, chunk.total_chunks
            )));
        }
        entry.chunks.insert(chunk.chunk_index, chunk.payload);
        entry.last_chunk_at = entry.last_chunk_at.max(now);

        if entry.chunks.len() < entry.total_chunks as usize {
            return Ok(None);
        }

        let Some(done) = self.partial.remove(&chunk.message_id) else {
            return Ok(None);
        };
        self.partial
            .retain(|_, other| other.started_at > done.started_at);

        let assembled = done.chunks.into_values().flatten().collect();
        Ok(Some((chunk.message_id, assembled)))
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .partial
            .iter()
            .min_by_key(|(_, entry)| entry.started_at)
            .map(|(id, _)| id.clone());
        if let Some(id) = oldest {
            debug!(message_id = %id, "Evicting oldest partial point cloud");
            self.partial.remove(&id);
        }
    }

    /// Drop partial messages that received no chunk within the timeout
    pub fn sweep_expired(&mut self, now: Instant) -> usize {
        let before = self.partial.len();
        let timeout = self.timeout;
        self.partial
            .retain(|_, entry| now.saturating_duration_since(entry.last_chunk_at) <= timeout);
        before - self.partial.len()
    }

    pub fn pending(&self) -> usize {
        self.partial.len()
    }

    pub fn clear(&mut self) {
        self.partial.clear();
    }
}

/// Frame rate over the last N decode timestamps
///
/// Recomputed at most once per interval; `fps()` returns the last value.
pub struct FrameRateMeter {
    stamps: VecDeque<Instant>,
    window: usize,
    interval: Duration,
    last_computed: Option<Instant>,
    fps: f64,
}

impl FrameRateMeter {
    pub fn new(window: usize, interval: Duration) -> Self {
        Self {
            stamps: VecDeque::with_capacity(window),
            window: window.max(2),
            interval,
            last_computed: None,
            fps: 0.0,
        }
    }

    pub fn record(&mut self, now: Instant) {
        self.stamps.push_back(now);
        while self.stamps.len() > self.window {
            self.stamps.pop_front();
        }

        let due = self
            .last_computed
            .map_or(true, |last| now.saturating_duration_since(last) >= self.interval);
        if !due {
            return;
        }
        self.last_computed = Some(now);

        if let (Some(oldest), Some(newest)) = (self.stamps.front(), self.stamps.back()) {
            let span = newest.saturating_duration_since(*oldest).as_secs_f64();
            if self.stamps.len() >= 2 && span > 0.0 {
                self.fps = (self.stamps.len() - 1) as f64 / span;
            }
        }
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn reset(&mut self) {
        self.stamps.clear();
        self.last_computed = None;
        self.fps = 0.0;
    }
}

/// Decoder for `lidar_pointcloud` connectors
///
/// Sweeping and chunk arrival serialize on the same lock, so a sweep never
/// interleaves with the insertion of a chunk.
pub struct PointCloudDecoder {
    assembler: Mutex<ChunkAssembler>,
    fps: Mutex<FrameRateMeter>,
    chunk_timeout: Duration,
}

impl PointCloudDecoder {
    pub fn new(config: &MosaicConfig) -> Self {
        Self {
            assembler: Mutex::new(ChunkAssembler::new(
                config.max_concurrent_chunk_messages,
                config.chunk_timeout(),
            )),
            fps: Mutex::new(FrameRateMeter::new(
                config.fps_window,
                config.fps_log_interval(),
            )),
            chunk_timeout: config.chunk_timeout(),
        }
    }

    pub fn chunk_timeout(&self) -> Duration {
        self.chunk_timeout
    }

    /// Drop partial messages older than the chunk timeout as of `now`
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let removed = self.assembler.lock().sweep_expired(now);
        if removed > 0 {
            debug!(removed, "Swept stale point cloud chunks");
        }
        removed
    }

    /// Number of messages with chunks still outstanding
    pub fn pending_messages(&self) -> usize {
        self.assembler.lock().pending()
    }

    /// Latest frame rate estimate in Hz
    pub fn fps(&self) -> f64 {
        self.fps.lock().fps()
    }

    /// Feed one chunk with an explicit arrival time
    pub fn decode_at(
        &self,
        payload: &Payload,
        now: Instant,
    ) -> Result<Option<LidarPointCloud>, DecodeError> {
        let Payload::Binary(bytes) = payload else {
            return Err(DecodeError::UnexpectedPayload("text"));
        };
        let chunk = DataChunk::decode(&bytes[..])?;

        let assembled = self.assembler.lock().push(chunk, now)?;
        let Some((message_id, data)) = assembled else {
            return Ok(None);
        };

        let cloud = PointCloud2::decode(data.as_slice())?;
        let decoded = LidarPointCloud::from_message(message_id, cloud)?;
        self.fps.lock().record(now);
        Ok(Some(decoded))
    }
}

impl Default for PointCloudDecoder {
    fn default() -> Self {
        Self::new(&MosaicConfig::default())
    }
}

impl PayloadDecoder for PointCloudDecoder {
    type Output = LidarPointCloud;
    const DATA_TYPE: &'static str = "lidar_pointcloud";

    fn decode(&self, payload: &Payload) -> Result<Option<LidarPointCloud>, DecodeError> {
        self.decode_at(payload, Instant::now())
    }

    fn reset(&self) {
        self.assembler.lock().clear();
        self.fps.lock().reset();
    }
}
