//! Video stream store
//!
//! While a remote track is attached the store polls the peer for receive
//! counters every stats interval and keeps the derived [`StreamStats`].

use super::{HistoryBuffer, MediaStore, MosaicStore, StoreKind};
use crate::connector::RobotConnector;
use crate::peer::{MediaKind, MediaStreamInfo, PeerTransport};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Connector data types served by media tracks instead of data channels
pub const MEDIA_DATA_TYPES: &[&str] = &["video_stream", "video_stream_v2"];

pub fn is_media_data_type(data_type: &str) -> bool {
    MEDIA_DATA_TYPES.contains(&data_type)
}

/// What is known about the robot's video for this connector
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoMetadata {
    pub stream_id: String,
    pub robot_id: String,
    pub channel_label: String,
    pub is_active: bool,
    pub media_kind: MediaKind,
    pub source: &'static str,
    pub timestamp: DateTime<Utc>,
}

/// Receive statistics of the attached stream at one point in time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamStats {
    pub stream_id: String,
    pub track_id: String,
    pub packets_received: u64,
    pub bytes_received: u64,
    pub nack_count: u64,
    /// Payload bits per second since the previous sample
    pub bitrate_bps: Option<f64>,
    pub packets_per_second: Option<f64>,
    pub jitter: Option<f64>,
    pub frame_width: Option<u32>,
    pub frame_height: Option<u32>,
    pub frames_per_second: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

struct Counters {
    at: Instant,
    bytes: u64,
    packets: u64,
}

/// Media store for `video_stream` / `video_stream_v2` connectors
///
/// Rendering is out of scope; the store tracks the remote stream and keeps
/// a history of metadata changes and stream statistics.
pub struct VideoStore {
    connector: RobotConnector,
    data_type: String,
    stream: RwLock<Option<MediaStreamInfo>>,
    history: HistoryBuffer<VideoMetadata>,
    stats: HistoryBuffer<StreamStats>,
    stats_source: RwLock<Option<Weak<dyn PeerTransport>>>,
    last_counters: Mutex<Option<Counters>>,
    stats_interval: Duration,
    ticker: Mutex<Option<JoinHandle<()>>>,
    this: Weak<Self>,
}

impl VideoStore {
    pub fn new(
        connector: RobotConnector,
        data_type: impl Into<String>,
        history_size: usize,
        stats_interval: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            connector,
            data_type: data_type.into(),
            stream: RwLock::new(None),
            history: HistoryBuffer::new(history_size),
            stats: HistoryBuffer::new(history_size),
            stats_source: RwLock::new(None),
            last_counters: Mutex::new(None),
            stats_interval,
            ticker: Mutex::new(None),
            this: this.clone(),
        })
    }

    pub fn metadata(&self) -> Option<VideoMetadata> {
        self.history.latest()
    }

    pub fn history(&self) -> &HistoryBuffer<VideoMetadata> {
        &self.history
    }

    pub fn is_active(&self) -> bool {
        self.stream.read().is_some()
    }

    pub fn stream_stats(&self) -> Option<StreamStats> {
        self.stats.latest()
    }

    pub fn stats_history(&self) -> &HistoryBuffer<StreamStats> {
        &self.stats
    }

    /// Receive every stats sample taken after this call
    pub fn subscribe_stream_stats(&self) -> broadcast::Receiver<StreamStats> {
        self.stats.subscribe()
    }

    pub fn is_sampling(&self) -> bool {
        self.ticker.lock().is_some()
    }

    /// Poll the peer once and record the attached stream's counters
    ///
    /// Returns `None` without a stream, without a live peer, or when the
    /// peer reports nothing for the stream's track.
    pub async fn sample_stats(&self) -> Option<StreamStats> {
        self.sample_stats_at(Instant::now()).await
    }

    pub async fn sample_stats_at(&self, now: Instant) -> Option<StreamStats> {
        let stream = self.stream.read().clone()?;
        let peer = self.stats_source.read().as_ref().and_then(Weak::upgrade)?;

        let inbound = match peer.inbound_video_stats().await {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!(connector = %self.connector, "Failed to read stream stats: {}", e);
                return None;
            }
        };
        let Some(counters) = inbound.into_iter().find(|s| s.track_id == stream.track_id) else {
            debug!(connector = %self.connector, track_id = %stream.track_id, "No stats for track");
            return None;
        };

        let previous = self.last_counters.lock().replace(Counters {
            at: now,
            bytes: counters.bytes_received,
            packets: counters.packets_received,
        });
        let rates = previous.and_then(|previous| {
            let elapsed = now.saturating_duration_since(previous.at).as_secs_f64();
            (elapsed > 0.0).then(|| {
                (
                    counters.bytes_received.saturating_sub(previous.bytes) as f64 * 8.0 / elapsed,
                    counters.packets_received.saturating_sub(previous.packets) as f64 / elapsed,
                )
            })
        });

        let sample = StreamStats {
            stream_id: stream.stream_id,
            track_id: counters.track_id,
            packets_received: counters.packets_received,
            bytes_received: counters.bytes_received,
            nack_count: counters.nack_count,
            bitrate_bps: rates.map(|(bits, _)| bits),
            packets_per_second: rates.map(|(_, packets)| packets),
            jitter: counters.jitter,
            frame_width: counters.frame_width,
            frame_height: counters.frame_height,
            frames_per_second: counters.frames_per_second,
            timestamp: Utc::now(),
        };
        self.stats.push(sample.clone());
        Some(sample)
    }

    /// Start periodic sampling; no-op if already running or outside a runtime
    fn start_sampling(&self) {
        let mut ticker = self.ticker.lock();
        if ticker.is_some() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(connector = %self.connector, "No runtime, stream stats not sampled");
            return;
        };

        let store = self.this.clone();
        let period = self.stats_interval;
        *ticker = Some(handle.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                store.sample_stats().await;
            }
        }));
        debug!(connector = %self.connector, "Stream stats sampling started");
    }

    pub fn stop_sampling(&self) {
        if let Some(task) = self.ticker.lock().take() {
            task.abort();
            debug!(connector = %self.connector, "Stream stats sampling stopped");
        }
    }
}

impl Drop for VideoStore {
    fn drop(&mut self) {
        if let Some(task) = self.ticker.get_mut().take() {
            task.abort();
        }
    }
}

impl MediaStore for VideoStore {
    fn set_media_stream(&self, stream: Option<MediaStreamInfo>) {
        let previous = {
            let mut current = self.stream.write();
            std::mem::replace(&mut *current, stream.clone())
        };
        *self.last_counters.lock() = None;
        if stream.is_none() {
            self.stop_sampling();
            *self.stats_source.write() = None;
        }

        let record = match (stream, previous) {
            (Some(info), _) => {
                info!(connector = %self.connector, stream_id = %info.stream_id, "Video stream attached");
                VideoMetadata {
                    stream_id: info.stream_id,
                    robot_id: self.connector.robot_id().to_string(),
                    channel_label: self.connector.serialize(),
                    is_active: true,
                    media_kind: info.kind,
                    source: "webrtc",
                    timestamp: Utc::now(),
                }
            }
            (None, Some(previous)) => VideoMetadata {
                stream_id: previous.stream_id,
                robot_id: self.connector.robot_id().to_string(),
                channel_label: self.connector.serialize(),
                is_active: false,
                media_kind: previous.kind,
                source: "webrtc",
                timestamp: Utc::now(),
            },
            (None, None) => return,
        };
        self.history.push(record);
    }

    fn media_stream(&self) -> Option<MediaStreamInfo> {
        self.stream.read().clone()
    }

    fn set_stats_source(&self, source: Option<Weak<dyn PeerTransport>>) {
        let sampling = source.is_some() && self.is_active();
        *self.stats_source.write() = source;
        if sampling {
            self.start_sampling();
        } else {
            self.stop_sampling();
        }
    }
}

impl MosaicStore for VideoStore {
    fn data_type(&self) -> &str {
        &self.data_type
    }

    fn connector(&self) -> &RobotConnector {
        &self.connector
    }

    fn kind(&self) -> StoreKind {
        StoreKind::Media
    }

    fn as_media(&self) -> Option<&dyn MediaStore> {
        Some(self)
    }
}
