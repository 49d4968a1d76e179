//! Receive-only stores: one decoder plus a bounded history

use super::{HistoryBuffer, MosaicStore, ReceivableStore, ReceiverCore, StoreKind};
use crate::config::DataChannelMode;
use crate::connector::RobotConnector;
use crate::parser::{
    Go2LowStateDecoder, GpsDecoder, PayloadDecoder, PointCloudDecoder, Pose2DDecoder,
    TurtlesimDecoder,
};
use crate::payload::Payload;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Store for a robot-to-client data type
pub struct ReadOnlyStore<D: PayloadDecoder> {
    connector: RobotConnector,
    decoder: D,
    history: HistoryBuffer<D::Output>,
    receiver: ReceiverCore,
    decode_failures: AtomicU64,
}

pub type GpsStore = ReadOnlyStore<GpsDecoder>;
pub type Pose2DStore = ReadOnlyStore<Pose2DDecoder>;
pub type Go2LowStateStore = ReadOnlyStore<Go2LowStateDecoder>;
pub type TurtlesimStore = ReadOnlyStore<TurtlesimDecoder>;
pub type PointCloudStore = ReadOnlyStore<PointCloudDecoder>;

impl<D: PayloadDecoder> ReadOnlyStore<D> {
    pub fn new(connector: RobotConnector, decoder: D, history_size: usize) -> Self {
        Self {
            connector,
            decoder,
            history: HistoryBuffer::new(history_size),
            receiver: ReceiverCore::new(),
            decode_failures: AtomicU64::new(0),
        }
    }

    pub fn decoder(&self) -> &D {
        &self.decoder
    }

    pub fn history(&self) -> &HistoryBuffer<D::Output> {
        &self.history
    }

    pub fn latest(&self) -> Option<D::Output> {
        self.history.latest()
    }

    pub fn get(&self, index: usize) -> Option<D::Output> {
        self.history.get(index)
    }

    pub fn snapshot(&self) -> Vec<D::Output> {
        self.history.snapshot()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<D::Output> {
        self.history.subscribe()
    }

    /// Payloads rejected by the decoder so far
    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    /// Decode a payload and append the record
    ///
    /// Returns the appended record. Invalid payloads are logged and leave
    /// the history untouched.
    pub fn ingest(&self, payload: &Payload) -> Option<D::Output> {
        match self.decoder.decode(payload) {
            Ok(Some(record)) => {
                self.history.push(record.clone());
                Some(record)
            }
            Ok(None) => None,
            Err(e) => {
                self.decode_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    connector = %self.connector,
                    data_type = D::DATA_TYPE,
                    payload = payload.kind(),
                    "Dropping undecodable payload: {}",
                    e
                );
                None
            }
        }
    }
}

impl<D: PayloadDecoder> ReceivableStore for ReadOnlyStore<D> {
    fn receiver(&self) -> &ReceiverCore {
        &self.receiver
    }

    fn handle_payload(&self, _label: &str, payload: Payload) {
        self.ingest(&payload);
    }

    /// Partial decoder state dies with the last attached channel
    fn detach_channel(&self, label: &str) {
        self.receiver.detach(label);
        if self.receiver.attached_labels().is_empty() {
            self.decoder.reset();
        }
    }

    fn detach_all(&self) {
        self.receiver.detach_all();
        self.decoder.reset();
    }
}

impl<D: PayloadDecoder> MosaicStore for ReadOnlyStore<D> {
    fn data_type(&self) -> &str {
        D::DATA_TYPE
    }

    fn connector(&self) -> &RobotConnector {
        &self.connector
    }

    fn kind(&self) -> StoreKind {
        StoreKind::Receivable
    }

    fn channel_mode(&self) -> DataChannelMode {
        D::CHANNEL_MODE
    }

    fn as_receivable(&self) -> Option<&dyn ReceivableStore> {
        Some(self)
    }
}

impl ReadOnlyStore<PointCloudDecoder> {
    /// Latest point cloud frame rate in Hz
    pub fn fps(&self) -> f64 {
        self.decoder.fps()
    }

    /// Messages with chunks still outstanding
    pub fn pending_messages(&self) -> usize {
        self.decoder.pending_messages()
    }

    /// Sweep stale partial messages every chunk timeout
    ///
    /// The task holds only a weak reference and ends once the store is
    /// dropped. Without a tokio runtime no sweeper runs.
    pub fn spawn_sweeper(self: &Arc<Self>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(connector = %self.connector, "No runtime, point cloud sweeper not started");
            return;
        };

        let store: Weak<Self> = Arc::downgrade(self);
        let period = self.decoder.chunk_timeout();
        handle.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                store.decoder.sweep_expired(Instant::now());
            }
            debug!("Point cloud sweeper stopped");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::pointcloud::{chunk_payload, tests::sample_cloud};
    use crate::peer::testing::FakeLink;
    use prost::Message;

    fn gps_store(size: usize) -> GpsStore {
        ReadOnlyStore::new(RobotConnector::new("r1", "gps"), GpsDecoder, size)
    }

    #[test]
    fn test_decode_failure_leaves_history_unchanged() {
        let store = gps_store(10);
        store.ingest(&Payload::text(r#"{"latitude":1.0,"longitude":2.0}"#));
        let before = store.snapshot();

        assert!(store.ingest(&Payload::text(r#"{"latitude": 1.0}"#)).is_none());
        assert!(store.ingest(&Payload::text("not json")).is_none());
        assert_eq!(store.snapshot(), before);
        assert_eq!(store.decode_failures(), 2);
    }

    #[test]
    fn test_history_bounded() {
        let store = gps_store(2);
        for i in 0..3 {
            store.ingest(&Payload::text(format!(
                r#"{{"latitude":{},"longitude":0.0}}"#,
                i
            )));
        }
        let lats: Vec<f64> = store.snapshot().iter().map(|g| g.latitude).collect();
        assert_eq!(lats, vec![1.0, 2.0]);
    }

    #[test]
    fn test_data_from_unattached_label_is_ignored() {
        let store = gps_store(10);
        let payload = Payload::text(r#"{"latitude":1.0,"longitude":2.0}"#);
        store.on_data("r1:gps", payload.clone());
        assert!(store.is_empty());

        store.attach_channel(FakeLink::open("r1:gps"));
        store.on_data("r1:gps", payload);
        assert_eq!(store.len(), 1);
        assert!(store.is_connected());

        MosaicStore::detach_all(&store);
        assert!(!store.is_connected());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_point_cloud_store_assembles_chunks() {
        let store = ReadOnlyStore::new(
            RobotConnector::new("r1", "lidar"),
            PointCloudDecoder::default(),
            5,
        );
        let bytes = sample_cloud(&[[1.0, 2.0, 3.0, 0.5]]).encode_to_vec();
        let chunks = chunk_payload("m1", &bytes, 8, 0);
        for chunk in &chunks {
            store.ingest(&Payload::binary(chunk.encode_to_vec()));
        }
        let cloud = store.latest().unwrap();
        assert_eq!(cloud.points.len(), 1);
        assert_eq!(store.pending_messages(), 0);
    }

    #[test]
    fn test_detaching_last_channel_drops_partial_messages() {
        let store = ReadOnlyStore::new(
            RobotConnector::new("r1", "lidar").with_parallel(true),
            PointCloudDecoder::default(),
            5,
        );
        store.attach_channel(FakeLink::open("r1:lidar"));
        store.attach_channel(FakeLink::open("r1:lidar#2"));
        let bytes = sample_cloud(&[[1.0, 2.0, 3.0, 0.5]]).encode_to_vec();
        let chunks = chunk_payload("m1", &bytes, 8, 0);
        store.on_data("r1:lidar", Payload::binary(chunks[0].encode_to_vec()));
        assert_eq!(store.pending_messages(), 1);

        store.detach_channel("r1:lidar#2");
        assert_eq!(store.pending_messages(), 1);

        store.detach_channel("r1:lidar");
        assert_eq!(store.pending_messages(), 0);

        // A fresh channel never completes the stale message
        store.attach_channel(FakeLink::open("r1:lidar"));
        for chunk in &chunks[1..] {
            store.on_data("r1:lidar", Payload::binary(chunk.encode_to_vec()));
        }
        assert!(store.is_empty());
        assert_eq!(store.pending_messages(), 1);
    }
}
