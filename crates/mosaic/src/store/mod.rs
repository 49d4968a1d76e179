//! Typed stores fed by (or feeding) robot connector channels
//!
//! A store is composed from small capabilities rather than a class tree:
//!
//! ```text
//!                 ┌──────────────┐
//!                 │ MosaicStore  │  identity, kind, lifecycle hooks
//!                 └──────┬───────┘
//!        ┌───────────────┼────────────────┐
//!  ReceivableStore   SendableStore     MediaStore
//!  (ReceiverCore)    (SenderCore)     (stream info)
//! ```
//!
//! Stores are owned by the [`StoreManager`]; connections only hold weak
//! references, so a closing channel never destroys a store's history.

mod connection_check;
mod factory;
mod history;
mod manager;
mod read_only;
mod receiver;
mod sender;
mod video;
mod write_only;

pub use connection_check::{
    ConnectionCheckSample, ConnectionCheckStore, CONNECTION_CHECK_DATA_TYPE,
};
pub use factory::{StoreConstructor, StoreFactory};
pub use history::HistoryBuffer;
pub use manager::StoreManager;
pub use read_only::{
    Go2LowStateStore, GpsStore, PointCloudStore, Pose2DStore, ReadOnlyStore, TurtlesimStore,
};
pub use receiver::{ChannelStatus, ReceiverCore};
pub use sender::{SendOutcome, SenderCore};
pub use video::{is_media_data_type, StreamStats, VideoMetadata, VideoStore, MEDIA_DATA_TYPES};
pub use write_only::{RemoteControlPadStore, VideoRecorderStore, WriteOnlyStore};

use crate::config::DataChannelMode;
use crate::connector::RobotConnector;
use crate::payload::Payload;
use crate::peer::{ChannelLink, MediaStreamInfo, PeerTransport};
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

/// Upcast helper so `Arc<dyn MosaicStore>` can be downcast to a concrete store
pub trait AsAny: Any + Send + Sync {
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Direction of data flow for a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// Robot to client only
    Receivable,
    /// Client to robot only
    Sendable,
    /// Both directions over the same channel
    Bidirectional,
    /// Fed by a remote media track instead of a data channel
    Media,
}

impl StoreKind {
    pub fn receives(&self) -> bool {
        matches!(self, StoreKind::Receivable | StoreKind::Bidirectional)
    }

    pub fn sends(&self) -> bool {
        matches!(self, StoreKind::Sendable | StoreKind::Bidirectional)
    }
}

/// Connection lifecycle notification delivered to every bound store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A connection attempt is starting
    BeforeConnected,
    /// The peer connection reported connected
    AfterConnected,
    /// The connection was torn down
    AfterDisconnected,
    /// The peer connection failed
    AfterConnectionFailed,
}

/// Common face of every store
pub trait MosaicStore: AsAny {
    /// Connector data type this store was created for
    fn data_type(&self) -> &str;

    fn connector(&self) -> &RobotConnector;

    fn kind(&self) -> StoreKind;

    /// Delivery mode for channels created for this store
    fn channel_mode(&self) -> DataChannelMode {
        DataChannelMode::Reliable
    }

    fn as_receivable(&self) -> Option<&dyn ReceivableStore> {
        None
    }

    fn as_sendable(&self) -> Option<&dyn SendableStore> {
        None
    }

    fn as_media(&self) -> Option<&dyn MediaStore> {
        None
    }

    fn on_connection_event(&self, _event: ConnectionEvent) {}

    /// Detach every channel and media stream; buffered history is kept
    fn detach_all(&self) {
        if let Some(receivable) = self.as_receivable() {
            receivable.detach_all();
        }
        if let Some(sendable) = self.as_sendable() {
            sendable.detach_all_senders();
        }
        if let Some(media) = self.as_media() {
            media.set_media_stream(None);
        }
    }

    /// Whether any transport currently feeds (or drains) this store
    fn is_connected(&self) -> bool {
        if let Some(receivable) = self.as_receivable() {
            return receivable.has_any_connected_channel();
        }
        if let Some(sendable) = self.as_sendable() {
            return sendable.can_send();
        }
        self.as_media()
            .is_some_and(|media| media.media_stream().is_some())
    }
}

impl fmt::Debug for dyn MosaicStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MosaicStore")
            .field("connector", &self.connector().serialize())
            .field("data_type", &self.data_type())
            .field("kind", &self.kind())
            .finish()
    }
}

/// Downcast a shared store to its concrete type
pub fn downcast_store<T: MosaicStore>(store: Arc<dyn MosaicStore>) -> Option<Arc<T>> {
    store.as_any_arc().downcast::<T>().ok()
}

/// Store that consumes inbound channel payloads
///
/// Decode failures are logged and dropped inside `handle_payload`; nothing
/// here returns an error.
pub trait ReceivableStore: Send + Sync {
    fn receiver(&self) -> &ReceiverCore;

    /// Decode one payload and append the record
    fn handle_payload(&self, label: &str, payload: Payload);

    /// Inbound data from a channel; ignored unless `label` is attached
    fn on_data(&self, label: &str, payload: Payload) {
        if self.receiver().accepts(label) {
            self.handle_payload(label, payload);
        }
    }

    fn attach_channel(&self, link: Arc<dyn ChannelLink>) {
        self.receiver().attach(link);
    }

    fn detach_channel(&self, label: &str) {
        self.receiver().detach(label);
    }

    fn detach_all(&self) {
        self.receiver().detach_all();
    }

    /// With a label: that channel is attached and open. Without: at least
    /// one channel is attached and all attached channels are open.
    fn is_channel_connected(&self, label: Option<&str>) -> bool {
        self.receiver().is_channel_connected(label)
    }

    fn has_any_connected_channel(&self) -> bool {
        self.receiver().has_any_connected_channel()
    }

    fn channel_states(&self) -> Vec<ChannelStatus> {
        self.receiver().channel_states()
    }
}

/// Store that writes outbound payloads to its channels
pub trait SendableStore: Send + Sync {
    fn sender(&self) -> &SenderCore;

    fn attach_sender(&self, link: Arc<dyn ChannelLink>) {
        self.sender().attach(link);
    }

    fn detach_sender(&self, label: &str) {
        self.sender().detach(label);
    }

    fn detach_all_senders(&self) {
        self.sender().detach_all();
    }

    fn can_send(&self) -> bool {
        self.sender().can_send()
    }

    /// Deliver queued sends that have not expired; returns how many went out
    fn flush_pending(&self) -> usize {
        self.sender().flush()
    }
}

/// Store fed by a remote media track
pub trait MediaStore: Send + Sync {
    fn set_media_stream(&self, stream: Option<MediaStreamInfo>);

    fn media_stream(&self) -> Option<MediaStreamInfo>;

    /// Peer to poll for receive statistics while the stream is attached
    fn set_stats_source(&self, _source: Option<Weak<dyn PeerTransport>>) {}
}
