//! Send-only command stores

use super::{
    ConnectionEvent, HistoryBuffer, MosaicStore, SendOutcome, SendableStore, SenderCore, StoreKind,
};
use crate::config::MosaicConfig;
use crate::connector::RobotConnector;
use crate::parser::{PayloadEncoder, RemotePadEncoder, VideoRecorderEncoder};
use tracing::warn;

/// Store for a client-to-robot data type
///
/// Keeps a history of the values it accepted for sending.
pub struct WriteOnlyStore<E: PayloadEncoder> {
    connector: RobotConnector,
    encoder: E,
    history: HistoryBuffer<E::Input>,
    sender: SenderCore,
}

pub type VideoRecorderStore = WriteOnlyStore<VideoRecorderEncoder>;
pub type RemoteControlPadStore = WriteOnlyStore<RemotePadEncoder>;

impl<E: PayloadEncoder> WriteOnlyStore<E> {
    pub fn new(connector: RobotConnector, encoder: E, config: &MosaicConfig) -> Self {
        Self {
            connector,
            encoder,
            history: HistoryBuffer::new(config.history_size),
            sender: SenderCore::new(config.send_queue_capacity, config.send_queue_ttl()),
        }
    }

    /// Encode and send a value
    ///
    /// Never fails: with no open channel the payload is queued briefly or
    /// dropped, as reported by the returned outcome.
    pub fn send(&self, value: E::Input) -> SendOutcome {
        let payload = match self.encoder.encode(&value) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(connector = %self.connector, "Failed to encode outbound value: {}", e);
                return SendOutcome::Dropped;
            }
        };

        let outcome = self.sender.send(payload);
        if outcome != SendOutcome::Dropped {
            self.history.push(value);
        }
        outcome
    }

    pub fn history(&self) -> &HistoryBuffer<E::Input> {
        &self.history
    }

    pub fn latest(&self) -> Option<E::Input> {
        self.history.latest()
    }

    pub fn pending(&self) -> usize {
        self.sender.pending()
    }
}

impl<E: PayloadEncoder> SendableStore for WriteOnlyStore<E> {
    fn sender(&self) -> &SenderCore {
        &self.sender
    }
}

impl<E: PayloadEncoder> MosaicStore for WriteOnlyStore<E> {
    fn data_type(&self) -> &str {
        E::DATA_TYPE
    }

    fn connector(&self) -> &RobotConnector {
        &self.connector
    }

    fn kind(&self) -> StoreKind {
        StoreKind::Sendable
    }

    fn as_sendable(&self) -> Option<&dyn SendableStore> {
        Some(self)
    }

    fn on_connection_event(&self, event: ConnectionEvent) {
        if event == ConnectionEvent::AfterConnected {
            self.sender.flush();
        }
    }
}
