//! Liveness checking over a bidirectional channel
//!
//! While the connection is up the store sends
//! `{"type":"ping","seq":n,"sent_at":ms}` on every open channel at a fixed
//! interval. Replies `{"type":"pong","seq":n}` are matched by
//! `(channel label, seq)`. Pings unanswered after the timeout count as lost.
//! Pings arriving from the robot are answered with a pong on the same channel.

use super::{
    ConnectionEvent, HistoryBuffer, MosaicStore, ReceivableStore, ReceiverCore, SendOutcome,
    SendableStore, SenderCore, StoreKind,
};
use crate::config::MosaicConfig;
use crate::connector::RobotConnector;
use crate::error::DecodeError;
use crate::payload::Payload;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const CONNECTION_CHECK_DATA_TYPE: &str = "connection_check";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum CheckMessage {
    Ping {
        seq: u64,
        #[serde(default)]
        sent_at: i64,
    },
    Pong {
        seq: u64,
    },
}

/// One answered ping
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionCheckSample {
    pub label: String,
    pub seq: u64,
    pub rtt: Duration,
    pub timestamp: DateTime<Utc>,
}

/// Bidirectional `connection_check` store
pub struct ConnectionCheckStore {
    connector: RobotConnector,
    receiver: ReceiverCore,
    sender: SenderCore,
    history: HistoryBuffer<ConnectionCheckSample>,
    in_flight: Mutex<HashMap<(String, u64), Instant>>,
    next_seq: AtomicU64,
    lost: AtomicU64,
    interval: Duration,
    timeout: Duration,
    ticker: Mutex<Option<JoinHandle<()>>>,
    this: Weak<Self>,
}

impl ConnectionCheckStore {
    pub fn new(connector: RobotConnector, config: &MosaicConfig) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            connector,
            receiver: ReceiverCore::new(),
            sender: SenderCore::new(0, config.send_queue_ttl()),
            history: HistoryBuffer::new(config.history_size),
            in_flight: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            lost: AtomicU64::new(0),
            interval: config.connection_check_interval(),
            timeout: config.connection_check_timeout(),
            ticker: Mutex::new(None),
            this: this.clone(),
        })
    }

    /// Send one ping on every open channel; returns its sequence number
    pub fn send_ping(&self) -> Option<u64> {
        self.send_ping_at(Instant::now())
    }

    pub fn send_ping_at(&self, now: Instant) -> Option<u64> {
        let labels = self.sender.open_labels();
        if labels.is_empty() {
            return None;
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let message = CheckMessage::Ping {
            seq,
            sent_at: Utc::now().timestamp_millis(),
        };
        let payload = match serde_json::to_string(&message) {
            Ok(text) => Payload::Text(text),
            Err(e) => {
                warn!("Failed to encode ping: {}", e);
                return None;
            }
        };

        let mut in_flight = self.in_flight.lock();
        for label in labels {
            if self.sender.send_to(&label, payload.clone()) == SendOutcome::Sent {
                in_flight.insert((label, seq), now);
            }
        }
        Some(seq)
    }

    /// Count pings older than the timeout as lost; returns how many expired
    pub fn expire_in_flight(&self, now: Instant) -> usize {
        let mut in_flight = self.in_flight.lock();
        let before = in_flight.len();
        in_flight.retain(|_, sent_at| now.saturating_duration_since(*sent_at) <= self.timeout);
        let expired = before - in_flight.len();
        if expired > 0 {
            self.lost.fetch_add(expired as u64, Ordering::Relaxed);
            debug!(connector = %self.connector, expired, "Pings timed out");
        }
        expired
    }

    fn handle_message(&self, label: &str, payload: &Payload, now: Instant) -> Result<(), DecodeError> {
        let text = payload
            .as_text()
            .ok_or(DecodeError::UnexpectedPayload("binary"))?;
        match serde_json::from_str::<CheckMessage>(text)? {
            CheckMessage::Pong { seq } => {
                let sent_at = self.in_flight.lock().remove(&(label.to_string(), seq));
                match sent_at {
                    Some(sent_at) => self.history.push(ConnectionCheckSample {
                        label: label.to_string(),
                        seq,
                        rtt: now.saturating_duration_since(sent_at),
                        timestamp: Utc::now(),
                    }),
                    None => debug!(label = %label, seq, "Pong for unknown or expired ping"),
                }
            }
            CheckMessage::Ping { seq, .. } => {
                let reply = serde_json::to_string(&CheckMessage::Pong { seq })?;
                self.sender.send_to(label, Payload::Text(reply));
            }
        }
        Ok(())
    }

    pub fn latest(&self) -> Option<ConnectionCheckSample> {
        self.history.latest()
    }

    pub fn history(&self) -> &HistoryBuffer<ConnectionCheckSample> {
        &self.history
    }

    pub fn last_rtt(&self) -> Option<Duration> {
        self.history.latest().map(|sample| sample.rtt)
    }

    pub fn lost_pings(&self) -> u64 {
        self.lost.load(Ordering::Relaxed)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    pub fn is_checking(&self) -> bool {
        self.ticker.lock().is_some()
    }

    /// Start the periodic ping; no-op if already running or outside a runtime
    pub fn start(&self) {
        let mut ticker = self.ticker.lock();
        if ticker.is_some() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(connector = %self.connector, "No runtime, connection check not started");
            return;
        };

        let store = self.this.clone();
        let period = self.interval;
        *ticker = Some(handle.spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                let now = Instant::now();
                store.expire_in_flight(now);
                store.send_ping_at(now);
            }
        }));
        debug!(connector = %self.connector, "Connection check started");
    }

    pub fn stop(&self) {
        if let Some(task) = self.ticker.lock().take() {
            task.abort();
            debug!(connector = %self.connector, "Connection check stopped");
        }
        self.in_flight.lock().clear();
    }
}

impl Drop for ConnectionCheckStore {
    fn drop(&mut self) {
        if let Some(task) = self.ticker.get_mut().take() {
            task.abort();
        }
    }
}

impl ReceivableStore for ConnectionCheckStore {
    fn receiver(&self) -> &ReceiverCore {
        &self.receiver
    }

    fn handle_payload(&self, label: &str, payload: Payload) {
        if let Err(e) = self.handle_message(label, &payload, Instant::now()) {
            warn!(connector = %self.connector, "Dropping connection check message: {}", e);
        }
    }
}

impl SendableStore for ConnectionCheckStore {
    fn sender(&self) -> &SenderCore {
        &self.sender
    }
}

impl MosaicStore for ConnectionCheckStore {
    fn data_type(&self) -> &str {
        CONNECTION_CHECK_DATA_TYPE
    }

    fn connector(&self) -> &RobotConnector {
        &self.connector
    }

    fn kind(&self) -> StoreKind {
        StoreKind::Bidirectional
    }

    fn as_receivable(&self) -> Option<&dyn ReceivableStore> {
        Some(self)
    }

    fn as_sendable(&self) -> Option<&dyn SendableStore> {
        Some(self)
    }

    fn on_connection_event(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::AfterConnected => self.start(),
            ConnectionEvent::AfterDisconnected | ConnectionEvent::AfterConnectionFailed => {
                self.stop()
            }
            ConnectionEvent::BeforeConnected => {}
        }
    }

    fn detach_all(&self) {
        self.stop();
        self.receiver.detach_all();
        self.sender.detach_all();
    }
}
