//! Connection manager: one connection per robot

use super::{ConnectionState, ManagerEvent, WebRtcConnection};
use crate::channel::{ChannelManager, ChannelRequirement};
use crate::config::MosaicConfig;
use crate::connector::RobotConnector;
use crate::peer::{PeerEvent, PeerEventSink, PeerFactory, PeerState};
use crate::signaling::{SignalingSink, SignalingTransport};
use crate::{Error, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

/// Broadcast whenever a robot's connection changes state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStateChange {
    pub robot_id: String,
    pub state: ConnectionState,
}

/// Owns every per-robot connection
///
/// Native peer callbacks and inbound signaling are not handled where they
/// happen: they are queued as [`ManagerEvent`]s and applied by
/// [`WebRtcConnectionManager::run`] (or [`WebRtcConnectionManager::process_pending`]),
/// one at a time. Events are routed by robot id and dropped if they come
/// from an earlier connection attempt.
pub struct WebRtcConnectionManager {
    config: Arc<MosaicConfig>,
    peer_factory: Arc<dyn PeerFactory>,
    signaling: Arc<dyn SignalingTransport>,
    channels: Arc<ChannelManager>,

    /// Map of robot_id to its connection
    connections: Arc<RwLock<HashMap<String, Arc<WebRtcConnection>>>>,

    next_generation: AtomicU64,
    /// Consecutive reconnect attempts per robot, reset on CONNECTED
    reconnect_attempts: parking_lot::Mutex<HashMap<String, u32>>,

    events_tx: mpsc::UnboundedSender<ManagerEvent>,
    events_rx: Mutex<mpsc::UnboundedReceiver<ManagerEvent>>,
    state_tx: broadcast::Sender<ConnectionStateChange>,
}

impl WebRtcConnectionManager {
    pub fn new(
        config: Arc<MosaicConfig>,
        peer_factory: Arc<dyn PeerFactory>,
        signaling: Arc<dyn SignalingTransport>,
        channels: Arc<ChannelManager>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = broadcast::channel(256);
        Self {
            config,
            peer_factory,
            signaling,
            channels,
            connections: Arc::new(RwLock::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
            reconnect_attempts: parking_lot::Mutex::new(HashMap::new()),
            events_tx,
            events_rx: Mutex::new(events_rx),
            state_tx,
        }
    }

    pub fn channels(&self) -> &Arc<ChannelManager> {
        &self.channels
    }

    /// Handle for the signaling adapter to deliver inbound relay messages
    pub fn signaling_sink(&self) -> SignalingSink {
        SignalingSink::new(self.events_tx.clone())
    }

    pub fn subscribe_state(&self) -> broadcast::Receiver<ConnectionStateChange> {
        self.state_tx.subscribe()
    }

    /// Ensure a connection for `robot_id` carries `requirements`
    ///
    /// A live (CONNECTING or CONNECTED) connection is reused: only the
    /// requirements it does not have yet are added. An inactive one is
    /// replaced by a fresh attempt carrying its requirements plus the new
    /// ones.
    ///
    /// Transport failures leave the returned connection in FAILED rather than
    /// returning an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownConnector`] if a requirement names another robot.
    #[instrument(skip(self, requirements), fields(requirements = requirements.len()))]
    pub async fn create_connection(
        &self,
        robot_id: &str,
        mut requirements: Vec<ChannelRequirement>,
    ) -> Result<Arc<WebRtcConnection>> {
        if let Some(foreign) = requirements.iter().find(|r| r.robot_id() != robot_id) {
            return Err(Error::UnknownConnector {
                robot_id: robot_id.to_string(),
                connector_id: foreign.connector().serialize(),
            });
        }

        if let Some(existing) = self.get_connection(robot_id).await {
            if existing.state().is_active() {
                let renegotiated = existing.add_requirements(&requirements).await?;
                debug!(robot_id = %robot_id, renegotiated, "Reusing connection");
                return Ok(existing);
            }

            info!(robot_id = %robot_id, state = %existing.state(), "Replacing inactive connection");
            self.remove_if_current(robot_id, &existing).await;
            for requirement in existing.requirements() {
                if !requirements
                    .iter()
                    .any(|r| r.connector() == requirement.connector())
                {
                    requirements.push(requirement);
                }
            }
            existing.disconnect().await;
        }

        self.start_connection(robot_id, requirements).await
    }

    async fn start_connection(
        &self,
        robot_id: &str,
        requirements: Vec<ChannelRequirement>,
    ) -> Result<Arc<WebRtcConnection>> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let connection = Arc::new(WebRtcConnection::new(
            robot_id,
            generation,
            Arc::clone(&self.signaling),
            Arc::clone(&self.channels),
            self.state_tx.clone(),
        ));

        let replaced = self
            .connections
            .write()
            .await
            .insert(robot_id.to_string(), Arc::clone(&connection));
        if let Some(replaced) = replaced {
            debug!(robot_id = %robot_id, "Closing connection replaced by a concurrent attempt");
            replaced.disconnect().await;
        }

        let events = PeerEventSink::new(robot_id.to_string(), generation, self.events_tx.clone());
        if let Err(e) = connection
            .start(self.peer_factory.as_ref(), events, &requirements)
            .await
        {
            self.remove_if_current(robot_id, &connection).await;
            return Err(e);
        }

        info!(
            robot_id = %robot_id,
            generation,
            state = %connection.state(),
            "Connection attempt started"
        );
        Ok(connection)
    }

    async fn remove_if_current(&self, robot_id: &str, connection: &Arc<WebRtcConnection>) {
        let mut connections = self.connections.write().await;
        if connections
            .get(robot_id)
            .is_some_and(|current| Arc::ptr_eq(current, connection))
        {
            connections.remove(robot_id);
        }
    }

    /// Tear down and forget the robot's connection
    ///
    /// # Errors
    ///
    /// Returns [`Error::RobotNotFound`] if the robot has no connection.
    #[instrument(skip(self))]
    pub async fn disconnect_connection(&self, robot_id: &str) -> Result<()> {
        let connection = self
            .connections
            .write()
            .await
            .remove(robot_id)
            .ok_or_else(|| Error::RobotNotFound(robot_id.to_string()))?;

        info!("Disconnecting robot: {}", robot_id);
        connection.disconnect().await;
        self.reconnect_attempts.lock().remove(robot_id);
        Ok(())
    }

    /// Tear down every connection
    pub async fn disconnect_all(&self) {
        let connections: Vec<Arc<WebRtcConnection>> =
            self.connections.write().await.drain().map(|(_, c)| c).collect();
        for connection in connections {
            connection.disconnect().await;
        }
        self.reconnect_attempts.lock().clear();
    }

    pub async fn get_connection(&self, robot_id: &str) -> Option<Arc<WebRtcConnection>> {
        self.connections.read().await.get(robot_id).cloned()
    }

    /// Detach a single channel, leaving the rest of the peer connected
    ///
    /// # Errors
    ///
    /// Returns [`Error::RobotNotFound`] if the connector's robot has no
    /// connection.
    pub async fn remove_data_channel(&self, connector: &RobotConnector) -> Result<bool> {
        let connection = self
            .get_connection(connector.robot_id())
            .await
            .ok_or_else(|| Error::RobotNotFound(connector.robot_id().to_string()))?;
        Ok(connection.remove_data_channel(connector))
    }

    /// Replace the robot's connection with a fresh attempt
    ///
    /// Same requirements, so the same stores (and their history) are fed
    /// again. Consecutive attempts are spaced by the configured backoff.
    ///
    /// # Errors
    ///
    /// - [`Error::RobotNotFound`] if the robot has no connection
    /// - [`Error::ReconnectExhausted`] once the policy allows no more retries
    #[instrument(skip(self))]
    pub async fn reconnect(&self, robot_id: &str) -> Result<Arc<WebRtcConnection>> {
        let connection = self
            .get_connection(robot_id)
            .await
            .ok_or_else(|| Error::RobotNotFound(robot_id.to_string()))?;

        let policy = &self.config.reconnection;
        let attempt = {
            let mut attempts = self.reconnect_attempts.lock();
            let count = attempts.entry(robot_id.to_string()).or_insert(0);
            let attempt = *count;
            if policy.should_retry(attempt) {
                *count += 1;
            }
            attempt
        };
        if !policy.should_retry(attempt) {
            return Err(Error::ReconnectExhausted {
                robot_id: robot_id.to_string(),
                attempts: attempt,
            });
        }

        let delay = policy.calculate_backoff(attempt);
        info!(
            attempt = attempt + 1,
            max_retries = policy.max_retries,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting robot {}",
            robot_id
        );

        let requirements = connection.requirements();
        self.remove_if_current(robot_id, &connection).await;
        connection.disconnect().await;
        tokio::time::sleep(delay).await;

        self.start_connection(robot_id, requirements).await
    }

    pub fn reconnect_attempts(&self, robot_id: &str) -> u32 {
        self.reconnect_attempts
            .lock()
            .get(robot_id)
            .copied()
            .unwrap_or(0)
    }

    pub async fn connection_states(&self) -> HashMap<String, ConnectionState> {
        self.connections
            .read()
            .await
            .iter()
            .map(|(robot_id, connection)| (robot_id.clone(), connection.state()))
            .collect()
    }

    pub async fn robot_ids(&self) -> Vec<String> {
        self.connections.read().await.keys().cloned().collect()
    }

    /// Route one queued event to its connection
    pub async fn handle_event(&self, event: ManagerEvent) {
        match event {
            ManagerEvent::Peer(envelope) => {
                let Some(connection) = self.get_connection(&envelope.robot_id).await else {
                    debug!(robot_id = %envelope.robot_id, "Dropping peer event for unknown robot");
                    return;
                };
                if connection.generation() != envelope.generation {
                    debug!(
                        robot_id = %envelope.robot_id,
                        generation = envelope.generation,
                        current = connection.generation(),
                        "Dropping event from a previous connection attempt"
                    );
                    return;
                }

                let connected = matches!(envelope.event, PeerEvent::StateChanged(PeerState::Connected));
                connection.handle_peer_event(envelope.event).await;
                if connected && connection.is_connected() {
                    self.reconnect_attempts.lock().remove(&envelope.robot_id);
                }
            }
            ManagerEvent::Signaling(message) => {
                let Some(connection) = self.get_connection(message.robot_id()).await else {
                    debug!(
                        robot_id = %message.robot_id(),
                        kind = message.kind(),
                        "Dropping signaling message for unknown robot"
                    );
                    return;
                };
                connection.handle_signaling(message).await;
            }
        }
    }

    /// Apply every event queued so far; returns how many were handled
    pub async fn process_pending(&self) -> usize {
        let mut handled = 0;
        loop {
            let event = self.events_rx.lock().await.try_recv().ok();
            let Some(event) = event else {
                break;
            };
            self.handle_event(event).await;
            handled += 1;
        }
        handled
    }

    /// Event loop; runs until the task is aborted
    pub async fn run(self: Arc<Self>) {
        info!("Connection event loop started");
        loop {
            let event = self.events_rx.lock().await.recv().await;
            match event {
                Some(event) => self.handle_event(event).await,
                None => break,
            }
        }
    }

    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::PeerTransport;
    use crate::signaling::SignalingMessage;
    use async_trait::async_trait;

    struct NullSignaling;

    #[async_trait]
    impl SignalingTransport for NullSignaling {
        async fn send_message(&self, _message: SignalingMessage) -> Result<()> {
            Ok(())
        }
    }

    struct RefusingFactory;

    #[async_trait]
    impl PeerFactory for RefusingFactory {
        async fn create_peer(
            &self,
            _robot_id: &str,
            _events: PeerEventSink,
        ) -> Result<Arc<dyn PeerTransport>> {
            Err(Error::PeerConnectionError("no network".to_string()))
        }
    }

    fn manager(config: MosaicConfig) -> WebRtcConnectionManager {
        WebRtcConnectionManager::new(
            Arc::new(config),
            Arc::new(RefusingFactory),
            Arc::new(NullSignaling),
            Arc::new(ChannelManager::new()),
        )
    }

    #[tokio::test]
    async fn test_transport_failure_is_a_state() {
        let manager = manager(MosaicConfig::default());
        let mut states = manager.subscribe_state();

        let connection = manager.create_connection("r1", Vec::new()).await.unwrap();
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert_eq!(states.recv().await.unwrap().state, ConnectionState::Connecting);
        assert_eq!(states.recv().await.unwrap().state, ConnectionState::Failed);
        assert_eq!(states.recv().await.unwrap().state, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_unknown_robot_errors() {
        let manager = manager(MosaicConfig::default());
        assert!(manager.get_connection("r9").await.is_none());
        assert!(matches!(
            manager.disconnect_connection("r9").await,
            Err(Error::RobotNotFound(_))
        ));
        assert!(matches!(
            manager.remove_data_channel(&RobotConnector::new("r9", "gps")).await,
            Err(Error::RobotNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reconnect_exhausts_policy() {
        let mut config = MosaicConfig::default();
        config.reconnection.max_retries = 1;
        config.reconnection.backoff_initial_ms = 1;
        config.reconnection.backoff_max_ms = 1;
        let manager = manager(config);

        let first = manager.create_connection("r1", Vec::new()).await.unwrap();
        let second = manager.reconnect("r1").await.unwrap();
        assert_ne!(first.generation(), second.generation());
        assert_eq!(first.state(), ConnectionState::Disconnected);
        assert_eq!(manager.reconnect_attempts("r1"), 1);

        let err = manager.reconnect("r1").await.unwrap_err();
        assert!(matches!(err, Error::ReconnectExhausted { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn test_stale_generation_is_dropped() {
        let manager = manager(MosaicConfig::default());
        let connection = manager.create_connection("r1", Vec::new()).await.unwrap();

        let stale = PeerEventSink::new("r1".to_string(), connection.generation() + 7, manager.events_tx.clone());
        stale.emit(PeerEvent::StateChanged(PeerState::Connected));
        assert_eq!(manager.process_pending().await, 1);
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }
}
