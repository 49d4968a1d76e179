//! One robot's peer connection and the channels multiplexed over it

use super::manager::ConnectionStateChange;
use super::ConnectionState;
use crate::channel::{ChannelInfo, ChannelManager, ChannelRequirement, ChannelType};
use crate::config::DataChannelMode;
use crate::connector::RobotConnector;
use crate::payload::Payload;
use crate::peer::{
    ChannelLink, MediaKind, MediaStreamInfo, PeerEvent, PeerEventSink, PeerFactory, PeerState,
    PeerTransport,
};
use crate::signaling::{IceCandidate, SignalingMessage, SignalingTransport};
use crate::store::{ConnectionEvent, MosaicStore, StoreKind};
use crate::{Error, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

/// Channels and transceivers a set of requirements calls for
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionPlan {
    /// One data channel each, labelled with the serialized connector
    pub data_connectors: Vec<RobotConnector>,
    /// One recv-only video transceiver each
    pub media_connectors: Vec<RobotConnector>,
}

impl ConnectionPlan {
    /// Distinct connectors of `requirements`, in first-seen order
    pub fn from_requirements(requirements: &[ChannelRequirement]) -> Self {
        let mut plan = Self::default();
        for requirement in requirements {
            plan.push(requirement);
        }
        plan
    }

    fn push(&mut self, requirement: &ChannelRequirement) -> bool {
        let target = if requirement.store().kind() == StoreKind::Media {
            &mut self.media_connectors
        } else {
            &mut self.data_connectors
        };
        if target.contains(requirement.connector()) {
            return false;
        }
        target.push(requirement.connector().clone());
        true
    }

    pub fn video_track_count(&self) -> usize {
        self.media_connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data_connectors.is_empty() && self.media_connectors.is_empty()
    }
}

struct DataBinding {
    connector: RobotConnector,
    store: Weak<dyn MosaicStore>,
    link: Option<Arc<dyn ChannelLink>>,
}

struct MediaBinding {
    connector: RobotConnector,
    store: Weak<dyn MosaicStore>,
    stream: Option<MediaStreamInfo>,
}

/// Peer connection to a single robot
///
/// Stores are held weakly: a channel closing (or the whole connection going
/// away) never destroys a store or its history.
///
/// Every native callback reaches this type through
/// [`WebRtcConnection::handle_peer_event`], and every relay message through
/// [`WebRtcConnection::handle_signaling`]; both are driven by the
/// connection manager's event loop, one event at a time.
pub struct WebRtcConnection {
    robot_id: String,
    /// Attempt counter assigned by the manager
    generation: u64,
    connection_id: String,
    state: RwLock<ConnectionState>,
    peer: RwLock<Option<Arc<dyn PeerTransport>>>,
    /// Keyed by channel label (serialized connector)
    data_channels: RwLock<BTreeMap<String, DataBinding>>,
    media: RwLock<Vec<MediaBinding>>,
    /// Remote candidates received before the answer was applied
    pending_ice: Mutex<Vec<IceCandidate>>,
    remote_description_set: AtomicBool,
    signaling: Arc<dyn SignalingTransport>,
    channels: Arc<ChannelManager>,
    state_tx: broadcast::Sender<ConnectionStateChange>,
}

impl WebRtcConnection {
    pub(crate) fn new(
        robot_id: impl Into<String>,
        generation: u64,
        signaling: Arc<dyn SignalingTransport>,
        channels: Arc<ChannelManager>,
        state_tx: broadcast::Sender<ConnectionStateChange>,
    ) -> Self {
        Self {
            robot_id: robot_id.into(),
            generation,
            connection_id: uuid::Uuid::new_v4().to_string(),
            state: RwLock::new(ConnectionState::Disconnected),
            peer: RwLock::new(None),
            data_channels: RwLock::new(BTreeMap::new()),
            media: RwLock::new(Vec::new()),
            pending_ice: Mutex::new(Vec::new()),
            remote_description_set: AtomicBool::new(false),
            signaling,
            channels,
            state_tx,
        }
    }

    pub fn robot_id(&self) -> &str {
        &self.robot_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Unique id of this attempt, recorded in every [`ChannelInfo`]
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Labels of every data channel this connection carries
    pub fn data_channel_labels(&self) -> Vec<String> {
        self.data_channels.read().keys().cloned().collect()
    }

    /// Recv-only video transceivers requested so far
    pub fn video_track_count(&self) -> usize {
        self.media.read().len()
    }

    pub fn pending_ice_candidates(&self) -> usize {
        self.pending_ice.lock().len()
    }

    /// Requirements whose stores are still alive
    pub fn requirements(&self) -> Vec<ChannelRequirement> {
        let data = self.data_channels.read();
        let media = self.media.read();
        data.values()
            .map(|b| (&b.connector, &b.store))
            .chain(media.iter().map(|b| (&b.connector, &b.store)))
            .filter_map(|(connector, store)| {
                store
                    .upgrade()
                    .map(|store| ChannelRequirement::new(store, connector.clone()))
            })
            .collect()
    }

    fn peer(&self) -> Option<Arc<dyn PeerTransport>> {
        self.peer.read().clone()
    }

    fn is_tearing_down(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Disconnecting | ConnectionState::Disconnected
        )
    }

    fn set_state(&self, next: ConnectionState) -> Result<()> {
        let previous = {
            let mut state = self.state.write();
            if !state.can_transition_to(next) {
                return Err(Error::InvalidStateTransition {
                    from: *state,
                    to: next,
                });
            }
            std::mem::replace(&mut *state, next)
        };

        debug!(
            "Robot {} state transition: {:?} -> {:?}",
            self.robot_id, previous, next
        );
        // No subscribers is fine
        let _ = self.state_tx.send(ConnectionStateChange {
            robot_id: self.robot_id.clone(),
            state: next,
        });
        Ok(())
    }

    fn bound_stores(&self) -> Vec<Arc<dyn MosaicStore>> {
        let data = self.data_channels.read();
        let media = self.media.read();
        data.values()
            .map(|b| &b.store)
            .chain(media.iter().map(|b| &b.store))
            .filter_map(Weak::upgrade)
            .collect()
    }

    fn notify(&self, event: ConnectionEvent) {
        for store in self.bound_stores() {
            store.on_connection_event(event);
        }
    }

    /// Record requirements not yet bound; returns the newly bound connectors
    fn bind(&self, requirements: &[ChannelRequirement]) -> Result<ConnectionPlan> {
        if let Some(foreign) = requirements.iter().find(|r| r.robot_id() != self.robot_id) {
            return Err(Error::UnknownConnector {
                robot_id: self.robot_id.clone(),
                connector_id: foreign.connector().serialize(),
            });
        }

        let mut data = self.data_channels.write();
        let mut media = self.media.write();
        let mut plan = ConnectionPlan::default();

        for requirement in requirements {
            let connector = requirement.connector();
            let bound = data.contains_key(&connector.serialize())
                || media.iter().any(|b| &b.connector == connector);
            if bound || !plan.push(requirement) {
                continue;
            }

            let store = Arc::downgrade(requirement.store());
            if requirement.store().kind() == StoreKind::Media {
                media.push(MediaBinding {
                    connector: connector.clone(),
                    store,
                    stream: None,
                });
            } else {
                data.insert(
                    connector.serialize(),
                    DataBinding {
                        connector: connector.clone(),
                        store,
                        link: None,
                    },
                );
            }
        }

        Ok(plan)
    }

    /// Create the peer, its channels and transceivers, and relay the offer
    ///
    /// Transport failures do not surface here: they move the connection
    /// through FAILED to DISCONNECTED. Only a connection that is not
    /// DISCONNECTED or a requirement for another robot is rejected.
    #[instrument(
        skip(self, factory, events, requirements),
        fields(robot_id = %self.robot_id, generation = self.generation)
    )]
    pub async fn start(
        &self,
        factory: &dyn PeerFactory,
        events: PeerEventSink,
        requirements: &[ChannelRequirement],
    ) -> Result<()> {
        let current = self.state();
        if !current.can_transition_to(ConnectionState::Connecting) {
            return Err(Error::InvalidStateTransition {
                from: current,
                to: ConnectionState::Connecting,
            });
        }

        let plan = self.bind(requirements)?;
        self.set_state(ConnectionState::Connecting)?;
        info!(
            data_channels = plan.data_connectors.len(),
            video_tracks = plan.video_track_count(),
            "Starting connection"
        );
        self.notify(ConnectionEvent::BeforeConnected);

        if let Err(e) = self.negotiate(factory, events).await {
            error!(robot_id = %self.robot_id, "Connection setup failed: {}", e);
            self.fail().await;
        }
        Ok(())
    }

    async fn negotiate(&self, factory: &dyn PeerFactory, events: PeerEventSink) -> Result<()> {
        let peer = factory.create_peer(&self.robot_id, events).await?;
        *self.peer.write() = Some(Arc::clone(&peer));

        self.open_data_channels(&peer).await?;

        let video_tracks = self.video_track_count();
        if video_tracks > 0 {
            peer.add_recvonly_video(video_tracks).await?;
        }

        self.send_offer(&peer).await
    }

    /// Create a native channel for every bound connector that has none
    async fn open_data_channels(&self, peer: &Arc<dyn PeerTransport>) -> Result<usize> {
        let missing: Vec<(String, DataChannelMode)> = self
            .data_channels
            .read()
            .iter()
            .filter(|(_, binding)| binding.link.is_none())
            .filter_map(|(label, binding)| {
                binding
                    .store
                    .upgrade()
                    .map(|store| (label.clone(), store.channel_mode()))
            })
            .collect();

        for (label, mode) in &missing {
            let link = peer.create_data_channel(label, *mode).await?;
            if let Some(binding) = self.data_channels.write().get_mut(label) {
                binding.link = Some(link);
            }
        }
        Ok(missing.len())
    }

    async fn send_offer(&self, peer: &Arc<dyn PeerTransport>) -> Result<()> {
        let sdp_offer = peer.create_offer().await?;
        self.signaling
            .send_message(SignalingMessage::SendSdpOffer {
                robot_id: self.robot_id.clone(),
                sdp_offer,
            })
            .await?;
        debug!(robot_id = %self.robot_id, "Sent SDP offer");
        Ok(())
    }

    /// Move to FAILED, release the native side, then settle in DISCONNECTED
    ///
    /// Bindings survive, so [`requirements`](Self::requirements) still lists
    /// what a reconnect has to rebuild.
    async fn fail(&self) {
        if let Err(e) = self.set_state(ConnectionState::Failed) {
            debug!(robot_id = %self.robot_id, "Not marking connection failed: {}", e);
            return;
        }
        self.detach_stores();
        self.pending_ice.lock().clear();
        self.notify(ConnectionEvent::AfterConnectionFailed);

        self.release_native().await;
        if self.set_state(ConnectionState::Disconnected).is_ok() {
            info!(robot_id = %self.robot_id, "Failed connection released");
        }
    }

    /// Close every native channel and the peer, and tell the robot
    async fn release_native(&self) {
        let links: Vec<Arc<dyn ChannelLink>> = self
            .data_channels
            .write()
            .values_mut()
            .filter_map(|binding| binding.link.take())
            .collect();
        for link in links {
            link.close();
        }

        let peer = self.peer.write().take();
        if let Some(peer) = peer {
            if let Err(e) = peer.close().await {
                warn!(robot_id = %self.robot_id, "Error closing peer connection: {}", e);
            }
            let message = SignalingMessage::SendClosePeerConnection {
                robot_id: self.robot_id.clone(),
            };
            if let Err(e) = self.signaling.send_message(message).await {
                warn!(robot_id = %self.robot_id, "Failed to send close notification: {}", e);
            }
        }
        self.remote_description_set.store(false, Ordering::Release);
    }

    /// Detach channels and media from every bound store; history is kept
    fn detach_stores(&self) {
        for store in self.bound_stores() {
            store.detach_all();
        }
        for binding in self.media.write().iter_mut() {
            binding.stream = None;
        }
        self.channels.clear_robot(&self.robot_id);
    }

    /// Add requirements to a live connection
    ///
    /// New data connectors get new channels on the existing peer. A new
    /// offer is sent only when video transceivers are added or the peer had
    /// no data channel before. Returns whether renegotiation happened.
    #[instrument(skip(self, requirements), fields(robot_id = %self.robot_id))]
    pub async fn add_requirements(&self, requirements: &[ChannelRequirement]) -> Result<bool> {
        let had_data_channels = self
            .data_channels
            .read()
            .values()
            .any(|binding| binding.link.is_some());

        let plan = self.bind(requirements)?;
        if plan.is_empty() {
            return Ok(false);
        }
        if !self.state().is_active() {
            debug!("Connection inactive, requirements kept for the next attempt");
            return Ok(false);
        }
        let Some(peer) = self.peer() else {
            return Ok(false);
        };

        match self.extend(&peer, &plan, had_data_channels).await {
            Ok(renegotiated) => Ok(renegotiated),
            Err(e) => {
                error!(robot_id = %self.robot_id, "Failed to add channels: {}", e);
                self.fail().await;
                Ok(false)
            }
        }
    }

    async fn extend(
        &self,
        peer: &Arc<dyn PeerTransport>,
        plan: &ConnectionPlan,
        had_data_channels: bool,
    ) -> Result<bool> {
        let opened = self.open_data_channels(peer).await?;
        let new_video = plan.video_track_count();
        if new_video > 0 {
            peer.add_recvonly_video(new_video).await?;
        }

        let renegotiate = new_video > 0 || (!had_data_channels && opened > 0);
        if renegotiate {
            info!(
                robot_id = %self.robot_id,
                data_channels = opened,
                video_tracks = new_video,
                "Renegotiating"
            );
            self.send_offer(peer).await?;
        } else {
            debug!(robot_id = %self.robot_id, data_channels = opened, "Added data channels");
        }
        Ok(renegotiate)
    }

    /// Detach and close a single channel; the rest of the peer is untouched
    pub fn remove_data_channel(&self, connector: &RobotConnector) -> bool {
        let label = connector.serialize();
        let removed = self.data_channels.write().remove(&label);

        if let Some(binding) = removed {
            if let Some(store) = binding.store.upgrade() {
                if let Some(receivable) = store.as_receivable() {
                    receivable.detach_channel(&label);
                }
                if let Some(sendable) = store.as_sendable() {
                    sendable.detach_sender(&label);
                }
            }
            if let Some(link) = binding.link {
                link.close();
            }
        } else {
            let media = {
                let mut media = self.media.write();
                let index = media.iter().position(|b| &b.connector == connector);
                index.map(|i| media.remove(i))
            };
            let Some(binding) = media else {
                return false;
            };
            if let Some(store) = binding.store.upgrade() {
                if let Some(media) = store.as_media() {
                    media.set_media_stream(None);
                }
            }
        }

        self.channels.unregister_active_channel(connector);
        info!(robot_id = %self.robot_id, label = %label, "Removed channel");
        true
    }

    /// Apply one native peer event
    pub async fn handle_peer_event(&self, event: PeerEvent) {
        match event {
            PeerEvent::IceCandidate(candidate) => self.relay_local_candidate(candidate).await,
            PeerEvent::StateChanged(state) => self.on_peer_state(state).await,
            PeerEvent::ChannelOpen { label } => self.on_channel_open(&label),
            PeerEvent::ChannelMessage { label, payload } => self.on_channel_message(&label, payload),
            PeerEvent::ChannelClosed { label } => self.on_channel_closed(&label),
            PeerEvent::Track(info) => self.on_track(info),
        }
    }

    async fn relay_local_candidate(&self, ice_candidate: IceCandidate) {
        if self.is_tearing_down() {
            return;
        }
        let message = SignalingMessage::SendIceCandidate {
            robot_id: self.robot_id.clone(),
            ice_candidate,
        };
        if let Err(e) = self.signaling.send_message(message).await {
            warn!(robot_id = %self.robot_id, "Failed to relay ICE candidate: {}", e);
        }
    }

    async fn on_peer_state(&self, state: PeerState) {
        match state {
            PeerState::Connected => {
                if self.state() != ConnectionState::Connecting {
                    debug!(robot_id = %self.robot_id, state = %self.state(), "Ignoring peer connected");
                    return;
                }
                if self.set_state(ConnectionState::Connected).is_ok() {
                    info!(robot_id = %self.robot_id, "Peer connection established");
                    self.notify(ConnectionEvent::AfterConnected);
                }
            }
            PeerState::Failed => {
                error!(robot_id = %self.robot_id, "Peer connection failed");
                self.fail().await;
            }
            PeerState::Disconnected => {
                warn!(robot_id = %self.robot_id, "Peer connection interrupted");
            }
            other => {
                debug!(robot_id = %self.robot_id, state = ?other, "Peer state changed");
            }
        }
    }

    fn on_channel_open(&self, label: &str) {
        if self.is_tearing_down() {
            return;
        }

        let bound = self.data_channels.read().get(label).map(|binding| {
            (
                binding.connector.clone(),
                binding.store.upgrade(),
                binding.link.clone(),
            )
        });
        let Some((connector, store, Some(link))) = bound else {
            debug!(robot_id = %self.robot_id, label = %label, "Open event for unknown channel");
            return;
        };
        let Some(store) = store else {
            warn!(label = %label, "Store dropped before its channel opened");
            return;
        };

        if let Some(receivable) = store.as_receivable() {
            receivable.attach_channel(Arc::clone(&link));
        }
        if let Some(sendable) = store.as_sendable() {
            sendable.attach_sender(Arc::clone(&link));
            let flushed = sendable.flush_pending();
            if flushed > 0 {
                debug!(label = %label, flushed, "Flushed queued sends");
            }
        }

        self.channels.register_active_channel(ChannelInfo {
            channel_type: ChannelType::DataChannel,
            connector,
            connection_id: self.connection_id.clone(),
            link: Some(link),
            media: None,
        });
        info!(robot_id = %self.robot_id, label = %label, "Data channel open");
    }

    fn on_channel_message(&self, label: &str, payload: Payload) {
        if self.is_tearing_down() {
            return;
        }
        let store = self
            .data_channels
            .read()
            .get(label)
            .and_then(|binding| binding.store.upgrade());
        let Some(store) = store else {
            return;
        };
        match store.as_receivable() {
            Some(receivable) => receivable.on_data(label, payload),
            None => debug!(label = %label, "Dropping inbound message for send-only store"),
        }
    }

    fn on_channel_closed(&self, label: &str) {
        let bound = self
            .data_channels
            .read()
            .get(label)
            .map(|binding| (binding.connector.clone(), binding.store.upgrade()));
        let Some((connector, store)) = bound else {
            return;
        };

        if let Some(store) = store {
            if let Some(receivable) = store.as_receivable() {
                receivable.detach_channel(label);
            }
            if let Some(sendable) = store.as_sendable() {
                sendable.detach_sender(label);
            }
        }
        self.channels.unregister_active_channel(&connector);
        debug!(robot_id = %self.robot_id, label = %label, "Data channel closed");
    }

    /// Hand a remote video track to the media store it belongs to
    ///
    /// A store whose connector id equals the stream id wins; otherwise the
    /// first media store still without a stream takes it.
    fn on_track(&self, info: MediaStreamInfo) {
        if self.is_tearing_down() {
            return;
        }
        if info.kind != MediaKind::Video {
            debug!(robot_id = %self.robot_id, track_id = %info.track_id, "Ignoring non-video track");
            return;
        }

        let claimed = {
            let mut media = self.media.write();
            let index = media
                .iter()
                .position(|b| b.stream.is_none() && b.connector.connector_id() == info.stream_id)
                .or_else(|| media.iter().position(|b| b.stream.is_none()));
            index.map(|i| {
                media[i].stream = Some(info.clone());
                (media[i].connector.clone(), media[i].store.upgrade())
            })
        };
        let Some((connector, store)) = claimed else {
            warn!(robot_id = %self.robot_id, stream_id = %info.stream_id, "Unclaimed remote track");
            return;
        };

        if let Some(media) = store.as_deref().and_then(|store| store.as_media()) {
            media.set_media_stream(Some(info.clone()));
            if let Some(peer) = self.peer() {
                media.set_stats_source(Some(Arc::downgrade(&peer)));
            }
        }
        info!(
            robot_id = %self.robot_id,
            connector = %connector,
            track_id = %info.track_id,
            "Remote video track attached"
        );
        self.channels.register_active_channel(ChannelInfo {
            channel_type: ChannelType::Media,
            connector,
            connection_id: self.connection_id.clone(),
            link: None,
            media: Some(info),
        });
    }

    /// Apply one inbound relay message addressed to this robot
    pub async fn handle_signaling(&self, message: SignalingMessage) {
        match message {
            SignalingMessage::ReceiveSdpAnswer { sdp_answer, .. } => {
                self.apply_answer(sdp_answer).await
            }
            SignalingMessage::ReceiveIceCandidate { ice_candidate, .. } => {
                self.apply_remote_candidate(ice_candidate).await
            }
            other => debug!(kind = other.kind(), "Ignoring outbound signaling message"),
        }
    }

    async fn apply_answer(&self, sdp_answer: String) {
        if !self.state().is_active() {
            warn!(robot_id = %self.robot_id, state = %self.state(), "Ignoring answer for inactive connection");
            return;
        }
        let Some(peer) = self.peer() else {
            warn!(robot_id = %self.robot_id, "Answer arrived before the peer was created");
            return;
        };

        if let Err(e) = peer.set_remote_answer(sdp_answer).await {
            error!(robot_id = %self.robot_id, "Failed to apply answer: {}", e);
            self.fail().await;
            return;
        }
        self.remote_description_set.store(true, Ordering::Release);
        debug!(robot_id = %self.robot_id, "Applied SDP answer");

        let queued = std::mem::take(&mut *self.pending_ice.lock());
        if !queued.is_empty() {
            debug!(robot_id = %self.robot_id, count = queued.len(), "Applying queued ICE candidates");
        }
        for candidate in queued {
            if let Err(e) = peer.add_ice_candidate(candidate).await {
                warn!(robot_id = %self.robot_id, "Failed to add queued ICE candidate: {}", e);
            }
        }
    }

    async fn apply_remote_candidate(&self, candidate: IceCandidate) {
        if self.is_tearing_down() {
            return;
        }
        let peer = match self.peer() {
            Some(peer) if self.remote_description_set.load(Ordering::Acquire) => peer,
            _ => {
                self.pending_ice.lock().push(candidate);
                debug!(robot_id = %self.robot_id, "Queued ICE candidate until the answer is applied");
                return;
            }
        };
        if let Err(e) = peer.add_ice_candidate(candidate).await {
            warn!(robot_id = %self.robot_id, "Failed to add ICE candidate: {}", e);
        }
    }

    /// Synchronous half of [`WebRtcConnection::disconnect`]
    ///
    /// Moves to DISCONNECTING and detaches every store. Once this returns,
    /// nothing from this connection reaches a store, even while the native
    /// close is still in flight. Returns false if the connection was not
    /// in a state that can be torn down.
    pub fn begin_disconnect(&self) -> bool {
        if let Err(e) = self.set_state(ConnectionState::Disconnecting) {
            debug!(robot_id = %self.robot_id, "Not disconnecting: {}", e);
            return false;
        }
        self.detach_stores();
        self.pending_ice.lock().clear();
        true
    }

    /// Close every channel and the peer, and tell the robot
    ///
    /// Ends in DISCONNECTED. Stores keep their history.
    #[instrument(skip(self), fields(robot_id = %self.robot_id, generation = self.generation))]
    pub async fn disconnect(&self) {
        let state = self.state();
        if state == ConnectionState::Disconnected {
            return;
        }
        if state != ConnectionState::Disconnecting && !self.begin_disconnect() {
            return;
        }

        self.release_native().await;

        if self.set_state(ConnectionState::Disconnected).is_ok() {
            self.notify(ConnectionEvent::AfterDisconnected);
            info!(robot_id = %self.robot_id, "Connection closed");
        }
    }
}

impl std::fmt::Debug for WebRtcConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebRtcConnection")
            .field("robot_id", &self.robot_id)
            .field("generation", &self.generation)
            .field("state", &self.state())
            .field("data_channels", &self.data_channel_labels())
            .field("video_tracks", &self.video_track_count())
            .finish()
    }
}
