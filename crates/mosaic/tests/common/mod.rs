//! In-memory peer, channel and signaling doubles shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use mosaic_rtc::config::DataChannelMode;
use mosaic_rtc::peer::{DataChannelState, InboundVideoStats, PeerEvent, PeerEventSink, PeerState};
use mosaic_rtc::{
    ChannelLink, Error, IceCandidate, Mosaic, MosaicConfig, Payload, PeerFactory, PeerTransport,
    Result, RobotConfig, SignalingMessage, SignalingTransport,
};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Channel that records what stores send on it
pub struct MockLink {
    label: String,
    mode: DataChannelMode,
    state: RwLock<DataChannelState>,
    sent: Mutex<Vec<Payload>>,
}

impl MockLink {
    pub fn mode(&self) -> DataChannelMode {
        self.mode
    }

    pub fn set_state(&self, state: DataChannelState) {
        *self.state.write() = state;
    }

    pub fn sent(&self) -> Vec<Payload> {
        self.sent.lock().clone()
    }
}

impl ChannelLink for MockLink {
    fn label(&self) -> &str {
        &self.label
    }

    fn state(&self) -> DataChannelState {
        *self.state.read()
    }

    fn send(&self, payload: Payload) -> Result<()> {
        if !self.is_open() {
            return Err(Error::DataChannelError(format!("{} is not open", self.label)));
        }
        self.sent.lock().push(payload);
        Ok(())
    }

    fn close(&self) {
        self.set_state(DataChannelState::Closed);
    }
}

/// Peer whose callbacks are fired by the test through [`MockPeer::emit`]
pub struct MockPeer {
    events: PeerEventSink,
    links: Mutex<Vec<Arc<MockLink>>>,
    video_transceivers: AtomicUsize,
    offers: AtomicUsize,
    answers: Mutex<Vec<String>>,
    candidates: Mutex<Vec<IceCandidate>>,
    video_stats: Mutex<Vec<InboundVideoStats>>,
    closed: AtomicBool,
}

impl MockPeer {
    pub fn generation(&self) -> u64 {
        self.events.generation()
    }

    pub fn emit(&self, event: PeerEvent) {
        self.events.emit(event);
    }

    pub fn link(&self, label: &str) -> Option<Arc<MockLink>> {
        self.links.lock().iter().find(|l| l.label == label).cloned()
    }

    pub fn labels(&self) -> Vec<String> {
        self.links.lock().iter().map(|l| l.label.clone()).collect()
    }

    /// Open every channel not yet open and report it
    pub fn open_all(&self) {
        let links = self.links.lock().clone();
        for link in links {
            if link.state() == DataChannelState::Connecting {
                link.set_state(DataChannelState::Open);
                self.emit(PeerEvent::ChannelOpen {
                    label: link.label.clone(),
                });
            }
        }
    }

    /// Counters reported by the next stats query
    pub fn set_video_stats(&self, stats: Vec<InboundVideoStats>) {
        *self.video_stats.lock() = stats;
    }

    pub fn connect(&self) {
        self.emit(PeerEvent::StateChanged(PeerState::Connected));
    }

    pub fn message(&self, label: &str, payload: Payload) {
        self.emit(PeerEvent::ChannelMessage {
            label: label.to_string(),
            payload,
        });
    }

    pub fn video_transceivers(&self) -> usize {
        self.video_transceivers.load(Ordering::SeqCst)
    }

    pub fn offers(&self) -> usize {
        self.offers.load(Ordering::SeqCst)
    }

    pub fn answers(&self) -> Vec<String> {
        self.answers.lock().clone()
    }

    pub fn candidates(&self) -> Vec<IceCandidate> {
        self.candidates.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerTransport for MockPeer {
    async fn create_data_channel(
        &self,
        label: &str,
        mode: DataChannelMode,
    ) -> Result<Arc<dyn ChannelLink>> {
        let link = Arc::new(MockLink {
            label: label.to_string(),
            mode,
            state: RwLock::new(DataChannelState::Connecting),
            sent: Mutex::new(Vec::new()),
        });
        self.links.lock().push(Arc::clone(&link));
        Ok(link)
    }

    async fn add_recvonly_video(&self, count: usize) -> Result<()> {
        self.video_transceivers.fetch_add(count, Ordering::SeqCst);
        Ok(())
    }

    async fn create_offer(&self) -> Result<String> {
        let n = self.offers.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!(
            "v=0 offer={} video={}",
            n,
            self.video_transceivers()
        ))
    }

    async fn set_remote_answer(&self, sdp: String) -> Result<()> {
        if sdp.is_empty() {
            return Err(Error::SdpError("empty answer".to_string()));
        }
        self.answers.lock().push(sdp);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        if self.answers.lock().is_empty() {
            return Err(Error::IceCandidateError(
                "remote description not set".to_string(),
            ));
        }
        self.candidates.lock().push(candidate);
        Ok(())
    }

    async fn inbound_video_stats(&self) -> Result<Vec<InboundVideoStats>> {
        Ok(self.video_stats.lock().clone())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        for link in self.links.lock().iter() {
            link.close();
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MockPeerFactory {
    peers: Mutex<Vec<Arc<MockPeer>>>,
    refuse: AtomicBool,
}

impl MockPeerFactory {
    pub fn refuse_peers(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }

    pub fn last_peer(&self) -> Arc<MockPeer> {
        Arc::clone(self.peers.lock().last().expect("no peer created"))
    }
}

#[async_trait]
impl PeerFactory for MockPeerFactory {
    async fn create_peer(
        &self,
        _robot_id: &str,
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerTransport>> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(Error::PeerConnectionError("ICE gathering failed".to_string()));
        }
        let peer = Arc::new(MockPeer {
            events,
            links: Mutex::new(Vec::new()),
            video_transceivers: AtomicUsize::new(0),
            offers: AtomicUsize::new(0),
            answers: Mutex::new(Vec::new()),
            candidates: Mutex::new(Vec::new()),
            video_stats: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        self.peers.lock().push(Arc::clone(&peer));
        Ok(peer)
    }
}

/// Relay that records every outbound message
#[derive(Default)]
pub struct RecordingSignaling {
    sent: Mutex<Vec<SignalingMessage>>,
}

impl RecordingSignaling {
    pub fn messages(&self) -> Vec<SignalingMessage> {
        self.sent.lock().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.sent.lock().iter().map(|m| m.kind()).collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.sent.lock().iter().filter(|m| m.kind() == kind).count()
    }
}

#[async_trait]
impl SignalingTransport for RecordingSignaling {
    async fn send_message(&self, message: SignalingMessage) -> Result<()> {
        self.sent.lock().push(message);
        Ok(())
    }
}

pub fn candidate(n: u32) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{} 1 UDP 2122260223 10.0.0.{} 49152 typ host", n, n),
        sdp_mid: Some("0".to_string()),
        sdp_mline_index: Some(0),
    }
}

pub struct Harness {
    pub mosaic: Mosaic,
    pub peers: Arc<MockPeerFactory>,
    pub signaling: Arc<RecordingSignaling>,
}

impl Harness {
    pub fn new(robot: RobotConfig) -> Self {
        Self::with_config(MosaicConfig::default(), robot)
    }

    pub fn with_config(config: MosaicConfig, robot: RobotConfig) -> Self {
        init_logging();
        let peers = Arc::new(MockPeerFactory::default());
        let signaling = Arc::new(RecordingSignaling::default());
        let mosaic = Mosaic::new(config, peers.clone(), signaling.clone())
            .expect("valid test config");
        mosaic.update_robot_info(robot);
        Self {
            mosaic,
            peers,
            signaling,
        }
    }

    /// Drain the manager's event queue
    pub async fn pump(&self) -> usize {
        self.mosaic.connections().process_pending().await
    }

    pub fn deliver(&self, message: SignalingMessage) {
        self.mosaic.connections().signaling_sink().deliver(message);
    }
}
