//! webrtc-rs backed peer connections

use super::{
    ChannelLink, InboundVideoStats, MediaKind, MediaStreamInfo, PeerEvent, PeerEventSink,
    PeerFactory, PeerState, PeerTransport, RtcChannelLink,
};
use crate::config::{DataChannelMode, MosaicConfig};
use crate::signaling::IceCandidate;
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::stats::StatsReportType;
use webrtc::track::track_remote::TrackRemote;

/// Creates [`RtcPeer`]s configured with the ICE servers from [`MosaicConfig`]
pub struct RtcPeerFactory {
    config: Arc<MosaicConfig>,
}

impl RtcPeerFactory {
    pub fn new(config: Arc<MosaicConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PeerFactory for RtcPeerFactory {
    async fn create_peer(
        &self,
        robot_id: &str,
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerTransport>> {
        let peer = RtcPeer::new(robot_id.to_string(), &self.config, events).await?;
        Ok(Arc::new(peer))
    }
}

/// WebRTC peer connection to one robot
pub struct RtcPeer {
    robot_id: String,
    connection_id: String,
    peer_connection: Arc<RTCPeerConnection>,
    events: PeerEventSink,
}

impl RtcPeer {
    /// Create a new peer connection
    ///
    /// # Arguments
    ///
    /// * `robot_id` - Robot on the far end
    /// * `config` - STUN/TURN servers
    /// * `events` - Sink for native callbacks
    #[instrument(skip(config, events), fields(robot_id = %robot_id))]
    pub async fn new(robot_id: String, config: &MosaicConfig, events: PeerEventSink) -> Result<Self> {
        let connection_id = uuid::Uuid::new_v4().to_string();

        info!(
            "Creating peer connection: robot_id={}, connection_id={}",
            robot_id, connection_id
        );

        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Registry::new(), &mut media_engine).map_err(|e| {
                Error::WebRtcError(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let ice_servers: Vec<RTCIceServer> = config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .chain(config.turn_servers.iter().map(|turn| RTCIceServer {
                urls: vec![turn.url.clone()],
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            }))
            .collect();

        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let peer_connection =
            Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
                Error::WebRtcError(format!("Failed to create peer connection: {}", e))
            })?);

        let peer = Self {
            robot_id,
            connection_id,
            peer_connection,
            events,
        };
        peer.setup_handlers();

        Ok(peer)
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    fn setup_handlers(&self) {
        let sink = self.events.clone();
        self.peer_connection
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                let sink = sink.clone();
                Box::pin(async move {
                    let state = match s {
                        RTCPeerConnectionState::New => PeerState::New,
                        RTCPeerConnectionState::Connecting => PeerState::Connecting,
                        RTCPeerConnectionState::Connected => PeerState::Connected,
                        RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
                        RTCPeerConnectionState::Failed => PeerState::Failed,
                        RTCPeerConnectionState::Closed => PeerState::Closed,
                        _ => return,
                    };
                    debug!(robot_id = %sink.robot_id(), ?state, "Native peer state changed");
                    sink.emit(PeerEvent::StateChanged(state));
                })
            }));

        let sink = self.events.clone();
        self.peer_connection
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let sink = sink.clone();
                Box::pin(async move {
                    let Some(candidate) = candidate else {
                        return;
                    };
                    match candidate.to_json() {
                        Ok(init) => sink.emit(PeerEvent::IceCandidate(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                        })),
                        Err(e) => warn!("Failed to serialize local ICE candidate: {}", e),
                    }
                })
            }));

        let sink = self.events.clone();
        self.peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let sink = sink.clone();
                Box::pin(async move {
                    let kind = match track.kind() {
                        RTPCodecType::Video => MediaKind::Video,
                        RTPCodecType::Audio => MediaKind::Audio,
                        _ => return,
                    };
                    let info = MediaStreamInfo {
                        stream_id: track.stream_id(),
                        track_id: track.id(),
                        kind,
                    };
                    info!(robot_id = %sink.robot_id(), stream_id = %info.stream_id, "Remote track added");
                    sink.emit(PeerEvent::Track(info));
                })
            },
        ));
    }
}

#[async_trait]
impl PeerTransport for RtcPeer {
    async fn create_data_channel(
        &self,
        label: &str,
        mode: DataChannelMode,
    ) -> Result<Arc<dyn ChannelLink>> {
        let link =
            RtcChannelLink::new(&self.peer_connection, label, mode, self.events.clone()).await?;
        Ok(link)
    }

    async fn add_recvonly_video(&self, count: usize) -> Result<()> {
        for _ in 0..count {
            self.peer_connection
                .add_transceiver_from_kind(
                    RTPCodecType::Video,
                    Some(RTCRtpTransceiverInit {
                        direction: RTCRtpTransceiverDirection::Recvonly,
                        send_encodings: vec![],
                    }),
                )
                .await
                .map_err(|e| {
                    Error::PeerConnectionError(format!("Failed to add video transceiver: {}", e))
                })?;
        }
        debug!(robot_id = %self.robot_id, count, "Added receive-only video transceivers");
        Ok(())
    }

    async fn create_offer(&self) -> Result<String> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;

        self.peer_connection
            .set_local_description(offer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;

        let local_desc = self
            .peer_connection
            .local_description()
            .await
            .ok_or_else(|| {
                Error::SdpError("No local description after setting offer".to_string())
            })?;

        debug!("Created SDP offer for robot {}", self.robot_id);

        Ok(local_desc.sdp)
    }

    async fn set_remote_answer(&self, sdp: String) -> Result<()> {
        let answer = RTCSessionDescription::answer(sdp)
            .map_err(|e| Error::SdpError(format!("Failed to parse answer: {}", e)))?;

        self.peer_connection
            .set_remote_description(answer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };

        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::IceCandidateError(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn inbound_video_stats(&self) -> Result<Vec<InboundVideoStats>> {
        let report = self.peer_connection.get_stats().await;
        let streams: Vec<InboundVideoStats> = report
            .reports
            .into_values()
            .filter_map(|entry| match entry {
                StatsReportType::InboundRTP(stats) if stats.kind == "video" => {
                    Some(InboundVideoStats {
                        track_id: stats.track_identifier,
                        ssrc: stats.ssrc,
                        packets_received: stats.packets_received,
                        bytes_received: stats.bytes_received,
                        nack_count: stats.nack_count,
                        ..Default::default()
                    })
                }
                _ => None,
            })
            .collect();
        debug!(robot_id = %self.robot_id, streams = streams.len(), "Collected inbound video stats");
        Ok(streams)
    }

    async fn close(&self) -> Result<()> {
        info!("Closing peer connection for robot {}", self.robot_id);
        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::PeerConnectionError(format!("Failed to close peer: {}", e)))
    }
}
