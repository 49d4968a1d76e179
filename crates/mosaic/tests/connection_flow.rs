//! End-to-end connection flows against in-memory peers

mod common;

use chrono::Utc;
use common::{candidate, Harness};
use mosaic_rtc::channel::ChannelType;
use mosaic_rtc::config::DataChannelMode;
use mosaic_rtc::parser::pointcloud::{chunk_payload, Header, PointCloud2, PointField};
use mosaic_rtc::parser::{VideoRecordingCommand, VideoRecordingCommandType};
use mosaic_rtc::peer::{ChannelLink, InboundVideoStats, MediaKind, MediaStreamInfo, PeerEvent, PeerState};
use mosaic_rtc::store::{ReceivableStore, SendOutcome};
use mosaic_rtc::{
    ChannelRequirement, ConnectionState, GpsStore, MosaicConfig, Payload, PointCloudStore,
    MosaicStore, RobotConfig, RobotConnector, SignalingMessage, VideoRecorderStore, VideoStore,
};
use prost::Message;
use std::sync::Arc;

fn rover() -> RobotConfig {
    RobotConfig::new("r1", "Rover")
        .with_connector("gps", "osm_gps_map")
        .with_connector("pose", "ros_2d_map_pose")
        .with_connector("lidar", "lidar_pointcloud")
        .with_connector("rec", "video_recorder")
        .with_connector("front", "video_stream")
}

fn gps_json(latitude: f64, longitude: f64) -> Payload {
    Payload::text(format!(
        r#"{{"latitude":{},"longitude":{}}}"#,
        latitude, longitude
    ))
}

async fn connected_gps(harness: &Harness) -> Arc<GpsStore> {
    let gps: Arc<GpsStore> = harness
        .mosaic
        .get_or_create_typed(&RobotConnector::new("r1", "gps"))
        .unwrap();
    harness
        .mosaic
        .add_channel_requirement(ChannelRequirement::for_store(gps.clone()))
        .await
        .unwrap();
    harness.mosaic.create_connection("r1").await.unwrap();

    let peer = harness.peers.last_peer();
    peer.open_all();
    peer.connect();
    harness.pump().await;
    gps
}

#[tokio::test]
async fn test_gps_record_reaches_store() {
    let harness = Harness::new(rover());
    let gps = connected_gps(&harness).await;

    let peer = harness.peers.last_peer();
    assert_eq!(peer.labels(), vec!["r1:gps".to_string()]);
    assert_eq!(peer.link("r1:gps").unwrap().mode(), DataChannelMode::Reliable);
    assert_eq!(harness.signaling.count("send_sdp_offer"), 1);

    let connection = harness.mosaic.connections().get_connection("r1").await.unwrap();
    assert_eq!(connection.state(), ConnectionState::Connected);
    assert!(gps.is_channel_connected(Some("r1:gps")));

    peer.message("r1:gps", gps_json(37.5, 127.0));
    harness.pump().await;

    let latest = gps.latest().unwrap();
    assert_eq!(latest.latitude, 37.5);
    assert_eq!(latest.longitude, 127.0);
    let age = Utc::now() - latest.timestamp;
    assert!(age.num_seconds().abs() < 5);
}

#[tokio::test]
async fn test_missing_longitude_leaves_history_unchanged() {
    let harness = Harness::new(rover());
    let gps = connected_gps(&harness).await;
    let peer = harness.peers.last_peer();

    peer.message("r1:gps", gps_json(1.0, 2.0));
    peer.message("r1:gps", Payload::text(r#"{"latitude": 1.0}"#));
    peer.message("r1:gps", Payload::text(r#"{"latitude": 1.0, "longitude": "east"}"#));
    peer.message("r1:gps", Payload::text("not json"));
    harness.pump().await;

    assert_eq!(gps.len(), 1);
    assert_eq!(gps.decode_failures(), 3);
    assert_eq!(
        harness.mosaic.connections().get_connection("r1").await.unwrap().state(),
        ConnectionState::Connected
    );
}

#[tokio::test]
async fn test_disconnect_detaches_before_close_completes() {
    let harness = Harness::new(rover());
    let gps = connected_gps(&harness).await;
    let peer = harness.peers.last_peer();
    peer.message("r1:gps", gps_json(10.0, 20.0));
    harness.pump().await;

    let connection = harness.mosaic.connections().get_connection("r1").await.unwrap();
    assert!(connection.begin_disconnect());
    assert!(!gps.is_channel_connected(None));
    assert!(!gps.has_any_connected_channel());
    assert!(harness.mosaic.channels().get_all_active_channels("r1").is_empty());

    // Still in flight from the native side
    peer.message("r1:gps", gps_json(11.0, 21.0));
    harness.pump().await;
    assert_eq!(gps.len(), 1);

    harness.mosaic.disconnect_connection("r1").await.unwrap();
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert!(peer.is_closed());
    assert_eq!(harness.signaling.count("send_close_peer_connection"), 1);
    assert_eq!(gps.latest().unwrap().latitude, 10.0);
    assert!(harness.mosaic.connections().get_connection("r1").await.is_none());
}

#[tokio::test]
async fn test_ice_before_answer_is_queued_in_order() {
    let harness = Harness::new(rover());
    connected_gps(&harness).await;
    let peer = harness.peers.last_peer();

    for n in 1..=2 {
        harness.deliver(SignalingMessage::ReceiveIceCandidate {
            user_id: None,
            robot_id: "r1".to_string(),
            ice_candidate: candidate(n),
        });
    }
    // Addressed to another robot
    harness.deliver(SignalingMessage::ReceiveIceCandidate {
        user_id: None,
        robot_id: "r2".to_string(),
        ice_candidate: candidate(9),
    });
    harness.pump().await;

    let connection = harness.mosaic.connections().get_connection("r1").await.unwrap();
    assert!(peer.candidates().is_empty());
    assert_eq!(connection.pending_ice_candidates(), 2);

    harness.deliver(SignalingMessage::ReceiveSdpAnswer {
        user_id: Some("u1".to_string()),
        robot_id: "r1".to_string(),
        sdp_answer: "v=0 answer".to_string(),
    });
    harness.deliver(SignalingMessage::ReceiveIceCandidate {
        user_id: None,
        robot_id: "r1".to_string(),
        ice_candidate: candidate(3),
    });
    harness.pump().await;

    assert_eq!(peer.answers(), vec!["v=0 answer".to_string()]);
    assert_eq!(peer.candidates(), vec![candidate(1), candidate(2), candidate(3)]);
    assert_eq!(connection.pending_ice_candidates(), 0);
}

#[tokio::test]
async fn test_local_candidates_relayed_one_per_message() {
    let harness = Harness::new(rover());
    connected_gps(&harness).await;
    let peer = harness.peers.last_peer();

    peer.emit(PeerEvent::IceCandidate(candidate(1)));
    peer.emit(PeerEvent::IceCandidate(candidate(2)));
    harness.pump().await;

    let relayed: Vec<_> = harness
        .signaling
        .messages()
        .into_iter()
        .filter_map(|m| match m {
            SignalingMessage::SendIceCandidate {
                robot_id,
                ice_candidate,
            } => Some((robot_id, ice_candidate)),
            _ => None,
        })
        .collect();
    assert_eq!(
        relayed,
        vec![
            ("r1".to_string(), candidate(1)),
            ("r1".to_string(), candidate(2))
        ]
    );
}

#[tokio::test]
async fn test_new_requirement_reuses_peer() {
    let harness = Harness::new(rover());
    connected_gps(&harness).await;
    let peer = harness.peers.last_peer();

    // Another data connector: new channel, no new offer
    let pose = harness
        .mosaic
        .get_or_create_store(&RobotConnector::new("r1", "pose"))
        .unwrap();
    assert!(harness
        .mosaic
        .add_channel_requirement(ChannelRequirement::for_store(pose))
        .await
        .unwrap());
    assert_eq!(harness.peers.peer_count(), 1);
    assert_eq!(peer.labels(), vec!["r1:gps".to_string(), "r1:pose".to_string()]);
    assert_eq!(peer.offers(), 1);

    // Video needs a transceiver, hence a new offer
    let front: Arc<VideoStore> = harness
        .mosaic
        .get_or_create_typed(&RobotConnector::new("r1", "front"))
        .unwrap();
    harness
        .mosaic
        .add_channel_requirement(ChannelRequirement::for_store(front.clone()))
        .await
        .unwrap();
    assert_eq!(peer.video_transceivers(), 1);
    assert_eq!(peer.offers(), 2);
    assert_eq!(harness.signaling.count("send_sdp_offer"), 2);

    peer.emit(PeerEvent::Track(MediaStreamInfo {
        stream_id: "front".to_string(),
        track_id: "video0".to_string(),
        kind: MediaKind::Video,
    }));
    harness.pump().await;

    assert!(front.is_active());
    let channel = harness
        .mosaic
        .channels()
        .get_active_channel(&RobotConnector::new("r1", "front"))
        .unwrap();
    assert_eq!(channel.channel_type, ChannelType::Media);
    assert_eq!(channel.media.unwrap().track_id, "video0");

    // Same requirements again: nothing changes
    harness.mosaic.create_connection("r1").await.unwrap();
    assert_eq!(harness.peers.peer_count(), 1);
    assert_eq!(peer.offers(), 2);
}

#[tokio::test]
async fn test_queued_command_flushed_when_channel_opens() {
    let harness = Harness::new(rover());
    let recorder: Arc<VideoRecorderStore> = harness
        .mosaic
        .get_or_create_typed(&RobotConnector::new("r1", "rec"))
        .unwrap();
    harness
        .mosaic
        .add_channel_requirement(ChannelRequirement::for_store(recorder.clone()))
        .await
        .unwrap();
    harness.mosaic.create_connection("r1").await.unwrap();

    let outcome = recorder.send(VideoRecordingCommand::now(VideoRecordingCommandType::Start));
    assert_eq!(outcome, SendOutcome::Queued);

    let peer = harness.peers.last_peer();
    peer.open_all();
    harness.pump().await;

    let sent = peer.link("r1:rec").unwrap().sent();
    assert_eq!(sent.len(), 1);
    let json: serde_json::Value = serde_json::from_str(sent[0].as_text().unwrap()).unwrap();
    assert_eq!(json["command"], "start");
    assert_eq!(recorder.pending(), 0);
}

#[tokio::test]
async fn test_peer_failure_then_reconnect_reuses_store() {
    let mut config = MosaicConfig::default();
    config.reconnection.backoff_initial_ms = 1;
    config.reconnection.backoff_max_ms = 5;
    let harness = Harness::with_config(config, rover());
    let mut states = harness.mosaic.connections().subscribe_state();

    let gps = connected_gps(&harness).await;
    let first = harness.peers.last_peer();
    first.message("r1:gps", gps_json(1.0, 1.0));
    first.emit(PeerEvent::StateChanged(PeerState::Failed));
    harness.pump().await;

    let connection = harness.mosaic.connections().get_connection("r1").await.unwrap();
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert!(!gps.has_any_connected_channel());

    let mut seen = Vec::new();
    while let Ok(change) = states.try_recv() {
        seen.push(change.state);
    }
    assert_eq!(
        seen,
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Failed,
            ConnectionState::Disconnected
        ]
    );

    let replacement = harness.mosaic.reconnect("r1").await.unwrap();
    assert_ne!(replacement.generation(), connection.generation());
    assert_eq!(harness.peers.peer_count(), 2);
    assert_eq!(harness.mosaic.connections().reconnect_attempts("r1"), 1);

    // Late event from the failed attempt
    first.message("r1:gps", gps_json(9.0, 9.0));
    let second = harness.peers.last_peer();
    second.open_all();
    second.connect();
    second.message("r1:gps", gps_json(2.0, 2.0));
    harness.pump().await;

    assert_eq!(replacement.state(), ConnectionState::Connected);
    assert_eq!(harness.mosaic.connections().reconnect_attempts("r1"), 0);
    let latitudes: Vec<f64> = gps.snapshot().iter().map(|g| g.latitude).collect();
    assert_eq!(latitudes, vec![1.0, 2.0]);
}

#[tokio::test]
async fn test_peer_failure_releases_native_side() {
    let harness = Harness::new(rover());
    let gps = connected_gps(&harness).await;
    let peer = harness.peers.last_peer();
    let connection = harness.mosaic.connections().get_connection("r1").await.unwrap();

    peer.emit(PeerEvent::StateChanged(PeerState::Failed));
    harness.pump().await;

    assert!(peer.is_closed());
    assert!(!peer.link("r1:gps").unwrap().is_open());
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert_eq!(connection.pending_ice_candidates(), 0);
    assert_eq!(harness.signaling.count("send_close_peer_connection"), 1);
    assert!(!gps.has_any_connected_channel());

    // Bindings survive for the next attempt
    let requirements = connection.requirements();
    assert_eq!(requirements.len(), 1);
    assert_eq!(requirements[0].connector().serialize(), "r1:gps");
    assert_eq!(connection.data_channel_labels(), vec!["r1:gps".to_string()]);

    // The next attempt replaces it with the same channel
    harness.mosaic.create_connection("r1").await.unwrap();
    assert_eq!(harness.peers.peer_count(), 2);
    assert_eq!(harness.peers.last_peer().labels(), vec!["r1:gps".to_string()]);
}

#[tokio::test]
async fn test_peer_creation_failure_reports_failed() {
    let harness = Harness::new(rover());
    harness.peers.refuse_peers(true);
    let gps: Arc<GpsStore> = harness
        .mosaic
        .get_or_create_typed(&RobotConnector::new("r1", "gps"))
        .unwrap();
    harness
        .mosaic
        .add_channel_requirement(ChannelRequirement::for_store(gps.clone()))
        .await
        .unwrap();

    let connection = harness.mosaic.create_connection("r1").await.unwrap();
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert_eq!(connection.requirements().len(), 1);
    assert!(!gps.is_connected());
    assert_eq!(harness.peers.peer_count(), 0);
    assert_eq!(harness.signaling.count("send_sdp_offer"), 0);

    // A later attempt replaces the failed one and keeps the requirement
    harness.peers.refuse_peers(false);
    let retry = harness.mosaic.create_connection("r1").await.unwrap();
    assert_eq!(retry.state(), ConnectionState::Connecting);
    assert_eq!(harness.peers.last_peer().labels(), vec!["r1:gps".to_string()]);
}

fn cloud_bytes(points: &[[f32; 4]]) -> Vec<u8> {
    let fields = ["x", "y", "z", "intensity"]
        .iter()
        .enumerate()
        .map(|(i, name)| PointField {
            name: name.to_string(),
            offset: (i * 4) as u32,
            datatype: 7,
            count: 1,
        })
        .collect();
    PointCloud2 {
        header: Some(Header {
            stamp: 1.0,
            frame_id: "lidar".to_string(),
        }),
        height: 1,
        width: points.len() as u32,
        fields,
        is_bigendian: false,
        point_step: 16,
        row_step: 16 * points.len() as u32,
        data: points
            .iter()
            .flat_map(|p| p.iter().flat_map(|v| v.to_le_bytes()))
            .collect(),
        is_dense: true,
    }
    .encode_to_vec()
}

#[tokio::test]
async fn test_point_cloud_chunks_in_any_order() {
    let harness = Harness::new(rover());
    let lidar: Arc<PointCloudStore> = harness
        .mosaic
        .get_or_create_typed(&RobotConnector::new("r1", "lidar"))
        .unwrap();
    harness
        .mosaic
        .add_channel_requirement(ChannelRequirement::for_store(lidar.clone()))
        .await
        .unwrap();
    harness.mosaic.create_connection("r1").await.unwrap();
    let peer = harness.peers.last_peer();
    peer.open_all();
    peer.connect();

    let points = [[1.0, 2.0, 3.0, 0.5], [4.0, 5.0, 6.0, 0.25], [7.0, 8.0, 9.0, 1.0]];
    let mut chunks = chunk_payload("scan-1", &cloud_bytes(&points), 20, 0);
    assert!(chunks.len() > 2);
    chunks.reverse();
    for chunk in chunks {
        peer.message("r1:lidar", Payload::binary(chunk.encode_to_vec()));
    }
    harness.pump().await;

    let cloud = lidar.latest().unwrap();
    assert_eq!(cloud.message_id, "scan-1");
    assert_eq!(cloud.points.len(), 3);
    assert_eq!(cloud.points[1].y, 5.0);
    assert_eq!(lidar.pending_messages(), 0);
}

#[tokio::test]
async fn test_removed_lidar_channel_drops_partial_scan() {
    let harness = Harness::new(rover());
    let lidar: Arc<PointCloudStore> = harness
        .mosaic
        .get_or_create_typed(&RobotConnector::new("r1", "lidar"))
        .unwrap();
    let requirement = ChannelRequirement::for_store(lidar.clone());
    harness
        .mosaic
        .add_channel_requirement(requirement.clone())
        .await
        .unwrap();
    harness.mosaic.create_connection("r1").await.unwrap();
    let peer = harness.peers.last_peer();
    peer.open_all();
    peer.connect();

    let chunks = chunk_payload("scan-1", &cloud_bytes(&[[1.0, 2.0, 3.0, 0.5]]), 20, 0);
    peer.message("r1:lidar", Payload::binary(chunks[0].encode_to_vec()));
    harness.pump().await;
    assert_eq!(lidar.pending_messages(), 1);

    assert!(harness.mosaic.remove_channel_requirement(&requirement).await);
    assert_eq!(lidar.pending_messages(), 0);
    assert!(lidar.is_empty());
}

#[tokio::test]
async fn test_attached_video_reports_stream_stats() {
    let harness = Harness::new(rover());
    let front: Arc<VideoStore> = harness
        .mosaic
        .get_or_create_typed(&RobotConnector::new("r1", "front"))
        .unwrap();
    harness
        .mosaic
        .add_channel_requirement(ChannelRequirement::for_store(front.clone()))
        .await
        .unwrap();
    harness.mosaic.create_connection("r1").await.unwrap();
    let peer = harness.peers.last_peer();
    peer.connect();
    assert!(front.sample_stats().await.is_none());

    peer.emit(PeerEvent::Track(MediaStreamInfo {
        stream_id: "front".to_string(),
        track_id: "video0".to_string(),
        kind: MediaKind::Video,
    }));
    harness.pump().await;
    assert!(front.is_sampling());

    let mut updates = front.subscribe_stream_stats();
    peer.set_video_stats(vec![InboundVideoStats {
        track_id: "video0".to_string(),
        ssrc: 1234,
        packets_received: 90,
        bytes_received: 120_000,
        nack_count: 2,
        ..Default::default()
    }]);
    let stats = front.sample_stats().await.unwrap();
    assert_eq!(stats.stream_id, "front");
    assert_eq!(stats.packets_received, 90);
    assert_eq!(stats.nack_count, 2);
    assert_eq!(updates.recv().await.unwrap().bytes_received, 120_000);

    // Tearing the connection down stops sampling
    harness.mosaic.disconnect_connection("r1").await.unwrap();
    assert!(!front.is_sampling());
    assert!(front.sample_stats().await.is_none());
}
