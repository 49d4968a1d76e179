//! Connect to one robot and log what its connectors deliver
//!
//! # Usage
//!
//! ```bash
//! # GPS and point cloud from robot r1
//! cargo run --bin mosaic-connect -- \
//!   --signaling-url ws://localhost:8080/ws \
//!   --robot-id r1 \
//!   --connector gps=osm_gps_map \
//!   --connector lidar=lidar_pointcloud
//!
//! # Load the rest of the configuration from TOML
//! cargo run --bin mosaic-connect -- --config ./mosaic.toml --robot-id r1 --connector pose=ros_2d_map_pose
//! ```

use clap::Parser;
use mosaic_rtc::store::downcast_store;
use mosaic_rtc::{
    ChannelRequirement, Go2LowStateStore, GpsStore, Mosaic, MosaicConfig, MosaicStore,
    PointCloudStore, Pose2DStore, RobotConfig, RobotConnector, TurnServerConfig, TurtlesimStore,
    WsSignalingClient,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Mosaic robot connector client
///
/// Opens one WebRTC peer connection to a robot through the signaling relay
/// and logs the records decoded on each requested connector.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (TOML); command line values override it
    #[arg(long, env = "MOSAIC_CONFIG")]
    config: Option<PathBuf>,

    /// WebSocket signaling URL
    #[arg(long, env = "MOSAIC_SIGNALING_URL")]
    signaling_url: Option<String>,

    /// Robot to connect to
    #[arg(long, env = "MOSAIC_ROBOT_ID")]
    robot_id: String,

    /// Display name of the robot
    #[arg(long, default_value = "robot")]
    robot_name: String,

    /// Connector to request, as connector_id=data_type (repeatable)
    #[arg(long = "connector", value_parser = parse_connector, required = true)]
    connectors: Vec<(String, String)>,

    /// STUN servers (comma-separated)
    #[arg(long, value_delimiter = ',', env = "MOSAIC_STUN_SERVERS")]
    stun_servers: Vec<String>,

    /// TURN servers (format: turn:host:port:username:password, comma-separated)
    #[arg(long, value_delimiter = ',', env = "MOSAIC_TURN_SERVERS")]
    turn_servers: Vec<String>,

    /// Interval between status reports in seconds
    #[arg(long, default_value_t = 5, env = "MOSAIC_REPORT_INTERVAL")]
    report_interval_secs: u64,
}

/// Parse `connector_id=data_type`
fn parse_connector(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((id, data_type)) if !id.is_empty() && !data_type.is_empty() => {
            Ok((id.to_string(), data_type.to_string()))
        }
        _ => Err(format!(
            "Invalid connector '{}'. Expected: connector_id=data_type",
            s
        )),
    }
}

/// Parse TURN server string (format: turn:host:port:username:password or turns:host:port:username:password)
fn parse_turn_server(s: &str) -> Result<TurnServerConfig, String> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() < 5 {
        return Err(format!(
            "Invalid TURN server format: '{}'. Expected: turn:host:port:username:password",
            s
        ));
    }

    let protocol = parts[0];
    if protocol != "turn" && protocol != "turns" {
        return Err(format!(
            "Invalid TURN protocol: '{}'. Expected 'turn' or 'turns'",
            protocol
        ));
    }

    Ok(TurnServerConfig {
        url: format!("{}:{}:{}", protocol, parts[1], parts[2]),
        username: parts[3].to_string(),
        // Password may contain colons
        credential: parts[4..].join(":"),
    })
}

fn build_config(args: &Args) -> anyhow::Result<MosaicConfig> {
    let mut config = match &args.config {
        Some(path) => MosaicConfig::from_file(path)?,
        None => MosaicConfig::default(),
    };

    if let Some(url) = &args.signaling_url {
        config.signaling_url = url.clone();
    }
    if !args.stun_servers.is_empty() {
        config.stun_servers = args.stun_servers.clone();
    }
    if !args.turn_servers.is_empty() {
        config.turn_servers = args
            .turn_servers
            .iter()
            .map(|s| parse_turn_server(s))
            .collect::<Result<_, _>>()
            .map_err(anyhow::Error::msg)?;
    }

    config.validate()?;
    Ok(config)
}

/// One-line summary of a store's newest record
fn describe(store: &Arc<dyn MosaicStore>) -> String {
    let store = Arc::clone(store);
    if let Some(gps) = downcast_store::<GpsStore>(Arc::clone(&store)) {
        return format!("{:?}", gps.latest());
    }
    if let Some(pose) = downcast_store::<Pose2DStore>(Arc::clone(&store)) {
        return format!("{:?}", pose.latest());
    }
    if let Some(turtle) = downcast_store::<TurtlesimStore>(Arc::clone(&store)) {
        return format!("{:?}", turtle.latest());
    }
    if let Some(state) = downcast_store::<Go2LowStateStore>(Arc::clone(&store)) {
        return format!("{} records", state.len());
    }
    if let Some(cloud) = downcast_store::<PointCloudStore>(store) {
        return format!(
            "{} clouds, {:.1} fps, {} partial",
            cloud.len(),
            cloud.fps(),
            cloud.pending_messages()
        );
    }
    "-".to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = Args::parse();
    let config = build_config(&args)?;

    info!(
        signaling_url = %config.signaling_url,
        robot_id = %args.robot_id,
        connectors = args.connectors.len(),
        stun_servers = config.stun_servers.len(),
        turn_servers = config.turn_servers.len(),
        "Configuration loaded"
    );

    let signaling = Arc::new(WsSignalingClient::new(&config.signaling_url));
    let mosaic = Mosaic::with_webrtc(config, signaling.clone())?;
    signaling
        .connect(mosaic.connections().signaling_sink())
        .await?;
    mosaic.set_ws_connected(true);

    let robot = args
        .connectors
        .iter()
        .fold(RobotConfig::new(&args.robot_id, &args.robot_name), |robot, (id, data_type)| {
            robot.with_connector(id, data_type)
        });
    mosaic.update_robot_info(robot);

    let mut stores = Vec::new();
    for (connector_id, _) in &args.connectors {
        let connector = RobotConnector::try_new(&args.robot_id, connector_id)?;
        let store = mosaic.get_or_create_store(&connector)?;
        mosaic
            .add_channel_requirement(ChannelRequirement::for_store(Arc::clone(&store)))
            .await?;
        stores.push(store);
    }

    let event_loop = mosaic.connections().spawn();
    let mut state_changes = mosaic.connections().subscribe_state();
    tokio::spawn(async move {
        while let Ok(change) = state_changes.recv().await {
            info!(robot_id = %change.robot_id, state = %change.state, "Connection state");
        }
    });

    mosaic.create_connection(&args.robot_id).await?;

    let mut report = tokio::time::interval(Duration::from_secs(args.report_interval_secs.max(1)));
    info!("Connected. Press Ctrl+C to shutdown.");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = report.tick() => {
                if !signaling.is_connected() {
                    warn!("Signaling connection lost");
                    mosaic.set_ws_connected(false);
                }
                for store in &stores {
                    info!(
                        connector = %store.connector(),
                        data_type = %store.data_type(),
                        connected = store.is_connected(),
                        latest = %describe(store),
                        "Store status"
                    );
                }
            }
        }
    }

    info!("Shutdown signal received, cleaning up...");
    mosaic.connections().disconnect_all().await;
    event_loop.abort();
    info!("Disconnected");

    Ok(())
}

fn init_tracing() {
    // Initialize tracing with EnvFilter for RUST_LOG support
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,mosaic_rtc=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
