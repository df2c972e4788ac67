use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use frame_sync_client::client::{ReceiveError, ReconciliationEngine};
use frame_sync_client::config::ClientConfig;
use frame_sync_client::game::map::MapState;
use frame_sync_client::metrics::ClientMetrics;
use frame_sync_client::net::packet_queue::PacketQueue;
use frame_sync_client::net::transport::{self, AckSender};

fn load_map(config: &ClientConfig) -> anyhow::Result<MapState> {
    match &config.map_file {
        Some(path) => {
            let json = std::fs::read_to_string(path)?;
            let map = MapState::from_json(&json)?;
            info!(
                "Map loaded from {}: {} sectors, {} sides, {} polyobjs",
                path,
                map.sectors.len(),
                map.sides.len(),
                map.polyobjs.len()
            );
            Ok(map)
        }
        None => {
            warn!("No MAP_FILE set, running with an empty map");
            Ok(MapState::default())
        }
    }
}

/// Feed every queued packet to the engine; a desync ends the session
fn process_packets(
    engine: &mut ReconciliationEngine,
    queue: &PacketQueue,
    acks: &AckSender,
    metrics: &ClientMetrics,
) -> Result<(), ReceiveError> {
    for packet in queue.drain() {
        if !packet.kind.is_frame() {
            debug!("Ignoring {:?} packet from server", packet.kind);
            continue;
        }

        let start = Instant::now();
        match engine.receive_frame(packet.kind, &packet.payload) {
            Ok(report) => {
                metrics.record_decode_time(start.elapsed());
                metrics.record_frame(&report);
                if let Some(ack) = report.ack {
                    acks.send(ack);
                }
            }
            Err(e @ ReceiveError::Desync { .. }) => {
                metrics.record_desync();
                return Err(e);
            }
            Err(e) => warn!("Dropping packet: {}", e),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("Frame Sync Client v{}", env!("CARGO_PKG_VERSION"));

    let config = ClientConfig::load_or_default();
    config.validate()?;
    info!(
        "Configuration loaded: server {}, console player {}, {} Hz",
        config.server_address, config.console_player, config.tick_rate
    );

    let metrics = Arc::new(ClientMetrics::new());

    #[cfg(feature = "metrics_server")]
    {
        if config.metrics_enabled() {
            let metrics = metrics.clone();
            let port = config.metrics_port;
            tokio::spawn(async move {
                let server = frame_sync_client::metrics::start_metrics_server(metrics, port);
                if let Err(e) = server.await {
                    error!("Metrics server error: {}", e);
                }
            });
        }
    }

    let map = load_map(&config)?;
    let socket = transport::connect(config.bind_address, config.server_address).await?;

    let queue = PacketQueue::new(config.packet_queue_capacity);
    let receiver = tokio::spawn(transport::run_receiver(
        socket.clone(),
        queue.sender(),
        metrics.clone(),
    ));
    let (acks, ack_rx) = transport::ack_channel();
    let sender = tokio::spawn(transport::run_ack_sender(socket, ack_rx, metrics.clone()));

    let mut engine = ReconciliationEngine::new(config.engine_config(), map);
    let mut interval =
        tokio::time::interval(Duration::from_micros(1_000_000 / u64::from(config.tick_rate)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = process_packets(&mut engine, &queue, &acks, &metrics) {
                    error!("Dropping connection: {}", e);
                    break;
                }
                engine.run_tick();
                let expired = engine.expire_mobjs(engine.clock_ms());
                if expired > 0 {
                    debug!("Expired {} client mobjs", expired);
                }
                metrics
                    .client_mobjs
                    .store(engine.mobjs().len() as u64, Ordering::Relaxed);
            }
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!("Failed to listen for shutdown signal: {}", e);
                }
                info!("Shutdown signal received");
                break;
            }
        }
    }

    receiver.abort();
    drop(acks);
    if let Ok(Err(e)) = sender.await {
        warn!("Ack sender stopped with error: {}", e);
    }
    info!("Client stopped");

    Ok(())
}
