//! Loopback demo: one client moves an owned entity in a circle, a second
//! client renders it through a jittery, reordering link.
//!
//! Spawn and chat go straight into the receiver's inbox, standing in for a
//! reliable ordered stream; only position updates take the lossy datagram
//! link, so none of them can overtake the spawn they refer to.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use netsync::config::SyncConfig;
use netsync::metrics::Metrics;
use netsync::net::dispatch::{Dispatcher, SyncEvent};
use netsync::net::inbox::{Inbox, InboxError, InboxSender};
use netsync::net::protocol::{now_millis, ChatMessageType, ComponentMap};
use netsync::sync::state_buffer::Pose;
use netsync::util::quat::Quat;
use netsync::util::vec3::Vec3;

/// Render tick of both clients
const FRAME: Duration = Duration::from_millis(16);

/// Simulated one-way latency range in milliseconds
const LATENCY_MS: std::ops::Range<u64> = 20..90;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("netsync demo v{}", env!("CARGO_PKG_VERSION"));

    let config = SyncConfig::load_or_default();
    config.validate().map_err(anyhow::Error::msg)?;
    info!(
        "Configuration loaded: capacity={}, rate={}Hz, interpolate={}, render_delay={}ms",
        config.buffer_capacity, config.sync_rate_hz, config.interpolate, config.render_delay_ms
    );

    let metrics = Arc::new(Metrics::new());

    #[cfg(feature = "metrics_server")]
    if let Some(port) = config.metrics_port {
        let metrics_clone = metrics.clone();
        tokio::spawn(async move {
            if let Err(e) = netsync::metrics::start_metrics_server(metrics_clone, port).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    let inbox = Inbox::with_metrics(config.inbox_capacity, metrics.clone());
    let (link_tx, link_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    tokio::spawn(run_link(link_rx, inbox.sender()));

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    };

    tokio::select! {
        result = run_clients(config, metrics.clone(), inbox, link_tx) => {
            if let Err(e) = result {
                error!("Demo error: {}", e);
            }
        }
        _ = shutdown => {
            info!("Shutting down...");
        }
    }

    info!("Final metrics: {}", metrics.to_json());
    Ok(())
}

/// Deliver every buffer after a random delay, so later sends can overtake
/// earlier ones
async fn run_link(mut link_rx: mpsc::UnboundedReceiver<Vec<u8>>, inbox: InboxSender) {
    while let Some(bytes) = link_rx.recv().await {
        let delay = rand::thread_rng().gen_range(LATENCY_MS);
        let inbox = inbox.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            match inbox.try_send(bytes) {
                Ok(()) => {}
                Err(InboxError::Full) => warn!("Inbox full, message dropped"),
                Err(InboxError::Disconnected) => debug!("Receiver gone"),
            }
        });
    }
}

async fn run_clients(
    config: SyncConfig,
    metrics: Arc<Metrics>,
    inbox: Inbox,
    link: mpsc::UnboundedSender<Vec<u8>>,
) -> anyhow::Result<()> {
    let render_delay = config.render_delay_ms;
    let mut sender = Dispatcher::new("alice", config.clone(), Arc::new(Metrics::new()));
    let mut receiver = Dispatcher::new("bob", config, metrics);

    let start = now_millis();
    let (entity_id, spawn) =
        sender.create_local_entity("avatar", circle_pose(0.0), ComponentMap::new(), start)?;
    let reliable = inbox.sender();
    reliable.try_send(spawn)?;
    reliable.try_send(sender.chat("hello from alice", ChatMessageType::Normal)?)?;

    let mut ticker = tokio::time::interval(FRAME);
    let mut frame: u64 = 0;
    loop {
        ticker.tick().await;
        frame += 1;
        let now = now_millis();

        let elapsed = now.saturating_sub(start) as f32 / 1000.0;
        if let Some(bytes) = sender.sync_local(&entity_id, circle_pose(elapsed), now)? {
            link.send(bytes)?;
        }

        for event in receiver.drain_inbox(&inbox) {
            match event {
                SyncEvent::EntitySpawned { entity_id, template_id, owner_id, .. } => {
                    info!("bob sees {} ({}) owned by {}", entity_id, template_id, owner_id)
                }
                SyncEvent::Chat(chat) => info!("[{}] {}", chat.from_client_id, chat.message),
                other => debug!("event: {:?}", other),
            }
        }

        if frame % 60 == 0 {
            let render_time = now.saturating_sub(render_delay);
            for (id, pose) in receiver.remote_poses(render_time) {
                let truth = circle_pose(render_time.saturating_sub(start) as f32 / 1000.0);
                info!(
                    "{} at ({:.2}, {:.2}, {:.2}), error {:.3}",
                    id,
                    pose.position.x,
                    pose.position.y,
                    pose.position.z,
                    pose.position.distance_to(truth.position)
                );
            }
        }
    }
}

/// Pose on a 5 m circle, one lap every 8 seconds, facing along the path
fn circle_pose(seconds: f32) -> Pose {
    let angle = seconds * std::f32::consts::TAU / 8.0;
    Pose::new(
        Vec3::new(angle.cos() * 5.0, 0.0, angle.sin() * 5.0),
        Quat::from_yaw(-angle),
    )
}
