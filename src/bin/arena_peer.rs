//! Arena Peer - headless participant for soak tests and demos
//!
//! Connects to a relay, joins a room and plays one scripted player until
//! interrupted, then leaves the room cleanly.

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use arena_sync::config::PeerConfig;
use arena_sync::peer::{run_peer, BotPilot, Peer, RunOptions, WsTransport};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = PeerConfig::from_env()?;
    init_tracing(&config.log_level);

    info!(
        relay = %config.relay_url,
        room = %config.room_name,
        nickname = %config.nickname,
        seed = config.bot_seed,
        "Starting Arena Peer"
    );

    let transport = WsTransport::connect(&config.relay_url).await?;
    let peer = Peer::new(config.nickname.clone(), config.tuning.clone(), config.bot_seed);
    let pilot = BotPilot::new(config.bot_seed);
    let options = RunOptions {
        room: config.room_name.clone(),
        frame_rate: config.frame_rate,
        send_rate: config.send_rate,
        auto_start_players: config.auto_start_players,
        character_index: Some((config.bot_seed % 4) as usize),
    };

    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, leaving room");
    };

    let summary = run_peer(peer, transport, pilot, options, shutdown).await?;
    info!(
        frames = summary.frames,
        sent = summary.messages_sent,
        dropped = summary.messages_dropped,
        movement_received = summary.movement.received,
        movement_stale = summary.movement.dropped_stale,
        confirmed_leave = summary.confirmed_leave,
        "Peer finished"
    );
    Ok(())
}

fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}
