//! Configuration module - environment variable parsing

pub mod tuning;

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::util::time::{FRAME_RATE, SEND_RATE};

pub use tuning::Tuning;

/// Relay server configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Maximum actors per room
    pub max_players_per_room: usize,
    /// Inbound messages per second per connection
    pub connection_rate_limit: u32,
    /// Allowed client origins for CORS (comma-separated, `*` for any)
    pub client_origin: String,
}

impl RelayConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            max_players_per_room: parse_or("MAX_PLAYERS_PER_ROOM", 4)?,
            connection_rate_limit: parse_or(
                "CONNECTION_RATE_LIMIT",
                crate::util::rate_limit::CONNECTION_RATE_LIMIT,
            )?,
            client_origin: env::var("CLIENT_ORIGIN").unwrap_or_else(|_| "*".to_string()),
        })
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            log_level: "info".to_string(),
            max_players_per_room: 4,
            connection_rate_limit: crate::util::rate_limit::CONNECTION_RATE_LIMIT,
            client_origin: "*".to_string(),
        }
    }
}

/// Headless peer configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct PeerConfig {
    /// Relay WebSocket endpoint
    pub relay_url: String,
    /// Room to join
    pub room_name: String,
    /// Nickname announced on join
    pub nickname: String,
    /// Log level
    pub log_level: String,
    /// Frames per second of the local loop
    pub frame_rate: u32,
    /// Movement snapshots per second
    pub send_rate: u32,
    /// Seed for scripted input
    pub bot_seed: u64,
    /// Start the countdown automatically when master and this many actors are present
    pub auto_start_players: usize,
    /// Gameplay tuning
    pub tuning: Tuning,
}

impl PeerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut tuning = Tuning::default();
        tuning.pool.pool_size = parse_or("POOL_SIZE", tuning.pool.pool_size)?;

        let frame_rate: u32 = parse_or("FRAME_RATE", FRAME_RATE)?;
        let send_rate: u32 = parse_or("SEND_RATE", SEND_RATE)?;
        if frame_rate == 0 || send_rate == 0 || send_rate > frame_rate {
            return Err(ConfigError::Invalid("SEND_RATE"));
        }

        Ok(Self {
            relay_url: env::var("RELAY_URL").unwrap_or_else(|_| "ws://127.0.0.1:8080/ws".to_string()),
            room_name: env::var("ROOM_NAME").unwrap_or_else(|_| "arena".to_string()),
            nickname: env::var("NICKNAME")
                .unwrap_or_else(|_| format!("Bot_{}", rand::random::<u16>() % 10_000)),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            frame_rate,
            send_rate,
            bot_seed: parse_or("BOT_SEED", rand::random::<u64>())?,
            auto_start_players: parse_or("AUTO_START_PLAYERS", 2)?,
            tuning,
        })
    }
}

fn parse_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
