//! Application state shared across routes

use std::sync::Arc;

use crate::config::RelayConfig;
use crate::relay::RoomRegistry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RelayConfig>,
    pub registry: Arc<RoomRegistry>,
}

impl AppState {
    pub fn new(config: RelayConfig) -> Self {
        let registry = Arc::new(RoomRegistry::new(config.max_players_per_room));
        Self {
            config: Arc::new(config),
            registry,
        }
    }
}
