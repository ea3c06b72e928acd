//! Time utilities for the relay clock and the peer frame loop

use std::time::{Duration, Instant};

/// Relay start time. Its elapsed seconds are the shared session clock.
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize relay start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get relay uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Shared clock value handed to peers, in seconds since relay start.
///
/// Lazily initializes the start instant so library users (tests, the
/// in-process relay) get a valid clock without calling [`init_server_time`].
pub fn server_time_secs() -> f64 {
    SERVER_START.get_or_init(Instant::now).elapsed().as_secs_f64()
}

/// Frame loop configuration
pub const FRAME_RATE: u32 = 60; // 60 frames per second
pub const SEND_RATE: u32 = 20; // 20 movement snapshots per second

/// Delta time of one frame at the given rate (in seconds)
pub fn frame_delta(frame_rate: u32) -> f32 {
    1.0 / frame_rate.max(1) as f32
}

/// Frame interval for a tokio ticker at the given rate
pub fn frame_interval(frame_rate: u32) -> Duration {
    Duration::from_micros(1_000_000 / frame_rate.max(1) as u64)
}
