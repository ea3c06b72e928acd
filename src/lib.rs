//! Arena Sync - replication, hit authority and room relay for a multiplayer
//! arena shooter
//!
//! - `game`: movement replication, projectile pool, hit resolution, health
//!   authority and the shared countdown
//! - `peer`: per-participant session context, frame loop and transports
//! - `relay`: rooms, ordered delivery and property writer checks
//! - `ws`, `http`, `app`: the relay's network surface

pub mod app;
pub mod config;
pub mod game;
pub mod http;
pub mod peer;
pub mod relay;
pub mod util;
pub mod ws;
