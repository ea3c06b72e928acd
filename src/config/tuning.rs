//! Gameplay tuning
//!
//! Defaults match the shipped game. Component-level configs live next to the
//! component they tune and are collected here.

use glam::Vec3;

use crate::game::combat::{CombatConfig, HitboxLayout};
use crate::game::health::HealthConfig;
use crate::game::movement::MovementConfig;
use crate::game::powerup::PowerUpConfig;
use crate::game::projectile::{PoolConfig, WeaponConfig};

/// Every gameplay knob of a peer
#[derive(Debug, Clone, Default)]
pub struct Tuning {
    pub movement: MovementConfig,
    pub pool: PoolConfig,
    pub weapon: WeaponConfig,
    pub combat: CombatConfig,
    pub hitboxes: HitboxLayout,
    pub health: HealthConfig,
    pub countdown: CountdownConfig,
    pub spawn: SpawnConfig,
    pub leave: LeaveConfig,
    pub power_ups: PowerUpConfig,
}

/// Countdown and scene names
#[derive(Debug, Clone)]
pub struct CountdownConfig {
    /// Countdown length in seconds
    pub duration: f32,
    /// How often the master checks for completion (seconds)
    pub watch_interval: f32,
    /// Scene loaded for everyone when the countdown completes
    pub session_scene: String,
    /// Scene entered after leaving a room
    pub lobby_scene: String,
}

impl Default for CountdownConfig {
    fn default() -> Self {
        Self {
            duration: 10.0,
            watch_interval: 0.5,
            session_scene: "SessionScene".to_string(),
            lobby_scene: "LobbyScene".to_string(),
        }
    }
}

/// Avatar spawning in the match scene
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// How long to wait for our own character selection (seconds)
    pub character_wait: f32,
    /// Spawn points, indexed by `(actor_id - 1) % len`
    pub spawn_points: Vec<Vec3>,
}

impl SpawnConfig {
    /// Spawn point for an actor (origin when no points are configured)
    pub fn point_for(&self, actor_id: u32) -> Vec3 {
        if self.spawn_points.is_empty() {
            return Vec3::ZERO;
        }
        let index = (actor_id.saturating_sub(1) as usize) % self.spawn_points.len();
        self.spawn_points[index]
    }
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            character_wait: 1.5,
            spawn_points: vec![
                Vec3::new(-10.0, 0.0, -10.0),
                Vec3::new(10.0, 0.0, -10.0),
                Vec3::new(10.0, 0.0, 10.0),
                Vec3::new(-10.0, 0.0, 10.0),
            ],
        }
    }
}

/// Leaving a room
#[derive(Debug, Clone, Copy)]
pub struct LeaveConfig {
    /// Give up waiting for the relay's confirmation after this long (seconds)
    pub confirm_timeout: f32,
}

impl Default for LeaveConfig {
    fn default() -> Self {
        Self {
            confirm_timeout: 5.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_point_wraps_by_actor() {
        let spawn = SpawnConfig::default();
        assert_eq!(spawn.point_for(1), spawn.spawn_points[0]);
        assert_eq!(spawn.point_for(5), spawn.spawn_points[0]);
        assert_eq!(spawn.point_for(3), spawn.spawn_points[2]);
    }

    #[test]
    fn empty_spawn_list_uses_origin() {
        let spawn = SpawnConfig {
            spawn_points: Vec::new(),
            ..SpawnConfig::default()
        };
        assert_eq!(spawn.point_for(2), Vec3::ZERO);
    }
}
