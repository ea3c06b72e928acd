//! Power-ups spawned by the master and consumed by whoever touches them first

use std::collections::BTreeMap;

use glam::Vec3;
use rand::Rng;

use crate::game::movement::MovementReplicator;
use crate::ws::protocol::{ActorId, PowerUpKind};

/// Power-up tuning
#[derive(Debug, Clone, Copy)]
pub struct PowerUpConfig {
    /// Seconds between master spawns
    pub spawn_interval: f32,
    pub speed_multiplier: f32,
    pub speed_duration: f32,
    pub jump_multiplier: f32,
    pub jump_duration: f32,
    /// Distance from the avatar's feet that counts as touching
    pub pickup_radius: f32,
}

impl Default for PowerUpConfig {
    fn default() -> Self {
        Self {
            spawn_interval: 15.0,
            speed_multiplier: 2.0,
            speed_duration: 5.0,
            jump_multiplier: 2.0,
            jump_duration: 5.0,
            pickup_radius: 1.0,
        }
    }
}

impl PowerUpConfig {
    /// Apply the effect of `kind` to a locally owned avatar
    pub fn apply(&self, kind: PowerUpKind, movement: &mut MovementReplicator) {
        match kind {
            PowerUpKind::SpeedBoost => {
                movement.apply_speed_boost(self.speed_multiplier, self.speed_duration)
            }
            PowerUpKind::JumpBoost => {
                movement.apply_jump_boost(self.jump_multiplier, self.jump_duration)
            }
        }
    }
}

/// A power-up lying in the scene
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerUp {
    pub id: u64,
    pub kind: PowerUpKind,
    pub position: Vec3,
}

/// Power-ups currently in the scene
#[derive(Debug, Clone, Default)]
pub struct PowerUpField {
    items: BTreeMap<u64, PowerUp>,
    spawned: u32,
}

impl PowerUpField {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick a kind and a spawn point (master only). Ids are prefixed with the
    /// spawning actor so they stay unique across master switches.
    pub fn roll<R: Rng>(&mut self, rng: &mut R, spawner: ActorId, points: &[Vec3]) -> Option<PowerUp> {
        if points.is_empty() {
            return None;
        }
        let position = points[rng.gen_range(0..points.len())];
        let kind = if rng.gen_bool(0.5) {
            PowerUpKind::SpeedBoost
        } else {
            PowerUpKind::JumpBoost
        };
        self.spawned += 1;
        let id = ((spawner as u64) << 32) | self.spawned as u64;
        Some(PowerUp { id, kind, position })
    }

    pub fn insert(&mut self, power_up: PowerUp) {
        self.items.insert(power_up.id, power_up);
    }

    pub fn remove(&mut self, id: u64) -> Option<PowerUp> {
        self.items.remove(&id)
    }

    /// First power-up within `radius` of `position`
    pub fn touching(&self, position: Vec3, radius: f32) -> Option<PowerUp> {
        self.items
            .values()
            .find(|p| p.position.distance(position) <= radius)
            .copied()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}
