//! Per-player health, owned by exactly one peer

use tracing::{debug, info};

use crate::game::combat::Damageable;
use crate::ws::protocol::ActorId;

/// Health tuning
#[derive(Debug, Clone, Copy)]
pub struct HealthConfig {
    pub max_hp: i32,
    /// Seconds between death and leaving the room
    pub death_leave_delay: f32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            max_hp: 150,
            death_leave_delay: 2.0,
        }
    }
}

/// Life cycle of a player; `Dead` is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifeState {
    Alive,
    Dead,
}

/// Result of an authoritative damage request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DamageOutcome {
    /// HP changed (or stayed) on the owner; `died` is true on the killing blow only
    Applied { hp: i32, died: bool },
    /// This peer is not the owner
    Rejected,
    /// Already dead
    Ignored,
}

/// HP of one player. Writable on the owner, display-only mirror elsewhere.
#[derive(Debug, Clone)]
pub struct HealthAuthority {
    config: HealthConfig,
    is_owner: bool,
    current_hp: i32,
    state: LifeState,
}

impl HealthAuthority {
    pub fn new(config: HealthConfig, is_owner: bool) -> Self {
        Self {
            config,
            is_owner,
            current_hp: config.max_hp,
            state: LifeState::Alive,
        }
    }

    /// Subtract `amount` (negative counts as zero), clamped to `[0, max_hp]`
    pub fn apply_damage(
        &mut self,
        amount: i32,
        is_head: bool,
        attacker: Option<ActorId>,
    ) -> DamageOutcome {
        if !self.is_owner {
            debug!(amount, "damage ignored on non-owner");
            return DamageOutcome::Rejected;
        }
        if self.state == LifeState::Dead {
            return DamageOutcome::Ignored;
        }

        let amount = amount.max(0);
        self.current_hp = self
            .current_hp
            .saturating_sub(amount)
            .clamp(0, self.config.max_hp);

        info!(
            amount,
            is_head,
            attacker = ?attacker,
            hp = self.current_hp,
            max_hp = self.config.max_hp,
            "took damage{}",
            if is_head { " (headshot)" } else { "" }
        );

        let died = self.current_hp == 0;
        if died {
            self.state = LifeState::Dead;
            info!("player died");
        }
        DamageOutcome::Applied {
            hp: self.current_hp,
            died,
        }
    }

    /// Display update from the owner's broadcast. Ignored on the owner.
    pub fn apply_mirror(&mut self, new_hp: i32) -> bool {
        if self.is_owner {
            debug!(new_hp, "health mirror ignored on owner");
            return false;
        }
        self.current_hp = new_hp.clamp(0, self.config.max_hp);
        if self.current_hp == 0 {
            self.state = LifeState::Dead;
        }
        true
    }

    pub fn current_hp(&self) -> i32 {
        self.current_hp
    }

    pub fn max_hp(&self) -> i32 {
        self.config.max_hp
    }

    pub fn normalized(&self) -> f32 {
        if self.config.max_hp <= 0 {
            return 0.0;
        }
        self.current_hp as f32 / self.config.max_hp as f32
    }

    pub fn state(&self) -> LifeState {
        self.state
    }

    pub fn is_alive(&self) -> bool {
        self.state == LifeState::Alive
    }

    pub fn is_owner(&self) -> bool {
        self.is_owner
    }

    pub fn death_leave_delay(&self) -> f32 {
        self.config.death_leave_delay
    }
}

impl Damageable for HealthAuthority {
    fn take_damage(&mut self, amount: i32, is_head: bool, attacker: Option<ActorId>) -> DamageOutcome {
        self.apply_damage(amount, is_head, attacker)
    }
}
