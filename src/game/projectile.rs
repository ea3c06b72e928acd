//! Projectile pool with temporary overflow
//!
//! A fixed number of pooled instances is allocated up front. When all of them
//! are in flight, extra shots get temporary instances that are destroyed at
//! the end of their life and never join the pool.

use std::collections::BTreeMap;

use glam::Vec3;
use tracing::{debug, warn};

use crate::ws::protocol::ActorId;

/// Identifier of a projectile instance, unique per pool
pub type ProjectileId = u64;

/// Pool sizing
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub pool_size: usize,
    /// `false` allocates no slots; every shot is temporary
    pub use_pooling: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 20,
            use_pooling: true,
        }
    }
}

/// Shooting parameters
#[derive(Debug, Clone, Copy)]
pub struct WeaponConfig {
    /// Seconds between shots while the trigger is held, 0 or less for single shots
    pub fire_interval: f32,
    pub projectile_speed: f32,
    /// Seconds
    pub projectile_lifetime: f32,
    pub projectile_radius: f32,
    /// Muzzle position relative to the avatar's feet
    pub muzzle_offset: Vec3,
    /// Distance along the aim from the muzzle to the spawn point
    pub muzzle_forward: f32,
}

impl Default for WeaponConfig {
    fn default() -> Self {
        Self {
            fire_interval: 0.2,
            projectile_speed: 40.0,
            projectile_lifetime: 5.0,
            projectile_radius: 0.1,
            muzzle_offset: Vec3::new(0.0, 1.6, 0.0),
            muzzle_forward: 0.6,
        }
    }
}

/// Fire-rate gate for one shooter
#[derive(Debug, Clone, Default)]
pub struct FireControl {
    next_fire_time: f64,
}

impl FireControl {
    /// Returns true and arms the cooldown if a shot is allowed at `now`
    pub fn try_fire(&mut self, now: f64, interval: f32) -> bool {
        if interval <= 0.0 {
            return true;
        }
        if now < self.next_fire_time {
            return false;
        }
        self.next_fire_time = now + interval as f64;
        true
    }
}

/// A bullet in flight (or parked in the pool)
#[derive(Debug, Clone, PartialEq)]
pub struct Projectile {
    pub id: ProjectileId,
    /// Shooter, `None` for untagged projectiles
    pub owner_actor_id: Option<ActorId>,
    pub pooled: bool,
    pub spawn_time: f64,
    pub lifetime: f32,
    pub active: bool,
    /// Cosmetic copies never deal damage
    pub deals_damage: bool,
    pub position: Vec3,
    /// Position at the start of the last tick
    pub previous_position: Vec3,
    pub velocity: Vec3,
    pub radius: f32,
    /// Sitting under the pool root
    pub parked: bool,
    /// Handed out by `acquire` but not launched yet
    pub reserved: bool,
}

impl Projectile {
    fn inactive(id: ProjectileId, pooled: bool) -> Self {
        Self {
            id,
            owner_actor_id: None,
            pooled,
            spawn_time: 0.0,
            lifetime: 0.0,
            active: false,
            deals_damage: false,
            position: Vec3::ZERO,
            previous_position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            radius: 0.0,
            parked: pooled,
            reserved: false,
        }
    }

    /// Whether the lifetime has run out at `now`
    pub fn expired(&self, now: f64) -> bool {
        now - self.spawn_time >= self.lifetime as f64
    }
}

/// Launch parameters
#[derive(Debug, Clone, Copy)]
pub struct LaunchParams {
    pub owner_actor_id: Option<ActorId>,
    pub origin: Vec3,
    pub velocity: Vec3,
    pub lifetime: f32,
    pub radius: f32,
    pub deals_damage: bool,
    pub now: f64,
}

/// Handle returned by [`ProjectilePool::acquire`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acquired {
    pub id: ProjectileId,
    pub pooled: bool,
}

/// Result of releasing a projectile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Pooled instance went back to the pool
    Deactivated,
    /// Temporary instance was destroyed
    Destroyed,
    /// Pooled instance was already parked
    AlreadyInactive,
    /// No such instance (already destroyed)
    Unknown,
}

/// Bounded pool plus unbounded temporary overflow
#[derive(Debug)]
pub struct ProjectilePool {
    /// `None` marks a slot whose instance was destroyed behind our back
    slots: Vec<Option<Projectile>>,
    temporaries: BTreeMap<ProjectileId, Projectile>,
    next_id: ProjectileId,
}

impl ProjectilePool {
    pub fn new(config: PoolConfig) -> Self {
        let size = if config.use_pooling { config.pool_size } else { 0 };
        let mut pool = Self {
            slots: Vec::with_capacity(size),
            temporaries: BTreeMap::new(),
            next_id: 1,
        };
        for _ in 0..size {
            let id = pool.allocate_id();
            pool.slots.push(Some(Projectile::inactive(id, true)));
        }
        pool
    }

    fn allocate_id(&mut self) -> ProjectileId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// First free pooled instance, or a new temporary one. The instance is
    /// reserved until launched or released.
    pub fn acquire(&mut self) -> Acquired {
        for index in 0..self.slots.len() {
            match &mut self.slots[index] {
                Some(p) if p.active || p.reserved => {}
                Some(p) => {
                    p.reserved = true;
                    p.parked = false;
                    return Acquired { id: p.id, pooled: true };
                }
                None => {
                    let id = self.allocate_id();
                    debug!(slot = index, id, "replacing destroyed pooled projectile");
                    let mut fresh = Projectile::inactive(id, true);
                    fresh.reserved = true;
                    fresh.parked = false;
                    self.slots[index] = Some(fresh);
                    return Acquired { id, pooled: true };
                }
            }
        }

        let id = self.allocate_id();
        let mut temporary = Projectile::inactive(id, false);
        temporary.reserved = true;
        self.temporaries.insert(id, temporary);
        Acquired { id, pooled: false }
    }

    /// Activate an acquired instance. Returns false if it no longer exists.
    pub fn launch(&mut self, id: ProjectileId, params: LaunchParams) -> bool {
        let Some(p) = self.get_mut(id) else {
            return false;
        };
        p.owner_actor_id = params.owner_actor_id;
        p.spawn_time = params.now;
        p.lifetime = params.lifetime;
        p.active = true;
        p.deals_damage = params.deals_damage;
        p.position = params.origin;
        p.previous_position = params.origin;
        p.velocity = params.velocity;
        p.radius = params.radius;
        p.parked = false;
        p.reserved = false;
        true
    }

    /// Acquire and launch in one step
    pub fn spawn(&mut self, params: LaunchParams) -> Acquired {
        let acquired = self.acquire();
        self.launch(acquired.id, params);
        acquired
    }

    /// End a projectile's life. Safe to call more than once.
    pub fn release(&mut self, id: ProjectileId) -> Release {
        if self.temporaries.remove(&id).is_some() {
            return Release::Destroyed;
        }
        let Some(p) = self.slot_mut(id) else {
            return Release::Unknown;
        };
        if !p.active && !p.reserved {
            return Release::AlreadyInactive;
        }
        p.active = false;
        p.reserved = false;
        p.velocity = Vec3::ZERO;
        p.owner_actor_id = None;
        p.parked = true;
        Release::Deactivated
    }

    /// Integrate active projectiles and release the expired ones
    pub fn tick(&mut self, now: f64, dt: f32) -> Vec<ProjectileId> {
        let mut expired = Vec::new();
        let live = self
            .slots
            .iter_mut()
            .flatten()
            .chain(self.temporaries.values_mut())
            .filter(|p| p.active);
        for p in live {
            p.previous_position = p.position;
            p.position += p.velocity * dt;
            if p.expired(now) {
                expired.push(p.id);
            }
        }
        for id in &expired {
            self.release(*id);
        }
        expired
    }

    /// Release every active projectile fired by `actor`
    pub fn release_owned_by(&mut self, actor: ActorId) -> usize {
        let owned: Vec<ProjectileId> = self
            .active()
            .filter(|p| p.owner_actor_id == Some(actor))
            .map(|p| p.id)
            .collect();
        for id in &owned {
            self.release(*id);
        }
        owned.len()
    }

    /// Destroy an instance without going through the pool
    pub fn destroy_external(&mut self, id: ProjectileId) -> bool {
        if self.temporaries.remove(&id).is_some() {
            return true;
        }
        for slot in &mut self.slots {
            if slot.as_ref().map(|p| p.id) == Some(id) {
                warn!(id, "pooled projectile destroyed outside the pool");
                *slot = None;
                return true;
            }
        }
        false
    }

    pub fn get(&self, id: ProjectileId) -> Option<&Projectile> {
        self.slots
            .iter()
            .flatten()
            .find(|p| p.id == id)
            .or_else(|| self.temporaries.get(&id))
    }

    fn get_mut(&mut self, id: ProjectileId) -> Option<&mut Projectile> {
        if self.temporaries.contains_key(&id) {
            return self.temporaries.get_mut(&id);
        }
        self.slot_mut(id)
    }

    fn slot_mut(&mut self, id: ProjectileId) -> Option<&mut Projectile> {
        self.slots.iter_mut().flatten().find(|p| p.id == id)
    }

    /// Every active projectile, pooled first
    pub fn active(&self) -> impl Iterator<Item = &Projectile> {
        self.slots
            .iter()
            .flatten()
            .chain(self.temporaries.values())
            .filter(|p| p.active)
    }

    /// Pool capacity, fixed at construction
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn active_count(&self) -> usize {
        self.active().count()
    }

    /// Active pooled instances
    pub fn pooled_active_count(&self) -> usize {
        self.slots.iter().flatten().filter(|p| p.active).count()
    }

    /// Pooled instances that are launched or reserved
    pub fn pooled_in_use_count(&self) -> usize {
        self.slots
            .iter()
            .flatten()
            .filter(|p| p.active || p.reserved)
            .count()
    }

    /// Live temporary instances
    pub fn temporary_count(&self) -> usize {
        self.temporaries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(now: f64) -> LaunchParams {
        LaunchParams {
            owner_actor_id: Some(1),
            origin: Vec3::ZERO,
            velocity: Vec3::new(0.0, 0.0, 40.0),
            lifetime: 5.0,
            radius: 0.1,
            deals_damage: true,
            now,
        }
    }

    #[test]
    fn overflow_goes_to_temporaries() {
        let mut pool = ProjectilePool::new(PoolConfig::default());
        let shots: Vec<Acquired> = (0..25).map(|_| pool.spawn(params(0.0))).collect();

        assert_eq!(shots.iter().filter(|a| a.pooled).count(), 20);
        assert_eq!(shots.iter().filter(|a| !a.pooled).count(), 5);
        assert_eq!(pool.slot_count(), 20);
        assert_eq!(pool.pooled_active_count(), 20);
        assert_eq!(pool.temporary_count(), 5);

        for shot in shots.iter().filter(|a| !a.pooled) {
            assert_eq!(pool.release(shot.id), Release::Destroyed);
        }
        assert_eq!(pool.temporary_count(), 0);
        assert_eq!(pool.slot_count(), 20);
    }

    #[test]
    fn acquire_reserves_until_released() {
        let mut pool = ProjectilePool::new(PoolConfig::default());
        let held: Vec<Acquired> = (0..25).map(|_| pool.acquire()).collect();

        let pooled: Vec<_> = held.iter().filter(|a| a.pooled).map(|a| a.id).collect();
        let mut distinct = pooled.clone();
        distinct.dedup();
        assert_eq!(pooled.len(), 20);
        assert_eq!(distinct.len(), 20);
        assert_eq!(pool.temporary_count(), 5);
        assert_eq!(pool.pooled_in_use_count(), 20);
        assert_eq!(pool.active_count(), 0);
        assert_eq!(pool.slot_count(), 20);

        // Never launched, still returned
        assert_eq!(pool.release(held[0].id), Release::Deactivated);
        assert_eq!(pool.release(held[0].id), Release::AlreadyInactive);
        assert_eq!(pool.release(held[24].id), Release::Destroyed);
        assert_eq!(pool.temporary_count(), 4);
        assert_eq!(pool.acquire(), held[0]);
    }

    #[test]
    fn release_is_idempotent() {
        let mut pool = ProjectilePool::new(PoolConfig::default());
        let pooled = pool.spawn(params(0.0));
        assert_eq!(pool.release(pooled.id), Release::Deactivated);
        assert_eq!(pool.release(pooled.id), Release::AlreadyInactive);
        let p = pool.get(pooled.id).unwrap();
        assert!(!p.active && p.parked);
        assert_eq!(p.velocity, Vec3::ZERO);

        let mut tiny = ProjectilePool::new(PoolConfig {
            pool_size: 0,
            use_pooling: true,
        });
        let temp = tiny.spawn(params(0.0));
        assert_eq!(tiny.release(temp.id), Release::Destroyed);
        assert_eq!(tiny.release(temp.id), Release::Unknown);
    }

    #[test]
    fn pooling_disabled_means_no_slots() {
        let mut pool = ProjectilePool::new(PoolConfig {
            pool_size: 20,
            use_pooling: false,
        });
        assert_eq!(pool.slot_count(), 0);
        assert!(!pool.spawn(params(0.0)).pooled);
    }

    #[test]
    fn released_slots_are_reused() {
        let mut pool = ProjectilePool::new(PoolConfig {
            pool_size: 2,
            use_pooling: true,
        });
        let a = pool.spawn(params(0.0));
        pool.spawn(params(0.0));
        pool.release(a.id);
        let c = pool.spawn(params(0.1));
        assert_eq!(c, a);
        assert_eq!(pool.temporary_count(), 0);
    }

    #[test]
    fn externally_destroyed_slot_is_replaced_on_scan() {
        let mut pool = ProjectilePool::new(PoolConfig {
            pool_size: 3,
            use_pooling: true,
        });
        let first = pool.acquire();
        assert!(pool.destroy_external(first.id));
        assert!(pool.get(first.id).is_none());

        let next = pool.acquire();
        assert!(next.pooled);
        assert_ne!(next.id, first.id);
        assert_eq!(pool.slot_count(), 3);
        assert_eq!(pool.release(first.id), Release::Unknown);
    }

    #[test]
    fn tick_moves_and_expires() {
        let mut pool = ProjectilePool::new(PoolConfig::default());
        let shot = pool.spawn(params(0.0));

        assert!(pool.tick(1.0, 0.5).is_empty());
        let p = pool.get(shot.id).unwrap();
        assert_eq!(p.previous_position, Vec3::ZERO);
        assert_eq!(p.position, Vec3::new(0.0, 0.0, 20.0));

        assert_eq!(pool.tick(5.0, 0.5), vec![shot.id]);
        assert_eq!(pool.active_count(), 0);
    }

    #[test]
    fn temporaries_are_destroyed_at_end_of_life() {
        let mut pool = ProjectilePool::new(PoolConfig {
            pool_size: 1,
            use_pooling: true,
        });
        pool.spawn(params(0.0));
        let temp = pool.spawn(params(0.0));
        assert!(!temp.pooled);
        let expired = pool.tick(6.0, 0.1);
        assert_eq!(expired.len(), 2);
        assert_eq!(pool.temporary_count(), 0);
        assert_eq!(pool.slot_count(), 1);
    }

    #[test]
    fn release_owned_by_only_touches_that_shooter() {
        let mut pool = ProjectilePool::new(PoolConfig::default());
        pool.spawn(params(0.0));
        pool.spawn(LaunchParams {
            owner_actor_id: Some(2),
            ..params(0.0)
        });
        assert_eq!(pool.release_owned_by(1), 1);
        assert_eq!(pool.active_count(), 1);
    }

    #[test]
    fn fire_control_respects_interval() {
        let mut fire = FireControl::default();
        assert!(fire.try_fire(0.0, 0.2));
        assert!(!fire.try_fire(0.1, 0.2));
        assert!(fire.try_fire(0.2, 0.2));
        // Single-shot mode never throttles.
        assert!(fire.try_fire(0.21, 0.0));
    }
}
