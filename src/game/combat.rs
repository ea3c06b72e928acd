//! Combat - hitboxes, overlap detection and damage dispatch

use glam::Vec3;
use tracing::{debug, warn};

use crate::game::health::DamageOutcome;
use crate::game::projectile::{ProjectileId, ProjectilePool, Release};
use crate::game::session::Ownership;
use crate::ws::protocol::{ActorId, RpcCall};

/// Combat rules
#[derive(Debug, Clone, Copy)]
pub struct CombatConfig {
    /// Projectiles never damage their own shooter
    pub ignore_friendly_fire: bool,
    /// Headshots deal body damage times this
    pub head_multiplier: i32,
}

impl Default for CombatConfig {
    fn default() -> Self {
        Self {
            ignore_friendly_fire: true,
            head_multiplier: 3,
        }
    }
}

/// Which part of an avatar was hit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitboxPart {
    Head,
    Body,
}

/// Trigger volume relative to the avatar's feet
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hitbox {
    pub damage: i32,
    pub center: Vec3,
    pub half_extents: Vec3,
}

/// Head and body volumes of one avatar type
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitboxLayout {
    pub head: Option<Hitbox>,
    pub body: Option<Hitbox>,
}

impl Default for HitboxLayout {
    fn default() -> Self {
        Self {
            head: Some(Hitbox {
                damage: 15,
                center: Vec3::new(0.0, 1.75, 0.0),
                half_extents: Vec3::splat(0.2),
            }),
            body: Some(Hitbox {
                damage: 15,
                center: Vec3::new(0.0, 0.8, 0.0),
                half_extents: Vec3::new(0.35, 0.75, 0.35),
            }),
        }
    }
}

/// Axis-aligned box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn from_center(center: Vec3, half_extents: Vec3) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    /// Grow every face outwards by `amount`
    pub fn expanded(self, amount: f32) -> Self {
        Self {
            min: self.min - Vec3::splat(amount),
            max: self.max + Vec3::splat(amount),
        }
    }

    pub fn contains(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// Slab test of the segment `from..to`
    pub fn intersects_segment(&self, from: Vec3, to: Vec3) -> bool {
        self.segment_entry(from, to).is_some()
    }

    /// Fraction of `from..to` at which the segment enters the box
    /// (0 when it starts inside)
    pub fn segment_entry(&self, from: Vec3, to: Vec3) -> Option<f32> {
        let dir = to - from;
        let mut t_min = 0.0f32;
        let mut t_max = 1.0f32;
        for axis in 0..3 {
            let origin = from[axis];
            let d = dir[axis];
            let (lo, hi) = (self.min[axis], self.max[axis]);
            if d.abs() < f32::EPSILON {
                if origin < lo || origin > hi {
                    return None;
                }
                continue;
            }
            let inv = 1.0 / d;
            let mut t1 = (lo - origin) * inv;
            let mut t2 = (hi - origin) * inv;
            if t1 > t2 {
                std::mem::swap(&mut t1, &mut t2);
            }
            t_min = t_min.max(t1);
            t_max = t_max.min(t2);
            if t_min > t_max {
                return None;
            }
        }
        Some(t_min)
    }

    /// Sphere of `radius` moving from `from` to `to` touches the box
    pub fn swept_sphere(&self, from: Vec3, to: Vec3, radius: f32) -> bool {
        self.swept_sphere_entry(from, to, radius).is_some()
    }

    pub fn swept_sphere_entry(&self, from: Vec3, to: Vec3, radius: f32) -> Option<f32> {
        self.expanded(radius).segment_entry(from, to)
    }
}

/// Hitboxes of one avatar, placed at its current pose
#[derive(Debug, Clone, PartialEq)]
pub struct HitboxSet {
    /// Actor the avatar belongs to, `None` if untagged
    pub owner_actor_id: Option<ActorId>,
    pub layout: HitboxLayout,
    pub origin: Vec3,
}

impl HitboxSet {
    pub fn new(owner_actor_id: Option<ActorId>, layout: HitboxLayout, origin: Vec3) -> Self {
        Self {
            owner_actor_id,
            layout,
            origin,
        }
    }

    pub fn set_origin(&mut self, origin: Vec3) {
        self.origin = origin;
    }

    pub fn hitbox(&self, part: HitboxPart) -> Option<&Hitbox> {
        match part {
            HitboxPart::Head => self.layout.head.as_ref(),
            HitboxPart::Body => self.layout.body.as_ref(),
        }
    }

    /// World-space box of a part
    pub fn world_box(&self, part: HitboxPart) -> Option<Aabb> {
        self.hitbox(part)
            .map(|h| Aabb::from_center(self.origin + h.center, h.half_extents))
    }

    /// First part touched by a swept sphere, head before body
    pub fn first_overlap(&self, from: Vec3, to: Vec3, radius: f32) -> Option<HitboxPart> {
        self.contact(from, to, radius).map(|(part, _)| part)
    }

    /// Part hit (head before body) and the earliest entry along the sweep
    /// over every touched part
    pub fn contact(&self, from: Vec3, to: Vec3, radius: f32) -> Option<(HitboxPart, f32)> {
        let mut hit: Option<(HitboxPart, f32)> = None;
        for part in [HitboxPart::Head, HitboxPart::Body] {
            let Some(t) = self
                .world_box(part)
                .and_then(|b| b.swept_sphere_entry(from, to, radius))
            else {
                continue;
            };
            hit = Some(match hit {
                Some((first, earliest)) => (first, earliest.min(t)),
                None => (part, t),
            });
        }
        hit
    }
}

/// Something that can take authoritative damage locally
pub trait Damageable {
    fn take_damage(&mut self, amount: i32, is_head: bool, attacker: Option<ActorId>) -> DamageOutcome;
}

/// Outbound path for damage aimed at a remote owner
pub trait DamageSink {
    fn send_damage(&mut self, owner: ActorId, call: RpcCall) -> Result<(), DispatchError>;
}

/// Damage dispatch failures (logged and dropped, never retried)
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("not connected to a room")]
    Disconnected,

    #[error("transport rejected the call: {0}")]
    Transport(String),
}

/// Overlap found during detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overlap {
    pub projectile_id: ProjectileId,
    /// Index into the target list passed to [`HitResolver::detect`]
    pub target: usize,
    pub part: HitboxPart,
    pub deals_damage: bool,
}

/// Why a hit was cleaned up without damage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Projectile not found or already released
    UnknownProjectile,
    /// Projectile carries no shooter tag
    NoShooter,
    /// Hitbox carries no owner
    NoTarget,
    FriendlyFire,
    /// Target has no hitbox for the part
    NoHitbox,
}

/// Result of resolving one overlap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitOutcome {
    Discarded(DiscardReason),
    /// Sent to the target's owner
    Dispatched {
        target: ActorId,
        amount: i32,
        is_head: bool,
    },
    /// Dispatch failed and the damage was dropped
    DispatchFailed { target: ActorId },
    /// Applied on this peer
    Applied {
        target: ActorId,
        amount: i32,
        is_head: bool,
        outcome: DamageOutcome,
    },
}

/// The victim of an overlap, as seen from this peer
pub struct HitTarget<'a> {
    pub hitboxes: &'a HitboxSet,
    pub ownership: Ownership,
    pub health: &'a mut dyn Damageable,
}

/// Turns projectile overlaps into authoritative damage
#[derive(Debug, Clone, Default)]
pub struct HitResolver {
    config: CombatConfig,
}

impl HitResolver {
    pub fn new(config: CombatConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CombatConfig {
        &self.config
    }

    /// Damage for a hit on `part`. Headshots multiply the body damage,
    /// falling back to the head's own damage without a body hitbox.
    pub fn damage_for(&self, layout: &HitboxLayout, part: HitboxPart) -> Option<i32> {
        match part {
            HitboxPart::Body => layout.body.map(|b| b.damage),
            HitboxPart::Head => {
                let head = layout.head?;
                let base = layout.body.map(|b| b.damage).unwrap_or(head.damage);
                Some(base * self.config.head_multiplier)
            }
        }
    }

    /// Overlaps of active projectiles with the targets this frame.
    /// Each projectile reports at most one overlap: the target it reaches
    /// first along its sweep. With friendly fire ignored, projectiles pass
    /// through their shooter's own hitboxes.
    pub fn detect(&self, pool: &ProjectilePool, targets: &[&HitboxSet]) -> Vec<Overlap> {
        pool.active()
            .filter_map(|p| {
                targets
                    .iter()
                    .enumerate()
                    .filter(|(_, set)| {
                        !(self.config.ignore_friendly_fire
                            && p.owner_actor_id.is_some()
                            && set.owner_actor_id == p.owner_actor_id)
                    })
                    .filter_map(|(index, set)| {
                        set.contact(p.previous_position, p.position, p.radius)
                            .map(|(part, t)| (index, part, t))
                    })
                    .min_by(|a, b| a.2.total_cmp(&b.2))
                    .map(|(index, part, _)| Overlap {
                        projectile_id: p.id,
                        target: index,
                        part,
                        deals_damage: p.deals_damage,
                    })
            })
            .collect()
    }

    /// Resolve one overlap. The projectile is always released.
    pub fn resolve(
        &self,
        pool: &mut ProjectilePool,
        projectile_id: ProjectileId,
        part: HitboxPart,
        target: HitTarget<'_>,
        sink: &mut dyn DamageSink,
    ) -> HitOutcome {
        let outcome = self.evaluate(pool, projectile_id, part, target, sink);
        if pool.release(projectile_id) == Release::Unknown {
            debug!(projectile_id, "hit projectile already gone");
        }
        outcome
    }

    fn evaluate(
        &self,
        pool: &ProjectilePool,
        projectile_id: ProjectileId,
        part: HitboxPart,
        target: HitTarget<'_>,
        sink: &mut dyn DamageSink,
    ) -> HitOutcome {
        let Some(projectile) = pool.get(projectile_id).filter(|p| p.active) else {
            return HitOutcome::Discarded(DiscardReason::UnknownProjectile);
        };

        let Some(shooter) = projectile.owner_actor_id else {
            warn!(projectile_id, "projectile has no shooter tag");
            return HitOutcome::Discarded(DiscardReason::NoShooter);
        };

        let Some(victim) = target.hitboxes.owner_actor_id else {
            warn!(projectile_id, shooter, "hitbox has no owning player");
            return HitOutcome::Discarded(DiscardReason::NoTarget);
        };

        if self.config.ignore_friendly_fire && shooter == victim {
            debug!(actor_id = shooter, "friendly fire ignored");
            return HitOutcome::Discarded(DiscardReason::FriendlyFire);
        }

        let Some(amount) = self.damage_for(&target.hitboxes.layout, part) else {
            return HitOutcome::Discarded(DiscardReason::NoHitbox);
        };
        let is_head = part == HitboxPart::Head;

        match target.ownership {
            Ownership::Remote(peer) => {
                let call = RpcCall::ApplyDamage {
                    amount,
                    is_head,
                    attacker_actor_id: shooter,
                    victim_actor_id: victim,
                };
                match sink.send_damage(peer, call) {
                    Ok(()) => HitOutcome::Dispatched {
                        target: victim,
                        amount,
                        is_head,
                    },
                    Err(e) => {
                        debug!(victim, error = %e, "damage dispatch dropped");
                        HitOutcome::DispatchFailed { target: victim }
                    }
                }
            }
            Ownership::Owner => {
                let outcome = target.health.take_damage(amount, is_head, Some(shooter));
                HitOutcome::Applied {
                    target: victim,
                    amount,
                    is_head,
                    outcome,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::health::{HealthAuthority, HealthConfig};
    use crate::game::projectile::{LaunchParams, PoolConfig};

    #[derive(Default)]
    struct RecordingSink {
        sent: Vec<(ActorId, RpcCall)>,
        fail: bool,
    }

    impl DamageSink for RecordingSink {
        fn send_damage(&mut self, owner: ActorId, call: RpcCall) -> Result<(), DispatchError> {
            if self.fail {
                return Err(DispatchError::Disconnected);
            }
            self.sent.push((owner, call));
            Ok(())
        }
    }

    fn shoot(pool: &mut ProjectilePool, shooter: Option<ActorId>) -> ProjectileId {
        pool.spawn(LaunchParams {
            owner_actor_id: shooter,
            origin: Vec3::new(0.0, 1.0, -5.0),
            velocity: Vec3::new(0.0, 0.0, 40.0),
            lifetime: 5.0,
            radius: 0.1,
            deals_damage: true,
            now: 0.0,
        })
        .id
    }

    fn owned_health() -> HealthAuthority {
        HealthAuthority::new(HealthConfig::default(), true)
    }

    #[test]
    fn headshot_is_three_times_body_damage_even_when_head_differs() {
        let resolver = HitResolver::default();
        let mut layout = HitboxLayout::default();
        layout.head.as_mut().unwrap().damage = 40;
        assert_eq!(resolver.damage_for(&layout, HitboxPart::Head), Some(45));
        assert_eq!(resolver.damage_for(&layout, HitboxPart::Body), Some(15));

        layout.body = None;
        assert_eq!(resolver.damage_for(&layout, HitboxPart::Head), Some(120));
    }

    #[test]
    fn local_headshot_takes_150_to_105() {
        let resolver = HitResolver::default();
        let mut pool = ProjectilePool::new(PoolConfig::default());
        let id = shoot(&mut pool, Some(1));
        let hitboxes = HitboxSet::new(Some(2), HitboxLayout::default(), Vec3::ZERO);
        let mut health = owned_health();
        let mut sink = RecordingSink::default();

        let outcome = resolver.resolve(
            &mut pool,
            id,
            HitboxPart::Head,
            HitTarget {
                hitboxes: &hitboxes,
                ownership: Ownership::Owner,
                health: &mut health,
            },
            &mut sink,
        );

        assert!(matches!(outcome, HitOutcome::Applied { amount: 45, is_head: true, .. }));
        assert_eq!(health.current_hp(), 105);
        assert!(sink.sent.is_empty());
        assert_eq!(pool.active_count(), 0);
    }

    #[test]
    fn remote_target_gets_a_targeted_call_only() {
        let resolver = HitResolver::default();
        let mut pool = ProjectilePool::new(PoolConfig::default());
        let id = shoot(&mut pool, Some(1));
        let hitboxes = HitboxSet::new(Some(3), HitboxLayout::default(), Vec3::ZERO);
        let mut mirror = HealthAuthority::new(HealthConfig::default(), false);
        let mut sink = RecordingSink::default();

        let outcome = resolver.resolve(
            &mut pool,
            id,
            HitboxPart::Body,
            HitTarget {
                hitboxes: &hitboxes,
                ownership: Ownership::Remote(3),
                health: &mut mirror,
            },
            &mut sink,
        );

        assert_eq!(
            outcome,
            HitOutcome::Dispatched {
                target: 3,
                amount: 15,
                is_head: false
            }
        );
        assert_eq!(
            sink.sent,
            vec![(
                3,
                RpcCall::ApplyDamage {
                    amount: 15,
                    is_head: false,
                    attacker_actor_id: 1,
                    victim_actor_id: 3
                }
            )]
        );
        assert_eq!(mirror.current_hp(), 150);
    }

    #[test]
    fn friendly_fire_is_cleaned_up_without_damage() {
        let resolver = HitResolver::default();
        let mut pool = ProjectilePool::new(PoolConfig::default());
        let id = shoot(&mut pool, Some(2));
        let hitboxes = HitboxSet::new(Some(2), HitboxLayout::default(), Vec3::ZERO);
        let mut health = owned_health();
        let mut sink = RecordingSink::default();

        let outcome = resolver.resolve(
            &mut pool,
            id,
            HitboxPart::Body,
            HitTarget {
                hitboxes: &hitboxes,
                ownership: Ownership::Owner,
                health: &mut health,
            },
            &mut sink,
        );

        assert_eq!(outcome, HitOutcome::Discarded(DiscardReason::FriendlyFire));
        assert_eq!(health.current_hp(), 150);
        assert_eq!(pool.active_count(), 0);
    }

    #[test]
    fn missing_tags_only_clean_up() {
        let resolver = HitResolver::default();
        let mut pool = ProjectilePool::new(PoolConfig::default());
        let mut health = owned_health();
        let mut sink = RecordingSink::default();

        let untagged = shoot(&mut pool, None);
        let tagged_set = HitboxSet::new(Some(2), HitboxLayout::default(), Vec3::ZERO);
        let outcome = resolver.resolve(
            &mut pool,
            untagged,
            HitboxPart::Body,
            HitTarget {
                hitboxes: &tagged_set,
                ownership: Ownership::Owner,
                health: &mut health,
            },
            &mut sink,
        );
        assert_eq!(outcome, HitOutcome::Discarded(DiscardReason::NoShooter));

        let id = shoot(&mut pool, Some(1));
        let orphan = HitboxSet::new(None, HitboxLayout::default(), Vec3::ZERO);
        let outcome = resolver.resolve(
            &mut pool,
            id,
            HitboxPart::Body,
            HitTarget {
                hitboxes: &orphan,
                ownership: Ownership::Owner,
                health: &mut health,
            },
            &mut sink,
        );
        assert_eq!(outcome, HitOutcome::Discarded(DiscardReason::NoTarget));
        assert_eq!(health.current_hp(), 150);
        assert_eq!(pool.active_count(), 0);
    }

    #[test]
    fn failed_dispatch_is_dropped_and_still_cleans_up() {
        let resolver = HitResolver::default();
        let mut pool = ProjectilePool::new(PoolConfig::default());
        let id = shoot(&mut pool, Some(1));
        let hitboxes = HitboxSet::new(Some(4), HitboxLayout::default(), Vec3::ZERO);
        let mut mirror = HealthAuthority::new(HealthConfig::default(), false);
        let mut sink = RecordingSink {
            fail: true,
            ..RecordingSink::default()
        };

        let outcome = resolver.resolve(
            &mut pool,
            id,
            HitboxPart::Head,
            HitTarget {
                hitboxes: &hitboxes,
                ownership: Ownership::Remote(4),
                health: &mut mirror,
            },
            &mut sink,
        );
        assert_eq!(outcome, HitOutcome::DispatchFailed { target: 4 });
        assert_eq!(pool.active_count(), 0);
    }

    #[test]
    fn a_second_resolution_of_the_same_projectile_does_nothing() {
        let resolver = HitResolver::default();
        let mut pool = ProjectilePool::new(PoolConfig::default());
        let id = shoot(&mut pool, Some(1));
        let hitboxes = HitboxSet::new(Some(2), HitboxLayout::default(), Vec3::ZERO);
        let mut health = owned_health();
        let mut sink = RecordingSink::default();

        for _ in 0..2 {
            resolver.resolve(
                &mut pool,
                id,
                HitboxPart::Body,
                HitTarget {
                    hitboxes: &hitboxes,
                    ownership: Ownership::Owner,
                    health: &mut health,
                },
                &mut sink,
            );
        }
        assert_eq!(health.current_hp(), 135);
    }

    #[test]
    fn detection_prefers_head_and_reports_once_per_projectile() {
        let resolver = HitResolver::default();
        let mut pool = ProjectilePool::new(PoolConfig::default());
        // Falls straight down through head and body in one step.
        pool.spawn(LaunchParams {
            owner_actor_id: Some(1),
            origin: Vec3::new(0.0, 3.0, 0.0),
            velocity: Vec3::new(0.0, -60.0, 0.0),
            lifetime: 5.0,
            radius: 0.1,
            deals_damage: true,
            now: 0.0,
        });
        pool.tick(0.05, 0.05);

        let a = HitboxSet::new(Some(2), HitboxLayout::default(), Vec3::ZERO);
        let b = HitboxSet::new(Some(3), HitboxLayout::default(), Vec3::ZERO);
        let overlaps = resolver.detect(&pool, &[&a, &b]);
        assert_eq!(overlaps.len(), 1);
        assert_eq!(overlaps[0].part, HitboxPart::Head);
        assert_eq!(overlaps[0].target, 0);
    }

    #[test]
    fn detection_picks_the_nearest_target_along_the_sweep() {
        let resolver = HitResolver::default();
        let mut pool = ProjectilePool::new(PoolConfig::default());
        // Crosses both avatars in one step, the far one listed first.
        pool.spawn(LaunchParams {
            owner_actor_id: Some(1),
            origin: Vec3::new(0.0, 1.0, 0.0),
            velocity: Vec3::new(0.0, 0.0, 200.0),
            lifetime: 5.0,
            radius: 0.1,
            deals_damage: true,
            now: 0.0,
        });
        pool.tick(0.05, 0.05);

        let far = HitboxSet::new(Some(2), HitboxLayout::default(), Vec3::new(0.0, 0.0, 8.0));
        let near = HitboxSet::new(Some(3), HitboxLayout::default(), Vec3::new(0.0, 0.0, 3.0));
        let overlaps = resolver.detect(&pool, &[&far, &near]);
        assert_eq!(overlaps.len(), 1);
        assert_eq!(overlaps[0].target, 1);
        assert_eq!(overlaps[0].part, HitboxPart::Body);
    }

    #[test]
    fn steep_shots_leave_the_shooter_untouched() {
        let resolver = HitResolver::default();
        let mut pool = ProjectilePool::new(PoolConfig::default());
        let shooter = HitboxSet::new(Some(1), HitboxLayout::default(), Vec3::ZERO);
        // Muzzle point of a shot aimed steeply down starts inside the body box.
        let origin = Vec3::new(0.0, 1.6, 0.0) + Vec3::new(0.0, -0.8, 0.6).normalize() * 0.6;
        assert!(shooter.world_box(HitboxPart::Body).unwrap().expanded(0.1).contains(origin));
        pool.spawn(LaunchParams {
            owner_actor_id: Some(1),
            origin,
            velocity: Vec3::new(0.0, -0.8, 0.6).normalize() * 40.0,
            lifetime: 5.0,
            radius: 0.1,
            deals_damage: true,
            now: 0.0,
        });
        pool.tick(1.0 / 60.0, 1.0 / 60.0);

        assert!(resolver.detect(&pool, &[&shooter]).is_empty());
        assert_eq!(pool.active_count(), 1);

        let friendly_fire_on = HitResolver::new(CombatConfig {
            ignore_friendly_fire: false,
            ..CombatConfig::default()
        });
        assert_eq!(friendly_fire_on.detect(&pool, &[&shooter]).len(), 1);
    }

    #[test]
    fn sweep_catches_fast_projectiles() {
        let body = Aabb::from_center(Vec3::new(0.0, 1.0, 0.0), Vec3::splat(0.3));
        // 2 units per frame would skip the box with a point test at both ends.
        assert!(body.swept_sphere(Vec3::new(0.0, 1.0, -1.0), Vec3::new(0.0, 1.0, 1.0), 0.1));
        assert!(!body.swept_sphere(Vec3::new(1.0, 1.0, -1.0), Vec3::new(1.0, 1.0, 1.0), 0.1));
        assert!(!body.contains(Vec3::new(0.0, 1.0, -1.0)));
    }
}
