//! Player movement: owner-side kinematics and remote interpolation
//!
//! The owner integrates input into a pose and emits snapshots at the send
//! rate. Every other peer snaps to the first snapshot it receives and then
//! interpolates towards the latest one each frame.

use glam::{EulerRot, Quat, Vec3};
use tracing::debug;

use crate::ws::protocol::MovementSnapshot;

/// Movement tuning
#[derive(Debug, Clone, Copy)]
pub struct MovementConfig {
    pub walk_speed: f32,
    pub run_speed: f32,
    /// Speed change per second
    pub acceleration: f32,
    /// Remote position smoothing factor per second
    pub position_lerp_speed: f32,
    /// Remote rotation smoothing factor per second
    pub rotation_lerp_speed: f32,
    /// Jump apex height in world units
    pub jump_height: f32,
    pub gravity: f32,
    /// Downward velocity held while standing
    pub grounded_stick: f32,
    /// `None` uses the contact heuristic only
    pub ground_probe: Option<GroundProbe>,
    pub run_mode: RunMode,
    /// Degrees
    pub min_pitch: f32,
    /// Degrees
    pub max_pitch: f32,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            walk_speed: 6.0,
            run_speed: 9.0,
            acceleration: 20.0,
            position_lerp_speed: 10.0,
            rotation_lerp_speed: 10.0,
            jump_height: 1.6,
            gravity: -9.81,
            grounded_stick: -2.0,
            ground_probe: Some(GroundProbe::default()),
            run_mode: RunMode::Hold,
            min_pitch: -85.0,
            max_pitch: 85.0,
        }
    }
}

/// Sphere check just above the feet
#[derive(Debug, Clone, Copy)]
pub struct GroundProbe {
    /// Height of the sphere center above the feet
    pub offset: f32,
    pub radius: f32,
}

impl Default for GroundProbe {
    fn default() -> Self {
        Self {
            offset: 0.05,
            radius: 0.4,
        }
    }
}

/// How the run input is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Run while the key is held
    Hold,
    /// Each press flips between walking and running
    Toggle,
}

/// Ground height lookup
pub trait Terrain {
    fn height_at(&self, x: f32, z: f32) -> f32;
}

/// Infinite plane at a fixed height
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatTerrain {
    pub height: f32,
}

impl Terrain for FlatTerrain {
    fn height_at(&self, _x: f32, _z: f32) -> f32 {
        self.height
    }
}

/// Input sampled for one owner frame
#[derive(Debug, Clone, Copy, Default)]
pub struct MoveInput {
    /// Strafe axis, -1..1
    pub horizontal: f32,
    /// Forward axis, -1..1
    pub vertical: f32,
    /// Run key is down
    pub run: bool,
    /// Jump was pressed this frame
    pub jump: bool,
    /// Mouse look yaw in degrees
    pub yaw_delta: f32,
    /// Mouse look pitch in degrees (positive looks down)
    pub pitch_delta: f32,
}

/// Time-limited multiplier
#[derive(Debug, Clone, Copy, PartialEq)]
struct Boost {
    multiplier: f32,
    remaining: f32,
}

impl Boost {
    fn tick(slot: &mut Option<Boost>, dt: f32) {
        if let Some(boost) = slot {
            boost.remaining -= dt;
            if boost.remaining <= 0.0 {
                *slot = None;
            }
        }
    }

    fn factor(slot: &Option<Boost>) -> f32 {
        slot.map(|b| b.multiplier).unwrap_or(1.0)
    }
}

/// Replicates one player object
#[derive(Debug, Clone)]
pub struct MovementReplicator {
    config: MovementConfig,
    is_owner: bool,

    position: Vec3,
    rotation: Quat,
    vertical_velocity: f32,

    // Owner state
    current_speed: f32,
    yaw: f32,
    pitch: f32,
    running: bool,
    run_was_down: bool,
    grounded: bool,
    speed_boost: Option<Boost>,
    jump_boost: Option<Boost>,

    // Remote state
    target: Option<MovementSnapshot>,
    last_sent_at: Option<f64>,
}

impl MovementReplicator {
    pub fn new(config: MovementConfig, spawn: Vec3, is_owner: bool) -> Self {
        Self {
            config,
            is_owner,
            position: spawn,
            rotation: Quat::IDENTITY,
            vertical_velocity: 0.0,
            current_speed: config.walk_speed,
            yaw: 0.0,
            pitch: 0.0,
            running: false,
            run_was_down: false,
            grounded: false,
            speed_boost: None,
            jump_boost: None,
            target: None,
            last_sent_at: None,
        }
    }

    pub fn is_owner(&self) -> bool {
        self.is_owner
    }

    /// Integrate one frame of local input
    pub fn step_owner(&mut self, input: &MoveInput, dt: f32, terrain: &dyn Terrain) {
        if !self.is_owner {
            debug!("step_owner called on a remote replica");
            return;
        }

        self.update_look(input);
        self.update_running(input.run);
        Boost::tick(&mut self.speed_boost, dt);
        Boost::tick(&mut self.jump_boost, dt);

        let local = Vec3::new(input.horizontal, 0.0, input.vertical).clamp_length_max(1.0);
        let desired = self.rotation * local;

        let base = if self.running {
            self.config.run_speed
        } else {
            self.config.walk_speed
        };
        let target_speed = base * Boost::factor(&self.speed_boost) * local.length();
        self.current_speed =
            move_towards(self.current_speed, target_speed, self.config.acceleration * dt);

        let ground = terrain.height_at(self.position.x, self.position.z);
        self.grounded = self.is_grounded(ground);

        if self.grounded {
            if self.vertical_velocity < 0.0 {
                self.vertical_velocity = self.config.grounded_stick;
            }
            if input.jump {
                let height = self.config.jump_height * Boost::factor(&self.jump_boost);
                self.vertical_velocity = (height * -2.0 * self.config.gravity).sqrt();
            }
        } else {
            self.vertical_velocity += self.config.gravity * dt;
        }

        let motion = desired * self.current_speed + Vec3::Y * self.vertical_velocity;
        self.position += motion * dt;

        let ground = terrain.height_at(self.position.x, self.position.z);
        if self.position.y < ground {
            self.position.y = ground;
        }
    }

    fn update_look(&mut self, input: &MoveInput) {
        self.yaw = (self.yaw + input.yaw_delta).rem_euclid(360.0);
        self.pitch =
            (self.pitch + input.pitch_delta).clamp(self.config.min_pitch, self.config.max_pitch);
        self.rotation = Quat::from_rotation_y(self.yaw.to_radians());
    }

    fn update_running(&mut self, run_down: bool) {
        match self.config.run_mode {
            RunMode::Hold => self.running = run_down,
            RunMode::Toggle => {
                if run_down && !self.run_was_down {
                    self.running = !self.running;
                }
            }
        }
        self.run_was_down = run_down;
    }

    fn is_grounded(&self, ground: f32) -> bool {
        let contact = self.position.y <= ground + 1e-3;
        let falling = self.vertical_velocity <= 0.0;
        match self.config.ground_probe {
            // A rising player never counts as grounded by the probe alone
            Some(probe) => {
                let center = self.position.y + probe.offset;
                contact || (falling && center - probe.radius <= ground)
            }
            None => contact && falling,
        }
    }

    /// Current pose for the movement stream
    pub fn snapshot(&self) -> MovementSnapshot {
        MovementSnapshot {
            position: self.position,
            rotation: self.rotation,
            vertical_velocity: self.vertical_velocity,
        }
    }

    /// Accept a streamed pose stamped with the relay's send time.
    /// Returns false when the sample was dropped.
    pub fn receive(&mut self, snapshot: MovementSnapshot, sent_at: f64) -> bool {
        if self.is_owner {
            return false;
        }
        if let Some(last) = self.last_sent_at {
            if sent_at < last {
                debug!(sent_at, last, "dropping stale movement snapshot");
                return false;
            }
        }
        if self.target.is_none() {
            self.position = snapshot.position;
            self.rotation = snapshot.rotation;
        }
        self.vertical_velocity = snapshot.vertical_velocity;
        self.target = Some(snapshot);
        self.last_sent_at = Some(sent_at);
        true
    }

    /// Move the visible pose towards the last received target
    pub fn step_remote(&mut self, dt: f32) {
        let Some(target) = self.target else {
            return;
        };
        let tp = (dt * self.config.position_lerp_speed).clamp(0.0, 1.0);
        let tr = (dt * self.config.rotation_lerp_speed).clamp(0.0, 1.0);
        self.position = self.position.lerp(target.position, tp);
        // glam's slerp takes the shortest arc
        self.rotation = self.rotation.slerp(target.rotation, tr).normalize();
    }

    /// Multiply movement speed for `duration` seconds
    pub fn apply_speed_boost(&mut self, multiplier: f32, duration: f32) {
        self.speed_boost = Some(Boost {
            multiplier,
            remaining: duration,
        });
    }

    /// Multiply jump height for `duration` seconds
    pub fn apply_jump_boost(&mut self, multiplier: f32, duration: f32) {
        self.jump_boost = Some(Boost {
            multiplier,
            remaining: duration,
        });
    }

    pub fn speed_multiplier(&self) -> f32 {
        Boost::factor(&self.speed_boost)
    }

    pub fn jump_multiplier(&self) -> f32 {
        Boost::factor(&self.jump_boost)
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn rotation(&self) -> Quat {
        self.rotation
    }

    pub fn vertical_velocity(&self) -> f32 {
        self.vertical_velocity
    }

    pub fn current_speed(&self) -> f32 {
        self.current_speed
    }

    pub fn is_grounded_now(&self) -> bool {
        self.grounded
    }

    /// Unit vector the player looks along (yaw and pitch)
    pub fn aim_direction(&self) -> Vec3 {
        let look = Quat::from_euler(
            EulerRot::YXZ,
            self.yaw.to_radians(),
            self.pitch.to_radians(),
            0.0,
        );
        (look * Vec3::Z).normalize_or_zero()
    }

    /// Teleport (spawn). Remote replicas also drop their target.
    pub fn place(&mut self, position: Vec3) {
        self.position = position;
        self.vertical_velocity = 0.0;
        self.target = None;
    }
}

fn move_towards(current: f32, target: f32, max_delta: f32) -> f32 {
    if (target - current).abs() <= max_delta {
        target
    } else {
        current + (target - current).signum() * max_delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f32 = 1.0 / 60.0;

    fn owner() -> MovementReplicator {
        MovementReplicator::new(MovementConfig::default(), Vec3::ZERO, true)
    }

    fn remote() -> MovementReplicator {
        MovementReplicator::new(MovementConfig::default(), Vec3::ZERO, false)
    }

    fn snap(x: f32) -> MovementSnapshot {
        MovementSnapshot {
            position: Vec3::new(x, 0.0, 0.0),
            ..MovementSnapshot::default()
        }
    }

    #[test]
    fn diagonal_input_is_clamped_to_unit_length() {
        let mut a = owner();
        let mut b = owner();
        let ground = FlatTerrain::default();
        let diagonal = MoveInput {
            horizontal: 1.0,
            vertical: 1.0,
            ..MoveInput::default()
        };
        let straight = MoveInput {
            vertical: 1.0,
            ..MoveInput::default()
        };
        for _ in 0..60 {
            a.step_owner(&diagonal, DT, &ground);
            b.step_owner(&straight, DT, &ground);
        }
        let da = Vec3::new(a.position().x, 0.0, a.position().z).length();
        let db = Vec3::new(b.position().x, 0.0, b.position().z).length();
        assert!((da - db).abs() < 1e-3);
    }

    #[test]
    fn speed_approaches_run_speed_at_acceleration() {
        let mut r = owner();
        let ground = FlatTerrain::default();
        let input = MoveInput {
            vertical: 1.0,
            run: true,
            ..MoveInput::default()
        };
        r.step_owner(&input, 0.05, &ground);
        assert!((r.current_speed() - 7.0).abs() < 1e-4);
        for _ in 0..10 {
            r.step_owner(&input, 0.05, &ground);
        }
        assert_eq!(r.current_speed(), 9.0);
    }

    #[test]
    fn toggle_run_flips_on_press() {
        let config = MovementConfig {
            run_mode: RunMode::Toggle,
            ..MovementConfig::default()
        };
        let mut r = MovementReplicator::new(config, Vec3::ZERO, true);
        let ground = FlatTerrain::default();
        let press = MoveInput {
            vertical: 1.0,
            run: true,
            ..MoveInput::default()
        };
        let release = MoveInput {
            vertical: 1.0,
            ..MoveInput::default()
        };
        r.step_owner(&press, DT, &ground);
        for _ in 0..60 {
            r.step_owner(&release, DT, &ground);
        }
        assert_eq!(r.current_speed(), 9.0);
    }

    #[test]
    fn jump_uses_height_formula_and_gravity_pulls_back() {
        let mut r = owner();
        let ground = FlatTerrain::default();
        r.step_owner(&MoveInput::default(), DT, &ground);
        assert_eq!(r.vertical_velocity(), 0.0);

        let jump = MoveInput {
            jump: true,
            ..MoveInput::default()
        };
        r.step_owner(&jump, DT, &ground);
        let expected = (1.6f32 * 2.0 * 9.81).sqrt();
        assert!((r.vertical_velocity() - expected).abs() < 1e-4);

        let mut peak = 0.0f32;
        for _ in 0..120 {
            r.step_owner(&MoveInput::default(), DT, &ground);
            peak = peak.max(r.position().y);
        }
        assert!(peak > 1.0 && peak < 1.8);
        assert_eq!(r.position().y, 0.0);
        assert_eq!(r.vertical_velocity(), -2.0);
    }

    #[test]
    fn jump_boost_raises_the_apex() {
        let mut plain = owner();
        let mut boosted = owner();
        boosted.apply_jump_boost(2.0, 5.0);
        let ground = FlatTerrain::default();
        let jump = MoveInput {
            jump: true,
            ..MoveInput::default()
        };
        plain.step_owner(&jump, DT, &ground);
        boosted.step_owner(&jump, DT, &ground);
        let ratio = boosted.vertical_velocity() / plain.vertical_velocity();
        assert!((ratio - 2f32.sqrt()).abs() < 1e-4);
    }

    #[test]
    fn speed_boost_expires() {
        let mut r = owner();
        r.apply_speed_boost(2.0, 0.5);
        let ground = FlatTerrain::default();
        assert_eq!(r.speed_multiplier(), 2.0);
        for _ in 0..31 {
            r.step_owner(&MoveInput::default(), DT, &ground);
        }
        assert_eq!(r.speed_multiplier(), 1.0);
    }

    #[test]
    fn contact_heuristic_without_probe() {
        let config = MovementConfig {
            ground_probe: None,
            ..MovementConfig::default()
        };
        let mut r = MovementReplicator::new(config, Vec3::new(0.0, 0.3, 0.0), true);
        let ground = FlatTerrain::default();
        // 0.3 above the ground is within the probe sphere but not in contact.
        r.step_owner(&MoveInput::default(), DT, &ground);
        assert!(!r.is_grounded_now());
        assert!(r.vertical_velocity() < 0.0);
    }

    #[test]
    fn first_snapshot_snaps_then_interpolates() {
        let mut r = remote();
        assert!(r.receive(snap(10.0), 1.0));
        assert_eq!(r.position().x, 10.0);

        assert!(r.receive(snap(20.0), 1.05));
        r.step_remote(0.05);
        // lerp factor = 0.05 * 10 = 0.5
        assert!((r.position().x - 15.0).abs() < 1e-4);

        // No new data: keep closing in on the last target.
        for _ in 0..100 {
            r.step_remote(DT);
        }
        assert!((r.position().x - 20.0).abs() < 1e-3);
    }

    #[test]
    fn stale_snapshots_are_dropped() {
        let mut r = remote();
        r.receive(snap(1.0), 2.0);
        assert!(!r.receive(snap(99.0), 1.5));
        for _ in 0..200 {
            r.step_remote(DT);
        }
        assert!((r.position().x - 1.0).abs() < 1e-3);
    }

    #[test]
    fn remote_rotation_slerps_towards_target() {
        let mut r = remote();
        r.receive(MovementSnapshot::default(), 0.0);
        let target = Quat::from_rotation_y(std::f32::consts::FRAC_PI_2);
        r.receive(
            MovementSnapshot {
                rotation: target,
                ..MovementSnapshot::default()
            },
            0.1,
        );
        for _ in 0..120 {
            r.step_remote(DT);
        }
        assert!(r.rotation().angle_between(target) < 1e-2);
    }

    #[test]
    fn owner_ignores_streamed_snapshots() {
        let mut r = owner();
        assert!(!r.receive(snap(5.0), 0.0));
        assert_eq!(r.position(), Vec3::ZERO);
    }

    #[test]
    fn pitch_is_clamped() {
        let mut r = owner();
        let ground = FlatTerrain::default();
        let look = MoveInput {
            pitch_delta: 400.0,
            ..MoveInput::default()
        };
        r.step_owner(&look, DT, &ground);
        let dir = r.aim_direction();
        assert!((dir.length() - 1.0).abs() < 1e-4);
        assert!(dir.z > 0.0);
    }
}
