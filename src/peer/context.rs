//! Peer session context
//!
//! One `Peer` per participant. It owns everything the frame loop needs: the
//! roster, avatars, projectile pool, countdown, scheduler and leave workflow.
//! Inbound relay messages go through [`Peer::handle_server_msg`], outbound
//! traffic is queued in an outbox flushed by the runner.

use std::collections::BTreeMap;

use glam::Vec3;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use crate::config::Tuning;
use crate::game::combat::{DamageSink, DispatchError, HitOutcome, HitTarget, HitboxSet};
use crate::game::health::{DamageOutcome, HealthAuthority};
use crate::game::movement::{FlatTerrain, MoveInput, MovementReplicator};
use crate::game::powerup::{PowerUp, PowerUpField};
use crate::game::projectile::{FireControl, LaunchParams, ProjectilePool};
use crate::game::snapshot::{SnapshotCadence, StreamStats};
use crate::game::{resolve_ownership, HitResolver, Ownership, PlayerSession, Roster, SessionClock, SharedClock};
use crate::util::time::{FRAME_RATE, SEND_RATE};
use crate::ws::protocol::{
    keys, ActorId, ClientMsg, MovementSnapshot, PowerUpKind, PropValue, Properties, RpcCall,
    RpcTarget, ServerMsg,
};

use super::leave::{LeavePath, LeaveTicket, LeaveWorkflow};
use super::scheduler::{Fired, FrameScheduler};

/// Actor id used while playing without a relay
pub const OFFLINE_ACTOR: ActorId = 0;

/// Seconds between clock sync pings
const CLOCK_PING_INTERVAL: f32 = 2.0;

/// Where the peer currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scene {
    Lobby,
    /// In a room, waiting for the match
    Room,
    Match,
}

/// Frame-driven tasks of a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerTask {
    CountdownWatch,
    CharacterWait,
    DeathLeave,
    LeaveTimeout,
    PowerUpSpawn,
    ClockPing,
}

/// Things the presentation layer may want to react to
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    Joined { room: String, actor_id: ActorId },
    PlayerJoined { actor_id: ActorId, nickname: String },
    PlayerLeft { actor_id: ActorId },
    MasterChanged { master_id: ActorId },
    CountdownStarted { start: f64, duration: f32 },
    CountdownCancelled,
    SceneLoaded { scene: Scene },
    AvatarSpawned { actor_id: ActorId, character_index: usize, position: Vec3 },
    HealthChanged { actor_id: ActorId, hp: i32 },
    Died { actor_id: ActorId },
    NameChanged { actor_id: ActorId, name: String },
    PowerUpSpawned { id: u64, kind: PowerUpKind, position: Vec3 },
    PowerUpConsumed { id: u64, by: ActorId },
    /// Back in the lobby; `local_only` when the relay never confirmed
    LeftRoom { local_only: bool },
    RelayError { code: String, message: String },
}

/// A player object in the match scene
#[derive(Debug, Clone)]
pub struct Avatar {
    pub actor_id: ActorId,
    pub ownership: Ownership,
    pub character_index: usize,
    pub movement: MovementReplicator,
    pub hitboxes: HitboxSet,
    pub health: HealthAuthority,
}

impl Avatar {
    fn new(actor_id: ActorId, ownership: Ownership, character_index: usize, position: Vec3, tuning: &Tuning) -> Self {
        let is_owner = ownership.is_owner();
        Self {
            actor_id,
            ownership,
            character_index,
            movement: MovementReplicator::new(tuning.movement, position, is_owner),
            hitboxes: HitboxSet::new(Some(actor_id), tuning.hitboxes, position),
            health: HealthAuthority::new(tuning.health, is_owner),
        }
    }
}

/// Local input for one frame
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameInput {
    pub movement: MoveInput,
    pub fire: bool,
}

/// Damage calls go straight to the outbox
struct OutboxSink<'a> {
    outbox: &'a mut Vec<ClientMsg>,
    online: bool,
}

impl DamageSink for OutboxSink<'_> {
    fn send_damage(&mut self, owner: ActorId, call: RpcCall) -> Result<(), DispatchError> {
        if !self.online {
            return Err(DispatchError::Disconnected);
        }
        self.outbox.push(ClientMsg::Rpc {
            target: RpcTarget::Actor(owner),
            call,
        });
        Ok(())
    }
}

/// Session context of one participant
pub struct Peer {
    tuning: Tuning,
    nickname: String,
    connected: bool,
    offline: bool,
    room: Option<String>,
    local_actor: Option<ActorId>,
    master: Option<ActorId>,
    roster: Roster,
    room_props: Properties,
    scene: Scene,
    avatars: BTreeMap<ActorId, Avatar>,
    pool: ProjectilePool,
    resolver: HitResolver,
    fire_control: FireControl,
    countdown: SessionClock,
    clock: SharedClock,
    scheduler: FrameScheduler<PeerTask>,
    leave: LeaveWorkflow,
    power_ups: PowerUpField,
    rng: ChaCha8Rng,
    cadence: SnapshotCadence,
    stats: StreamStats,
    terrain: FlatTerrain,
    outbox: Vec<ClientMsg>,
    events: Vec<PeerEvent>,
}

impl Peer {
    pub fn new(nickname: impl Into<String>, tuning: Tuning, seed: u64) -> Self {
        Self {
            nickname: nickname.into(),
            connected: false,
            offline: false,
            room: None,
            local_actor: None,
            master: None,
            roster: Roster::new(),
            room_props: Properties::new(),
            scene: Scene::Lobby,
            avatars: BTreeMap::new(),
            pool: ProjectilePool::new(tuning.pool),
            resolver: HitResolver::new(tuning.combat),
            fire_control: FireControl::default(),
            countdown: SessionClock::new(),
            clock: SharedClock::new(),
            scheduler: FrameScheduler::new(),
            leave: LeaveWorkflow::new(),
            power_ups: PowerUpField::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            cadence: SnapshotCadence::from_rates(FRAME_RATE, SEND_RATE),
            stats: StreamStats::default(),
            terrain: FlatTerrain::default(),
            outbox: Vec::new(),
            events: Vec::new(),
            tuning,
        }
    }

    /// Override the movement stream cadence (frames per second, samples per second)
    pub fn set_rates(&mut self, frame_rate: u32, send_rate: u32) {
        self.cadence = SnapshotCadence::from_rates(frame_rate, send_rate);
    }

    // ------------------------------------------------------------------
    // Connection and room life cycle
    // ------------------------------------------------------------------

    pub fn on_connected(&mut self) {
        self.connected = true;
    }

    /// The transport went away. Whatever room we were in is left locally.
    pub fn on_disconnected(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        self.outbox.clear();
        warn!(actor_id = ?self.local_actor, "disconnected from relay");

        if self.leave.finish() || self.local_actor.is_some() {
            self.complete_leave(true);
        }
    }

    /// Ask the relay to put us in `room`
    pub fn join_room(&mut self, room: &str) -> bool {
        if !self.connected {
            debug!(room = %room, "join ignored: not connected");
            return false;
        }
        if self.local_actor.is_some() || self.offline {
            debug!(room = %room, "join ignored: already in a room");
            return false;
        }
        self.outbox.push(ClientMsg::JoinRoom {
            room: room.to_string(),
            nickname: self.nickname.clone(),
        });
        true
    }

    /// Play without a relay: we own everything and act as master
    pub fn start_offline(&mut self) {
        if self.local_actor.is_some() {
            debug!("offline start ignored: in a relay room");
            return;
        }
        self.offline = true;
        self.room = Some("offline".to_string());
        self.roster.clear();
        self.roster.insert(PlayerSession::new(OFFLINE_ACTOR, self.nickname.clone()));
        self.master = Some(OFFLINE_ACTOR);
        self.scene = Scene::Room;
        info!("playing offline");
        self.events.push(PeerEvent::SceneLoaded { scene: Scene::Room });
    }

    /// Leave the room. Concurrent requests coalesce into one leave.
    pub fn leave_room(&mut self, local_now: f64) -> LeaveTicket {
        let now = self.clock.now(local_now);
        self.begin_leave(now)
    }

    fn begin_leave(&mut self, now: f64) -> LeaveTicket {
        let in_room = self.is_online();
        let (ticket, path) = self.leave.request(now, in_room);
        match path {
            Some(LeavePath::Relay) => {
                info!(room = ?self.room, "leaving room");
                self.outbox.push(ClientMsg::DestroyPlayerObjects);
                self.outbox.push(ClientMsg::LeaveRoom);
                self.scheduler
                    .after(PeerTask::LeaveTimeout, now, self.tuning.leave.confirm_timeout);
            }
            Some(LeavePath::Local) => self.complete_leave(true),
            None => {}
        }
        ticket
    }

    fn complete_leave(&mut self, local_only: bool) {
        let active: Vec<_> = self.pool.active().map(|p| p.id).collect();
        for id in active {
            self.pool.release(id);
        }
        self.avatars.clear();
        self.roster.clear();
        self.room_props.clear();
        self.power_ups.clear();
        self.scheduler.clear();
        self.countdown = SessionClock::new();
        self.clock.reset();
        self.room = None;
        self.local_actor = None;
        self.master = None;
        self.offline = false;
        self.scene = Scene::Lobby;

        info!(local_only, "back in lobby");
        self.events.push(PeerEvent::LeftRoom { local_only });
        self.events.push(PeerEvent::SceneLoaded { scene: Scene::Lobby });
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    /// Apply one message from the relay
    pub fn handle_server_msg(&mut self, msg: ServerMsg, local_now: f64) {
        match &msg {
            ServerMsg::Joined { server_time, .. } => self.clock.seed(*server_time, local_now),
            ServerMsg::Error { .. } => {}
            _ if self.local_actor.is_none() => {
                debug!(?msg, "relay message outside a room ignored");
                return;
            }
            _ => {}
        }
        let now = self.clock.now(local_now);

        match msg {
            ServerMsg::Joined {
                room,
                actor_id,
                master_id,
                players,
                room_props,
                ..
            } => {
                info!(room = %room, actor_id, master_id, "joined room");
                self.room = Some(room.clone());
                self.local_actor = Some(actor_id);
                self.master = Some(master_id);
                self.roster.clear();
                for player in players {
                    self.roster.insert(PlayerSession::from(player));
                }
                self.room_props = room_props;
                self.countdown.observe(&self.room_props);
                self.scene = Scene::Room;

                self.scheduler.every(PeerTask::ClockPing, now, CLOCK_PING_INTERVAL);
                self.outbox.push(ClientMsg::Ping { t: local_now });

                self.events.push(PeerEvent::Joined { room, actor_id });
                self.events.push(PeerEvent::SceneLoaded { scene: Scene::Room });
                if self.countdown.is_running() {
                    self.events.push(PeerEvent::CountdownStarted {
                        start: self.countdown.start_time(),
                        duration: self.countdown.duration(),
                    });
                }
                self.follow_room_scene(now);
            }
            ServerMsg::PlayerJoined { player } => {
                debug!(actor_id = player.actor_id, nickname = %player.nickname, "player joined");
                self.events.push(PeerEvent::PlayerJoined {
                    actor_id: player.actor_id,
                    nickname: player.nickname.clone(),
                });
                self.roster.insert(PlayerSession::from(player));
            }
            ServerMsg::PlayerLeft { actor_id } => {
                debug!(actor_id, "player left");
                self.roster.remove(actor_id);
                self.drop_objects_of(actor_id);
                self.events.push(PeerEvent::PlayerLeft { actor_id });
            }
            ServerMsg::MasterChanged { master_id } => self.on_master_changed(master_id, now),
            ServerMsg::Left => {
                if self.leave.finish() {
                    self.scheduler.cancel(PeerTask::LeaveTimeout);
                }
                self.complete_leave(false);
            }
            ServerMsg::Rpc { sender, call } => self.execute_rpc(sender, call, now),
            ServerMsg::RoomPropertiesChanged { sender, props } => {
                debug!(sender, keys = props.len(), "room properties changed");
                self.observe_room_props(props);
                self.follow_room_scene(now);
            }
            ServerMsg::PlayerPropertiesChanged { actor_id, props } => {
                if let Some(session) = self.roster.get_mut(actor_id) {
                    session.props.extend(props);
                }
            }
            ServerMsg::Movement {
                sender,
                sent_at,
                snapshot,
            } => self.on_movement(sender, sent_at, snapshot),
            ServerMsg::ObjectsDestroyed { actor_id } => self.drop_objects_of(actor_id),
            ServerMsg::Pong { t, server_time } => self.clock.on_pong(t, server_time, local_now),
            ServerMsg::Error { code, message } => {
                warn!(code = %code, message = %message, "relay error");
                self.events.push(PeerEvent::RelayError { code, message });
            }
        }
    }

    fn on_master_changed(&mut self, master_id: ActorId, now: f64) {
        info!(master_id, "master switched");
        self.master = Some(master_id);
        self.events.push(PeerEvent::MasterChanged { master_id });

        if !self.is_master() {
            self.scheduler.cancel(PeerTask::CountdownWatch);
            self.scheduler.cancel(PeerTask::PowerUpSpawn);
            return;
        }
        // Take over the master-only duties
        if self.countdown.is_running() {
            self.scheduler
                .every(PeerTask::CountdownWatch, now, self.tuning.countdown.watch_interval);
        }
        if self.scene == Scene::Match {
            self.scheduler
                .every(PeerTask::PowerUpSpawn, now, self.tuning.power_ups.spawn_interval);
        }
    }

    fn observe_room_props(&mut self, props: Properties) {
        let before = (self.countdown.start_time(), self.countdown.duration());
        let was_running = self.countdown.is_running();
        self.countdown.observe(&props);
        self.room_props.extend(props);

        let after = (self.countdown.start_time(), self.countdown.duration());
        if self.countdown.is_running() && before != after {
            self.events.push(PeerEvent::CountdownStarted {
                start: after.0,
                duration: after.1,
            });
        } else if was_running && !self.countdown.is_running() {
            self.scheduler.cancel(PeerTask::CountdownWatch);
            self.events.push(PeerEvent::CountdownCancelled);
        }
    }

    /// Late joiners load the scene the master already loaded
    fn follow_room_scene(&mut self, now: f64) {
        let in_match = matches!(
            self.room_props.get(keys::SCENE),
            Some(PropValue::Text(scene)) if *scene == self.tuning.countdown.session_scene
        );
        if in_match {
            self.enter_match(now);
        }
    }

    fn on_movement(&mut self, sender: ActorId, sent_at: f64, snapshot: MovementSnapshot) {
        if self.scene != Scene::Match || Some(sender) == self.local_actor {
            return;
        }
        if !self.avatars.contains_key(&sender) {
            self.spawn_remote_avatar(sender, snapshot.position);
        }
        if let Some(avatar) = self.avatars.get_mut(&sender) {
            let accepted = avatar.movement.receive(snapshot, sent_at);
            self.stats.record_received(accepted);
        }
    }

    fn drop_objects_of(&mut self, actor_id: ActorId) {
        if self.avatars.remove(&actor_id).is_some() {
            debug!(actor_id, "avatar removed");
        }
        let released = self.pool.release_owned_by(actor_id);
        if released > 0 {
            debug!(actor_id, released, "released projectiles of departed actor");
        }
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    /// Send a call. `All` runs it here first, then on everyone else.
    fn rpc(&mut self, target: RpcTarget, call: RpcCall, now: f64) {
        match target {
            RpcTarget::All => {
                self.send(ClientMsg::Rpc {
                    target: RpcTarget::Others,
                    call: call.clone(),
                });
                let me = self.own_actor().unwrap_or(OFFLINE_ACTOR);
                self.execute_rpc(me, call, now);
            }
            target => self.send(ClientMsg::Rpc { target, call }),
        }
    }

    fn execute_rpc(&mut self, sender: ActorId, call: RpcCall, now: f64) {
        match call {
            RpcCall::ApplyDamage {
                amount,
                is_head,
                attacker_actor_id,
                victim_actor_id,
            } => {
                let Some(avatar) = self.avatars.get_mut(&victim_actor_id) else {
                    debug!(victim = victim_actor_id, "damage for unknown avatar dropped");
                    return;
                };
                let outcome = avatar
                    .health
                    .apply_damage(amount, is_head, Some(attacker_actor_id));
                self.after_damage(victim_actor_id, outcome, now);
            }
            RpcCall::BroadcastHealth { actor_id, new_hp } => {
                let Some(avatar) = self.avatars.get_mut(&actor_id) else {
                    return;
                };
                let was_alive = avatar.health.is_alive();
                if avatar.health.apply_mirror(new_hp) {
                    let hp = avatar.health.current_hp();
                    let died = was_alive && !avatar.health.is_alive();
                    self.events.push(PeerEvent::HealthChanged { actor_id, hp });
                    if died {
                        self.events.push(PeerEvent::Died { actor_id });
                    }
                }
            }
            RpcCall::CancelCountdown => {
                let was_running = self.countdown.is_running();
                let update = self.countdown.cancel();
                if Some(sender) == self.own_actor() {
                    self.room_props.extend(update.clone());
                    self.send(ClientMsg::SetRoomProperties { props: update });
                }
                self.scheduler.cancel(PeerTask::CountdownWatch);
                if was_running {
                    info!(sender, "countdown cancelled");
                    self.events.push(PeerEvent::CountdownCancelled);
                }
            }
            RpcCall::UpdatePlayerName { actor_id, name } => {
                self.events.push(PeerEvent::NameChanged { actor_id, name });
            }
            RpcCall::LoadScene { scene } => {
                if scene == self.tuning.countdown.session_scene {
                    self.enter_match(now);
                } else {
                    warn!(scene = %scene, sender, "unknown scene requested");
                }
            }
            RpcCall::FireProjectile {
                origin,
                direction,
                speed,
                lifetime,
            } => {
                if self.scene != Scene::Match {
                    return;
                }
                self.pool.spawn(LaunchParams {
                    owner_actor_id: Some(sender),
                    origin,
                    velocity: direction.normalize_or_zero() * speed,
                    lifetime,
                    radius: self.tuning.weapon.projectile_radius,
                    deals_damage: false,
                    now,
                });
            }
            RpcCall::SpawnPowerUp { id, kind, position } => {
                self.power_ups.insert(PowerUp { id, kind, position });
                self.events.push(PeerEvent::PowerUpSpawned { id, kind, position });
            }
            RpcCall::ConsumePowerUp { id } => {
                if self.power_ups.remove(id).is_some() {
                    self.events.push(PeerEvent::PowerUpConsumed { id, by: sender });
                }
            }
        }
    }

    /// Broadcast the new HP of an avatar we own and handle its death
    fn after_damage(&mut self, victim: ActorId, outcome: DamageOutcome, now: f64) {
        let DamageOutcome::Applied { hp, died } = outcome else {
            return;
        };
        self.events.push(PeerEvent::HealthChanged { actor_id: victim, hp });
        self.send(ClientMsg::Rpc {
            target: RpcTarget::Others,
            call: RpcCall::BroadcastHealth {
                actor_id: victim,
                new_hp: hp,
            },
        });
        if died {
            self.events.push(PeerEvent::Died { actor_id: victim });
            if Some(victim) == self.own_actor() {
                self.scheduler
                    .after(PeerTask::DeathLeave, now, self.tuning.health.death_leave_delay);
            }
        }
    }

    // ------------------------------------------------------------------
    // Local actions
    // ------------------------------------------------------------------

    /// Start the shared countdown (master only, in a room)
    pub fn start_countdown(&mut self, local_now: f64) -> bool {
        let now = self.clock.now(local_now);
        if self.scene != Scene::Room {
            debug!(scene = ?self.scene, "countdown start ignored outside a room");
            return false;
        }
        let is_master = self.is_master();
        let Some(update) = self
            .countdown
            .start(is_master, now, self.tuning.countdown.duration)
        else {
            return false;
        };

        info!(start = now, duration = self.tuning.countdown.duration, "countdown started");
        self.room_props.extend(update.clone());
        self.send(ClientMsg::SetRoomProperties { props: update });
        self.scheduler
            .every(PeerTask::CountdownWatch, now, self.tuning.countdown.watch_interval);
        self.events.push(PeerEvent::CountdownStarted {
            start: self.countdown.start_time(),
            duration: self.countdown.duration(),
        });
        true
    }

    /// Cancel the countdown on every peer
    pub fn cancel_countdown(&mut self, local_now: f64) {
        let now = self.clock.now(local_now);
        self.rpc(RpcTarget::All, RpcCall::CancelCountdown, now);
    }

    fn watch_countdown(&mut self, now: f64) {
        if !self.is_master() || !self.countdown.is_running() {
            self.scheduler.cancel(PeerTask::CountdownWatch);
            return;
        }
        if !self.countdown.is_complete(now) {
            return;
        }
        self.scheduler.cancel(PeerTask::CountdownWatch);
        info!("countdown complete, loading match");
        self.rpc(RpcTarget::All, RpcCall::CancelCountdown, now);
        let scene = self.tuning.countdown.session_scene.clone();
        let mut props = Properties::new();
        props.insert(keys::SCENE.to_string(), PropValue::Text(scene.clone()));
        self.room_props.extend(props.clone());
        self.send(ClientMsg::SetRoomProperties { props });
        self.rpc(RpcTarget::All, RpcCall::LoadScene { scene }, now);
    }

    /// Publish a display name for ourselves
    pub fn set_player_name(&mut self, name: &str) -> bool {
        let name = name.trim();
        let Some(me) = self.own_actor() else {
            return false;
        };
        if name.is_empty() {
            return false;
        }

        let mut props = Properties::new();
        props.insert(keys::player_name(me), PropValue::Text(name.to_string()));
        self.room_props.extend(props.clone());
        self.send(ClientMsg::SetRoomProperties { props });
        self.send(ClientMsg::Rpc {
            target: RpcTarget::Others,
            call: RpcCall::UpdatePlayerName {
                actor_id: me,
                name: name.to_string(),
            },
        });
        self.events.push(PeerEvent::NameChanged {
            actor_id: me,
            name: name.to_string(),
        });
        true
    }

    /// Publish our character selection
    pub fn select_character(&mut self, index: usize, prefab: &str) -> bool {
        let Some(me) = self.own_actor() else {
            return false;
        };
        let mut props = Properties::new();
        props.insert(keys::CHARACTER_INDEX.to_string(), PropValue::Int(index as i64));
        props.insert(keys::CHARACTER_PREFAB.to_string(), PropValue::Text(prefab.to_string()));

        if let Some(session) = self.roster.get_mut(me) {
            session.props.extend(props.clone());
        }
        self.send(ClientMsg::SetPlayerProperties { props });
        true
    }

    /// Fire the local avatar's weapon
    pub fn fire(&mut self, local_now: f64) -> bool {
        let now = self.clock.now(local_now);
        self.fire_at(now)
    }

    fn fire_at(&mut self, now: f64) -> bool {
        let Some(me) = self.own_actor() else {
            return false;
        };
        let Some(avatar) = self.avatars.get(&me) else {
            return false;
        };
        if !avatar.health.is_alive() {
            return false;
        }
        let weapon = self.tuning.weapon;
        if !self.fire_control.try_fire(now, weapon.fire_interval) {
            return false;
        }

        let aim = avatar.movement.aim_direction();
        let origin = avatar.movement.position() + weapon.muzzle_offset + aim * weapon.muzzle_forward;
        self.pool.spawn(LaunchParams {
            owner_actor_id: Some(me),
            origin,
            velocity: aim * weapon.projectile_speed,
            lifetime: weapon.projectile_lifetime,
            radius: weapon.projectile_radius,
            deals_damage: true,
            now,
        });
        self.send(ClientMsg::Rpc {
            target: RpcTarget::Others,
            call: RpcCall::FireProjectile {
                origin,
                direction: aim,
                speed: weapon.projectile_speed,
                lifetime: weapon.projectile_lifetime,
            },
        });
        true
    }

    // ------------------------------------------------------------------
    // Frame
    // ------------------------------------------------------------------

    /// Advance one frame
    pub fn step(&mut self, input: &FrameInput, dt: f32, local_now: f64) {
        let now = self.clock.now(local_now);
        self.run_tasks(now, local_now);

        if self.scene != Scene::Match {
            return;
        }
        self.step_avatars(&input.movement, dt);
        if input.fire {
            self.fire_at(now);
        }
        self.pool.tick(now, dt);
        self.resolve_hits(now);
        self.pick_up_power_ups(now);
        self.stream_movement();
    }

    fn run_tasks(&mut self, now: f64, local_now: f64) {
        let me = self.own_actor();
        let roster = &self.roster;
        let fired = self.scheduler.poll(now, |task| match task {
            PeerTask::CharacterWait => me
                .and_then(|id| roster.get(id))
                .and_then(PlayerSession::character_index)
                .is_some(),
            _ => false,
        });

        for fired in fired {
            match fired {
                Fired::Due(PeerTask::CountdownWatch) => self.watch_countdown(now),
                Fired::Due(PeerTask::CharacterWait) => self.spawn_own_avatar(),
                Fired::TimedOut(PeerTask::CharacterWait) => {
                    debug!("no character selected in time, using default");
                    self.spawn_own_avatar();
                }
                Fired::Due(PeerTask::DeathLeave) => {
                    self.begin_leave(now);
                }
                Fired::Due(PeerTask::LeaveTimeout) | Fired::TimedOut(PeerTask::LeaveTimeout) => {
                    if self.leave.finish() {
                        warn!("leave not confirmed in time, leaving locally");
                        self.complete_leave(true);
                    }
                }
                Fired::Due(PeerTask::PowerUpSpawn) => self.spawn_power_up(now),
                Fired::Due(PeerTask::ClockPing) => self.send(ClientMsg::Ping { t: local_now }),
                Fired::TimedOut(task) => debug!(?task, "task timed out"),
            }
        }
    }

    fn enter_match(&mut self, now: f64) {
        if self.scene == Scene::Match {
            return;
        }
        info!(actor_id = ?self.own_actor(), "entering match");
        self.scene = Scene::Match;
        self.events.push(PeerEvent::SceneLoaded { scene: Scene::Match });
        self.scheduler
            .wait(PeerTask::CharacterWait, now, self.tuning.spawn.character_wait);
        if self.is_master() {
            self.scheduler
                .every(PeerTask::PowerUpSpawn, now, self.tuning.power_ups.spawn_interval);
        }
    }

    fn spawn_own_avatar(&mut self) {
        let Some(me) = self.own_actor() else {
            return;
        };
        if self.scene != Scene::Match || self.avatars.contains_key(&me) {
            return;
        }
        let character_index = self
            .roster
            .get(me)
            .and_then(PlayerSession::character_index)
            .unwrap_or(0);
        let position = self.tuning.spawn.point_for(me);
        let avatar = Avatar::new(me, Ownership::Owner, character_index, position, &self.tuning);
        self.avatars.insert(me, avatar);
        self.cadence.force_next();

        info!(actor_id = me, character_index, "avatar spawned");
        self.events.push(PeerEvent::AvatarSpawned {
            actor_id: me,
            character_index,
            position,
        });
    }

    fn spawn_remote_avatar(&mut self, actor_id: ActorId, position: Vec3) {
        let ownership = resolve_ownership(actor_id, self.local_actor);
        let character_index = self
            .roster
            .get(actor_id)
            .and_then(PlayerSession::character_index)
            .unwrap_or(0);
        let avatar = Avatar::new(actor_id, ownership, character_index, position, &self.tuning);
        self.avatars.insert(actor_id, avatar);
        self.events.push(PeerEvent::AvatarSpawned {
            actor_id,
            character_index,
            position,
        });
    }

    fn step_avatars(&mut self, input: &MoveInput, dt: f32) {
        let idle = MoveInput::default();
        for avatar in self.avatars.values_mut() {
            if avatar.ownership.is_owner() {
                let input = if avatar.health.is_alive() { input } else { &idle };
                avatar.movement.step_owner(input, dt, &self.terrain);
            } else {
                avatar.movement.step_remote(dt);
            }
            avatar.hitboxes.set_origin(avatar.movement.position());
        }
    }

    fn resolve_hits(&mut self, now: f64) {
        let ids: Vec<ActorId> = self.avatars.keys().copied().collect();
        let overlaps = {
            let targets: Vec<&HitboxSet> = self.avatars.values().map(|a| &a.hitboxes).collect();
            self.resolver.detect(&self.pool, &targets)
        };

        let online = self.is_online();
        for overlap in overlaps {
            if !overlap.deals_damage {
                // Remote shooters resolve their own hits
                self.pool.release(overlap.projectile_id);
                continue;
            }
            let victim = ids[overlap.target];
            let Some(avatar) = self.avatars.get_mut(&victim) else {
                continue;
            };
            let mut sink = OutboxSink {
                outbox: &mut self.outbox,
                online,
            };
            let outcome = self.resolver.resolve(
                &mut self.pool,
                overlap.projectile_id,
                overlap.part,
                HitTarget {
                    hitboxes: &avatar.hitboxes,
                    ownership: avatar.ownership,
                    health: &mut avatar.health,
                },
                &mut sink,
            );
            debug!(?outcome, "hit resolved");
            if let HitOutcome::Applied { target, outcome, .. } = outcome {
                self.after_damage(target, outcome, now);
            }
        }
    }

    fn spawn_power_up(&mut self, now: f64) {
        if !self.is_master() {
            self.scheduler.cancel(PeerTask::PowerUpSpawn);
            return;
        }
        let spawner = self.own_actor().unwrap_or(OFFLINE_ACTOR);
        let Some(power_up) = self
            .power_ups
            .roll(&mut self.rng, spawner, &self.tuning.spawn.spawn_points)
        else {
            return;
        };
        debug!(id = power_up.id, kind = ?power_up.kind, "spawning power-up");
        self.rpc(
            RpcTarget::All,
            RpcCall::SpawnPowerUp {
                id: power_up.id,
                kind: power_up.kind,
                position: power_up.position,
            },
            now,
        );
    }

    fn pick_up_power_ups(&mut self, now: f64) {
        let Some(me) = self.own_actor() else {
            return;
        };
        let config = self.tuning.power_ups;
        let Some(avatar) = self.avatars.get_mut(&me) else {
            return;
        };
        if !avatar.health.is_alive() {
            return;
        }
        let Some(power_up) = self
            .power_ups
            .touching(avatar.movement.position(), config.pickup_radius)
        else {
            return;
        };

        config.apply(power_up.kind, &mut avatar.movement);
        info!(actor_id = me, id = power_up.id, kind = ?power_up.kind, "power-up picked up");
        self.rpc(RpcTarget::All, RpcCall::ConsumePowerUp { id: power_up.id }, now);
    }

    fn stream_movement(&mut self) {
        let Some(me) = self.local_actor else {
            return;
        };
        if !self.is_online() || !self.cadence.should_send() {
            return;
        }
        let Some(avatar) = self.avatars.get(&me) else {
            return;
        };
        let snapshot = avatar.movement.snapshot();
        self.outbox.push(ClientMsg::Movement { snapshot });
        self.stats.sent += 1;
    }

    // ------------------------------------------------------------------
    // Outbox and events
    // ------------------------------------------------------------------

    fn send(&mut self, msg: ClientMsg) {
        if self.is_online() {
            self.outbox.push(msg);
        } else {
            debug!(?msg, "not in a relay room, message dropped");
        }
    }

    /// Messages to hand to the transport, in order
    pub fn drain_outbox(&mut self) -> Vec<ClientMsg> {
        std::mem::take(&mut self.outbox)
    }

    pub fn drain_events(&mut self) -> Vec<PeerEvent> {
        std::mem::take(&mut self.events)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    fn is_online(&self) -> bool {
        self.connected && self.local_actor.is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_offline(&self) -> bool {
        self.offline
    }

    /// Our actor id: relay-assigned, or [`OFFLINE_ACTOR`] offline
    pub fn own_actor(&self) -> Option<ActorId> {
        if self.offline {
            return Some(OFFLINE_ACTOR);
        }
        self.local_actor
    }

    pub fn local_actor(&self) -> Option<ActorId> {
        self.local_actor
    }

    pub fn master(&self) -> Option<ActorId> {
        self.master
    }

    pub fn is_master(&self) -> bool {
        self.offline || (self.master.is_some() && self.master == self.local_actor)
    }

    pub fn room(&self) -> Option<&str> {
        self.room.as_deref()
    }

    pub fn scene(&self) -> Scene {
        self.scene
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn room_props(&self) -> &Properties {
        &self.room_props
    }

    pub fn display_name(&self, actor_id: ActorId) -> Option<String> {
        self.roster.display_name(actor_id, &self.room_props)
    }

    pub fn countdown(&self) -> &SessionClock {
        &self.countdown
    }

    /// Shared clock reading for `local_now`
    pub fn shared_now(&mut self, local_now: f64) -> f64 {
        self.clock.now(local_now)
    }

    /// Countdown seconds left as seen by this peer
    pub fn countdown_remaining(&mut self, local_now: f64) -> f64 {
        let now = self.clock.now(local_now);
        self.countdown.remaining(now)
    }

    pub fn avatar(&self, actor_id: ActorId) -> Option<&Avatar> {
        self.avatars.get(&actor_id)
    }

    pub fn avatar_mut(&mut self, actor_id: ActorId) -> Option<&mut Avatar> {
        self.avatars.get_mut(&actor_id)
    }

    pub fn own_avatar(&self) -> Option<&Avatar> {
        self.own_actor().and_then(|id| self.avatars.get(&id))
    }

    pub fn avatars(&self) -> impl Iterator<Item = &Avatar> {
        self.avatars.values()
    }

    pub fn pool(&self) -> &ProjectilePool {
        &self.pool
    }

    pub fn power_ups(&self) -> &PowerUpField {
        &self.power_ups
    }

    pub fn leave_workflow(&self) -> &LeaveWorkflow {
        &self.leave
    }

    pub fn is_scheduled(&self, task: PeerTask) -> bool {
        self.scheduler.is_scheduled(task)
    }

    pub fn stream_stats(&self) -> &StreamStats {
        &self.stats
    }

    pub fn tuning(&self) -> &Tuning {
        &self.tuning
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }
}
