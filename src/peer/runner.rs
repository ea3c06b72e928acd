//! Frame loop driving one peer over a transport

use std::future::Future;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::game::movement::MoveInput;
use crate::game::snapshot::StreamStats;
use crate::util::time::{frame_delta, frame_interval};
use crate::ws::protocol::ClientMsg;

use super::context::{FrameInput, Peer, PeerEvent, Scene};
use super::transport::{Transport, TransportError, TransportEvent};

/// How the loop runs
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub room: String,
    pub frame_rate: u32,
    pub send_rate: u32,
    /// Start the countdown once master and this many actors are present (0 disables)
    pub auto_start_players: usize,
    /// Character published after joining
    pub character_index: Option<usize>,
}

/// What a finished run did
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub frames: u64,
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub movement: StreamStats,
    /// Whether the relay confirmed the final leave
    pub confirmed_leave: bool,
}

/// Scripted input for headless peers
#[derive(Debug, Clone)]
pub struct BotPilot {
    rng: ChaCha8Rng,
    current: MoveInput,
    hold: f32,
}

impl BotPilot {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            current: MoveInput::default(),
            hold: 0.0,
        }
    }

    /// Input for the next frame. Picks a new heading every 0.5 to 2 seconds.
    pub fn next_input(&mut self, dt: f32) -> FrameInput {
        self.hold -= dt;
        if self.hold <= 0.0 {
            self.hold = self.rng.gen_range(0.5..2.0);
            self.current = MoveInput {
                horizontal: self.rng.gen_range(-1.0..=1.0),
                vertical: self.rng.gen_range(-1.0..=1.0),
                run: self.rng.gen_bool(0.3),
                jump: false,
                yaw_delta: self.rng.gen_range(-45.0..45.0),
                pitch_delta: 0.0,
            };
        }

        let mut movement = self.current;
        movement.jump = self.rng.gen_bool(0.01);
        // Turn once per heading change
        self.current.yaw_delta = 0.0;

        FrameInput {
            movement,
            fire: self.rng.gen_bool(0.05),
        }
    }
}

/// Run `peer` until it is back in the lobby.
///
/// Joins `options.room`, then steps the peer once per frame: drain the
/// transport, step, flush the outbox. When `shutdown` resolves the peer
/// leaves the room and the loop ends once the leave completes.
pub async fn run_peer<T, S>(
    mut peer: Peer,
    mut transport: T,
    mut pilot: BotPilot,
    options: RunOptions,
    shutdown: S,
) -> Result<RunSummary, TransportError>
where
    T: Transport,
    S: Future<Output = ()>,
{
    if !transport.is_connected() {
        return Err(TransportError::Closed);
    }

    let started = Instant::now();
    let dt = frame_delta(options.frame_rate);
    let mut ticker = interval(frame_interval(options.frame_rate));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tokio::pin!(shutdown);

    peer.set_rates(options.frame_rate, options.send_rate);
    peer.on_connected();
    peer.join_room(&options.room);

    let mut summary = RunSummary::default();
    let mut shutting_down = false;
    let mut joined = false;

    loop {
        if shutting_down {
            ticker.tick().await;
        } else {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = &mut shutdown => {
                    info!("shutdown requested, leaving room");
                    shutting_down = true;
                    peer.leave_room(started.elapsed().as_secs_f64());
                }
            }
        }

        let now = started.elapsed().as_secs_f64();
        summary.frames += 1;

        while let Some(event) = transport.try_recv() {
            match event {
                TransportEvent::Message(msg) => peer.handle_server_msg(msg, now),
                TransportEvent::Disconnected => peer.on_disconnected(),
            }
        }

        if should_auto_start(&peer, &options) {
            peer.start_countdown(now);
        }

        let input = pilot.next_input(dt);
        peer.step(&input, dt, now);
        flush(&mut peer, &mut transport, &mut summary);

        for event in peer.drain_events() {
            match event {
                PeerEvent::Joined { room, actor_id } => {
                    joined = true;
                    info!(room = %room, actor_id, "in room");
                    if let Some(index) = options.character_index {
                        peer.select_character(index, &format!("Character{index}"));
                    }
                }
                PeerEvent::LeftRoom { local_only } => {
                    summary.confirmed_leave = !local_only;
                    summary.movement = peer.stream_stats().clone();
                    info!(frames = summary.frames, local_only, "peer finished");
                    return Ok(summary);
                }
                PeerEvent::RelayError { code, message } if !joined => {
                    warn!(code = %code, message = %message, "could not join room");
                    return Err(TransportError::Connect(message));
                }
                other => debug!(event = ?other, "peer event"),
            }
        }

        // Flush what the event handlers queued
        flush(&mut peer, &mut transport, &mut summary);

        if !transport.is_connected() {
            warn!("transport closed before the peer left a room");
            return Err(TransportError::Closed);
        }
    }
}

fn should_auto_start(peer: &Peer, options: &RunOptions) -> bool {
    options.auto_start_players > 0
        && peer.is_master()
        && peer.scene() == Scene::Room
        && !peer.countdown().is_running()
        && peer.roster().len() >= options.auto_start_players
}

fn flush<T: Transport>(peer: &mut Peer, transport: &mut T, summary: &mut RunSummary) {
    for msg in peer.drain_outbox() {
        let lossy = is_lossy(&msg);
        match transport.send(msg) {
            Ok(()) => summary.messages_sent += 1,
            Err(TransportError::Full) => {
                if !lossy {
                    warn!("send queue full, message dropped");
                }
                summary.messages_dropped += 1;
            }
            Err(TransportError::Closed) => {
                peer.on_disconnected();
                break;
            }
            Err(e) => {
                warn!(error = %e, "failed to send message");
                summary.messages_dropped += 1;
            }
        }
    }
}

/// Movement samples may be dropped under back-pressure
fn is_lossy(msg: &ClientMsg) -> bool {
    matches!(msg, ClientMsg::Movement { .. })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::config::Tuning;
    use crate::peer::transport::LocalRelay;
    use crate::relay::RoomRegistry;

    fn options(room: &str) -> RunOptions {
        RunOptions {
            room: room.into(),
            frame_rate: 60,
            send_rate: 20,
            auto_start_players: 2,
            character_index: Some(1),
        }
    }

    #[test]
    fn pilot_is_deterministic_per_seed() {
        let mut a = BotPilot::new(9);
        let mut b = BotPilot::new(9);
        for _ in 0..120 {
            let (x, y) = (a.next_input(1.0 / 60.0), b.next_input(1.0 / 60.0));
            assert_eq!(x.fire, y.fire);
            assert_eq!(x.movement.horizontal, y.movement.horizontal);
            assert!((-1.0..=1.0).contains(&x.movement.vertical));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn solo_peer_joins_and_leaves_on_shutdown() {
        let relay = LocalRelay::new(Arc::new(RoomRegistry::new(4)));
        let peer = Peer::new("solo", Tuning::default(), 3);
        let summary = run_peer(
            peer,
            relay.connect(),
            BotPilot::new(3),
            options("arena"),
            tokio::time::sleep(Duration::from_secs(1)),
        )
        .await
        .unwrap();

        assert!(summary.confirmed_leave);
        assert!(summary.frames >= 60);
        assert_eq!(relay.registry().room_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_transport_is_an_error() {
        let relay = LocalRelay::new(Arc::new(RoomRegistry::new(4)));
        let mut transport = relay.connect();
        transport.disconnect();
        let result = run_peer(
            Peer::new("p", Tuning::default(), 1),
            transport,
            BotPilot::new(1),
            options("arena"),
            std::future::pending(),
        )
        .await;
        assert!(matches!(result, Err(TransportError::Closed)));
    }

    #[test]
    fn only_movement_is_lossy() {
        assert!(is_lossy(&ClientMsg::Movement {
            snapshot: Default::default()
        }));
        assert!(!is_lossy(&ClientMsg::LeaveRoom));
    }
}
