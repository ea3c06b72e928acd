//! Room registry - owns rooms and per-connection outbound channels

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use crate::util::time::server_time_secs;
use crate::ws::protocol::{ActorId, ClientMsg, ServerMsg};

use super::room::{Delivery, Room};
use super::{validate_room_name, RelayError};

/// Outbound queue of one connection
pub type Outbound = mpsc::Sender<ServerMsg>;

/// Source of the shared session clock (seconds)
pub type RelayClock = Arc<dyn Fn() -> f64 + Send + Sync>;

struct RoomEntry {
    room: Room,
    outbound: HashMap<ActorId, Outbound>,
}

impl RoomEntry {
    fn new(name: &str, max_players: usize) -> Self {
        Self {
            room: Room::new(name, max_players),
            outbound: HashMap::new(),
        }
    }

    fn deliver(&self, deliveries: Vec<Delivery>) {
        for Delivery { to, msg } in deliveries {
            let Some(tx) = self.outbound.get(&to) else {
                continue;
            };
            match tx.try_send(msg) {
                Ok(()) => {}
                // Movement is a lossy stream
                Err(TrySendError::Full(ServerMsg::Movement { .. })) => {}
                Err(TrySendError::Full(msg)) => {
                    warn!(room = %self.room.name(), actor_id = to, ?msg, "outbound queue full, message dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(room = %self.room.name(), actor_id = to, "outbound queue closed");
                }
            }
        }
    }

    fn prune(&mut self) {
        let RoomEntry { room, outbound } = self;
        outbound.retain(|actor, _| room.contains(*actor));
    }
}

/// Room summary for the HTTP API
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RoomSummary {
    pub name: String,
    pub players: usize,
    pub master: Option<ActorId>,
    pub countdown_running: bool,
}

/// All rooms of the relay
pub struct RoomRegistry {
    rooms: DashMap<String, Arc<Mutex<RoomEntry>>>,
    max_players: usize,
    clock: RelayClock,
}

impl RoomRegistry {
    pub fn new(max_players: usize) -> Self {
        Self::with_clock(max_players, Arc::new(server_time_secs))
    }

    /// Registry reading the shared clock from `clock`
    pub fn with_clock(max_players: usize, clock: RelayClock) -> Self {
        Self {
            rooms: DashMap::new(),
            max_players,
            clock,
        }
    }

    pub fn server_time(&self) -> f64 {
        (self.clock)()
    }

    /// Join (creating if needed) a room. Returns the trimmed room name and the
    /// new actor id.
    pub fn join(
        &self,
        room_name: &str,
        nickname: &str,
        outbound: Outbound,
    ) -> Result<(String, ActorId), RelayError> {
        let name = validate_room_name(room_name)?.to_string();
        let now = self.server_time();

        let entry = self.rooms.entry(name.clone()).or_insert_with(|| {
            info!(room = %name, "room created");
            Arc::new(Mutex::new(RoomEntry::new(&name, self.max_players)))
        });
        let mut guard = entry.lock();
        let (actor_id, deliveries) = guard.room.join(nickname, now)?;
        guard.outbound.insert(actor_id, outbound);
        guard.deliver(deliveries);
        Ok((name, actor_id))
    }

    /// Route a message from a room member
    pub fn handle(&self, room_name: &str, actor: ActorId, msg: ClientMsg) -> Result<(), RelayError> {
        let entry = self
            .rooms
            .get(room_name)
            .map(|e| e.value().clone())
            .ok_or(RelayError::NotInRoom)?;

        let now = self.server_time();
        let mut guard = entry.lock();
        let deliveries = guard.room.handle(actor, msg, now)?;
        guard.deliver(deliveries);
        guard.prune();
        let empty = guard.room.is_empty();
        drop(guard);

        if empty {
            self.remove_if_empty(room_name);
        }
        Ok(())
    }

    /// Drop a member whose connection closed
    pub fn disconnect(&self, room_name: &str, actor: ActorId) {
        let Some(entry) = self.rooms.get(room_name).map(|e| e.value().clone()) else {
            return;
        };
        let mut guard = entry.lock();
        let deliveries = guard.room.disconnect(actor);
        guard.deliver(deliveries);
        guard.prune();
        let empty = guard.room.is_empty();
        drop(guard);

        if empty {
            self.remove_if_empty(room_name);
        }
    }

    fn remove_if_empty(&self, room_name: &str) {
        if self
            .rooms
            .remove_if(room_name, |_, entry| entry.lock().room.is_empty())
            .is_some()
        {
            info!(room = %room_name, "room closed");
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn total_players(&self) -> usize {
        self.rooms.iter().map(|e| e.value().lock().room.len()).sum()
    }

    pub fn summaries(&self) -> Vec<RoomSummary> {
        let mut rooms: Vec<RoomSummary> = self
            .rooms
            .iter()
            .map(|e| {
                let guard = e.value().lock();
                RoomSummary {
                    name: guard.room.name().to_string(),
                    players: guard.room.len(),
                    master: guard.room.master(),
                    countdown_running: guard.room.countdown_running(),
                }
            })
            .collect();
        rooms.sort_by(|a, b| a.name.cmp(&b.name));
        rooms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> RoomRegistry {
        RoomRegistry::with_clock(4, Arc::new(|| 42.0))
    }

    #[test]
    fn join_delivers_confirmation_and_roster_updates() {
        let registry = registry();
        let (tx1, mut rx1) = mpsc::channel(16);
        let (tx2, mut rx2) = mpsc::channel(16);

        let (room, a) = registry.join(" arena ", "alice", tx1).unwrap();
        assert_eq!(room, "arena");
        let (_, b) = registry.join("arena", "bob", tx2).unwrap();

        assert!(matches!(rx1.try_recv(), Ok(ServerMsg::Joined { actor_id, server_time, .. }) if actor_id == a && server_time == 42.0));
        assert!(matches!(rx1.try_recv(), Ok(ServerMsg::PlayerJoined { player }) if player.actor_id == b));
        assert!(matches!(rx2.try_recv(), Ok(ServerMsg::Joined { master_id, .. }) if master_id == a));
        assert_eq!(registry.total_players(), 2);
    }

    #[test]
    fn empty_rooms_are_removed() {
        let registry = registry();
        let (tx, mut rx) = mpsc::channel(16);
        let (room, a) = registry.join("solo", "alice", tx).unwrap();
        assert_eq!(registry.room_count(), 1);

        registry.handle(&room, a, ClientMsg::LeaveRoom).unwrap();
        rx.try_recv().unwrap();
        assert_eq!(rx.try_recv().unwrap(), ServerMsg::Left);
        assert_eq!(registry.room_count(), 0);
        assert!(matches!(
            registry.handle(&room, a, ClientMsg::LeaveRoom),
            Err(RelayError::NotInRoom)
        ));
    }

    #[test]
    fn disconnect_notifies_others_and_switches_master() {
        let registry = registry();
        let (tx1, _rx1) = mpsc::channel(16);
        let (tx2, mut rx2) = mpsc::channel(16);
        let (room, a) = registry.join("arena", "alice", tx1).unwrap();
        registry.join("arena", "bob", tx2).unwrap();
        while rx2.try_recv().is_ok() {}

        registry.disconnect(&room, a);
        assert_eq!(rx2.try_recv().unwrap(), ServerMsg::PlayerLeft { actor_id: a });
        assert_eq!(rx2.try_recv().unwrap(), ServerMsg::MasterChanged { master_id: 2 });
        assert_eq!(registry.summaries()[0].master, Some(2));
    }

    #[test]
    fn full_queues_drop_movement_silently() {
        let registry = registry();
        let (tx1, _rx1) = mpsc::channel(16);
        let (tx2, mut rx2) = mpsc::channel(1);
        let (room, a) = registry.join("arena", "alice", tx1).unwrap();
        registry.join("arena", "bob", tx2).unwrap();

        // bob's single slot holds the join confirmation
        registry
            .handle(
                &room,
                a,
                ClientMsg::Movement {
                    snapshot: Default::default(),
                },
            )
            .unwrap();
        assert!(matches!(rx2.try_recv(), Ok(ServerMsg::Joined { .. })));
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn invalid_room_name_is_rejected() {
        let registry = registry();
        let (tx, _rx) = mpsc::channel(1);
        assert_eq!(registry.join("", "x", tx).unwrap_err(), RelayError::InvalidName);
    }
}
