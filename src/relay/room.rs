//! Room state machine: membership, master client, routing and properties

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::ws::protocol::{
    keys, ActorId, ClientMsg, PlayerInfo, PropValue, Properties, RpcCall, RpcTarget, ServerMsg,
};

use super::RelayError;

/// A message for one actor
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub to: ActorId,
    pub msg: ServerMsg,
}

/// One room on the relay
#[derive(Debug)]
pub struct Room {
    name: String,
    max_players: usize,
    next_actor: ActorId,
    master: Option<ActorId>,
    members: BTreeMap<ActorId, PlayerInfo>,
    props: Properties,
}

impl Room {
    pub fn new(name: impl Into<String>, max_players: usize) -> Self {
        Self {
            name: name.into(),
            max_players: max_players.max(1),
            next_actor: 1,
            master: None,
            members: BTreeMap::new(),
            props: Properties::new(),
        }
    }

    /// Add an actor. The first one becomes master.
    pub fn join(
        &mut self,
        nickname: &str,
        server_time: f64,
    ) -> Result<(ActorId, Vec<Delivery>), RelayError> {
        if self.members.len() >= self.max_players {
            return Err(RelayError::RoomFull(self.name.clone()));
        }

        let actor_id = self.next_actor;
        self.next_actor += 1;
        let nickname = match nickname.trim() {
            "" => format!("Player{actor_id}"),
            name => name.to_string(),
        };
        let info = PlayerInfo {
            actor_id,
            nickname,
            props: Properties::new(),
        };
        self.members.insert(actor_id, info.clone());
        let master_id = *self.master.get_or_insert(actor_id);

        info!(room = %self.name, actor_id, master_id, "actor joined");

        let mut out = self.others(actor_id, ServerMsg::PlayerJoined { player: info });
        out.push(Delivery {
            to: actor_id,
            msg: ServerMsg::Joined {
                room: self.name.clone(),
                actor_id,
                master_id,
                server_time,
                players: self.members.values().cloned().collect(),
                room_props: self.props.clone(),
            },
        });
        Ok((actor_id, out))
    }

    /// Remove an actor that asked to leave; it gets a `left` confirmation
    pub fn leave(&mut self, actor: ActorId) -> Vec<Delivery> {
        if !self.members.contains_key(&actor) {
            return Vec::new();
        }
        let mut out = vec![Delivery {
            to: actor,
            msg: ServerMsg::Left,
        }];
        out.extend(self.remove(actor));
        out
    }

    /// Remove an actor whose connection dropped
    pub fn disconnect(&mut self, actor: ActorId) -> Vec<Delivery> {
        self.remove(actor)
    }

    fn remove(&mut self, actor: ActorId) -> Vec<Delivery> {
        if self.members.remove(&actor).is_none() {
            return Vec::new();
        }
        info!(room = %self.name, actor_id = actor, "actor left");

        let mut out = self.broadcast(ServerMsg::PlayerLeft { actor_id: actor });
        if self.master == Some(actor) {
            self.master = self.members.keys().next().copied();
            if let Some(master_id) = self.master {
                info!(room = %self.name, master_id, "master switched");
                out.extend(self.broadcast(ServerMsg::MasterChanged { master_id }));
            }
        }
        out
    }

    /// Route one message from a member
    pub fn handle(
        &mut self,
        actor: ActorId,
        msg: ClientMsg,
        server_time: f64,
    ) -> Result<Vec<Delivery>, RelayError> {
        if !self.members.contains_key(&actor) {
            return Err(RelayError::NotInRoom);
        }

        let out = match msg {
            ClientMsg::JoinRoom { .. } => return Err(RelayError::AlreadyInRoom),
            ClientMsg::LeaveRoom => self.leave(actor),
            ClientMsg::Rpc { target, call } => self.route_rpc(actor, target, call),
            ClientMsg::SetRoomProperties { props } => {
                self.check_room_write(actor, &props)?;
                self.props.extend(props.clone());
                self.broadcast(ServerMsg::RoomPropertiesChanged {
                    sender: actor,
                    props,
                })
            }
            ClientMsg::SetPlayerProperties { props } => {
                if let Some(member) = self.members.get_mut(&actor) {
                    member.props.extend(props.clone());
                }
                self.broadcast(ServerMsg::PlayerPropertiesChanged {
                    actor_id: actor,
                    props,
                })
            }
            ClientMsg::Movement { snapshot } => self.others(
                actor,
                ServerMsg::Movement {
                    sender: actor,
                    sent_at: server_time,
                    snapshot,
                },
            ),
            ClientMsg::DestroyPlayerObjects => {
                self.others(actor, ServerMsg::ObjectsDestroyed { actor_id: actor })
            }
            ClientMsg::Ping { t } => vec![Delivery {
                to: actor,
                msg: ServerMsg::Pong { t, server_time },
            }],
        };
        Ok(out)
    }

    fn route_rpc(&self, sender: ActorId, target: RpcTarget, call: RpcCall) -> Vec<Delivery> {
        let msg = ServerMsg::Rpc { sender, call };
        match target {
            RpcTarget::All => self.broadcast(msg),
            RpcTarget::Others => self.others(sender, msg),
            RpcTarget::MasterClient => self
                .master
                .map(|to| vec![Delivery { to, msg }])
                .unwrap_or_default(),
            RpcTarget::Actor(to) if self.members.contains_key(&to) => vec![Delivery { to, msg }],
            RpcTarget::Actor(to) => {
                debug!(room = %self.name, sender, to, "rpc target not in room, dropped");
                Vec::new()
            }
        }
    }

    /// Countdown keys: nonzero values are master-only, `(0, 0)` is open to all.
    /// `player_name_<n>` keys: actor `n` only. `scene`: master only.
    fn check_room_write(&self, actor: ActorId, props: &Properties) -> Result<(), RelayError> {
        for (key, value) in props {
            if let Some(owner) = keys::player_name_owner(key) {
                if owner != actor {
                    return Err(RelayError::Forbidden(key.clone()));
                }
            }
            let countdown = key == keys::COUNTDOWN_START || key == keys::COUNTDOWN_DURATION;
            if countdown && !is_zero(value) && self.master != Some(actor) {
                return Err(RelayError::Forbidden(key.clone()));
            }
            if key == keys::SCENE && self.master != Some(actor) {
                return Err(RelayError::Forbidden(key.clone()));
            }
        }
        Ok(())
    }

    fn broadcast(&self, msg: ServerMsg) -> Vec<Delivery> {
        self.members
            .keys()
            .map(|&to| Delivery {
                to,
                msg: msg.clone(),
            })
            .collect()
    }

    fn others(&self, except: ActorId, msg: ServerMsg) -> Vec<Delivery> {
        self.members
            .keys()
            .filter(|&&to| to != except)
            .map(|&to| Delivery {
                to,
                msg: msg.clone(),
            })
            .collect()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn master(&self) -> Option<ActorId> {
        self.master
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, actor: ActorId) -> bool {
        self.members.contains_key(&actor)
    }

    pub fn props(&self) -> &Properties {
        &self.props
    }

    /// A nonzero countdown duration is set
    pub fn countdown_running(&self) -> bool {
        self.props
            .get(keys::COUNTDOWN_DURATION)
            .and_then(PropValue::as_f64)
            .is_some_and(|d| d > 0.0)
    }
}

fn is_zero(value: &PropValue) -> bool {
    value.as_f64() == Some(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::protocol::MovementSnapshot;

    fn recipients(out: &[Delivery]) -> Vec<ActorId> {
        out.iter().map(|d| d.to).collect()
    }

    fn room_with(n: usize) -> Room {
        let mut room = Room::new("arena", 4);
        for i in 0..n {
            room.join(&format!("p{i}"), 0.0).unwrap();
        }
        room
    }

    #[test]
    fn first_joiner_is_master_and_ids_increase() {
        let mut room = Room::new("arena", 4);
        let (a, out) = room.join("alice", 1.0).unwrap();
        assert_eq!(a, 1);
        assert!(matches!(
            out[0].msg,
            ServerMsg::Joined { master_id: 1, actor_id: 1, .. }
        ));
        let (b, out) = room.join("bob", 2.0).unwrap();
        assert_eq!(b, 2);
        assert_eq!(recipients(&out), vec![1, 2]);
        assert_eq!(room.master(), Some(1));
    }

    #[test]
    fn room_full_is_rejected() {
        let mut room = room_with(4);
        assert!(matches!(room.join("late", 0.0), Err(RelayError::RoomFull(_))));
    }

    #[test]
    fn master_moves_to_lowest_remaining_actor() {
        let mut room = room_with(3);
        let out = room.leave(1);
        assert_eq!(out[0], Delivery { to: 1, msg: ServerMsg::Left });
        assert!(out.contains(&Delivery {
            to: 3,
            msg: ServerMsg::MasterChanged { master_id: 2 }
        }));
        assert_eq!(room.master(), Some(2));
        assert!(room.leave(1).is_empty());
    }

    #[test]
    fn rpc_targets() {
        let mut room = room_with(3);
        let call = RpcCall::CancelCountdown;
        let all = room
            .handle(2, ClientMsg::Rpc { target: RpcTarget::All, call: call.clone() }, 0.0)
            .unwrap();
        assert_eq!(recipients(&all), vec![1, 2, 3]);

        let others = room
            .handle(2, ClientMsg::Rpc { target: RpcTarget::Others, call: call.clone() }, 0.0)
            .unwrap();
        assert_eq!(recipients(&others), vec![1, 3]);

        let master = room
            .handle(3, ClientMsg::Rpc { target: RpcTarget::MasterClient, call: call.clone() }, 0.0)
            .unwrap();
        assert_eq!(recipients(&master), vec![1]);

        let one = room
            .handle(1, ClientMsg::Rpc { target: RpcTarget::Actor(3), call: call.clone() }, 0.0)
            .unwrap();
        assert_eq!(recipients(&one), vec![3]);

        let nobody = room
            .handle(1, ClientMsg::Rpc { target: RpcTarget::Actor(9), call }, 0.0)
            .unwrap();
        assert!(nobody.is_empty());
    }

    #[test]
    fn countdown_writer_classes() {
        let mut room = room_with(2);
        let mut start = Properties::new();
        start.insert(keys::COUNTDOWN_START.into(), PropValue::Float(5.0));
        start.insert(keys::COUNTDOWN_DURATION.into(), PropValue::Float(10.0));

        assert!(matches!(
            room.handle(2, ClientMsg::SetRoomProperties { props: start.clone() }, 0.0),
            Err(RelayError::Forbidden(_))
        ));
        room.handle(1, ClientMsg::SetRoomProperties { props: start }, 0.0)
            .unwrap();
        assert!(room.countdown_running());

        let mut cancel = Properties::new();
        cancel.insert(keys::COUNTDOWN_START.into(), PropValue::Float(0.0));
        cancel.insert(keys::COUNTDOWN_DURATION.into(), PropValue::Float(0.0));
        let out = room
            .handle(2, ClientMsg::SetRoomProperties { props: cancel }, 0.0)
            .unwrap();
        assert_eq!(recipients(&out), vec![1, 2]);
        assert!(!room.countdown_running());
    }

    #[test]
    fn player_name_is_owner_only() {
        let mut room = room_with(2);
        let mut props = Properties::new();
        props.insert(keys::player_name(1), PropValue::Text("Mallory".into()));
        assert!(room
            .handle(2, ClientMsg::SetRoomProperties { props: props.clone() }, 0.0)
            .is_err());
        assert!(room.handle(1, ClientMsg::SetRoomProperties { props }, 0.0).is_ok());
    }

    #[test]
    fn scene_is_master_only() {
        let mut room = room_with(2);
        let mut props = Properties::new();
        props.insert(keys::SCENE.to_string(), PropValue::Text("Match".into()));
        assert!(matches!(
            room.handle(2, ClientMsg::SetRoomProperties { props: props.clone() }, 0.0),
            Err(RelayError::Forbidden(_))
        ));
        assert!(room.handle(1, ClientMsg::SetRoomProperties { props }, 0.0).is_ok());
    }

    #[test]
    fn movement_is_stamped_and_sent_to_others() {
        let mut room = room_with(2);
        let out = room
            .handle(
                1,
                ClientMsg::Movement {
                    snapshot: MovementSnapshot::default(),
                },
                7.5,
            )
            .unwrap();
        assert_eq!(
            out,
            vec![Delivery {
                to: 2,
                msg: ServerMsg::Movement {
                    sender: 1,
                    sent_at: 7.5,
                    snapshot: MovementSnapshot::default()
                }
            }]
        );
    }

    #[test]
    fn non_members_and_double_joins_are_errors() {
        let mut room = room_with(1);
        assert!(matches!(
            room.handle(5, ClientMsg::LeaveRoom, 0.0),
            Err(RelayError::NotInRoom)
        ));
        assert!(matches!(
            room.handle(
                1,
                ClientMsg::JoinRoom {
                    room: "arena".into(),
                    nickname: "x".into()
                },
                0.0
            ),
            Err(RelayError::AlreadyInRoom)
        ));
    }
}
