//! Relay protocol message definitions
//! These are the wire types between peers and the room relay

use std::collections::BTreeMap;

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Identifier of a connected participant, stable for the room lifetime.
/// Assigned by the relay starting at 1.
pub type ActorId = u32;

/// Room property keys
pub mod keys {
    use super::ActorId;

    pub const COUNTDOWN_START: &str = "countdown_start";
    pub const COUNTDOWN_DURATION: &str = "countdown_duration";
    pub const CHARACTER_INDEX: &str = "character_index";
    pub const CHARACTER_PREFAB: &str = "character_prefab";
    pub const PLAYER_NAME_PREFIX: &str = "player_name_";
    /// Scene the master loaded for everyone
    pub const SCENE: &str = "scene";

    /// Room property holding the custom display name of `actor_id`
    pub fn player_name(actor_id: ActorId) -> String {
        format!("{PLAYER_NAME_PREFIX}{actor_id}")
    }

    /// Parse the actor id out of a `player_name_<id>` key
    pub fn player_name_owner(key: &str) -> Option<ActorId> {
        key.strip_prefix(PLAYER_NAME_PREFIX)?.parse().ok()
    }
}

/// A shared property value (last writer wins)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl PropValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropValue::Int(v) => Some(*v as f64),
            PropValue::Float(v) => Some(*v),
            PropValue::Text(s) => s.trim().parse().ok(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropValue::Int(v) => Some(*v),
            PropValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            PropValue::Float(_) => None,
            PropValue::Text(s) => s.trim().parse().ok(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Property set carried in one atomic update
pub type Properties = BTreeMap<String, PropValue>;

/// Pose sample streamed by the owner of a player object
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MovementSnapshot {
    pub position: Vec3,
    /// Unit quaternion (x, y, z, w)
    pub rotation: Quat,
    pub vertical_velocity: f32,
}

impl Default for MovementSnapshot {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            vertical_velocity: 0.0,
        }
    }
}

/// Power-up kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerUpKind {
    /// Multiplies walk/run speed for a while
    SpeedBoost,
    /// Multiplies jump height for a while
    JumpBoost,
}

/// Recipients of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcTarget {
    /// Every actor including the sender
    All,
    /// Every actor except the sender
    Others,
    /// The current master client only
    MasterClient,
    /// Exactly one actor
    Actor(ActorId),
}

/// Peer-to-peer calls carried through the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum RpcCall {
    /// Authoritative damage, addressed to the victim's owner only
    ApplyDamage {
        amount: i32,
        is_head: bool,
        attacker_actor_id: ActorId,
        victim_actor_id: ActorId,
    },

    /// Read-only health mirror from the owner
    BroadcastHealth { actor_id: ActorId, new_hp: i32 },

    /// Abort the shared countdown
    CancelCountdown,

    /// Display name changed
    UpdatePlayerName { actor_id: ActorId, name: String },

    /// Scene-synchronizing load, sent by the master
    LoadScene { scene: String },

    /// Cosmetic projectile for peers that did not fire it
    FireProjectile {
        origin: Vec3,
        direction: Vec3,
        speed: f32,
        lifetime: f32,
    },

    /// Master spawned a power-up
    SpawnPowerUp {
        id: u64,
        kind: PowerUpKind,
        position: Vec3,
    },

    /// A power-up was picked up
    ConsumePowerUp { id: u64 },
}

/// Messages sent from peer to relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Join (or create) a room by name
    JoinRoom { room: String, nickname: String },

    /// Leave the current room; answered with `left`
    LeaveRoom,

    /// Call on one or more peers
    Rpc { target: RpcTarget, call: RpcCall },

    /// Atomic room property write
    SetRoomProperties { props: Properties },

    /// Atomic write to the sender's own player properties
    SetPlayerProperties { props: Properties },

    /// Movement stream sample for the sender's player object
    Movement { snapshot: MovementSnapshot },

    /// Ask other peers to drop every object owned by the sender
    DestroyPlayerObjects,

    /// Clock sync probe
    Ping {
        /// Client local time (seconds), echoed back
        t: f64,
    },
}

/// Messages sent from relay to peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Room join confirmation
    Joined {
        room: String,
        actor_id: ActorId,
        master_id: ActorId,
        /// Shared clock at join time
        server_time: f64,
        /// Everyone in the room, including the joiner
        players: Vec<PlayerInfo>,
        room_props: Properties,
    },

    /// Another actor joined
    PlayerJoined { player: PlayerInfo },

    /// An actor left
    PlayerLeft { actor_id: ActorId },

    /// Master client switched
    MasterChanged { master_id: ActorId },

    /// Leave confirmation
    Left,

    /// Incoming call
    Rpc { sender: ActorId, call: RpcCall },

    /// Room properties changed (only the written keys)
    RoomPropertiesChanged { sender: ActorId, props: Properties },

    /// Player properties changed (only the written keys)
    PlayerPropertiesChanged { actor_id: ActorId, props: Properties },

    /// Movement stream sample from another actor
    Movement {
        sender: ActorId,
        /// Shared clock when the relay forwarded it
        sent_at: f64,
        snapshot: MovementSnapshot,
    },

    /// All objects owned by the actor are gone
    ObjectsDestroyed { actor_id: ActorId },

    /// Clock sync answer
    Pong {
        /// Echoed client time
        t: f64,
        server_time: f64,
    },

    /// Error message
    Error { code: String, message: String },
}

/// Player info for join/roster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub actor_id: ActorId,
    pub nickname: String,
    /// Per-player custom properties (character selection)
    #[serde(default)]
    pub props: Properties,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_damage_wire_shape() {
        let msg = ClientMsg::Rpc {
            target: RpcTarget::Actor(3),
            call: RpcCall::ApplyDamage {
                amount: 45,
                is_head: true,
                attacker_actor_id: 1,
                victim_actor_id: 3,
            },
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "rpc");
        assert_eq!(json["target"]["actor"], 3);
        assert_eq!(json["call"]["call"], "apply_damage");
        assert_eq!(json["call"]["amount"], 45);

        let back: ClientMsg = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn prop_values_keep_their_kind() {
        let mut props = Properties::new();
        props.insert(keys::COUNTDOWN_START.into(), PropValue::Float(12.5));
        props.insert(keys::CHARACTER_INDEX.into(), PropValue::Int(2));
        props.insert(keys::player_name(4), PropValue::Text("Vex".into()));

        let text = serde_json::to_string(&props).unwrap();
        let back: Properties = serde_json::from_str(&text).unwrap();

        assert_eq!(back[keys::COUNTDOWN_START].as_f64(), Some(12.5));
        assert_eq!(back[keys::CHARACTER_INDEX], PropValue::Int(2));
        assert_eq!(back["player_name_4"].as_str(), Some("Vex"));
    }

    #[test]
    fn player_name_key_parsing() {
        assert_eq!(keys::player_name_owner("player_name_17"), Some(17));
        assert_eq!(keys::player_name_owner("player_name_x"), None);
        assert_eq!(keys::player_name_owner("countdown_start"), None);
    }

    #[test]
    fn movement_snapshot_serializes_as_arrays() {
        let snap = MovementSnapshot {
            position: Vec3::new(1.0, 2.0, 3.0),
            rotation: Quat::IDENTITY,
            vertical_velocity: -2.0,
        };
        let json = serde_json::to_value(snap).unwrap();
        assert_eq!(json["position"], serde_json::json!([1.0, 2.0, 3.0]));
        assert_eq!(json["rotation"], serde_json::json!([0.0, 0.0, 0.0, 1.0]));
    }
}
