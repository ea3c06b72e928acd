//! Player sessions, ownership resolution and the room roster

use std::collections::BTreeMap;

use crate::ws::protocol::{keys, ActorId, PlayerInfo, Properties};

/// One connected participant
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSession {
    pub actor_id: ActorId,
    /// The single peer authoritative for this session's mutable state
    pub owning_peer: ActorId,
    pub nickname: String,
    /// Per-player custom properties, written by the owner only
    pub props: Properties,
}

impl PlayerSession {
    pub fn new(actor_id: ActorId, nickname: impl Into<String>) -> Self {
        Self {
            actor_id,
            owning_peer: actor_id,
            nickname: nickname.into(),
            props: Properties::new(),
        }
    }

    /// Selected character index, if the player published one
    pub fn character_index(&self) -> Option<usize> {
        self.props
            .get(keys::CHARACTER_INDEX)
            .and_then(|v| v.as_i64())
            .and_then(|i| usize::try_from(i).ok())
    }
}

impl From<PlayerInfo> for PlayerSession {
    fn from(info: PlayerInfo) -> Self {
        Self {
            actor_id: info.actor_id,
            owning_peer: info.actor_id,
            nickname: info.nickname,
            props: info.props,
        }
    }
}

/// Who is authoritative for an entity, seen from the local peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// The local peer owns it (also the offline / local-only case)
    Owner,
    /// Another peer owns it
    Remote(ActorId),
}

impl Ownership {
    pub fn is_owner(self) -> bool {
        matches!(self, Ownership::Owner)
    }
}

/// Resolve ownership of state owned by `owning_peer`.
///
/// `local` is `None` while offline; every entity is then owned locally.
pub fn resolve_ownership(owning_peer: ActorId, local: Option<ActorId>) -> Ownership {
    match local {
        Some(local) if local != owning_peer => Ownership::Remote(owning_peer),
        _ => Ownership::Owner,
    }
}

/// Sessions currently in the room, keyed by actor id
#[derive(Debug, Default, Clone)]
pub struct Roster {
    sessions: BTreeMap<ActorId, PlayerSession>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, session: PlayerSession) {
        self.sessions.insert(session.actor_id, session);
    }

    pub fn remove(&mut self, actor_id: ActorId) -> Option<PlayerSession> {
        self.sessions.remove(&actor_id)
    }

    pub fn get(&self, actor_id: ActorId) -> Option<&PlayerSession> {
        self.sessions.get(&actor_id)
    }

    pub fn get_mut(&mut self, actor_id: ActorId) -> Option<&mut PlayerSession> {
        self.sessions.get_mut(&actor_id)
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlayerSession> {
        self.sessions.values()
    }

    /// Ownership of the session `actor_id`, or `None` if unknown
    pub fn ownership(&self, actor_id: ActorId, local: Option<ActorId>) -> Option<Ownership> {
        self.get(actor_id)
            .map(|s| resolve_ownership(s.owning_peer, local))
    }

    /// Display name: custom room property first, then the nickname
    pub fn display_name(&self, actor_id: ActorId, room_props: &Properties) -> Option<String> {
        if let Some(name) = room_props
            .get(&keys::player_name(actor_id))
            .and_then(|v| v.as_str())
        {
            return Some(name.to_string());
        }
        self.get(actor_id).map(|s| s.nickname.clone())
    }
}
