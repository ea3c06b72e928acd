//! Room relay: the messaging fabric between peers
//!
//! Ordered per-sender delivery of targeted and broadcast calls, a movement
//! stream, and last-writer-wins room properties with writer checks.

pub mod registry;
pub mod room;

pub use registry::{RoomRegistry, RoomSummary};
pub use room::{Delivery, Room};

use crate::ws::protocol::ServerMsg;

/// Relay errors, reported to the offending connection
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("Room {0} is full")]
    RoomFull(String),

    #[error("Not in a room")]
    NotInRoom,

    #[error("Already in a room")]
    AlreadyInRoom,

    #[error("Invalid room name")]
    InvalidName,

    #[error("Not allowed to write {0}")]
    Forbidden(String),
}

impl RelayError {
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::RoomFull(_) => "room_full",
            RelayError::NotInRoom => "not_in_room",
            RelayError::AlreadyInRoom => "already_in_room",
            RelayError::InvalidName => "invalid_name",
            RelayError::Forbidden(_) => "forbidden",
        }
    }

    /// Wire form for the offending connection
    pub fn to_server_msg(&self) -> ServerMsg {
        ServerMsg::Error {
            code: self.code().to_string(),
            message: self.to_string(),
        }
    }
}

/// Room names: 1 to 64 visible characters
pub fn validate_room_name(name: &str) -> Result<&str, RelayError> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > 64 || name.chars().any(char::is_control) {
        return Err(RelayError::InvalidName);
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_names_are_trimmed_and_bounded() {
        assert_eq!(validate_room_name("  arena "), Ok("arena"));
        assert_eq!(validate_room_name("   "), Err(RelayError::InvalidName));
        assert_eq!(validate_room_name(&"x".repeat(65)), Err(RelayError::InvalidName));
    }

    #[test]
    fn errors_carry_a_code() {
        match RelayError::RoomFull("arena".into()).to_server_msg() {
            ServerMsg::Error { code, message } => {
                assert_eq!(code, "room_full");
                assert!(message.contains("arena"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
