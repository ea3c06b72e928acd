//! WebSocket surface of the relay and the wire protocol

pub mod handler;
pub mod protocol;
