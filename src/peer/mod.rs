//! Peer side: session context, frame scheduler, leave workflow and the
//! transports that connect a peer to the relay

pub mod context;
pub mod leave;
pub mod runner;
pub mod scheduler;
pub mod transport;

pub use context::{Avatar, FrameInput, Peer, PeerEvent, PeerTask, Scene, OFFLINE_ACTOR};
pub use leave::{LeaveTicket, LeaveWorkflow};
pub use runner::{run_peer, BotPilot, RunOptions, RunSummary};
pub use scheduler::{Fired, FrameScheduler};
pub use transport::{LocalRelay, LocalTransport, Transport, TransportError, TransportEvent, WsTransport};
