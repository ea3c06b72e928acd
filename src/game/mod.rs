//! Replication and combat core
//!
//! Everything here is synchronous and free of I/O. Outbound traffic is
//! produced as values and flushed by the peer's frame loop.

pub mod clock;
pub mod combat;
pub mod health;
pub mod movement;
pub mod powerup;
pub mod projectile;
pub mod session;
pub mod snapshot;

pub use clock::{SessionClock, SharedClock};
pub use combat::{HitResolver, HitboxSet};
pub use health::HealthAuthority;
pub use movement::MovementReplicator;
pub use projectile::ProjectilePool;
pub use session::{resolve_ownership, Ownership, PlayerSession, Roster};
