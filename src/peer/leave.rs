//! Single-flight leave-room workflow

use tracing::debug;

/// Answer to a leave request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveTicket {
    /// This request started the leave
    Started,
    /// A leave was already running; this request joined it
    Joined,
}

/// How the leave is carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeavePath {
    /// Ask the relay and wait for its confirmation
    Relay,
    /// Not in a room or not connected: go straight to the lobby
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum LeaveState {
    Idle,
    AwaitingConfirmation { since: f64 },
}

/// Coalesces concurrent leave requests into one
#[derive(Debug, Clone)]
pub struct LeaveWorkflow {
    state: LeaveState,
    completed: u32,
}

impl Default for LeaveWorkflow {
    fn default() -> Self {
        Self {
            state: LeaveState::Idle,
            completed: 0,
        }
    }
}

impl LeaveWorkflow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a leave. Only a `Started` ticket comes with a path to carry out.
    pub fn request(&mut self, now: f64, connected_in_room: bool) -> (LeaveTicket, Option<LeavePath>) {
        if let LeaveState::AwaitingConfirmation { since } = self.state {
            debug!(since, "leave already in progress");
            return (LeaveTicket::Joined, None);
        }
        if connected_in_room {
            self.state = LeaveState::AwaitingConfirmation { since: now };
            (LeaveTicket::Started, Some(LeavePath::Relay))
        } else {
            self.completed += 1;
            (LeaveTicket::Started, Some(LeavePath::Local))
        }
    }

    /// The relay confirmed, the connection dropped or the wait timed out.
    /// Returns true if a relay leave was pending.
    pub fn finish(&mut self) -> bool {
        match self.state {
            LeaveState::AwaitingConfirmation { .. } => {
                self.state = LeaveState::Idle;
                self.completed += 1;
                true
            }
            LeaveState::Idle => false,
        }
    }

    pub fn is_leaving(&self) -> bool {
        matches!(self.state, LeaveState::AwaitingConfirmation { .. })
    }

    /// Number of leaves carried out so far
    pub fn completed(&self) -> u32 {
        self.completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrent_requests_coalesce() {
        let mut leave = LeaveWorkflow::new();
        assert_eq!(
            leave.request(0.0, true),
            (LeaveTicket::Started, Some(LeavePath::Relay))
        );
        assert_eq!(leave.request(0.1, true), (LeaveTicket::Joined, None));
        assert!(leave.is_leaving());

        assert!(leave.finish());
        assert!(!leave.finish());
        assert_eq!(leave.completed(), 1);
    }

    #[test]
    fn offline_leave_is_local_and_immediate() {
        let mut leave = LeaveWorkflow::new();
        assert_eq!(
            leave.request(0.0, false),
            (LeaveTicket::Started, Some(LeavePath::Local))
        );
        assert!(!leave.is_leaving());
        assert_eq!(leave.completed(), 1);
    }

    #[test]
    fn can_leave_again_after_rejoining() {
        let mut leave = LeaveWorkflow::new();
        leave.request(0.0, true);
        leave.finish();
        assert_eq!(leave.request(5.0, true).0, LeaveTicket::Started);
    }
}
