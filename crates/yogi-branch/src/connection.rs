//! Per-peer connection state machine and the tie-break rule (§4.7) that
//! decides which socket survives when both sides dial each other at once.

use crate::session::Session;
use std::sync::Arc;
use std::time::Instant;
use yogi_core::BranchUuid;

/// Lifecycle of one remote branch as seen by the connection manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket yet; we only know the UUID exists somewhere on the net.
    None,
    /// An advertisement was observed; a connect attempt is pending or
    /// already in flight.
    Discovered,
    /// A TCP socket is up and the info/challenge handshake is running.
    Handshaking,
    /// Handshake completed; message traffic is flowing.
    SessionRunning,
    /// Rejected for a per-peer-recoverable reason (§7); excluded from future
    /// connect/accept attempts until the branch is recreated.
    Blacklisted,
    /// The connection ended for a reason that isn't a blacklist cause
    /// (peer went away, socket error); eligible to be rediscovered.
    Failed,
}

impl ConnectionState {
    /// Mirrors the session state machine's invariant: terminal states never
    /// transition out from under a caller who's still holding a reference.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Blacklisted)
    }

    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (None, Discovered)
                | (None, Handshaking)
                | (Discovered, Handshaking)
                | (Discovered, Failed)
                | (Handshaking, SessionRunning)
                | (Handshaking, Failed)
                | (Handshaking, Blacklisted)
                | (SessionRunning, Failed)
                | (SessionRunning, Blacklisted)
                | (Failed, Discovered)
                | (Failed, Handshaking)
        )
    }
}

/// One tracked peer: its current state plus the live transport once a
/// session is running.
pub struct Connection {
    pub state: ConnectionState,
    /// `Arc`-wrapped so a broadcast can clone out a short-lived handle
    /// without holding the connection map's shard lock across an await.
    pub session: Option<Arc<Session>>,
    pub last_activity: Instant,
}

impl Connection {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::None,
            session: None,
            last_activity: Instant::now(),
        }
    }

    /// Validated transition; returns `false` (no-op) if the transition isn't
    /// allowed from the current state.
    pub fn transition_to(&mut self, next: ConnectionState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        self.state = next;
        self.last_activity = Instant::now();
        true
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

/// Decides which side of a simultaneous inbound+outbound race survives
/// (§4.7): the branch with the numerically smaller UUID keeps the
/// connection it *accepted*; the other keeps the one it *dialed*. Returns
/// `true` if the inbound (accepted) socket should be kept.
pub fn keep_inbound(own_uuid: BranchUuid, peer_uuid: BranchUuid) -> bool {
    own_uuid < peer_uuid
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_running_only_reachable_through_handshaking() {
        let mut conn = Connection::new();
        assert!(!conn.transition_to(ConnectionState::SessionRunning));
        assert_eq!(conn.state, ConnectionState::None);

        assert!(conn.transition_to(ConnectionState::Discovered));
        assert!(conn.transition_to(ConnectionState::Handshaking));
        assert!(conn.transition_to(ConnectionState::SessionRunning));
        assert_eq!(conn.state, ConnectionState::SessionRunning);
    }

    #[test]
    fn blacklisted_is_terminal() {
        let mut conn = Connection::new();
        conn.transition_to(ConnectionState::Discovered);
        conn.transition_to(ConnectionState::Handshaking);
        assert!(conn.transition_to(ConnectionState::Blacklisted));
        assert!(!conn.transition_to(ConnectionState::Discovered));
        assert!(!conn.transition_to(ConnectionState::Failed));
    }

    #[test]
    fn keep_inbound_picks_the_smaller_uuid_as_accepting_side() {
        let low = BranchUuid::from_bytes([0; 16]);
        let high = BranchUuid::from_bytes([0xff; 16]);
        assert!(keep_inbound(low, high));
        assert!(!keep_inbound(high, low));
    }
}
