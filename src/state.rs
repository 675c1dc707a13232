//! Connection finite-state machine (FSM) types.
//!
//! This module defines every possible state a [`crate::connection::Connection`]
//! can occupy.  State transitions are *not* implemented here — they live in
//! [`crate::connection`] — this module only names the states so guard logic
//! and log lines have a single vocabulary.

/// All possible states of the connection FSM.
///
/// ```text
//  CLOSED ──SYN sent──▶ SYN_SENT ──SYN-ACK──▶ ESTABLISHED ◀──RQST──┐
//    │                                              │              │
//    │ listen                             FIN sent  │   FIN rcvd   │
//    ▼                                              ▼              │
//  LISTEN ──accept pops SYN, SYN-ACK sent──▶ SYN_RCVD          CLOSE_WAIT
//                                                   │              │
//                           FIN_WAIT ◀── FIN sent ──┘   FIN sent   │
//                               │                                  ▼
//        FIN-ACK + FIN, linger  │                              LAST_ACK
//                               ▼                                  │
//                            CLOSED ◀───────────── FIN-ACK ────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection exists; initial state and final state after teardown.
    Closed,
    /// Accepting SYNs into the backlog.
    Listen,
    /// SYN has been sent; waiting for SYN-ACK.
    SynSent,
    /// SYN popped from the backlog and SYN-ACK sent; waiting for the file
    /// request.
    SynRcvd,
    /// Handshake complete; data transfer in progress.
    Established,
    /// Peer's FIN received; local close pending.
    CloseWait,
    /// Local FIN sent by an active close; waiting for FIN-ACK and the
    /// peer's own FIN, then lingering.
    FinWait,
    /// Local FIN sent after the peer's; waiting for the final FIN-ACK.
    LastAck,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Closed
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
