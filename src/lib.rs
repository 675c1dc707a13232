//! `rdt-over-udp` — reliable, ordered, connection-oriented file transfer
//! over UDP.
//!
//! One endpoint (the client) opens a connection, requests a single file by
//! name, and receives its contents in order; both sides then tear the
//! connection down cleanly.  Reliability, ordering, and duplicate
//! suppression are provided by a fixed sliding window, per-packet
//! retransmission timers, and per-sequence acknowledgements — none of which
//! UDP gives us.
//!
//! # Architecture
//!
//! ```text
//!  ┌───────────────┐  send_file   ┌───────────────┐  recv_file
//!  │  SendWindow   │◀────────────▶│  Reassembly   │
//!  │ (retransmits) │   segments   │ (+ RecentSeqs)│
//!  └───────┬───────┘              └───────┬───────┘
//!          │                              │
//!  ┌───────▼──────────────────────────────▼───────┐
//!  │                 Connection                   │
//!  │   (state machine + update() event loop)      │
//!  └───────┬──────────────────────────────────────┘
//!          │ raw UDP datagrams
//!  ┌───────▼───────┐
//!  │    Socket     │  (thin async wrapper around tokio UdpSocket)
//!  └───────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]     — wire format (serialise / deserialise, segment shapes)
//! - [`seq`]        — modular sequence-number arithmetic
//! - [`ring`]       — bounded circular buffer (backlog, unacked storage)
//! - [`sender`]     — send window and per-packet retransmit queue
//! - [`receiver`]   — duplicate suppression and in-order reassembly
//! - [`state`]      — finite-state-machine types
//! - [`connection`] — per-connection lifecycle and the `update()` loop
//! - [`socket`]     — async UDP socket abstraction
//! - [`simulator`]  — lossy relay for exercising retransmission in tests

pub mod connection;
pub mod packet;
pub mod receiver;
pub mod ring;
pub mod sender;
pub mod seq;
pub mod simulator;
pub mod socket;
pub mod state;
