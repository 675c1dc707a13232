//! Per-connection lifecycle manager.
//!
//! A [`Connection`] owns the complete state for one logical peer-to-peer
//! session: the UDP socket, the send window with its retransmit queue, the
//! duplicate filter, and (for listeners) the pending-connection backlog.
//!
//! All progress is driven by [`Connection::update`], a single non-blocking
//! step that retransmits whatever is due, waits briefly for one datagram,
//! and dispatches it.  Every high-level operation (`connect`, `send_file`,
//! `recv_file`, `close`, …) is a loop around `update` that spins until the
//! event it is waiting for shows up.  The reliability of the protocol is a
//! property of that loop: as long as *something* keeps calling `update`,
//! unacknowledged packets keep being retransmitted.

use std::fs::File;
use std::io::{self, Read};
use std::net::SocketAddr;
use std::path::Path;

use rand::Rng;
use tokio::time::{Duration, Instant};

use crate::packet::{flags, Packet, HEADER_LEN, MAX_PKT, MSS};
use crate::receiver::{Progress, Reassembly, RecentSeqs};
use crate::ring::RingBuffer;
use crate::sender::{RetriesExhausted, SendWindow, RTO};
use crate::seq::MAX_SEQ;
use crate::socket::{Socket, SocketError};
use crate::state::ConnectionState;

/// Upper bound on how long one `update` call may sit in the receive poll
/// when no retransmission deadline is nearer.
const POLL_CAP: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors surfaced by connection operations.
#[derive(Debug)]
pub enum ConnError {
    /// Underlying socket failure.
    Socket(SocketError),
    /// File I/O failure while sending or receiving a file.
    Io(io::Error),
    /// Operation not valid in the current connection state.
    BadState,
    /// The requested file name cannot fit in a single packet.
    RequestTooLong,
    /// A `RQST` payload was not a NUL-terminated UTF-8 string.
    MalformedRequest,
    /// A packet was retransmitted [`crate::sender::MAX_RETRIES`] times with
    /// no acknowledgement; the peer is presumed gone.
    MaxRetriesExceeded,
}

impl std::fmt::Display for ConnError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Socket(e) => write!(f, "socket error: {e}"),
            Self::Io(e) => write!(f, "file I/O error: {e}"),
            Self::BadState => write!(f, "operation invalid in current state"),
            Self::RequestTooLong => write!(f, "file name too long for one packet"),
            Self::MalformedRequest => write!(f, "malformed file request payload"),
            Self::MaxRetriesExceeded => write!(f, "peer stopped acknowledging"),
        }
    }
}

impl std::error::Error for ConnError {}

impl From<SocketError> for ConnError {
    fn from(e: SocketError) -> Self {
        Self::Socket(e)
    }
}

impl From<io::Error> for ConnError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Classification of what one [`Connection::update`] step observed.
#[derive(Debug)]
pub enum Event {
    /// Nothing readable, or a duplicate data segment (ACKed, not redelivered).
    Idle,
    /// A SYN was queued on the listener backlog.
    Syn,
    /// The peer answered our SYN; an ACK was emitted.
    SynAck,
    /// An outstanding packet was acknowledged.
    Ack,
    /// A file request arrived (ACK emitted).
    Rqst(Packet),
    /// A fresh data segment arrived (ACK emitted).
    Data(Packet),
    /// The peer sent FIN (FIN-ACK emitted).
    Fin,
    /// The peer acknowledged our FIN.
    FinAck,
    /// A packet from the wrong source, or one this endpoint cannot use.
    Dropped,
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// A pending handshake queued on a listener.
#[derive(Debug, Clone, Copy)]
struct Pending {
    addr: SocketAddr,
    isn: u16,
}

/// A handle to a single reliable connection over UDP.
#[derive(Debug)]
pub struct Connection {
    /// Current FSM state.
    pub state: ConnectionState,
    /// Outbound window and retransmit queue.
    pub sender: SendWindow,
    /// Underlying datagram socket; owned, closed exactly once on drop.
    socket: Socket,
    /// The single remote peer, once known.
    peer: Option<SocketAddr>,
    /// Recently delivered data seqs (duplicate suppression).
    recent: RecentSeqs,
    /// Set when the peer's FIN has been observed.
    received_fin: bool,
    /// Listener state: accept SYNs into `backlog`.
    is_listener: bool,
    backlog: Option<RingBuffer<Pending>>,
}

impl Connection {
    /// Wrap an already-bound socket in a fresh, closed connection.
    pub fn new(socket: Socket) -> Self {
        Self {
            state: ConnectionState::Closed,
            sender: SendWindow::new(),
            socket,
            peer: None,
            recent: RecentSeqs::new(),
            received_fin: false,
            is_listener: false,
            backlog: None,
        }
    }

    /// Bind a UDP socket on `local_addr` and wrap it.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, ConnError> {
        Ok(Self::new(Socket::bind(local_addr).await?))
    }

    /// Address the underlying socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    /// The connected peer, once the handshake has begun.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// `true` once the peer's FIN has been observed.
    pub fn received_fin(&self) -> bool {
        self.received_fin
    }

    /// Number of handshakes currently queued on the listener backlog.
    pub fn pending_connections(&self) -> usize {
        self.backlog.as_ref().map_or(0, |b| b.len())
    }

    // -----------------------------------------------------------------------
    // Client operations
    // -----------------------------------------------------------------------

    /// Active open: send a SYN and spin until the peer's SYN|ACK arrives.
    pub async fn connect(&mut self, peer: SocketAddr) -> Result<(), ConnError> {
        if self.peer.is_some() || self.is_listener {
            return Err(ConnError::BadState);
        }
        self.peer = Some(peer);
        self.state = ConnectionState::SynSent;

        let isn = rand::rng().random_range(0..MAX_SEQ);
        log::info!("[conn] connecting to {peer} (isn {isn})");
        self.send_packet(Packet::syn(isn), true).await;

        loop {
            match self.update().await {
                Ok(Event::SynAck) => return Ok(()),
                Ok(_) => continue,
                Err(e) => {
                    self.peer = None;
                    self.state = ConnectionState::Closed;
                    return Err(e);
                }
            }
        }
    }

    /// Send a file request.  Does not wait for the ACK — the retransmit
    /// queue keeps the request reliable while the caller moves on to
    /// [`recv_file`](Self::recv_file).
    pub async fn send_request(&mut self, name: &str) -> Result<(), ConnError> {
        if name.len() + HEADER_LEN + 1 > MAX_PKT {
            return Err(ConnError::RequestTooLong);
        }
        log::info!("[conn] requesting {name:?}");
        let pkt = Packet::request(self.sender.next_seq, name);
        self.send_packet(pkt, false).await;
        Ok(())
    }

    /// Receive the requested file into `path` (truncating it), returning
    /// once the segment carrying `LAST` has been written in order.
    pub async fn recv_file(&mut self, path: &Path) -> Result<(), ConnError> {
        let mut out = File::create(path)?;
        let mut reassembly = Reassembly::new();

        loop {
            if let Event::Data(pkt) = self.update().await? {
                if reassembly.on_data(&pkt, &mut out)? == Progress::Complete {
                    log::info!("[conn] file received into {}", path.display());
                    return Ok(());
                }
            }
        }
    }

    /// Passive close: wait for the peer's FIN, send our own, wait for its
    /// acknowledgement, then shut down.
    pub async fn wait_and_close(mut self) -> Result<(), ConnError> {
        while !self.received_fin {
            self.update().await?;
        }

        let fin = Packet::fin(self.sender.next_seq);
        self.send_packet(fin, false).await;
        self.state = ConnectionState::LastAck;

        loop {
            if let Event::FinAck = self.update().await? {
                break;
            }
        }
        self.state = ConnectionState::Closed;
        log::info!("[conn] closed");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Server operations
    // -----------------------------------------------------------------------

    /// Start queueing incoming SYNs.  `backlog` is the number of handshakes
    /// that may wait for [`accept`](Self::accept) at once.
    pub fn listen(&mut self, backlog: usize) -> Result<(), ConnError> {
        if backlog == 0 {
            return Err(ConnError::BadState);
        }
        if !self.is_listener {
            self.is_listener = true;
            self.backlog = Some(RingBuffer::with_capacity(backlog + 1));
            self.state = ConnectionState::Listen;
        }
        Ok(())
    }

    /// Adopt the oldest pending handshake, answering it with SYN|ACK.
    /// Spins until a SYN arrives.
    pub async fn accept(&mut self) -> Result<SocketAddr, ConnError> {
        if self.peer.is_some() {
            return Err(ConnError::BadState);
        }
        let pending = loop {
            if let Some(p) = self.backlog.as_mut().and_then(|b| b.pop()) {
                break p;
            }
            self.update().await?;
        };

        self.peer = Some(pending.addr);
        self.state = ConnectionState::SynRcvd;
        log::info!("[conn] accepted {} (peer isn {})", pending.addr, pending.isn);

        let isn = rand::rng().random_range(0..MAX_SEQ);
        self.send_packet(Packet::syn_ack(isn), false).await;
        Ok(pending.addr)
    }

    /// Spin until the client's file request arrives and parse it.
    pub async fn recv_request(&mut self) -> Result<String, ConnError> {
        loop {
            if let Event::Rqst(pkt) = self.update().await? {
                self.state = ConnectionState::Established;
                let name = pkt.request_name().ok_or(ConnError::MalformedRequest)?;
                log::info!("[conn] peer requested {name:?}");
                return Ok(name);
            }
        }
    }

    /// Stream the file at `path` to the peer in `MSS`-sized segments.
    ///
    /// The first segment carries `FIRST`, the final one `LAST` (both, for a
    /// file that fits in a single segment — including the empty file).  Each
    /// segment waits for window admission; the call returns only after every
    /// segment has been acknowledged.
    pub async fn send_file(&mut self, path: &Path) -> Result<(), ConnError> {
        let mut file = File::open(path)?;
        let mut remaining = file.metadata()?.len();
        log::info!("[conn] sending {} ({remaining} bytes)", path.display());

        let mut chunk = vec![0u8; MSS];
        let mut first = true;
        loop {
            let take = remaining.min(MSS as u64) as usize;
            file.read_exact(&mut chunk[..take])?;
            remaining -= take as u64;

            let mut extra = 0;
            if first {
                extra |= flags::FIRST;
                first = false;
            }
            if remaining == 0 {
                extra |= flags::LAST;
            }

            // Window admission: spin until both the byte window and the
            // unacked storage have room.
            let wire_len = (HEADER_LEN + take) as u16;
            while !self.sender.can_admit(wire_len) {
                self.update().await?;
            }

            let pkt = Packet::data(self.sender.next_seq, extra, &chunk[..take]);
            self.send_packet(pkt, false).await;

            if remaining == 0 {
                break;
            }
        }

        // Drain: every segment must be acknowledged before teardown starts.
        while self.sender.has_unacked() {
            self.update().await?;
        }
        Ok(())
    }

    /// Active close: send FIN, wait for both the peer's FIN and the
    /// acknowledgement of ours, linger `2·RTO` answering stragglers, then
    /// shut down.
    pub async fn close(mut self) -> Result<(), ConnError> {
        let fin = Packet::fin(self.sender.next_seq);
        self.send_packet(fin, false).await;
        self.state = ConnectionState::FinWait;

        let mut got_fin = self.received_fin;
        let mut got_fin_ack = false;
        while !got_fin || !got_fin_ack {
            match self.update().await? {
                Event::Fin => got_fin = true,
                Event::FinAck => got_fin_ack = true,
                _ => {}
            }
        }

        // Linger: the peer may retransmit its FIN if our FIN-ACK was lost.
        let deadline = Instant::now() + 2 * RTO;
        while Instant::now() < deadline {
            self.update().await?;
        }
        self.state = ConnectionState::Closed;
        log::info!("[conn] closed");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Update: the event-dispatch step everything spins on
    // -----------------------------------------------------------------------

    /// Drive the protocol one step: retransmit whatever is due, wait
    /// briefly for one datagram, dispatch it.
    ///
    /// Never waits longer than the earliest retransmission deadline (capped
    /// at [`POLL_CAP`]), so callers may loop on this without starving the
    /// retransmit sweep.
    pub async fn update(&mut self) -> Result<Event, ConnError> {
        let now = Instant::now();
        let due = self
            .sender
            .sweep(now)
            .map_err(|RetriesExhausted| ConnError::MaxRetriesExceeded)?;
        for pkt in &due {
            self.transmit(pkt, true).await;
        }

        let wait = match self.sender.next_deadline() {
            Some(d) => d.saturating_duration_since(Instant::now()).min(POLL_CAP),
            None => POLL_CAP,
        };
        let (pkt, addr) = match self.socket.recv_timeout(wait).await {
            Ok(Some(received)) => received,
            Ok(None) => return Ok(Event::Idle),
            Err(SocketError::Packet(e)) => {
                log::warn!("[conn] dropping undecodable datagram: {e}");
                return Ok(Event::Dropped);
            }
            Err(e) => return Err(e.into()),
        };

        self.dispatch(pkt, addr).await
    }

    /// Classify one received packet and mutate state accordingly.
    async fn dispatch(&mut self, pkt: Packet, addr: SocketAddr) -> Result<Event, ConnError> {
        let seq = pkt.header.seq;
        log::debug!(
            "[conn] ← seq={seq} len={} flags={:#04x}{}",
            pkt.header.len,
            pkt.header.flags,
            if self.recent.contains(seq) { " retransmission" } else { "" },
        );

        // Pure SYN: meaningful only on a listener; a full backlog drops it.
        if pkt.is(flags::SYN) {
            if !self.is_listener {
                return Ok(Event::Dropped);
            }
            if let Some(backlog) = &mut self.backlog {
                if backlog.push(Pending { addr, isn: seq }).is_none() {
                    log::debug!("[conn] backlog full; SYN from {addr} dropped");
                }
            }
            return Ok(Event::Syn);
        }

        // Everything else must come from the one connected peer.
        if self.peer != Some(addr) {
            log::warn!("[conn] dropping packet from unexpected source {addr}");
            return Ok(Event::Dropped);
        }

        // Handshake reply: acknowledge our SYN, answer with a pure ACK.
        if pkt.is(flags::SYN | flags::ACK) {
            self.sender.ack_syn();
            if self.state == ConnectionState::SynSent {
                self.state = ConnectionState::Established;
            }
            self.transmit(&Packet::ack_for(seq), false).await;
            return Ok(Event::SynAck);
        }

        // Any ACK: release the echoed packet.  Per-packet, not cumulative.
        if pkt.has(flags::ACK) {
            self.sender.ack(seq);
            return Ok(if pkt.has(flags::FIN) {
                Event::FinAck
            } else {
                Event::Ack
            });
        }

        // Teardown: answer FIN with FIN-ACK.
        if pkt.is(flags::FIN) {
            self.received_fin = true;
            if self.state == ConnectionState::Established {
                self.state = ConnectionState::CloseWait;
            }
            self.transmit(&Packet::fin_ack_for(seq), false).await;
            return Ok(Event::Fin);
        }

        // Data-bearing (RQST, FIRST, middle, LAST): always ACK, even for a
        // duplicate — the sender may have missed the previous ACK.
        self.transmit(&Packet::ack_for(seq), false).await;

        if pkt.has(flags::RQST) {
            return Ok(Event::Rqst(pkt));
        }
        if self.recent.observe(seq) {
            Ok(Event::Data(pkt))
        } else {
            Ok(Event::Idle)
        }
    }

    // -----------------------------------------------------------------------
    // Send path
    // -----------------------------------------------------------------------

    /// Transmit a packet, registering it for retransmission unless it is a
    /// pure ACK or FIN-ACK (those are never retransmitted).
    async fn send_packet(&mut self, pkt: Packet, is_syn: bool) {
        let tracked = !pkt.is(flags::ACK) && !pkt.is(flags::ACK | flags::FIN);
        if tracked {
            self.sender.register(pkt.clone(), Instant::now(), is_syn);
        }
        self.transmit(&pkt, false).await;
    }

    /// Put one datagram on the wire.  A failed send is logged and otherwise
    /// ignored: tracked packets stay queued and will be retried, and a lost
    /// ACK is recovered by the peer's retransmission.
    async fn transmit(&self, pkt: &Packet, is_resend: bool) {
        let Some(peer) = self.peer else {
            return;
        };
        log::debug!(
            "[conn] → seq={} len={} flags={:#04x}{}",
            pkt.header.seq,
            pkt.header.len,
            pkt.header.flags,
            if is_resend { " retransmission" } else { "" },
        );
        if let Err(e) = self.socket.send_to(pkt, peer).await {
            log::warn!("[conn] send failed: {e}");
        }
    }
}
