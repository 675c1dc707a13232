//! Send-side state machine: window accounting and the retransmit queue.
//!
//! [`SendWindow`] tracks every transmitted-but-unacknowledged packet.  Unlike
//! a cumulative-ACK design, reliability here is **per packet**: each ACK
//! echoes the seq of exactly one outstanding segment, and each outstanding
//! segment carries its own retransmission deadline.
//!
//! # Protocol contract
//!
//! - At most [`WND`](crate::seq::WND) payload+header bytes may be
//!   outstanding at once, and at most `UNACKED_SLOTS - 1` packets.
//! - A new or retransmitted packet is always assigned `resend_at = now +
//!   RTO`, so the deadline chain stays sorted by construction: push at the
//!   tail, expire from the head, rotate an expired head back to the tail.
//! - Acknowledged packets are released immediately but their storage slot is
//!   reclaimed lazily, only once it reaches the head of the ring — slot
//!   indices held by the chain and the seq map stay valid in between.
//!
//! # Sequence-number layout
//!
//! ```text
//!  min_unacked        next_seq
//!      │                  │
//!  ────┼──────────────────┼──────────────────▶ seq space (mod MAX_SEQ)
//!      │ ◀── in flight ──▶│ ◀── admissible ──▶
//!      │ ◀───────────── WND ────────────────▶ │
//! ```
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility.

use std::collections::{HashMap, VecDeque};

use tokio::time::{Duration, Instant};

use crate::packet::{Packet, MSS};
use crate::ring::RingBuffer;
use crate::seq::{self, WND};

/// Per-packet retransmission timeout.
pub const RTO: Duration = Duration::from_millis(500);

/// Give up on a peer after this many retransmissions of the same packet.
pub const MAX_RETRIES: u32 = 6;

/// Storage slots for unacked packets: enough for two windows of full-size
/// segments, plus the one slot the ring keeps free.
pub const UNACKED_SLOTS: usize = 2 * WND as usize / MSS + 1;

/// The same segment has been retransmitted [`MAX_RETRIES`] times with no ACK;
/// the peer is presumed gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetriesExhausted;

/// One transmitted packet awaiting acknowledgement.
///
/// `packet` becomes `None` the moment the segment is ACKed; the slot then
/// waits for lazy compaction.
#[derive(Debug)]
struct Unacked {
    packet: Option<Packet>,
    resend_at: Instant,
    tx_count: u32,
}

/// Send-side state for one connection.
#[derive(Debug)]
pub struct SendWindow {
    /// Stable storage for unacked entries.
    slots: RingBuffer<Unacked>,
    /// Slot indices ordered by `resend_at` (front = earliest deadline).
    chain: VecDeque<usize>,
    /// O(1) ACK lookup: seq → occupied slot index.
    seq_to_slot: HashMap<u16, usize>,
    /// The outstanding SYN, tracked separately: a SYN|ACK acknowledges it
    /// without echoing its seq.
    syn_slot: Option<usize>,
    /// Sequence number the next transmission will carry.
    pub next_seq: u16,
    /// Seq of the oldest unacknowledged packet; `None` when nothing is
    /// outstanding.
    min_unacked: Option<u16>,
    /// Bytes currently outstanding.
    wnd_curr: u16,
}

impl SendWindow {
    pub fn new() -> Self {
        Self {
            slots: RingBuffer::with_capacity(UNACKED_SLOTS),
            chain: VecDeque::new(),
            seq_to_slot: HashMap::new(),
            syn_slot: None,
            next_seq: 0,
            min_unacked: None,
            wnd_curr: 0,
        }
    }

    /// `true` when a packet of total length `len` may be transmitted without
    /// violating the window bound or overrunning the unacked storage.
    pub fn can_admit(&self, len: u16) -> bool {
        let base = self.min_unacked.unwrap_or(self.next_seq);
        seq::forward_distance(base, self.next_seq) + len <= WND && !self.slots.is_full()
    }

    /// Record a freshly transmitted packet for retransmission tracking.
    ///
    /// Advances `next_seq` by the packet's `len` and charges the window.
    /// Pure ACKs and retransmissions must not be registered.
    pub fn register(&mut self, packet: Packet, now: Instant, is_syn: bool) {
        let pkt_seq = packet.header.seq;
        let pkt_len = packet.header.len;

        let entry = Unacked {
            packet: Some(packet),
            resend_at: now + RTO,
            tx_count: 1,
        };
        let index = self
            .slots
            .push(entry)
            .expect("unacked storage full: window admission must gate every send");
        self.chain.push_back(index);

        if is_syn {
            self.syn_slot = Some(index);
        } else {
            self.seq_to_slot.insert(pkt_seq, index);
        }

        self.wnd_curr += pkt_len;
        if self.min_unacked.is_none() {
            self.min_unacked = Some(pkt_seq);
        }
        self.next_seq = seq::add(pkt_seq, pkt_len);
    }

    /// Retransmit sweep: collect every packet whose deadline has passed,
    /// re-arming each at `now + RTO` and rotating it to the chain tail.
    ///
    /// The caller transmits the returned clones.  Errors once a single
    /// packet has exhausted [`MAX_RETRIES`].
    pub fn sweep(&mut self, now: Instant) -> Result<Vec<Packet>, RetriesExhausted> {
        let mut due = Vec::new();
        while let Some(&index) = self.chain.front() {
            let entry = match self.slots.get_mut(index) {
                Some(e) => e,
                None => {
                    self.chain.pop_front();
                    continue;
                }
            };
            let packet = match &entry.packet {
                Some(p) => p,
                None => {
                    self.chain.pop_front();
                    continue;
                }
            };
            if now < entry.resend_at {
                break;
            }
            if entry.tx_count > MAX_RETRIES {
                return Err(RetriesExhausted);
            }
            due.push(packet.clone());
            entry.tx_count += 1;
            entry.resend_at = now + RTO;
            self.chain.rotate_left(1);
        }
        Ok(due)
    }

    /// Acknowledge the outstanding packet carrying `seq`.
    ///
    /// Returns `false` for a duplicate or spurious ACK; delivering the same
    /// ACK twice changes nothing.
    pub fn ack(&mut self, pkt_seq: u16) -> bool {
        match self.seq_to_slot.remove(&pkt_seq) {
            Some(index) => self.release(index),
            None => false,
        }
    }

    /// Acknowledge the outstanding SYN (on receipt of SYN|ACK).
    pub fn ack_syn(&mut self) -> bool {
        match self.syn_slot.take() {
            Some(index) => self.release(index),
            None => false,
        }
    }

    /// Release one acked entry: detach it from the deadline chain, free the
    /// packet, compact leading freed slots, refresh `min_unacked`.
    fn release(&mut self, index: usize) -> bool {
        let packet = match self.slots.get_mut(index).and_then(|e| e.packet.take()) {
            Some(p) => p,
            None => return false,
        };
        self.chain.retain(|&i| i != index);
        self.wnd_curr -= packet.header.len;

        // Lazy compaction: only freed slots at the ring head can be popped
        // without disturbing indices the chain still refers to.
        while matches!(self.slots.peek(), Some(e) if e.packet.is_none()) {
            self.slots.pop();
        }

        self.min_unacked = self
            .slots
            .peek()
            .and_then(|e| e.packet.as_ref())
            .map(|p| p.header.seq);
        true
    }

    /// `true` while any packet awaits acknowledgement.
    pub fn has_unacked(&self) -> bool {
        !self.chain.is_empty()
    }

    /// Number of packets awaiting acknowledgement.
    pub fn in_flight(&self) -> usize {
        self.chain.len()
    }

    /// Earliest retransmission deadline, for sizing the receive poll.
    pub fn next_deadline(&self) -> Option<Instant> {
        let &index = self.chain.front()?;
        self.slots.get(index).map(|e| e.resend_at)
    }

    /// Bytes currently outstanding (`≤ WND` at all times).
    pub fn outstanding_bytes(&self) -> u16 {
        self.wnd_curr
    }

    /// Seq of the oldest unacknowledged packet.
    pub fn min_unacked(&self) -> Option<u16> {
        self.min_unacked
    }
}

impl Default for SendWindow {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_pkt(seq: u16, payload_len: usize) -> Packet {
        Packet::data(seq, 0, &vec![0u8; payload_len])
    }

    #[tokio::test(start_paused = true)]
    async fn register_advances_next_seq_and_charges_window() {
        let mut w = SendWindow::new();
        w.next_seq = 100;
        let pkt = data_pkt(100, 400); // len 408
        w.register(pkt, Instant::now(), false);

        assert_eq!(w.next_seq, 508);
        assert_eq!(w.min_unacked(), Some(100));
        assert_eq!(w.outstanding_bytes(), 408);
        assert!(w.has_unacked());
    }

    #[tokio::test(start_paused = true)]
    async fn window_bound_blocks_admission() {
        let mut w = SendWindow::new();
        let now = Instant::now();
        // Five full segments occupy 5 * 1023 = 5115 of the 5120-byte window.
        for _ in 0..5 {
            assert!(w.can_admit(1023));
            w.register(data_pkt(w.next_seq, MSS), now, false);
        }
        assert_eq!(w.outstanding_bytes(), 5115);
        assert!(!w.can_admit(1023));
        assert!(w.can_admit(5)); // a 5-byte packet still fits

        // ACK the oldest; a full segment becomes admissible again.
        assert!(w.ack(0));
        assert!(w.can_admit(1023));
    }

    #[tokio::test(start_paused = true)]
    async fn storage_capacity_blocks_admission_before_window_does() {
        let mut w = SendWindow::new();
        let now = Instant::now();
        // Tiny packets never exhaust WND, but they do exhaust the slots.
        for _ in 0..(UNACKED_SLOTS - 1) {
            assert!(w.can_admit(8));
            w.register(Packet::fin(w.next_seq), now, false);
        }
        assert!(!w.can_admit(8));
    }

    #[tokio::test(start_paused = true)]
    async fn ack_is_idempotent_and_order_independent() {
        let mut w = SendWindow::new();
        let now = Instant::now();
        for _ in 0..3 {
            w.register(data_pkt(w.next_seq, 100), now, false); // seqs 0, 108, 216
        }

        // Ack the middle packet first: min_unacked must not move.
        assert!(w.ack(108));
        assert_eq!(w.min_unacked(), Some(0));
        assert_eq!(w.outstanding_bytes(), 216);

        // Duplicate ACK is a no-op.
        assert!(!w.ack(108));
        assert_eq!(w.outstanding_bytes(), 216);

        // Acking the head skips the already-freed middle slot.
        assert!(w.ack(0));
        assert_eq!(w.min_unacked(), Some(216));

        assert!(w.ack(216));
        assert_eq!(w.min_unacked(), None);
        assert!(!w.has_unacked());
        assert_eq!(w.outstanding_bytes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn spurious_ack_is_ignored() {
        let mut w = SendWindow::new();
        w.register(data_pkt(0, 100), Instant::now(), false);
        assert!(!w.ack(9999));
        assert!(w.has_unacked());
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_resends_due_packets_in_fifo_order() {
        let mut w = SendWindow::new();
        let now = Instant::now();
        for _ in 0..3 {
            w.register(data_pkt(w.next_seq, 50), now, false); // seqs 0, 58, 116
        }

        // Nothing is due before the deadline.
        assert!(w.sweep(Instant::now()).unwrap().is_empty());

        tokio::time::advance(RTO).await;
        let due = w.sweep(Instant::now()).unwrap();
        let seqs: Vec<u16> = due.iter().map(|p| p.header.seq).collect();
        assert_eq!(seqs, vec![0, 58, 116]);

        // All three were re-armed; an immediate second sweep is empty.
        assert!(w.sweep(Instant::now()).unwrap().is_empty());

        tokio::time::advance(RTO).await;
        assert_eq!(w.sweep(Instant::now()).unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn chain_stays_deadline_sorted_across_partial_expiry() {
        let mut w = SendWindow::new();
        w.register(data_pkt(0, 50), Instant::now(), false);

        tokio::time::advance(RTO / 2).await;
        w.register(data_pkt(58, 50), Instant::now(), false);

        // Only the first packet is due at RTO; it rotates behind the second.
        tokio::time::advance(RTO / 2).await;
        let due = w.sweep(Instant::now()).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].header.seq, 0);

        // Half an RTO later the second expires; the rotated first is not due.
        tokio::time::advance(RTO / 2).await;
        let due = w.sweep(Instant::now()).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].header.seq, 58);
    }

    #[tokio::test(start_paused = true)]
    async fn syn_is_acked_through_its_own_slot() {
        let mut w = SendWindow::new();
        let syn = Packet::syn(7);
        w.register(syn, Instant::now(), true);
        assert!(w.has_unacked());

        // A seq-keyed ACK cannot reach the SYN.
        assert!(!w.ack(7));
        assert!(w.ack_syn());
        assert!(!w.ack_syn()); // idempotent
        assert!(!w.has_unacked());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_exhausted_after_cap() {
        let mut w = SendWindow::new();
        w.register(data_pkt(0, 10), Instant::now(), false);

        for _ in 0..MAX_RETRIES {
            tokio::time::advance(RTO).await;
            assert_eq!(w.sweep(Instant::now()).unwrap().len(), 1);
        }

        tokio::time::advance(RTO).await;
        assert_eq!(w.sweep(Instant::now()), Err(RetriesExhausted));
    }

    #[tokio::test(start_paused = true)]
    async fn seq_space_wraps_inside_the_window() {
        let mut w = SendWindow::new();
        let now = Instant::now();
        w.next_seq = crate::seq::MAX_SEQ - 500;

        w.register(data_pkt(w.next_seq, MSS), now, false); // wraps
        assert_eq!(w.next_seq, 523);
        assert_eq!(w.min_unacked(), Some(crate::seq::MAX_SEQ - 500));
        assert!(w.can_admit(1023));

        w.register(data_pkt(w.next_seq, MSS), now, false);
        assert_eq!(w.outstanding_bytes(), 2046);
        assert!(w.ack(crate::seq::MAX_SEQ - 500));
        assert_eq!(w.min_unacked(), Some(523));
    }
}
