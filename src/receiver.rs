//! Receive-side state machines: duplicate suppression and in-order
//! reassembly.
//!
//! Two independent pieces live here:
//!
//! - [`RecentSeqs`] answers "have I already delivered this data seq?".  A
//!   retransmitted segment is **always** re-ACKed (the sender may have missed
//!   the first ACK) but its payload must reach the output exactly once.
//! - [`Reassembly`] turns an unordered stream of accepted data segments into
//!   in-order bytes on an [`io::Write`] sink, holding back segments that
//!   arrive ahead of `expected_seq` and draining them once the gap fills.
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::io::{self, Write};

use crate::packet::{flags, Packet};
use crate::seq;

// ---------------------------------------------------------------------------
// Duplicate suppression
// ---------------------------------------------------------------------------

/// Short list of recently delivered data sequence numbers.
///
/// Entries further than one window from the newest arrival (in either
/// modular direction) can never be retransmitted again and are pruned on the
/// fly, keeping the list a handful of elements long.
#[derive(Debug, Default)]
pub struct RecentSeqs {
    seen: VecDeque<u16>,
}

impl RecentSeqs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an arriving data seq.  Returns `false` when the seq was
    /// already delivered (the caller ACKs but does not redeliver).
    pub fn observe(&mut self, pkt_seq: u16) -> bool {
        let mut fresh = true;
        self.seen.retain(|&s| {
            if s == pkt_seq {
                fresh = false;
            }
            // Keep an entry only while it sits within one window of the
            // newest arrival, in either modular direction.
            seq::within_window(s, pkt_seq) || seq::within_window(pkt_seq, s)
        });
        if fresh {
            self.seen.push_back(pkt_seq);
        }
        fresh
    }

    /// `true` when `pkt_seq` has been seen and not yet pruned.  Used for the
    /// retransmission marker in receive logging.
    pub fn contains(&self, pkt_seq: u16) -> bool {
        self.seen.contains(&pkt_seq)
    }
}

// ---------------------------------------------------------------------------
// Reassembly
// ---------------------------------------------------------------------------

/// An out-of-order segment parked until `expected_seq` catches up.
#[derive(Debug)]
struct Held {
    payload: Vec<u8>,
    /// Wire length of the segment (header included) — the stride by which
    /// `expected_seq` advances when this entry drains.
    len: u16,
    last: bool,
}

/// Outcome of feeding one data segment to [`Reassembly::on_data`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// The segment (and possibly held successors) reached the sink.
    Advanced,
    /// The segment was parked out of order.
    Held,
    /// The final segment has been written; the transfer is done.
    Complete,
}

/// In-order reassembly of one file transfer.
///
/// The transfer starts at the segment carrying `FIRST` and ends when the
/// segment carrying `LAST` is written in order.
#[derive(Debug, Default)]
pub struct Reassembly {
    /// Next in-order byte position; `None` until `FIRST` arrives.
    expected: Option<u16>,
    holdback: HashMap<u16, Held>,
    complete: bool,
}

impl Reassembly {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Feed one accepted (non-duplicate) data segment, writing any newly
    /// in-order payload to `out`.
    pub fn on_data<W: Write>(&mut self, pkt: &Packet, out: &mut W) -> io::Result<Progress> {
        let pkt_seq = pkt.header.seq;
        let pkt_len = pkt.header.len;
        let is_last = pkt.has(flags::LAST);

        let in_order = match self.expected {
            None => pkt.has(flags::FIRST),
            Some(e) => pkt_seq == e,
        };

        if !in_order {
            self.holdback.insert(
                pkt_seq,
                Held {
                    payload: pkt.payload.clone(),
                    len: pkt_len,
                    last: is_last,
                },
            );
            return Ok(Progress::Held);
        }

        out.write_all(&pkt.payload)?;
        self.expected = Some(seq::add(pkt_seq, pkt_len));
        if is_last {
            self.complete = true;
            return Ok(Progress::Complete);
        }

        self.drain(out)?;
        Ok(if self.complete {
            Progress::Complete
        } else {
            Progress::Advanced
        })
    }

    /// Pop consecutive held segments now that `expected` has moved.
    fn drain<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        while let Some(e) = self.expected {
            let held = match self.holdback.remove(&e) {
                Some(h) => h,
                None => break,
            };
            out.write_all(&held.payload)?;
            if held.last {
                self.complete = true;
                break;
            }
            self.expected = Some(seq::add(e, held.len));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seq::{MAX_SEQ, WND};

    fn first(seq: u16, payload: &[u8]) -> Packet {
        Packet::data(seq, flags::FIRST, payload)
    }
    fn mid(seq: u16, payload: &[u8]) -> Packet {
        Packet::data(seq, 0, payload)
    }
    fn last(seq: u16, payload: &[u8]) -> Packet {
        Packet::data(seq, flags::LAST, payload)
    }

    // -- RecentSeqs ---------------------------------------------------------

    #[test]
    fn duplicate_seq_is_reported_once() {
        let mut r = RecentSeqs::new();
        assert!(r.observe(100));
        assert!(!r.observe(100));
        assert!(r.observe(1123));
        assert!(!r.observe(100)); // still remembered
    }

    #[test]
    fn far_entries_are_pruned() {
        let mut r = RecentSeqs::new();
        assert!(r.observe(0));
        // More than a window ahead: 0 is pruned...
        assert!(r.observe(WND + 1000));
        // ...so 0 now reads as fresh again.
        assert!(r.observe(0));
    }

    #[test]
    fn pruning_is_window_symmetric_across_wrap() {
        let mut r = RecentSeqs::new();
        assert!(r.observe(100));
        // 30600 is only 220 behind 100 in modular space — both stay.
        assert!(r.observe(MAX_SEQ - 120));
        assert!(!r.observe(100));
        assert!(!r.observe(MAX_SEQ - 120));
    }

    // -- Reassembly ---------------------------------------------------------

    #[test]
    fn in_order_stream_writes_through() {
        let mut ra = Reassembly::new();
        let mut out = Vec::new();

        assert_eq!(ra.on_data(&first(100, b"aaa"), &mut out).unwrap(), Progress::Advanced);
        assert_eq!(ra.on_data(&mid(111, b"bbb"), &mut out).unwrap(), Progress::Advanced);
        assert_eq!(ra.on_data(&last(122, b"cc"), &mut out).unwrap(), Progress::Complete);

        assert_eq!(out, b"aaabbbcc");
        assert!(ra.is_complete());
    }

    #[test]
    fn single_segment_file_completes_immediately() {
        let mut ra = Reassembly::new();
        let mut out = Vec::new();
        let pkt = Packet::data(7, flags::FIRST | flags::LAST, b"HELLO");
        assert_eq!(ra.on_data(&pkt, &mut out).unwrap(), Progress::Complete);
        assert_eq!(out, b"HELLO");
    }

    #[test]
    fn empty_file_is_one_zero_payload_segment() {
        let mut ra = Reassembly::new();
        let mut out = Vec::new();
        let pkt = Packet::data(9, flags::FIRST | flags::LAST, b"");
        assert_eq!(ra.on_data(&pkt, &mut out).unwrap(), Progress::Complete);
        assert!(out.is_empty());
    }

    #[test]
    fn data_before_first_is_held() {
        let mut ra = Reassembly::new();
        let mut out = Vec::new();

        assert_eq!(ra.on_data(&mid(508, b"b"), &mut out).unwrap(), Progress::Held);
        assert!(out.is_empty());

        // FIRST arrives; the held successor drains right behind it.
        let a = Packet::data(100, flags::FIRST, &vec![b'a'; 400]); // len 408 → next 508
        assert_eq!(ra.on_data(&a, &mut out).unwrap(), Progress::Advanced);
        assert_eq!(out.len(), 401);
        assert_eq!(&out[400..], b"b");
    }

    /// Segments A(FIRST, seq=100, 400 B), B(seq=508, 400 B),
    /// C(LAST, seq=916, 200 B) delivered as B, A, C must come out as
    /// A ∥ B ∥ C with `expected_seq` stepping 100 → 508 → 916 → 1116.
    #[test]
    fn out_of_order_segments_drain_in_seq_order() {
        let mut ra = Reassembly::new();
        let mut out = Vec::new();

        let a = Packet::data(100, flags::FIRST, &vec![b'A'; 400]);
        let b = Packet::data(508, 0, &vec![b'B'; 400]);
        let c = Packet::data(916, flags::LAST, &vec![b'C'; 200]);

        assert_eq!(ra.on_data(&b, &mut out).unwrap(), Progress::Held);
        assert_eq!(ra.on_data(&a, &mut out).unwrap(), Progress::Advanced);
        assert_eq!(ra.expected, Some(916));
        assert_eq!(ra.on_data(&c, &mut out).unwrap(), Progress::Complete);

        let mut want = vec![b'A'; 400];
        want.extend(vec![b'B'; 400]);
        want.extend(vec![b'C'; 200]);
        assert_eq!(out, want);
    }

    #[test]
    fn held_last_segment_completes_on_drain() {
        let mut ra = Reassembly::new();
        let mut out = Vec::new();

        // LAST arrives before the middle segment.
        assert_eq!(ra.on_data(&last(20, b"zz"), &mut out).unwrap(), Progress::Held);
        assert_eq!(ra.on_data(&mid(10, b"mm"), &mut out).unwrap(), Progress::Held);
        let done = ra.on_data(&first(0, b"ff"), &mut out).unwrap(); // len 10 → 10 → 20
        assert_eq!(done, Progress::Complete);
        assert_eq!(out, b"ffmmzz");
    }

    #[test]
    fn holdback_overwrites_same_seq() {
        let mut ra = Reassembly::new();
        let mut out = Vec::new();
        ra.on_data(&last(50, b"old"), &mut out).unwrap();
        ra.on_data(&last(50, b"new"), &mut out).unwrap();
        // FIRST spans 41..50, so the drain lands exactly on the held seq.
        let done = ra.on_data(&first(41, b"x"), &mut out).unwrap();
        assert_eq!(done, Progress::Complete);
        assert_eq!(out, b"xnew");
    }

    #[test]
    fn expected_seq_wraps_with_the_sequence_space() {
        let mut ra = Reassembly::new();
        let mut out = Vec::new();

        let near_end = MAX_SEQ - 200;
        let a = Packet::data(near_end, flags::FIRST, &vec![1u8; 400]); // len 408 wraps to 208
        assert_eq!(ra.on_data(&a, &mut out).unwrap(), Progress::Advanced);
        assert_eq!(ra.expected, Some(208));

        let b = Packet::data(208, flags::LAST, &vec![2u8; 100]);
        assert_eq!(ra.on_data(&b, &mut out).unwrap(), Progress::Complete);
        assert_eq!(out.len(), 500);
    }
}
