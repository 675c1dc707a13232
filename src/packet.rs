//! Wire-format definitions for protocol segments.
//!
//! Every datagram exchanged between peers is a [`Packet`].  This module is
//! responsible for:
//! - Defining the on-wire binary layout (header fields, flags, payload).
//! - Serialising a [`Packet`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Packet`], returning errors
//!   for malformed or truncated input.
//! - Building the handful of fixed segment shapes (SYN, ACK echoes, FIN,
//!   file request, data) so higher layers never hand-assemble headers.
//!
//! No I/O happens here — this is pure data transformation.
//!
//! # Layout
//!
//! ```text
//!  0      2      4      6      8
//!  ├──────┼──────┼──────┼──────┼─────────────────┐
//!  │ seq  │ rsvd │ len  │flags │ payload ...     │
//!  └──────┴──────┴──────┴──────┴─────────────────┘
//! ```
//!
//! All four header fields are `u16` big-endian.  `len` is the total packet
//! length **including** the header, so `payload.len() == len - HEADER_LEN`.

/// Maximum size of one datagram, header included.
pub const MAX_PKT: usize = 1024;

/// Size of the fixed header in bytes.
pub const HEADER_LEN: usize = 8;

/// Maximum payload per data segment.
///
/// One byte inside `MAX_PKT` is reserved for the NUL terminator of a file
/// request, and the same accounting applies to data segments so that the
/// sender's segment size always matches the receiver's `len`-based sequence
/// stride.
pub const MSS: usize = MAX_PKT - HEADER_LEN - 1;

/// Bit-flag constants for the `flags` header field.
pub mod flags {
    /// Synchronise sequence numbers (handshake initiation).
    pub const SYN: u16 = 0x01;
    /// Finish — sender has no more data to send.
    pub const FIN: u16 = 0x02;
    /// Acknowledges the segment whose seq this packet echoes.
    pub const ACK: u16 = 0x04;
    /// Payload is a NUL-terminated file name.
    pub const RQST: u16 = 0x08;
    /// First data segment of the file.
    pub const FIRST: u16 = 0x10;
    /// Final data segment of the file.
    pub const LAST: u16 = 0x20;
}

/// Fixed-size protocol header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Sequence number of this segment, in bytes, modulo [`crate::seq::MAX_SEQ`].
    pub seq: u16,
    /// Must be zero on the wire; ignored on receive.
    pub reserved: u16,
    /// Total packet length including the header.
    pub len: u16,
    /// Bitmask of [`flags`] constants.
    pub flags: u16,
}

/// A complete protocol datagram: header + payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Build a packet from raw parts, deriving `len` from the payload.
    fn with_payload(seq: u16, flags: u16, payload: Vec<u8>) -> Self {
        debug_assert!(HEADER_LEN + payload.len() <= MAX_PKT);
        Self {
            header: Header {
                seq,
                reserved: 0,
                len: (HEADER_LEN + payload.len()) as u16,
                flags,
            },
            payload,
        }
    }

    /// Handshake open: `SYN` carrying a freshly chosen initial sequence number.
    pub fn syn(isn: u16) -> Self {
        Self::with_payload(isn, flags::SYN, Vec::new())
    }

    /// Handshake reply: `SYN|ACK` carrying the replier's own initial sequence number.
    pub fn syn_ack(isn: u16) -> Self {
        Self::with_payload(isn, flags::SYN | flags::ACK, Vec::new())
    }

    /// Pure `ACK` echoing the acknowledged segment's seq.
    pub fn ack_for(seq: u16) -> Self {
        Self::with_payload(seq, flags::ACK, Vec::new())
    }

    /// Teardown: `FIN` at the sender's current sequence position.
    pub fn fin(seq: u16) -> Self {
        Self::with_payload(seq, flags::FIN, Vec::new())
    }

    /// Teardown reply: `ACK|FIN` echoing the peer's FIN seq.
    pub fn fin_ack_for(seq: u16) -> Self {
        Self::with_payload(seq, flags::ACK | flags::FIN, Vec::new())
    }

    /// File request: NUL-terminated `name` at `seq`.
    ///
    /// The caller must have checked `name.len() + HEADER_LEN + 1 <= MAX_PKT`.
    pub fn request(seq: u16, name: &str) -> Self {
        let mut payload = Vec::with_capacity(name.len() + 1);
        payload.extend_from_slice(name.as_bytes());
        payload.push(0);
        Self::with_payload(seq, flags::RQST, payload)
    }

    /// File data segment; `extra` carries `FIRST`/`LAST` as appropriate.
    pub fn data(seq: u16, extra: u16, chunk: &[u8]) -> Self {
        debug_assert!(chunk.len() <= MSS);
        Self::with_payload(seq, extra, chunk.to_vec())
    }

    /// `true` when the flag field is exactly `mask` (no other bits set).
    pub fn is(&self, mask: u16) -> bool {
        self.header.flags == mask
    }

    /// `true` when every bit of `mask` is set.
    pub fn has(&self, mask: u16) -> bool {
        self.header.flags & mask == mask
    }

    /// Parse the payload of a `RQST` segment as a NUL-terminated file name.
    pub fn request_name(&self) -> Option<String> {
        let end = self.payload.iter().position(|&b| b == 0)?;
        String::from_utf8(self.payload[..end].to_vec()).ok()
    }

    /// Serialise this packet into a newly allocated byte vector.
    ///
    /// The `reserved` field is forced to zero regardless of its in-memory
    /// value.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&self.header.seq.to_be_bytes());
        buf.extend_from_slice(&0u16.to_be_bytes());
        buf.extend_from_slice(&self.header.len.to_be_bytes());
        buf.extend_from_slice(&self.header.flags.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parse a [`Packet`] from one received datagram.
    ///
    /// Returns `Err` if the buffer is shorter than the header, or if the
    /// `len` field disagrees with the datagram size or exceeds [`MAX_PKT`].
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::BufferTooShort);
        }

        let word = |i: usize| u16::from_be_bytes([buf[i], buf[i + 1]]);
        let header = Header {
            seq: word(0),
            reserved: word(2),
            len: word(4),
            flags: word(6),
        };

        let len = header.len as usize;
        if len != buf.len() || len > MAX_PKT {
            return Err(PacketError::LengthMismatch);
        }

        Ok(Self {
            header,
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }
}

/// Errors that can arise when parsing a raw datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketError {
    /// Buffer shorter than the fixed header size.
    BufferTooShort,
    /// `len` field does not match the datagram size, or exceeds `MAX_PKT`.
    LengthMismatch,
}

impl std::fmt::Display for PacketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BufferTooShort => write!(f, "datagram shorter than header"),
            Self::LengthMismatch => write!(f, "len field inconsistent with datagram size"),
        }
    }
}

impl std::error::Error for PacketError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_is_big_endian() {
        let pkt = Packet::data(0x1234, flags::FIRST, b"hi");
        let bytes = pkt.encode();
        assert_eq!(&bytes[..8], &[0x12, 0x34, 0, 0, 0, 10, 0, 0x10]);
        assert_eq!(&bytes[8..], b"hi");
    }

    #[test]
    fn decode_rejects_truncated_header() {
        assert_eq!(Packet::decode(&[0; 5]), Err(PacketError::BufferTooShort));
    }

    #[test]
    fn decode_rejects_len_mismatch() {
        let mut bytes = Packet::data(7, 0, b"abc").encode();
        bytes.push(0); // one stray byte past the advertised len
        assert_eq!(Packet::decode(&bytes), Err(PacketError::LengthMismatch));
    }

    #[test]
    fn reserved_is_cleared_on_encode() {
        let mut pkt = Packet::syn(9);
        pkt.header.reserved = 0xbeef;
        let bytes = pkt.encode();
        assert_eq!(&bytes[2..4], &[0, 0]);
    }

    #[test]
    fn request_round_trips_name() {
        let pkt = Packet::request(100, "data.bin");
        assert_eq!(pkt.header.len as usize, HEADER_LEN + "data.bin".len() + 1);
        let back = Packet::decode(&pkt.encode()).unwrap();
        assert_eq!(back.request_name().as_deref(), Some("data.bin"));
    }

    #[test]
    fn flag_queries() {
        let pkt = Packet::syn_ack(3);
        assert!(pkt.is(flags::SYN | flags::ACK));
        assert!(pkt.has(flags::ACK));
        assert!(!pkt.is(flags::ACK));

        let ack = Packet::ack_for(55);
        assert_eq!(ack.header.seq, 55);
        assert_eq!(ack.header.len as usize, HEADER_LEN);
        assert!(ack.payload.is_empty());
    }
}
