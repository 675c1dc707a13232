//! Async UDP socket abstraction.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` that speaks
//! [`crate::packet::Packet`] instead of raw bytes.  All protocol logic lives
//! elsewhere; this module owns only byte I/O.

use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tokio::time::Duration;

use crate::packet::{Packet, PacketError, MAX_PKT};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can arise from socket operations.
#[derive(Debug)]
pub enum SocketError {
    /// Underlying I/O error from the OS.
    Io(std::io::Error),
    /// The received datagram could not be decoded as a valid packet.
    Packet(PacketError),
}

impl std::fmt::Display for SocketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "socket I/O error: {e}"),
            Self::Packet(e) => write!(f, "packet decode error: {e}"),
        }
    }
}

impl std::error::Error for SocketError {}

impl From<std::io::Error> for SocketError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<PacketError> for SocketError {
    fn from(e: PacketError) -> Self {
        Self::Packet(e)
    }
}

// ---------------------------------------------------------------------------
// Socket
// ---------------------------------------------------------------------------

/// An async, packet-oriented UDP socket.
///
/// All methods are `&self`; the socket is owned by exactly one
/// [`crate::connection::Connection`] and closes with it.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after the OS assigns an
    /// ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, SocketError> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }

    /// Encode `packet` and send it as a single UDP datagram to `dest`.
    pub async fn send_to(&self, packet: &Packet, dest: SocketAddr) -> Result<(), SocketError> {
        let bytes = packet.encode();
        self.inner.send_to(&bytes, dest).await?;
        Ok(())
    }

    /// Wait up to `timeout` for one datagram and decode it into a
    /// [`Packet`].
    ///
    /// Returns `Ok(None)` when the deadline passes with nothing readable,
    /// `(packet, sender_address)` otherwise.  Datagrams that fail to decode
    /// are returned as `Err(SocketError::Packet)` — the caller decides
    /// whether to drop or abort.
    pub async fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Option<(Packet, SocketAddr)>, SocketError> {
        let mut buf = [0u8; MAX_PKT];
        match tokio::time::timeout(timeout, self.inner.recv_from(&mut buf)).await {
            Err(_elapsed) => Ok(None),
            Ok(Err(e)) => Err(e.into()),
            Ok(Ok((n, addr))) => {
                let packet = Packet::decode(&buf[..n])?;
                Ok(Some((packet, addr)))
            }
        }
    }
}
