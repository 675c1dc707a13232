//! Network simulator for deterministic testing.
//!
//! Real networks drop and duplicate packets.  To exercise the reliability
//! mechanisms without depending on actual network conditions, this module
//! provides a [`Simulator`]: a UDP relay that sits between the two
//! endpoints and applies a configurable fault model to every datagram, in
//! both directions:
//!
//! | Fault       | Description                                            |
//! |-------------|--------------------------------------------------------|
//! | Packet loss | Drop a payload-bearing datagram with `loss_rate`; drop |
//! |             | the first `drop_first_from_server` such datagrams from |
//! |             | the server unconditionally.                            |
//! | Duplication | Deliver any datagram twice with `duplicate_rate`.      |
//!
//! Loss is applied only to datagrams that carry payload (requests and file
//! data).  Those are exactly the segments the retransmit queue tracks
//! forever; bare control segments (SYN, ACK, FIN and their combinations)
//! pass through so a lossy run still tears down within the retry budget.
//!
//! The probabilistic faults draw from a seeded RNG so a fault pattern can
//! be replayed.  The client connects to [`Simulator::addr`] instead of the
//! server; the relay learns the client's address from its first datagram.
//!
//! Production builds never route traffic through this module — only tests
//! reference it.

use std::io;
use std::net::SocketAddr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use crate::packet::{HEADER_LEN, MAX_PKT};

/// Configuration for the fault-injection model.
///
/// All probabilities are in the range `[0.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Probability that a payload-bearing datagram is silently dropped.
    pub loss_rate: f64,
    /// Drop the first N payload-bearing datagrams travelling server →
    /// client outright (deterministic single-retransmission scenarios).
    pub drop_first_from_server: usize,
    /// Probability that a datagram is delivered twice.
    pub duplicate_rate: f64,
    /// RNG seed; the same seed replays the same fault pattern.
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults by default — the simulator is a transparent relay.
        Self {
            loss_rate: 0.0,
            drop_first_from_server: 0,
            duplicate_rate: 0.0,
            seed: 0,
        }
    }
}

/// A fault-injecting relay between one client and one server.
#[derive(Debug)]
pub struct Simulator {
    /// Address the client should treat as the server.
    pub addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl Simulator {
    /// Bind a relay on an ephemeral loopback port forwarding to `upstream`.
    pub async fn spawn(upstream: SocketAddr, config: SimulatorConfig) -> io::Result<Self> {
        let socket = UdpSocket::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
        let addr = socket.local_addr()?;
        let handle = tokio::spawn(relay(socket, upstream, config));
        Ok(Self { addr, handle })
    }
}

impl Drop for Simulator {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Forward datagrams between the client and `upstream`, applying faults.
async fn relay(socket: UdpSocket, upstream: SocketAddr, config: SimulatorConfig) {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut client: Option<SocketAddr> = None;
    let mut to_drop = config.drop_first_from_server;
    let mut buf = [0u8; MAX_PKT];

    loop {
        let (n, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(_) => return,
        };

        let dest = if from == upstream {
            match client {
                Some(c) => c,
                None => continue, // server spoke before any client showed up
            }
        } else {
            if client.is_none() {
                client = Some(from);
            }
            upstream
        };

        if n > HEADER_LEN {
            if from == upstream && to_drop > 0 {
                to_drop -= 1;
                log::debug!("[sim] dropped {n} bytes {from} → {dest} (drop_first)");
                continue;
            }
            if rng.random::<f64>() < config.loss_rate {
                log::debug!("[sim] dropped {n} bytes {from} → {dest}");
                continue;
            }
        }

        let _ = socket.send_to(&buf[..n], dest).await;
        if rng.random::<f64>() < config.duplicate_rate {
            log::debug!("[sim] duplicated {n} bytes {from} → {dest}");
            let _ = socket.send_to(&buf[..n], dest).await;
        }
    }
}
