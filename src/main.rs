//! Entry point for `rdt-over-udp`.
//!
//! Parses CLI arguments and dispatches into either **server** or **client**
//! mode.  All actual protocol work is delegated to library modules; `main.rs`
//! owns only process setup (logging, argument parsing, host lookup) and
//! mapping failures to exit codes.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};

use rdt_over_udp::connection::{ConnError, Connection};

/// Exit codes keyed to the class of the failing operation.
mod exit_code {
    pub const OPEN: i32 = 1;
    pub const SOCKET: i32 = 3;
    pub const BIND: i32 = 4;
    pub const ACCEPT: i32 = 5;
    pub const LISTEN: i32 = 6;
    pub const RECV: i32 = 9;
    pub const CLOSE: i32 = 10;
    pub const HOST: i32 = 11;
    pub const CONNECT: i32 = 12;
    pub const SEND: i32 = 13;
}

/// Reliable single-file transfer over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Serve one file to one client, then exit.
    Server {
        /// UDP port to listen on (binds 0.0.0.0).
        port: u16,
        /// Maximum handshakes queued while waiting for accept.
        #[arg(short, long, default_value_t = 10)]
        backlog: usize,
    },
    /// Request a file from a server.
    Client {
        /// Server host name or address.
        host: String,
        /// Server UDP port.
        port: u16,
        /// Name of the file to request.
        file: String,
        /// Local path the received bytes are written to.
        #[arg(short, long, default_value = "received.data")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let code = match cli.mode {
        Mode::Server { port, backlog } => run_server(port, backlog).await,
        Mode::Client {
            host,
            port,
            file,
            output,
        } => run_client(&host, port, &file, &output).await,
    };
    if code != 0 {
        process::exit(code);
    }
}

fn fail(op: &str, err: &ConnError, code: i32) -> i32 {
    eprintln!("rdt-over-udp: {op} failed: {err}");
    code
}

async fn run_server(port: u16, backlog: usize) -> i32 {
    let mut conn = match Connection::bind(SocketAddr::from(([0, 0, 0, 0], port))).await {
        Ok(c) => c,
        Err(e) => return fail("bind", &e, exit_code::BIND),
    };
    if let Err(e) = conn.listen(backlog) {
        return fail("listen", &e, exit_code::LISTEN);
    }
    log::info!("Listening on {}", conn.local_addr());

    if let Err(e) = conn.accept().await {
        return fail("accept", &e, exit_code::ACCEPT);
    }
    let name = match conn.recv_request().await {
        Ok(n) => n,
        Err(e) => return fail("receive request", &e, exit_code::RECV),
    };
    if let Err(e) = conn.send_file(Path::new(&name)).await {
        let code = match e {
            ConnError::Io(_) => exit_code::OPEN,
            _ => exit_code::SEND,
        };
        return fail("send file", &e, code);
    }
    if let Err(e) = conn.close().await {
        return fail("close", &e, exit_code::CLOSE);
    }
    0
}

async fn run_client(host: &str, port: u16, file: &str, output: &Path) -> i32 {
    let server = match tokio::net::lookup_host((host, port)).await {
        Ok(mut addrs) => match addrs.next() {
            Some(a) => a,
            None => {
                eprintln!("rdt-over-udp: no address found for {host}");
                return exit_code::HOST;
            }
        },
        Err(e) => {
            eprintln!("rdt-over-udp: host lookup failed: {e}");
            return exit_code::HOST;
        }
    };

    let mut conn = match Connection::bind(SocketAddr::from(([0, 0, 0, 0], 0))).await {
        Ok(c) => c,
        Err(e) => return fail("open socket", &e, exit_code::SOCKET),
    };
    if let Err(e) = conn.connect(server).await {
        return fail("connect", &e, exit_code::CONNECT);
    }
    if let Err(e) = conn.send_request(file).await {
        return fail("send request", &e, exit_code::SEND);
    }
    if let Err(e) = conn.recv_file(output).await {
        let code = match e {
            ConnError::Io(_) => exit_code::OPEN,
            _ => exit_code::RECV,
        };
        return fail("receive file", &e, code);
    }
    if let Err(e) = conn.wait_and_close().await {
        return fail("close", &e, exit_code::CLOSE);
    }
    0
}
