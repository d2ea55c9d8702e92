//! Server
//!
//! Wires the pieces together on one reactor thread:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      EventLoop<Server>                       │
//! │                                                              │
//! │  listener fd ── readable ──> accept_handler                  │
//! │  client fd   ── readable ──> read_handler  ──> dispatch      │
//! │  client fd   ── writable ──> write_handler                   │
//! │  timer       ── every interval_ms ──> server_cron (expiry)   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Callbacks get `&mut Server`; nothing is shared across threads and there
//! are no locks.

use std::collections::HashMap;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::{Duration, Instant};

use mio::net::{TcpListener, TcpStream};
use tracing::{debug, info, trace, warn};

use crate::commands::CommandTable;
use crate::config::Config;
use crate::connection::{Client, ConnectionError};
use crate::event::{EventLoop, Mask, TimerId, TimerKind};
use crate::storage::{run_expire_cycle, Keyspace};
use crate::Result;

const MAX_CLIENTS_REPLY: &[u8] = b"-ERR max number of clients reached\r\n";

/// Server-wide counters reported by INFO.
#[derive(Debug, Clone)]
pub struct ServerStats {
    started: Instant,
    /// Clients currently in the client table
    pub connected_clients: usize,
    pub connections_accepted: u64,
    /// Connections refused because `max_clients` was reached
    pub connections_rejected: u64,
    pub commands_processed: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

impl Default for ServerStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerStats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            connected_clients: 0,
            connections_accepted: 0,
            connections_rejected: 0,
            commands_processed: 0,
            bytes_read: 0,
            bytes_written: 0,
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }
}

/// The key-value server: listener, clients, keyspace and command table.
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    clients: HashMap<RawFd, Client>,
    keyspace: Keyspace,
    commands: CommandTable,
    config: Config,
    stats: ServerStats,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr)
            .field("clients", &self.clients.len())
            .field("keyspace", &self.keyspace)
            .field("stats", &self.stats)
            .finish()
    }
}

impl Server {
    /// Binds the listener. Port 0 picks a free port, see [`Server::local_addr`].
    pub fn bind(config: Config) -> Result<Self> {
        let addr = config.bind_address()?;
        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
            clients: HashMap::new(),
            keyspace: Keyspace::new(),
            commands: CommandTable::new(),
            config,
            stats: ServerStats::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    pub fn keyspace(&self) -> &Keyspace {
        &self.keyspace
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Registers the listener and the cron timer on `event_loop`.
    pub fn install(&self, event_loop: &mut EventLoop<Server>) -> Result<TimerId> {
        event_loop.register(self.listener.as_raw_fd(), Mask::Readable, accept_handler)?;
        let cron = event_loop.schedule(
            TimerKind::Repeating,
            self.config.expiry.interval(),
            server_cron,
        );
        Ok(cron)
    }

    /// Runs the server until the event loop is stopped.
    pub fn run(mut self) -> Result<()> {
        let mut event_loop = EventLoop::new()?;
        self.install(&mut event_loop)?;

        info!(
            addr = %self.local_addr,
            max_clients = self.config.server.max_clients,
            "Server listening"
        );
        event_loop.run(&mut self);
        info!("Server stopped");
        Ok(())
    }
}

/// Tells a connection over the limit why it is being dropped.
fn reject_client(mut stream: TcpStream, addr: SocketAddr) {
    if let Err(e) = stream.write(MAX_CLIENTS_REPLY) {
        debug!(client = %addr, error = %e, "Failed to send rejection");
    }
}

fn accept_handler(el: &mut EventLoop<Server>, server: &mut Server, _fd: RawFd) {
    loop {
        let (stream, addr) = match server.listener.accept() {
            Ok(pair) => pair,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(error = %e, "Accept failed");
                return;
            }
        };

        if server.clients.len() >= server.config.server.max_clients {
            server.stats.connections_rejected += 1;
            warn!(client = %addr, "Max number of clients reached, rejecting");
            reject_client(stream, addr);
            continue;
        }

        if let Err(e) = stream.set_nodelay(true) {
            debug!(client = %addr, error = %e, "Failed to set TCP_NODELAY");
        }

        let client = Client::new(stream, addr, server.config.protocol.clone());
        let fd = client.fd();
        if el.register(fd, Mask::Readable, read_handler).is_err() {
            // Already logged; dropping the client closes the socket.
            continue;
        }

        server.clients.insert(fd, client);
        server.stats.connections_accepted += 1;
        server.stats.connected_clients = server.clients.len();
        info!(client = %addr, fd, "Client connected");
    }
}

fn read_handler(el: &mut EventLoop<Server>, server: &mut Server, fd: RawFd) {
    let Some(client) = server.clients.get_mut(&fd) else {
        return;
    };

    let result = match client.read_from_socket() {
        Ok(n) => {
            server.stats.bytes_read += n as u64;
            client.process_input(&server.commands, &mut server.keyspace, &mut server.stats)
        }
        Err(e) => Err(e),
    };

    match result {
        Err(e) => {
            debug!(fd, error = %e, "Closing connection");
            free_client(el, server, fd);
        }
        Ok(_) if client.peer_closed() => {
            free_client(el, server, fd);
        }
        Ok(processed) => {
            trace!(fd, processed, "Processed input");
            if client.has_pending_replies() && !el.is_registered(fd, Mask::Writable) {
                if let Err(e) = el.register(fd, Mask::Writable, write_handler) {
                    debug!(fd, error = %e, "Cannot install write handler");
                    free_client(el, server, fd);
                }
            }
        }
    }
}

fn write_handler(el: &mut EventLoop<Server>, server: &mut Server, fd: RawFd) {
    let Some(client) = server.clients.get_mut(&fd) else {
        return;
    };

    match client.write_to_socket() {
        Ok(n) => {
            server.stats.bytes_written += n as u64;
            if client.has_pending_replies() {
                // Socket buffer full; wait for the next writable edge.
                return;
            }
            let quit = client.close_after_reply();
            el.deregister(fd, Mask::Writable);
            if quit {
                free_client(el, server, fd);
            }
        }
        Err(ConnectionError::Io(e)) => {
            debug!(fd, error = %e, "Write failed");
            free_client(el, server, fd);
        }
        Err(e) => {
            debug!(fd, error = %e, "Closing connection");
            free_client(el, server, fd);
        }
    }
}

/// Deregisters both interests, drops the client with its pending replies and
/// closes the socket.
fn free_client(el: &mut EventLoop<Server>, server: &mut Server, fd: RawFd) {
    el.deregister(fd, Mask::Readable);
    el.deregister(fd, Mask::Writable);

    if let Some(client) = server.clients.remove(&fd) {
        info!(client = %client.addr(), fd, "Client disconnected");
    }
    server.stats.connected_clients = server.clients.len();
}

fn server_cron(_el: &mut EventLoop<Server>, server: &mut Server, _id: TimerId) {
    let expired = run_expire_cycle(&mut server.keyspace, &server.config.expiry);
    if expired > 0 {
        trace!(expired, "Server cron");
    }
}
