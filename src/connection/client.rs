//! Per-connection client state.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};

use bytes::{Bytes, BytesMut};
use mio::net::TcpStream;
use tracing::{debug, trace};

use crate::commands::{CommandContext, CommandTable};
use crate::protocol::{ParseError, ParserLimits, RequestParser, RespValue};
use crate::server::ServerStats;
use crate::storage::Keyspace;

/// Bytes read from the socket per `read` call
const READ_CHUNK_SIZE: usize = 16 * 1024;

/// Initial query buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error on the socket
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed request
    #[error("Protocol error: {0}")]
    Protocol(#[from] ParseError),
}

/// A connected client.
///
/// Owns the socket, the query buffer with its parser state, and the queue of
/// serialized replies waiting to be written.
#[derive(Debug)]
pub struct Client {
    fd: RawFd,
    stream: TcpStream,
    addr: SocketAddr,
    query_buf: BytesMut,
    parser: RequestParser,
    reply: VecDeque<Bytes>,
    /// Bytes of the head reply already written
    sent_len: usize,
    close_after_reply: bool,
    peer_closed: bool,
}

impl Client {
    pub fn new(stream: TcpStream, addr: SocketAddr, limits: ParserLimits) -> Self {
        Self {
            fd: stream.as_raw_fd(),
            stream,
            addr,
            query_buf: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            parser: RequestParser::with_limits(limits),
            reply: VecDeque::new(),
            sent_len: 0,
            close_after_reply: false,
            peer_closed: false,
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Bytes received but not yet consumed by the parser.
    pub fn query_len(&self) -> usize {
        self.query_buf.len()
    }

    pub fn has_pending_replies(&self) -> bool {
        !self.reply.is_empty()
    }

    /// True once QUIT was processed.
    pub fn close_after_reply(&self) -> bool {
        self.close_after_reply
    }

    /// True once a read returned end-of-stream.
    pub fn peer_closed(&self) -> bool {
        self.peer_closed
    }

    /// Reads everything currently available into the query buffer.
    ///
    /// Readiness is edge-triggered, so this keeps reading until the socket
    /// reports `WouldBlock` or end-of-stream. Returns the number of bytes read.
    pub fn read_from_socket(&mut self) -> Result<usize, ConnectionError> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let mut total = 0;

        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    self.peer_closed = true;
                    break;
                }
                Ok(n) => {
                    self.query_buf.extend_from_slice(&chunk[..n]);
                    total += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        trace!(client = %self.addr, bytes = total, buffered = self.query_buf.len(), "Read data");
        Ok(total)
    }

    /// Parses and runs every complete command in the query buffer.
    ///
    /// Empty commands are skipped. Stops at the first incomplete command, or
    /// after QUIT. Returns the number of commands run.
    pub fn process_input(
        &mut self,
        commands: &CommandTable,
        keyspace: &mut Keyspace,
        stats: &mut ServerStats,
    ) -> Result<usize, ConnectionError> {
        let mut processed = 0;

        while !self.query_buf.is_empty() && !self.close_after_reply {
            let args = match self.parser.parse(&mut self.query_buf) {
                Ok(Some(args)) => args,
                Ok(None) => break,
                Err(e) => {
                    debug!(client = %self.addr, error = %e, "Protocol error");
                    return Err(e.into());
                }
            };
            if args.is_empty() {
                continue;
            }

            let mut ctx = CommandContext::new(keyspace, stats);
            let reply = commands.dispatch(&mut ctx, &args);
            let quit = ctx.quit;

            self.add_reply(&reply);
            stats.commands_processed += 1;
            processed += 1;

            if quit {
                self.close_after_reply = true;
            }
        }

        Ok(processed)
    }

    /// Queues a serialized reply.
    pub fn add_reply(&mut self, reply: &RespValue) {
        self.reply.push_back(reply.to_bytes());
    }

    /// Writes queued replies until the queue is empty or the socket is full.
    ///
    /// A partially written reply stays at the head of the queue and `sent_len`
    /// records how much of it went out. Returns the number of bytes written.
    pub fn write_to_socket(&mut self) -> Result<usize, ConnectionError> {
        let mut written = 0;

        while let Some(head) = self.reply.front() {
            match self.stream.write(&head[self.sent_len..]) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => {
                    written += n;
                    self.sent_len += n;
                    if self.sent_len == head.len() {
                        self.reply.pop_front();
                        self.sent_len = 0;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        trace!(
            client = %self.addr,
            bytes = written,
            pending = self.reply.len(),
            "Wrote replies"
        );
        Ok(written)
    }
}
