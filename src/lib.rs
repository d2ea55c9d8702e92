//! # EmberKV - A Single-Threaded In-Memory Key-Value Server
//!
//! EmberKV is a Redis-compatible key-value server built around one event loop.
//! All client I/O, command execution and background expiry run on a single
//! thread, so the data structures need no locking.
//!
//! ## Features
//!
//! - **Reactor core**: readiness-based file events plus timers on top of `mio`
//! - **Incremental rehashing**: the keyspace dictionary grows a bucket at a time
//! - **Resumable parsing**: inline and multi-bulk requests may arrive in any
//!   number of fragments
//! - **TTL Support**: lazy expiry on access plus an active sampling cycle
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               EmberKV                                   │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │  EventLoop  │───>│   Client    │───>│ CommandTable│                  │
//! │  │ (mio Poll)  │    │ query/reply │    │  dispatch   │                  │
//! │  └──────┬──────┘    └──────┬──────┘    └──────┬──────┘                  │
//! │         │                  │                  │                         │
//! │         │                  ▼                  ▼                         │
//! │         │           ┌─────────────┐    ┌──────────────────────────────┐ │
//! │         │           │RequestParser│    │          Keyspace            │ │
//! │         │           └─────────────┘    │  data: Dict   expire: Dict   │ │
//! │         │                              └──────────────▲───────────────┘ │
//! │         │                                             │                 │
//! │         └──── repeating timer ──── run_expire_cycle ──┘                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use emberkv::{Config, Server};
//!
//! fn main() -> emberkv::Result<()> {
//!     let server = Server::bind(Config::default())?;
//!     println!("listening on {}", server.local_addr());
//!     server.run()
//! }
//! ```
//!
//! ## Supported Commands
//!
//! ### String Commands
//! - `SET key value [EX seconds] [PX milliseconds] [NX|XX] [KEEPTTL]`
//! - `GET key` / `GETSET key value`
//! - `SETNX key value` / `SETEX key seconds value`
//! - `APPEND key value` / `STRLEN key`
//! - `INCR key` / `INCRBY key increment`
//! - `DECR key` / `DECRBY key decrement`
//!
//! ### List Commands
//! - `LPUSH` / `RPUSH key value [value ...]`
//! - `LPOP` / `RPOP key`
//! - `LLEN key` / `LRANGE key start stop`
//!
//! ### Key Commands
//! - `DEL key [key ...]` / `EXISTS key [key ...]`
//! - `EXPIRE key seconds` / `PEXPIRE key milliseconds`
//! - `TTL key` / `PTTL key` / `PERSIST key`
//! - `KEYS pattern` / `TYPE key`
//!
//! ### Server Commands
//! - `PING [message]` / `ECHO message`
//! - `INFO [section]` / `DBSIZE` / `FLUSHDB` / `QUIT`
//!
//! ## Module Overview
//!
//! - [`event`]: the reactor (file events and timers)
//! - [`storage`]: incrementally rehashed dictionary, keyspace, expiry
//! - [`protocol`]: request parser and reply encoding
//! - [`commands`]: command table and command bodies
//! - [`connection`]: per-client buffers and socket I/O
//! - [`server`]: accept/read/write handlers and the cron timer

pub mod commands;
pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::CommandTable;
pub use config::Config;
pub use error::{EmberError, Result};
pub use event::EventLoop;
pub use protocol::{ParseError, RequestParser, RespValue};
pub use server::{Server, ServerStats};
pub use storage::{Dict, Keyspace};

/// The default port EmberKV listens on (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host EmberKV binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of EmberKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
