//! Client Connections
//!
//! Each accepted socket becomes a [`Client`] stored in the server's client
//! table under its descriptor. The reactor drives it through three steps:
//!
//! ```text
//!   readable ──> read_from_socket ──> query buffer
//!                                          │
//!                                          ▼
//!                                   process_input
//!                          (parse, dispatch, queue replies)
//!                                          │
//!   writable <── write_to_socket <── reply queue
//! ```
//!
//! A client is freed on a protocol error, an I/O error, end-of-stream from
//! the peer, or once the reply to QUIT has been written. There is no idle
//! timeout: a silent peer keeps its connection until it closes it.

pub mod client;

pub use client::{Client, ConnectionError};
