//! Storage Module
//!
//! This module provides the in-memory database for EmberKV: an incrementally
//! rehashed dictionary, the shared value type, and the keyspace that combines
//! two dictionaries into data plus a TTL index.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Keyspace                             │
//! │   ┌──────────────────────────┐  ┌────────────────────────┐  │
//! │   │ data: Dict<Bytes, Object>│  │ expire: Dict<Bytes,i64>│  │
//! │   │   ht[0]  ──rehash──> ht[1]│  │  ht[0]  ──>  ht[1]     │  │
//! │   └──────────────────────────┘  └────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │ random sampling
//!              ┌─────────────┴─────────────┐
//!              │   run_expire_cycle        │
//!              │   (repeating timer)       │
//!              └───────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use emberkv::storage::{Keyspace, Value};
//! use bytes::Bytes;
//!
//! let mut keyspace = Keyspace::new();
//! keyspace.set(Bytes::from("name"), Value::string("Ariz"));
//!
//! let value = keyspace.lookup_read(b"name").unwrap();
//! assert_eq!(value.as_bytes(), Some(&Bytes::from("Ariz")));
//!
//! // Expire one hour from now
//! let deadline = keyspace.now_ms() + 3_600_000;
//! assert!(keyspace.set_expire(b"name", deadline));
//! ```

pub mod dict;
pub mod expiry;
pub mod keyspace;
pub mod object;

// Re-export commonly used types
pub use dict::{Dict, DictError};
pub use expiry::{run_expire_cycle, ExpiryConfig};
pub use keyspace::{Clock, Keyspace, KeyspaceStats, SystemClock, Ttl};
pub use object::{Object, Value};
