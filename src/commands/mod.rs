//! Command Dispatch
//!
//! Parsed argument vectors are looked up in a [`CommandTable`], checked for
//! arity, and run against the keyspace.
//!
//! ```text
//! Client::process_input
//!       │  Vec<Bytes>
//!       ▼
//! ┌─────────────────┐
//! │  CommandTable   │  name lookup (ASCII case-insensitive), arity check
//! └────────┬────────┘
//!          │  CommandContext { keyspace, stats, quit }
//!          ▼
//! ┌─────────────────┐
//! │  cmd_* bodies   │  (handler module)
//! └────────┬────────┘
//!          │
//!          ▼
//!       Keyspace
//! ```
//!
//! Every failure at this layer (unknown command, arity, wrong type, bad
//! integer) is an error reply. The connection stays open.

pub mod handler;
pub mod table;

pub use table::{Arity, Command, CommandContext, CommandFn, CommandTable};
