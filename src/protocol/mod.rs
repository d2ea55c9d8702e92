//! Wire Protocol
//!
//! Requests arrive either inline (`GET name\r\n`) or as multi-bulk arrays
//! (`*2\r\n$3\r\nGET\r\n$4\r\nname\r\n`). Replies are always RESP.
//!
//! ## Modules
//!
//! - `parser`: resumable request parser, one per connection
//! - `types`: the `RespValue` reply type and its serialization
//!
//! ## Example
//!
//! ```
//! use emberkv::protocol::{RequestParser, RespValue};
//! use bytes::BytesMut;
//!
//! let mut parser = RequestParser::new();
//! let mut buffer = BytesMut::from(&b"GET name\r\n"[..]);
//! let args = parser.parse(&mut buffer).unwrap().unwrap();
//! assert_eq!(args, vec!["GET", "name"]);
//!
//! let reply = RespValue::bulk_string("Ariz").to_bytes();
//! assert_eq!(&reply[..], b"$4\r\nAriz\r\n");
//! ```

pub mod parser;
pub mod types;

pub use parser::{ParseError, ParseResult, ParserLimits, RequestKind, RequestParser};
pub use types::RespValue;
