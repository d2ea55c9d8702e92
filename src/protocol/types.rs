//! Reply Values
//!
//! Every command produces a [`RespValue`], which the connection serializes
//! into its reply queue. Framing follows RESP:
//!
//! - `+` Simple String: `+OK\r\n`
//! - `-` Error: `-ERR unknown command 'FOO'\r\n`
//! - `:` Integer: `:1000\r\n`
//! - `$` Bulk String: `$5\r\nhello\r\n`, null is `$-1\r\n`
//! - `*` Array: `*2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n`

use bytes::{BufMut, Bytes, BytesMut};

/// The CRLF terminator
pub const CRLF: &[u8] = b"\r\n";

/// Type prefixes
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A reply to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Status line, must not contain CR or LF
    SimpleString(String),

    /// Error line. The first word is the error class (`ERR`, `WRONGTYPE`).
    Error(String),

    Integer(i64),

    /// Binary-safe string
    BulkString(Bytes),

    /// The null bulk string, `$-1\r\n`
    Null,

    Array(Vec<RespValue>),
}

impl RespValue {
    /// Creates a new simple string reply.
    ///
    /// # Example
    /// ```
    /// use emberkv::protocol::RespValue;
    /// assert_eq!(&RespValue::simple_string("OK").to_bytes()[..], b"+OK\r\n");
    /// ```
    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    pub fn null() -> Self {
        RespValue::Null
    }

    pub fn array(values: Vec<RespValue>) -> Self {
        RespValue::Array(values)
    }

    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    pub fn pong() -> Self {
        RespValue::SimpleString("PONG".to_string())
    }

    /// Serializes the reply into a fresh buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len_hint());
        self.serialize_into(&mut buf);
        buf.freeze()
    }

    /// Appends the wire form of the reply to `buf`.
    pub fn serialize_into(&self, buf: &mut BytesMut) {
        match self {
            RespValue::SimpleString(s) => put_line(buf, prefix::SIMPLE_STRING, s.as_bytes()),
            RespValue::Error(s) => put_line(buf, prefix::ERROR, s.as_bytes()),
            RespValue::Integer(n) => put_line(buf, prefix::INTEGER, n.to_string().as_bytes()),
            RespValue::BulkString(data) => {
                put_line(buf, prefix::BULK_STRING, data.len().to_string().as_bytes());
                buf.put_slice(data);
                buf.put_slice(CRLF);
            }
            RespValue::Null => put_line(buf, prefix::BULK_STRING, b"-1"),
            RespValue::Array(values) => {
                put_line(buf, prefix::ARRAY, values.len().to_string().as_bytes());
                for value in values {
                    value.serialize_into(buf);
                }
            }
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    fn encoded_len_hint(&self) -> usize {
        match self {
            RespValue::BulkString(data) => data.len() + 16,
            RespValue::Array(values) => 16 + values.len() * 16,
            _ => 32,
        }
    }
}

/// Writes `<prefix><body>\r\n`, replacing any CR or LF in the body with a space
/// so a status or error line can never break framing.
fn put_line(buf: &mut BytesMut, prefix: u8, body: &[u8]) {
    buf.put_u8(prefix);
    if memchr::memchr2(b'\r', b'\n', body).is_some() {
        buf.extend(
            body.iter()
                .map(|&b| if b == b'\r' || b == b'\n' { b' ' } else { b }),
        );
    } else {
        buf.put_slice(body);
    }
    buf.put_slice(CRLF);
}
