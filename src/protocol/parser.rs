//! Resumable Request Parser
//!
//! This module turns the bytes a client sends into argument vectors. Clients
//! may speak either of two formats:
//!
//! - **Inline**: `set key value\r\n`, tokens separated by spaces
//! - **Multi-bulk**: `*3\r\n$3\r\nset\r\n$3\r\nkey\r\n$5\r\nvalue\r\n`
//!
//! The first byte of a fresh request picks the format: `*` means multi-bulk,
//! anything else inline.
//!
//! ## How the Parser Works
//!
//! Non-blocking reads hand us whatever bytes happened to arrive, so a request
//! can be split anywhere. The parser consumes recognised prefixes from the
//! front of the query buffer and remembers how far it got:
//!
//! ```text
//! "*3\r\n$3\r\nSET\r\n$3"      -> bulk_count = 2, "$3" left in the buffer
//! "\r\nkey\r"                  -> bulk_len = 3, "key\r" left in the buffer
//! "\n$3\r\nval\r\n"            -> complete: ["SET", "key", "val"]
//! ```
//!
//! [`RequestParser::parse`] returns:
//! - `Ok(Some(args))` - a complete request (possibly empty, e.g. `*0\r\n`)
//! - `Ok(None)` - need more data; already-consumed bytes are never re-read
//! - `Err(ParseError)` - protocol violation, the connection must be closed

use bytes::{Buf, Bytes, BytesMut};
use serde::Deserialize;
use thiserror::Error;

/// Longest inline request (or header line) without a CRLF (64 KB)
pub const PROTO_INLINE_MAX_SIZE: usize = 64 * 1024;

/// Maximum size for a single bulk argument (512 MB)
pub const PROTO_MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum number of arguments in a multi-bulk request
pub const PROTO_MAX_MULTIBULK_LEN: usize = 1024 * 1024;

/// Errors that can occur while parsing a request. All of them are fatal for
/// the connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// No CRLF within the inline size ceiling
    #[error("too big inline request: {size} bytes (max: {max})")]
    InlineTooLong { size: usize, max: usize },

    /// A `*<count>` or `$<len>` header line without CRLF past the ceiling
    #[error("too big {0} line")]
    HeaderTooLong(&'static str),

    /// Unparsable or oversized argument count
    #[error("invalid multibulk length: {0}")]
    InvalidMultibulkLength(String),

    /// A bulk header that does not start with `$`
    #[error("expected '$', got {0:#04x}")]
    UnexpectedByte(u8),

    /// Unparsable, negative or oversized bulk length
    #[error("invalid bulk length: {0}")]
    InvalidBulkLength(String),

    /// The payload was not followed by CRLF
    #[error("bulk payload not terminated by CRLF")]
    MissingCrlf,
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Size ceilings applied by the parser.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ParserLimits {
    pub max_inline_size: usize,
    pub max_bulk_size: usize,
    pub max_multibulk_len: usize,
}

impl Default for ParserLimits {
    fn default() -> Self {
        Self {
            max_inline_size: PROTO_INLINE_MAX_SIZE,
            max_bulk_size: PROTO_MAX_BULK_SIZE,
            max_multibulk_len: PROTO_MAX_MULTIBULK_LEN,
        }
    }
}

/// Format of the request currently being parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestKind {
    /// No bytes of the next request seen yet
    #[default]
    Unknown,
    Inline,
    MultiBulk,
}

/// Per-connection parser state, kept between reads.
///
/// # Example
///
/// ```
/// use emberkv::protocol::RequestParser;
/// use bytes::BytesMut;
///
/// let mut parser = RequestParser::new();
/// let mut buffer = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n$4"[..]);
/// assert!(parser.parse(&mut buffer).unwrap().is_none());
///
/// buffer.extend_from_slice(b"\r\nname\r\n");
/// let args = parser.parse(&mut buffer).unwrap().unwrap();
/// assert_eq!(args, vec!["GET", "name"]);
/// ```
#[derive(Debug, Default)]
pub struct RequestParser {
    kind: RequestKind,
    /// Bulk arguments still to read; `None` until the `*<count>` line is parsed
    bulk_count: Option<usize>,
    /// Length of the bulk being read; `None` until its `$<len>` line is parsed
    bulk_len: Option<usize>,
    args: Vec<Bytes>,
    limits: ParserLimits,
}

impl RequestParser {
    /// Creates a parser with the default limits.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: ParserLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn bulk_count(&self) -> Option<usize> {
        self.bulk_count
    }

    pub fn bulk_len(&self) -> Option<usize> {
        self.bulk_len
    }

    /// Arguments of a partially received multi-bulk request.
    pub fn pending_args(&self) -> &[Bytes] {
        &self.args
    }

    /// Forgets any partially parsed request.
    pub fn reset(&mut self) {
        self.kind = RequestKind::Unknown;
        self.bulk_count = None;
        self.bulk_len = None;
        self.args.clear();
    }

    /// Parses at most one request from the front of `buf`.
    pub fn parse(&mut self, buf: &mut BytesMut) -> ParseResult<Option<Vec<Bytes>>> {
        if self.kind == RequestKind::Unknown {
            match buf.first() {
                None => return Ok(None),
                Some(b'*') => self.kind = RequestKind::MultiBulk,
                Some(_) => self.kind = RequestKind::Inline,
            }
        }

        let complete = match self.kind {
            RequestKind::Inline => self.parse_inline(buf)?,
            RequestKind::MultiBulk => self.parse_multibulk(buf)?,
            RequestKind::Unknown => false,
        };

        if !complete {
            return Ok(None);
        }
        let args = std::mem::take(&mut self.args);
        self.reset();
        Ok(Some(args))
    }

    fn parse_inline(&mut self, buf: &mut BytesMut) -> ParseResult<bool> {
        let Some(pos) = find_crlf(buf) else {
            if buf.len() > self.limits.max_inline_size {
                return Err(ParseError::InlineTooLong {
                    size: buf.len(),
                    max: self.limits.max_inline_size,
                });
            }
            return Ok(false);
        };

        let line = buf.split_to(pos).freeze();
        buf.advance(2);

        self.args = line
            .split(|&b| b == b' ')
            .filter(|token| !token.is_empty())
            .map(|token| line.slice_ref(token))
            .collect();
        Ok(true)
    }

    fn parse_multibulk(&mut self, buf: &mut BytesMut) -> ParseResult<bool> {
        if self.bulk_count.is_none() {
            let Some(line) = self.take_line(buf, "multibulk count")? else {
                return Ok(false);
            };

            let count = parse_int(&line[1..])
                .filter(|&n| n <= self.limits.max_multibulk_len as i64)
                .ok_or_else(|| {
                    ParseError::InvalidMultibulkLength(String::from_utf8_lossy(&line[1..]).into())
                })?;
            if count <= 0 {
                return Ok(true);
            }

            let count = count as usize;
            self.bulk_count = Some(count);
            self.args = Vec::with_capacity(count.min(1024));
        }

        while let Some(remaining) = self.bulk_count.filter(|&n| n > 0) {
            let len = match self.bulk_len {
                Some(len) => len,
                None => {
                    let Some(line) = self.take_line(buf, "bulk length")? else {
                        return Ok(false);
                    };
                    match line.first() {
                        Some(b'$') => {}
                        Some(&other) => return Err(ParseError::UnexpectedByte(other)),
                        None => return Err(ParseError::UnexpectedByte(b'\r')),
                    }

                    let len = parse_int(&line[1..])
                        .filter(|&n| n >= 0 && n as u64 <= self.limits.max_bulk_size as u64)
                        .ok_or_else(|| {
                            ParseError::InvalidBulkLength(
                                String::from_utf8_lossy(&line[1..]).into(),
                            )
                        })? as usize;
                    self.bulk_len = Some(len);
                    len
                }
            };

            if buf.len() < len + 2 {
                return Ok(false);
            }
            if &buf[len..len + 2] != b"\r\n" {
                return Err(ParseError::MissingCrlf);
            }

            let arg = buf.split_to(len).freeze();
            buf.advance(2);
            self.args.push(arg);
            self.bulk_len = None;
            self.bulk_count = Some(remaining - 1);
        }

        Ok(true)
    }

    /// Splits one CRLF-terminated header line off the buffer, without the CRLF.
    fn take_line(&self, buf: &mut BytesMut, what: &'static str) -> ParseResult<Option<Bytes>> {
        match find_crlf(buf) {
            Some(pos) => {
                let line = buf.split_to(pos).freeze();
                buf.advance(2);
                Ok(Some(line))
            }
            None if buf.len() > self.limits.max_inline_size => Err(ParseError::HeaderTooLong(what)),
            None => Ok(None),
        }
    }
}

/// Finds the position of the first CRLF in the buffer.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    memchr::memmem::find(buf, b"\r\n")
}

fn parse_int(digits: &[u8]) -> Option<i64> {
    std::str::from_utf8(digits).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(parser: &mut RequestParser, buf: &mut BytesMut, data: &[u8]) -> Option<Vec<Bytes>> {
        buf.extend_from_slice(data);
        parser.parse(buf).unwrap()
    }

    #[test]
    fn test_inline_whole() {
        let mut parser = RequestParser::new();
        let mut buf = BytesMut::new();
        let args = feed(&mut parser, &mut buf, b"set key val\r\n").unwrap();
        assert_eq!(args, vec!["set", "key", "val"]);
        assert!(buf.is_empty());
        assert_eq!(parser.kind(), RequestKind::Unknown);
    }

    #[test]
    fn test_inline_split_across_reads() {
        let mut parser = RequestParser::new();
        let mut buf = BytesMut::new();

        assert!(feed(&mut parser, &mut buf, b"set ").is_none());
        assert_eq!(parser.kind(), RequestKind::Inline);
        assert!(feed(&mut parser, &mut buf, b"key ").is_none());
        assert_eq!(&buf[..], b"set key ");

        let args = feed(&mut parser, &mut buf, b"val\r\n").unwrap();
        assert_eq!(args, vec!["set", "key", "val"]);
    }

    #[test]
    fn test_byte_at_a_time_matches_whole() {
        let inputs: [&[u8]; 2] = [
            b"set key val\r\n",
            b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$3\r\nval\r\n",
        ];

        for input in inputs {
            let mut whole = RequestParser::new();
            let mut buf = BytesMut::from(input);
            let expected = whole.parse(&mut buf).unwrap().unwrap();

            let mut parser = RequestParser::new();
            let mut buf = BytesMut::new();
            let mut result = None;
            for (i, byte) in input.iter().enumerate() {
                result = feed(&mut parser, &mut buf, &[*byte]);
                if i + 1 < input.len() {
                    assert!(result.is_none(), "completed early at byte {}", i);
                }
            }
            assert_eq!(result.unwrap(), expected);
        }
    }

    #[test]
    fn test_inline_collapses_repeated_spaces() {
        let mut parser = RequestParser::new();
        let mut buf = BytesMut::from(&b"  get   key \r\n"[..]);
        assert_eq!(parser.parse(&mut buf).unwrap().unwrap(), vec!["get", "key"]);
    }

    #[test]
    fn test_inline_empty_line() {
        let mut parser = RequestParser::new();
        let mut buf = BytesMut::from(&b"\r\nping\r\n"[..]);
        assert_eq!(parser.parse(&mut buf).unwrap(), Some(vec![]));
        assert_eq!(parser.parse(&mut buf).unwrap().unwrap(), vec!["ping"]);
    }

    #[test]
    fn test_inline_too_long() {
        let limits = ParserLimits {
            max_inline_size: 16,
            ..Default::default()
        };
        let mut parser = RequestParser::with_limits(limits);
        let mut buf = BytesMut::from(&b"set key 0123456789"[..]);
        assert_eq!(
            parser.parse(&mut buf),
            Err(ParseError::InlineTooLong { size: 18, max: 16 })
        );
    }

    #[test]
    fn test_inline_at_limit_is_incomplete() {
        let limits = ParserLimits {
            max_inline_size: 16,
            ..Default::default()
        };
        let mut parser = RequestParser::with_limits(limits);
        let mut buf = BytesMut::from(&b"0123456789abcdef"[..]);
        assert_eq!(parser.parse(&mut buf), Ok(None));
        assert_eq!(buf.len(), 16);
    }

    #[test]
    fn test_multibulk_whole() {
        let mut parser = RequestParser::new();
        let mut buf = BytesMut::from(&b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$3\r\nval\r\n"[..]);
        let args = parser.parse(&mut buf).unwrap().unwrap();
        assert_eq!(args, vec!["SET", "key", "val"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_multibulk_resumes_mid_request() {
        let mut parser = RequestParser::new();
        let mut buf = BytesMut::new();

        assert!(feed(&mut parser, &mut buf, b"*3\r").is_none());
        assert_eq!(parser.bulk_count(), None);
        assert_eq!(&buf[..], b"*3\r");

        assert!(feed(&mut parser, &mut buf, b"\n$3\r\nSET\r\n$3").is_none());
        assert_eq!(parser.bulk_count(), Some(2));
        assert_eq!(parser.pending_args(), &["SET"]);
        assert_eq!(&buf[..], b"$3");

        assert!(feed(&mut parser, &mut buf, b"\r\nkey\r").is_none());
        assert_eq!(parser.bulk_len(), Some(3));
        assert_eq!(&buf[..], b"key\r");

        let args = feed(&mut parser, &mut buf, b"\n$3\r\nval\r\n").unwrap();
        assert_eq!(args, vec!["SET", "key", "val"]);
        assert_eq!(parser.bulk_count(), None);
        assert!(parser.pending_args().is_empty());
    }

    #[test]
    fn test_multibulk_zero_count_is_empty_command() {
        let mut parser = RequestParser::new();
        let mut buf = BytesMut::from(&b"*0\r\n*-1\r\n"[..]);
        assert_eq!(parser.parse(&mut buf).unwrap(), Some(vec![]));
        assert_eq!(parser.parse(&mut buf).unwrap(), Some(vec![]));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_multibulk_binary_payload() {
        let mut parser = RequestParser::new();
        let mut buf = BytesMut::from(&b"*2\r\n$3\r\nSET\r\n$6\r\na \r\nb\x00\r\n"[..]);
        let args = parser.parse(&mut buf).unwrap().unwrap();
        assert_eq!(args[1], Bytes::from_static(b"a \r\nb\x00"));
    }

    #[test]
    fn test_pipelined_requests() {
        let mut parser = RequestParser::new();
        let mut buf = BytesMut::from(&b"ping\r\n*1\r\n$4\r\nPING\r\nget k\r\n"[..]);
        assert_eq!(parser.parse(&mut buf).unwrap().unwrap(), vec!["ping"]);
        assert_eq!(parser.parse(&mut buf).unwrap().unwrap(), vec!["PING"]);
        assert_eq!(parser.parse(&mut buf).unwrap().unwrap(), vec!["get", "k"]);
        assert_eq!(parser.parse(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_bad_bulk_prefix() {
        let mut parser = RequestParser::new();
        let mut buf = BytesMut::from(&b"*1\r\n:3\r\nfoo\r\n"[..]);
        assert_eq!(parser.parse(&mut buf), Err(ParseError::UnexpectedByte(b':')));
    }

    #[test]
    fn test_invalid_multibulk_count() {
        let mut parser = RequestParser::new();
        let mut buf = BytesMut::from(&b"*x\r\n"[..]);
        assert!(matches!(
            parser.parse(&mut buf),
            Err(ParseError::InvalidMultibulkLength(_))
        ));
    }

    #[test]
    fn test_bulk_length_over_limit() {
        let limits = ParserLimits {
            max_bulk_size: 8,
            ..Default::default()
        };
        let mut parser = RequestParser::with_limits(limits);
        let mut buf = BytesMut::from(&b"*1\r\n$9\r\n"[..]);
        assert!(matches!(
            parser.parse(&mut buf),
            Err(ParseError::InvalidBulkLength(_))
        ));
    }

    #[test]
    fn test_negative_bulk_length() {
        let mut parser = RequestParser::new();
        let mut buf = BytesMut::from(&b"*1\r\n$-1\r\n"[..]);
        assert!(matches!(
            parser.parse(&mut buf),
            Err(ParseError::InvalidBulkLength(_))
        ));
    }

    #[test]
    fn test_missing_crlf_after_payload() {
        let mut parser = RequestParser::new();
        let mut buf = BytesMut::from(&b"*1\r\n$3\r\nfooXY"[..]);
        assert_eq!(parser.parse(&mut buf), Err(ParseError::MissingCrlf));
    }

    #[test]
    fn test_header_without_crlf_too_long() {
        let limits = ParserLimits {
            max_inline_size: 4,
            ..Default::default()
        };
        let mut parser = RequestParser::with_limits(limits);
        let mut buf = BytesMut::from(&b"*1234567"[..]);
        assert_eq!(
            parser.parse(&mut buf),
            Err(ParseError::HeaderTooLong("multibulk count"))
        );
    }
}
