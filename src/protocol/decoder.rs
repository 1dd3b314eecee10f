//! Buffered RESP Reply Decoder
//!
//! The decoder reads exactly one reply at a time from an async byte source.
//! It knows nothing about commands; it only frames and parses.
//!
//! ## Buffer Management
//!
//! Incoming bytes land in a `BytesMut`. Lines are located by scanning the
//! buffer for `\n` and then split off as frozen `Bytes`, so neither lines nor
//! bulk payloads are copied. A line longer than the buffer's capacity (the
//! output of `MONITOR`, for example) simply grows the buffer.
//!
//! ## Nesting
//!
//! Arrays are decoded with an explicit stack instead of recursion, so an
//! arbitrarily deep reply cannot overflow the task's stack.

use crate::error::{Error, Result};
use crate::protocol::types::{prefix, Reply};
use bytes::{Bytes, BytesMut};
use std::borrow::Cow;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Initial read buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Upper bound on preallocated array slots for a declared element count.
const MAX_PREALLOCATED_ELEMENTS: usize = 1024;

/// Largest bulk string accepted, matching the server's `proto-max-bulk-len`
/// default of 512 MiB.
pub const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Upper bound on the up-front reservation for a bulk payload; larger
/// payloads grow the buffer as their bytes arrive.
const MAX_PAYLOAD_RESERVE: usize = 1024 * 1024;

/// One parsed line: either a complete value or the header of an array.
enum Frame {
    Value(Reply),
    ArrayHeader(usize),
}

/// Decodes RESP replies from an async reader.
#[derive(Debug)]
pub struct Decoder<R> {
    reader: R,
    buffer: BytesMut,
    /// Bytes of `buffer` already scanned for `\n`.
    scanned: usize,
}

impl<R: AsyncRead + Unpin> Decoder<R> {
    pub fn new(reader: R) -> Self {
        Self::with_capacity(reader, INITIAL_BUFFER_SIZE)
    }

    pub fn with_capacity(reader: R, capacity: usize) -> Self {
        Self {
            reader,
            buffer: BytesMut::with_capacity(capacity),
            scanned: 0,
        }
    }

    /// Number of bytes read from the source but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Reads one complete reply.
    pub async fn read_reply(&mut self) -> Result<Reply> {
        // Arrays under construction: (elements so far, declared count).
        let mut stack: Vec<(Vec<Reply>, usize)> = Vec::new();

        'frames: loop {
            let mut value = match self.read_frame().await? {
                Frame::Value(value) => value,
                Frame::ArrayHeader(0) => Reply::Array(Vec::new()),
                Frame::ArrayHeader(count) => {
                    let capacity = count.min(MAX_PREALLOCATED_ELEMENTS);
                    stack.push((Vec::with_capacity(capacity), count));
                    continue;
                }
            };

            // Fold the finished value into its parent, closing every array
            // that becomes complete as a result.
            while let Some((mut elements, count)) = stack.pop() {
                elements.push(value);
                if elements.len() < count {
                    stack.push((elements, count));
                    continue 'frames;
                }
                value = Reply::Array(elements);
            }
            return Ok(value);
        }
    }

    /// Reads one line and interprets its type prefix.
    async fn read_frame(&mut self) -> Result<Frame> {
        let line = self.read_line().await?;
        let Some((&kind, rest)) = line.split_first() else {
            return Err(Error::Protocol("short response line"));
        };

        match kind {
            prefix::SIMPLE_STRING => Ok(Frame::Value(simple_string(rest))),
            prefix::ERROR => Ok(Frame::Value(Reply::Error(
                String::from_utf8_lossy(rest).into_owned(),
            ))),
            prefix::INTEGER => parse_int(rest).map(|n| Frame::Value(Reply::Integer(n))),
            prefix::BULK_STRING => {
                let len = parse_len(rest)?;
                if len < 0 {
                    return Ok(Frame::Value(Reply::Nil));
                }
                if len > MAX_BULK_LEN {
                    return Err(Error::Protocol("malformed length"));
                }
                let data = self.read_exact(len as usize).await?;
                if !self.read_line().await?.is_empty() {
                    return Err(Error::Protocol("bad bulk string format"));
                }
                Ok(Frame::Value(Reply::BulkString(data)))
            }
            prefix::ARRAY => {
                let count = parse_len(rest)?;
                if count < 0 {
                    return Ok(Frame::Value(Reply::Nil));
                }
                Ok(Frame::ArrayHeader(count as usize))
            }
            _ => Err(Error::Protocol("unexpected response line")),
        }
    }

    /// Reads a `\r\n` terminated line and returns it without the terminator.
    async fn read_line(&mut self) -> Result<Bytes> {
        loop {
            if let Some(pos) = self.buffer[self.scanned..].iter().position(|&b| b == b'\n') {
                let end = self.scanned + pos;
                self.scanned = 0;
                let mut line = self.buffer.split_to(end + 1);
                if end == 0 || line[end - 1] != b'\r' {
                    return Err(Error::Protocol("bad response line terminator"));
                }
                line.truncate(end - 1);
                return Ok(line.freeze());
            }
            self.scanned = self.buffer.len();

            if self.fill().await? == 0 {
                if self.buffer.is_empty() {
                    return Err(unexpected_eof());
                }
                return Err(Error::Protocol("bad response line terminator"));
            }
        }
    }

    /// Reads exactly `n` payload bytes.
    async fn read_exact(&mut self, n: usize) -> Result<Bytes> {
        if self.buffer.len() < n {
            self.buffer
                .reserve((n - self.buffer.len()).min(MAX_PAYLOAD_RESERVE));
        }
        while self.buffer.len() < n {
            if self.fill().await? == 0 {
                return Err(unexpected_eof());
            }
        }
        self.scanned = 0;
        Ok(self.buffer.split_to(n).freeze())
    }

    /// Pulls more bytes from the reader; returns 0 at end of stream.
    async fn fill(&mut self) -> Result<usize> {
        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(INITIAL_BUFFER_SIZE);
        }
        Ok(self.reader.read_buf(&mut self.buffer).await?)
    }
}

fn simple_string(rest: &[u8]) -> Reply {
    match rest {
        b"OK" => Reply::OK,
        b"PONG" => Reply::PONG,
        _ => Reply::SimpleString(Cow::Owned(String::from_utf8_lossy(rest).into_owned())),
    }
}

fn unexpected_eof() -> Error {
    Error::from(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "connection closed by peer",
    ))
}

/// Parses a bulk string length or array count. Any negative value means nil.
fn parse_len(p: &[u8]) -> Result<i64> {
    match p {
        [b'-', digits @ ..] if is_digits(digits) => Ok(-1),
        _ if is_digits(p) => p
            .iter()
            .try_fold(0i64, |n, &b| n.checked_mul(10)?.checked_add(i64::from(b - b'0')))
            .ok_or(Error::Protocol("malformed length")),
        _ => Err(Error::Protocol("malformed length")),
    }
}

/// Parses an integer reply body.
fn parse_int(p: &[u8]) -> Result<i64> {
    std::str::from_utf8(p)
        .ok()
        .filter(|s| is_digits(s.strip_prefix('-').unwrap_or(*s).as_bytes()))
        .and_then(|s| s.parse().ok())
        .ok_or(Error::Protocol("malformed integer"))
}

fn is_digits(p: &[u8]) -> bool {
    !p.is_empty() && p.iter().all(u8::is_ascii_digit)
}
