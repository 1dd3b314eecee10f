//! RESP Command Encoder
//!
//! Commands go out as a RESP array of bulk strings:
//!
//! ```text
//! *<1 + argc>\r\n
//! $<len>\r\n<command>\r\n
//! $<len>\r\n<arg 1>\r\n
//! ...
//! ```
//!
//! Encoded bytes accumulate in a send buffer and only reach the sink on
//! [`flush`](Encoder::flush), which is what makes pipelining cheap: many
//! commands, one write. To keep an unflushed pipeline from growing without
//! bound, `write_command` drains the buffer to the sink once it passes
//! [`HIGH_WATER_MARK`] bytes.
//!
//! The encoder keeps no error state. After an I/O error the caller decides
//! what happens to the stream.

use crate::protocol::arg::{Arg, ToArg};
use crate::protocol::types::{prefix, CRLF};
use bytes::{Buf, BytesMut};
use std::io::{self, Write};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Buffered bytes that trigger a drain to the sink during `write_command`.
pub const HIGH_WATER_MARK: usize = 8 * 1024;

/// Encodes commands into an async writer.
#[derive(Debug)]
pub struct Encoder<W> {
    writer: W,
    buffer: BytesMut,
    /// '*' or '$', length digits, "\r\n"
    len_scratch: [u8; 32],
    /// Formatted integers and floats.
    num_scratch: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> Encoder<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            buffer: BytesMut::with_capacity(HIGH_WATER_MARK),
            len_scratch: [0; 32],
            num_scratch: Vec::with_capacity(40),
        }
    }

    /// Number of encoded bytes not yet handed to the sink.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    /// Encodes one command into the send buffer.
    ///
    /// Bytes reach the sink here only when the buffer passes the high-water
    /// mark; call [`flush`](Encoder::flush) to send everything.
    pub async fn write_command(&mut self, cmd: &str, args: &[Arg]) -> io::Result<()> {
        self.encode_command(cmd, args);
        if self.buffer.len() >= HIGH_WATER_MARK {
            self.drain().await?;
        }
        Ok(())
    }

    /// Pushes every buffered byte to the sink and flushes it.
    pub async fn flush(&mut self) -> io::Result<()> {
        self.drain().await?;
        self.writer.flush().await
    }

    /// Discards unflushed bytes and shuts down the sink.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.buffer.clear();
        self.writer.shutdown().await
    }

    async fn drain(&mut self) -> io::Result<()> {
        while self.buffer.has_remaining() {
            let n = self.writer.write(&self.buffer).await?;
            if n == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }
            self.buffer.advance(n);
        }
        Ok(())
    }

    /// Appends the wire form of a command to the send buffer.
    pub fn encode_command(&mut self, cmd: &str, args: &[Arg]) {
        self.write_len(prefix::ARRAY, 1 + args.len());
        self.write_bulk(cmd.as_bytes());
        for arg in args {
            self.write_arg(arg);
        }
    }

    fn write_arg(&mut self, arg: &Arg) {
        match arg {
            Arg::Custom(custom) => match custom.to_arg() {
                // Converted exactly once; a nested custom value falls back
                // to the outer value's text.
                Arg::Custom(_) => self.write_display(&**custom),
                primitive => self.write_primitive(&primitive),
            },
            primitive => self.write_primitive(primitive),
        }
    }

    fn write_primitive(&mut self, arg: &Arg) {
        match arg {
            Arg::Str(s) => self.write_bulk(s.as_bytes()),
            Arg::Bytes(b) => self.write_bulk(b),
            Arg::Int(n) => self.write_formatted(format_args!("{}", n)),
            Arg::Float(n) => self.write_float(*n),
            Arg::Bool(true) => self.write_bulk(b"1"),
            Arg::Bool(false) => self.write_bulk(b"0"),
            Arg::Nil => self.write_bulk(b""),
            Arg::Custom(custom) => self.write_display(&**custom),
        }
    }

    fn write_display(&mut self, value: &dyn ToArg) {
        self.write_formatted(format_args!("{}", value));
    }

    /// Formats into the reusable scratch vector, then writes it as a bulk string.
    fn write_formatted(&mut self, args: std::fmt::Arguments<'_>) {
        let mut scratch = std::mem::take(&mut self.num_scratch);
        scratch.clear();
        // Writing into a Vec cannot fail.
        let _ = scratch.write_fmt(args);
        self.write_bulk(&scratch);
        self.num_scratch = scratch;
    }

    /// Shortest round-trip digits in `%g` style: plain notation for decimal
    /// exponents in `-4..6`, otherwise `1.5e+07` with a signed two-digit
    /// exponent. Infinities are `+Inf`/`-Inf`.
    fn write_float(&mut self, n: f64) {
        if n.is_nan() {
            return self.write_bulk(b"NaN");
        }
        if n.is_infinite() {
            return self.write_bulk(if n > 0.0 { b"+Inf" } else { b"-Inf" });
        }

        let mut scratch = std::mem::take(&mut self.num_scratch);
        scratch.clear();
        let _ = write!(scratch, "{:e}", n);
        if let Some(e) = scratch.iter().position(|&b| b == b'e') {
            let exp: i32 = std::str::from_utf8(&scratch[e + 1..])
                .ok()
                .and_then(|digits| digits.parse().ok())
                .unwrap_or(0);
            if (-4..6).contains(&exp) {
                scratch.clear();
                let _ = write!(scratch, "{}", n);
            } else {
                scratch.truncate(e + 1);
                scratch.push(if exp < 0 { b'-' } else { b'+' });
                let _ = write!(scratch, "{:02}", exp.unsigned_abs());
            }
        }
        self.write_bulk(&scratch);
        self.num_scratch = scratch;
    }

    fn write_bulk(&mut self, data: &[u8]) {
        self.write_len(prefix::BULK_STRING, data.len());
        self.buffer.extend_from_slice(data);
        self.buffer.extend_from_slice(CRLF);
    }

    /// Writes `<prefix><n>\r\n`, filling digits from the end of the scratch array.
    fn write_len(&mut self, prefix: u8, mut n: usize) {
        let scratch = &mut self.len_scratch;
        let last = scratch.len() - 1;
        scratch[last] = b'\n';
        scratch[last - 1] = b'\r';
        let mut i = last - 2;
        loop {
            scratch[i] = b'0' + (n % 10) as u8;
            n /= 10;
            if n == 0 {
                break;
            }
            i -= 1;
        }
        i -= 1;
        scratch[i] = prefix;
        self.buffer.extend_from_slice(&scratch[i..]);
    }
}
