//! Error types for resplink
//!
//! Every connection operation returns [`Error`]. The variants split into two
//! groups:
//!
//! - **Fatal** errors (`Protocol`, `Io`, `Cancelled`, `Closed`, `Connect`)
//!   break the connection. The first one observed is latched and returned
//!   verbatim by every later operation.
//! - **Remote** errors are `-ERR ...` replies from the server. The connection
//!   stays usable and pipelining continues.
//!
//! `Error` is `Clone` so the latched error can be handed out repeatedly; I/O
//! errors are shared behind an `Arc` for that reason.

use std::fmt;
use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Result type alias using the crate [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for decoder, encoder and connection operations.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The peer sent a malformed frame.
    #[error("protocol error: {0}")]
    Protocol(&'static str),

    /// Transport read/write failure, including timeouts.
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),

    /// The server answered with an error reply.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// A read or write future was dropped part way through, leaving the
    /// stream in the middle of a frame.
    #[error("operation cancelled mid-frame")]
    Cancelled,

    /// The connection was closed with [`close`](crate::Connection::close).
    #[error("connection closed")]
    Closed,

    /// Opening the stream or running the handshake failed.
    #[error("connect failed during {step}: {source}")]
    Connect {
        step: &'static str,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Builds the error returned when a deadline elapses.
    pub(crate) fn timeout(what: &'static str) -> Self {
        Error::Io(Arc::new(io::Error::new(io::ErrorKind::TimedOut, what)))
    }

    pub(crate) fn connect(step: &'static str, source: Error) -> Self {
        Error::Connect {
            step,
            source: Box::new(source),
        }
    }

    /// Returns false only for server error replies.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Remote(_))
    }

    /// Returns true if this error was caused by an elapsed read or write timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Io(e) => e.kind() == io::ErrorKind::TimedOut,
            Error::Connect { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    /// Returns the server error if this is a remote error.
    pub fn as_remote(&self) -> Option<&RemoteError> {
        match self {
            Error::Remote(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(Arc::new(e))
    }
}

/// An error reply (`-<message>\r\n`) sent by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    message: String,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The full message, e.g. `"ERR unknown command"`.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The error code: the first word of the message, e.g. `"ERR"` or `"WRONGTYPE"`.
    pub fn code(&self) -> &str {
        self.message.split(' ').next().unwrap_or("")
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for RemoteError {}
