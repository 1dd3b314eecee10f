//! # resplink - A Pipelining RESP Client
//!
//! resplink speaks the Redis Serialization Protocol (RESP) over any ordered,
//! reliable byte stream. It is deliberately low level: commands are a name
//! plus arguments, replies are generic [`Reply`] values, and pipelining is
//! explicit.
//!
//! ## Features
//!
//! - **Pipelining**: queue many commands with `send`, write them with one
//!   `flush`, read the replies in order with `receive`
//! - **Zero-Copy Decoding**: bulk payloads are split out of the read buffer as
//!   `bytes::Bytes`
//! - **Fail-Fast**: the first protocol error, I/O error or timeout breaks the
//!   connection permanently and is reported by every later call
//! - **Split Read/Write**: one task can write while another reads
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                            Connection                               │
//! │                                                                     │
//! │  send ──> ┌─────────────┐                    ┌─────────────┐ <── receive
//! │  flush ─> │   Encoder   │                    │   Decoder   │        │
//! │           │ (send buf)  │                    │ (read buf)  │        │
//! │           └──────┬──────┘                    └──────▲──────┘        │
//! │                  │     pending count, terminal error │              │
//! │                  ▼                                   │              │
//! │           ┌──────────────────────────────────────────┴──────┐      │
//! │           │        AsyncRead + AsyncWrite stream            │      │
//! │           └─────────────────────────────────────────────────┘      │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use resplink::{args, ConnectOptions, Connection, Reply};
//!
//! #[tokio::main]
//! async fn main() -> resplink::Result<()> {
//!     let conn = Connection::connect("127.0.0.1:6379", ConnectOptions::default()).await?;
//!
//!     // One round trip.
//!     let reply = conn.do_command("SET", &args!["name", "Ariz"]).await?.into_result()?;
//!     assert_eq!(reply, Reply::OK);
//!
//!     // A pipeline of ten commands.
//!     for i in 0..10 {
//!         conn.send("INCRBY", &args!["counter", i]).await?;
//!     }
//!     let replies = conn.do_command("", &[]).await?;
//!     println!("{}", replies.reply());
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: reply types, argument types, encoder and decoder
//! - [`connection`]: the pipelining connection and its options
//! - [`error`]: the crate error type
//!
//! ## Error Model
//!
//! Server error replies come back as [`Error::Remote`] and leave the
//! connection usable. Everything else is fatal: the error is latched, blocked
//! operations are woken, and the same error is returned from then on. Callers
//! reconnect; nothing is retried internally.

pub mod connection;
pub mod error;
pub mod protocol;

// Re-export commonly used types for convenience
pub use connection::{ConnectOptions, Connection, ConnectionStats, Response};
pub use error::{Error, RemoteError, Result};
pub use protocol::{Arg, Reply, ToArg};

/// The default Redis port
pub const DEFAULT_PORT: u16 = 6379;

/// The default host to connect to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of resplink
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
