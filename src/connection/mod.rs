//! Client Connection Module
//!
//! This module ties the encoder and decoder to one stream and implements
//! pipelining on top of them.
//!
//! ## Architecture
//!
//! ```text
//!   writer task                                   reader task
//!        │                                             │
//!        │ send / flush                      receive   │
//!        ▼                                             ▼
//! ┌─────────────┐   ┌───────────────────────┐   ┌─────────────┐
//! │   Encoder   │   │  pending count        │   │   Decoder   │
//! │ (WriteHalf) │   │  terminal error       │   │ (ReadHalf)  │
//! └──────┬──────┘   │  (one short lock)     │   └──────▲──────┘
//!        │          └───────────────────────┘          │
//!        ▼                                             │
//! ┌────────────────────────────────────────────────────┴──────┐
//! │                    byte stream (TCP, ...)                  │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use resplink::{args, ConnectOptions, Connection};
//! use std::time::Duration;
//!
//! let options = ConnectOptions::new().read_timeout(Duration::from_secs(1));
//! let conn = Connection::connect("127.0.0.1:6379", options).await?;
//!
//! // Pipeline three commands, one write, three replies.
//! conn.send("SET", &args!["a", 1]).await?;
//! conn.send("INCR", &args!["a"]).await?;
//! conn.send("GET", &args!["a"]).await?;
//! conn.flush().await?;
//! for _ in 0..3 {
//!     println!("{}", conn.receive().await?);
//! }
//! ```

pub mod client;
pub mod options;

// Re-export commonly used types
pub use client::{Connection, ConnectionStats, Response};
pub use options::ConnectOptions;
