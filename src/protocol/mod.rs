//! RESP Protocol Implementation
//!
//! The client half of the Redis Serialization Protocol (RESP).
//!
//! ## Overview
//!
//! Commands always travel as arrays of bulk strings; replies can be any of
//! the five RESP2 types. The two directions are handled by separate codecs
//! so the read side and write side of a connection can run independently.
//!
//! ## Modules
//!
//! - `types`: Defines the `Reply` enum and wire prefixes
//! - `arg`: Command argument forms and the `ToArg` extension point
//! - `encoder`: Buffered command encoder with deferred flush
//! - `decoder`: Buffered reply decoder
//!
//! ## Example
//!
//! ```ignore
//! use resplink::protocol::{Decoder, Encoder, Reply};
//! use resplink::args;
//!
//! let mut encoder = Encoder::new(Vec::new());
//! encoder.write_command("SET", &args!["name", "Ariz"]).await?;
//! encoder.flush().await?;
//!
//! let mut decoder = Decoder::new(&b"+OK\r\n"[..]);
//! assert_eq!(decoder.read_reply().await?, Reply::OK);
//! ```

pub mod arg;
pub mod decoder;
pub mod encoder;
pub mod types;

// Re-export commonly used types for convenience
pub use arg::{Arg, ToArg};
pub use decoder::Decoder;
pub use encoder::Encoder;
pub use types::Reply;
