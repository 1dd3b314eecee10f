//! Pipelining Client Connection
//!
//! A [`Connection`] owns one stream, one [`Decoder`] and one [`Encoder`] and
//! exposes the pipelining protocol:
//!
//! ```text
//!   send ──> send ──> send ──> flush ──> receive ──> receive ──> receive
//!   (encode, pending += 1)     (write)   (decode, pending -= 1)
//! ```
//!
//! `do_command` bundles the three steps: it flushes the pipeline, then reads
//! every outstanding reply plus its own.
//!
//! ## Concurrency
//!
//! One task may drive the write side (`send`/`flush`) while another drives
//! the read side (`receive`). The stream is split into halves, each behind
//! its own async mutex, so the two sides never wait on each other. The only
//! shared state (pending count and terminal error) sits behind a short-lived
//! `std::sync::Mutex` that is never held across an `.await`.
//!
//! ## Failure
//!
//! The first protocol error, I/O error or timeout seen by any operation is
//! latched as the terminal error and every later call returns it. Latching
//! also fires a close signal that every in-flight read or write races
//! against, so a task blocked on the other half of the stream wakes up
//! instead of hanging, and shuts down the write half so the peer sees EOF.
//! Server error replies are not fatal.
//!
//! Dropping a read or write future part way through (an outer `timeout` or
//! `select!`) latches [`Error::Cancelled`]: the stream may be mid-frame, and
//! later replies could no longer be paired with their commands.

use crate::connection::options::{deadline, ConnectOptions};
use crate::error::{Error, RemoteError, Result};
use crate::protocol::{Arg, Decoder, Encoder, Reply};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, trace, warn};

/// Counters for one connection.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Commands encoded by `send` and `do_command`
    pub commands_sent: AtomicU64,
    /// Replies decoded, error replies included
    pub replies_received: AtomicU64,
    /// Error replies returned by the server
    pub remote_errors: AtomicU64,
    /// Successful flushes of the send buffer
    pub flushes: AtomicU64,
}

impl ConnectionStats {
    fn command_sent(&self) {
        self.commands_sent.fetch_add(1, Ordering::Relaxed);
    }

    fn replies_received(&self, count: usize) {
        self.replies_received
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    fn remote_error(&self) {
        self.remote_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn flushed(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }
}

/// Result of a [`Connection::do_command`] round trip.
///
/// With a command name, `reply` is the last reply read. If any reply in the
/// batch was a server error, the first such error is kept in
/// `remote_error`, and `reply` is still set: check the error before trusting
/// the value. With an empty command name, `reply` is an array of every
/// outstanding reply (error replies included as values).
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    reply: Reply,
    remote_error: Option<RemoteError>,
}

impl Response {
    pub fn reply(&self) -> &Reply {
        &self.reply
    }

    pub fn remote_error(&self) -> Option<&RemoteError> {
        self.remote_error.as_ref()
    }

    pub fn into_parts(self) -> (Reply, Option<RemoteError>) {
        (self.reply, self.remote_error)
    }

    /// Returns the reply, or the first server error of the batch.
    pub fn into_result(self) -> Result<Reply> {
        match self.remote_error {
            Some(err) => Err(err.into()),
            None => Ok(self.reply),
        }
    }
}

/// Mutable state shared by the reader and writer sides.
#[derive(Debug, Default)]
struct State {
    pending: usize,
    err: Option<Error>,
}

/// A RESP client connection with pipelining.
///
/// All methods take `&self`; wrap the connection in an `Arc` to drive the
/// write side and the read side from different tasks.
pub struct Connection<S = TcpStream> {
    state: Mutex<State>,
    closed: watch::Sender<bool>,
    reader: AsyncMutex<Decoder<ReadHalf<S>>>,
    writer: AsyncMutex<Encoder<WriteHalf<S>>>,
    read_timeout: Duration,
    write_timeout: Duration,
    stats: ConnectionStats,
    peer: String,
}

impl Connection<TcpStream> {
    /// Opens a TCP connection and runs the handshake.
    pub async fn connect(addr: impl ToSocketAddrs, options: ConnectOptions) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::connect("dial", e.into()))?;
        stream
            .set_nodelay(true)
            .map_err(|e| Error::connect("dial", e.into()))?;
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        debug!(peer = %peer, "Connected");
        let conn = Self::build(stream, &options, peer);
        conn.finish_handshake(&options).await?;
        Ok(conn)
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Wraps an already open stream without running the handshake.
    pub fn with_stream(stream: S, options: &ConnectOptions) -> Self {
        Self::build(stream, options, "stream".to_string())
    }

    /// Wraps an already open stream and runs the handshake on it.
    pub async fn handshake(stream: S, options: ConnectOptions) -> Result<Self> {
        let conn = Self::with_stream(stream, &options);
        conn.finish_handshake(&options).await?;
        Ok(conn)
    }

    fn build(stream: S, options: &ConnectOptions, peer: String) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        let (closed, _) = watch::channel(false);
        Self {
            state: Mutex::new(State::default()),
            closed,
            reader: AsyncMutex::new(Decoder::new(read_half)),
            writer: AsyncMutex::new(Encoder::new(write_half)),
            read_timeout: options.read_timeout,
            write_timeout: options.write_timeout,
            stats: ConnectionStats::default(),
            peer,
        }
    }

    /// Runs AUTH, CLIENT SETNAME and SELECT as configured. Any failure
    /// closes the connection.
    async fn finish_handshake(&self, options: &ConnectOptions) -> Result<()> {
        if let Err(err) = self.run_handshake(options).await {
            warn!(peer = %self.peer, error = %err, "Handshake failed");
            let _ = self.close().await;
            return Err(err);
        }
        Ok(())
    }

    async fn run_handshake(&self, options: &ConnectOptions) -> Result<()> {
        if let Some(password) = options.password.as_deref().filter(|p| !p.is_empty()) {
            let mut args = Vec::with_capacity(2);
            if let Some(username) = options.username.as_deref().filter(|u| !u.is_empty()) {
                args.push(Arg::from(username));
            }
            args.push(Arg::from(password));
            self.handshake_step("AUTH", "AUTH", &args).await?;
        }

        if let Some(name) = options.client_name.as_deref().filter(|n| !n.is_empty()) {
            self.handshake_step("CLIENT SETNAME", "CLIENT", &crate::args!["SETNAME", name])
                .await?;
        }

        if options.database != 0 {
            self.handshake_step("SELECT", "SELECT", &crate::args![options.database])
                .await?;
        }

        Ok(())
    }

    async fn handshake_step(&self, step: &'static str, cmd: &str, args: &[Arg]) -> Result<()> {
        self.do_command(cmd, args)
            .await
            .and_then(Response::into_result)
            .map_err(|e| Error::connect(step, e))?;
        debug!(peer = %self.peer, step, "Handshake step complete");
        Ok(())
    }

    /// Encodes a command into the send buffer. The bytes are not guaranteed
    /// to reach the server until [`flush`](Connection::flush).
    pub async fn send(&self, cmd: &str, args: &[Arg]) -> Result<()> {
        self.check()?;

        let mut writer = self.writer.lock().await;
        // Counted only once the writer is held, so giving up while waiting
        // for the lock leaves no phantom reply behind.
        {
            let mut state = self.lock_state();
            if let Some(err) = &state.err {
                return Err(err.clone());
            }
            state.pending += 1;
        }

        let written = self
            .guarded(deadline(self.write_timeout), "write timed out", async {
                writer.write_command(cmd, args).await.map_err(Error::from)
            })
            .await;
        if let Err(err) = written {
            self.shut_down(&mut writer).await;
            return Err(err);
        }

        self.stats.command_sent();
        trace!(peer = %self.peer, command = cmd, args = args.len(), "Queued command");
        Ok(())
    }

    /// Writes every buffered command to the stream.
    pub async fn flush(&self) -> Result<()> {
        self.check()?;

        let mut writer = self.writer.lock().await;
        let flushed = self
            .guarded(deadline(self.write_timeout), "write timed out", async {
                writer.flush().await.map_err(Error::from)
            })
            .await;
        if let Err(err) = flushed {
            self.shut_down(&mut writer).await;
            return Err(err);
        }

        self.stats.flushed();
        trace!(peer = %self.peer, "Flushed");
        Ok(())
    }

    /// Reads one reply using the configured read timeout.
    ///
    /// An error reply from the server comes back as [`Error::Remote`]; the
    /// connection stays usable.
    pub async fn receive(&self) -> Result<Reply> {
        self.receive_with_timeout(self.read_timeout).await
    }

    /// Reads one reply with an explicit timeout; zero waits forever.
    pub async fn receive_with_timeout(&self, timeout: Duration) -> Result<Reply> {
        self.check()?;

        let read = {
            let mut reader = self.reader.lock().await;
            self.guarded(deadline(timeout), "read timed out", reader.read_reply())
                .await
        };
        let reply = match read {
            Ok(reply) => reply,
            Err(err) => {
                self.shut_down_writer().await;
                return Err(err);
            }
        };

        // Pub/sub can deliver more replies than were sent; never go below zero.
        {
            let mut state = self.lock_state();
            state.pending = state.pending.saturating_sub(1);
        }
        self.stats.replies_received(1);
        trace!(peer = %self.peer, "Received reply");

        match reply {
            Reply::Error(message) => {
                self.stats.remote_error();
                Err(RemoteError::new(message).into())
            }
            reply => Ok(reply),
        }
    }

    /// Sends a command and waits for its reply, using the configured read
    /// timeout. See [`do_with_timeout`](Connection::do_with_timeout).
    pub async fn do_command(&self, cmd: &str, args: &[Arg]) -> Result<Response> {
        self.do_with_timeout(self.read_timeout, cmd, args).await
    }

    /// Flushes the pipeline and reads every outstanding reply.
    ///
    /// With a non-empty `cmd`, the command is appended to the pipeline first
    /// and the last reply is returned together with the first server error
    /// of the batch, if any. With an empty `cmd`, all outstanding replies are
    /// returned in order as an array; nothing outstanding means an empty
    /// array and no I/O.
    pub async fn do_with_timeout(
        &self,
        timeout: Duration,
        cmd: &str,
        args: &[Arg],
    ) -> Result<Response> {
        let pending = {
            let mut state = self.lock_state();
            if let Some(err) = &state.err {
                return Err(err.clone());
            }
            std::mem::take(&mut state.pending)
        };

        if cmd.is_empty() && pending == 0 {
            return Ok(Response {
                reply: Reply::Array(Vec::new()),
                remote_error: None,
            });
        }

        // The taken replies must now be read by this call; bailing out
        // anywhere before that breaks the connection.
        let cancel = CancelGuard::new(self);

        {
            let mut writer = self.writer.lock().await;
            let written = self
                .guarded(deadline(self.write_timeout), "write timed out", async {
                    if !cmd.is_empty() {
                        writer.write_command(cmd, args).await?;
                    }
                    writer.flush().await.map_err(Error::from)
                })
                .await;
            if let Err(err) = written {
                self.shut_down(&mut writer).await;
                return Err(err);
            }
        }
        if !cmd.is_empty() {
            self.stats.command_sent();
        }
        self.stats.flushed();

        let total = pending + usize::from(!cmd.is_empty());
        let read = {
            let mut reader = self.reader.lock().await;
            self.guarded(deadline(timeout), "read timed out", async {
                let mut replies = Vec::with_capacity(total);
                for _ in 0..total {
                    replies.push(reader.read_reply().await?);
                }
                Ok::<_, Error>(replies)
            })
            .await
        };
        let mut replies = match read {
            Ok(replies) => replies,
            Err(err) => {
                self.shut_down_writer().await;
                return Err(err);
            }
        };
        cancel.disarm();
        self.stats.replies_received(total);
        trace!(peer = %self.peer, command = cmd, replies = total, "Round trip complete");

        let mut remote_error = None;
        for reply in &replies {
            if let Reply::Error(message) = reply {
                self.stats.remote_error();
                if remote_error.is_none() {
                    remote_error = Some(RemoteError::new(message.as_str()));
                }
            }
        }

        if cmd.is_empty() {
            return Ok(Response {
                reply: Reply::Array(replies),
                remote_error: None,
            });
        }

        Ok(Response {
            reply: replies.pop().unwrap_or(Reply::Nil),
            remote_error,
        })
    }

    /// Returns the terminal error, if the connection is broken or closed.
    pub fn err(&self) -> Option<Error> {
        self.lock_state().err.clone()
    }

    /// Number of sent commands whose replies have not been received.
    pub fn pending(&self) -> usize {
        self.lock_state().pending
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Closes the connection.
    ///
    /// The first call latches [`Error::Closed`], wakes any blocked operation
    /// and shuts down the stream; unflushed commands are dropped. If the
    /// connection had already failed or been closed, the stream is still
    /// shut down and that error is returned.
    pub async fn close(&self) -> Result<()> {
        let latched = {
            let mut state = self.lock_state();
            match &state.err {
                Some(err) => Err(err.clone()),
                None => {
                    state.err = Some(Error::Closed);
                    Ok(())
                }
            }
        };
        self.closed.send_replace(true);
        if latched.is_ok() {
            debug!(peer = %self.peer, "Connection closed");
        }

        let mut writer = self.writer.lock().await;
        let shutdown = writer.shutdown().await.map_err(Error::from);
        latched.and(shutdown)
    }

    fn check(&self) -> Result<()> {
        match &self.lock_state().err {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Shuts down the write half so the peer sees EOF. Failures are only
    /// logged: the connection is already broken.
    async fn shut_down(&self, writer: &mut Encoder<WriteHalf<S>>) {
        if let Err(err) = writer.shutdown().await {
            debug!(peer = %self.peer, error = %err, "Shutdown failed");
        }
    }

    async fn shut_down_writer(&self) {
        let mut writer = self.writer.lock().await;
        self.shut_down(&mut writer).await;
    }

    /// Runs one I/O operation under an optional deadline, racing it against
    /// the close signal. Any failure is latched as the terminal error.
    async fn guarded<T>(
        &self,
        timeout: Option<Duration>,
        what: &'static str,
        op: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let mut closed = self.closed.subscribe();
        let cancel = CancelGuard::new(self);
        let op = async move {
            match timeout {
                Some(limit) => match tokio::time::timeout(limit, op).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::timeout(what)),
                },
                None => op.await,
            }
        };

        let result = tokio::select! {
            biased;
            _ = closed.wait_for(|closed| *closed) => Err(Error::Closed),
            result = op => result,
        };
        cancel.disarm();
        result.map_err(|err| self.fatal(err))
    }
}

impl<S> Connection<S> {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Latches `err` as the terminal error unless one is already set, and
    /// returns whichever error is now terminal.
    fn fatal(&self, err: Error) -> Error {
        let mut state = self.lock_state();
        if let Some(latched) = &state.err {
            return latched.clone();
        }
        warn!(peer = %self.peer, error = %err, "Connection failed");
        state.err = Some(err.clone());
        drop(state);

        // Wakes operations blocked on either half of the stream.
        self.closed.send_replace(true);
        err
    }
}

/// Latches [`Error::Cancelled`] unless disarmed before it is dropped.
struct CancelGuard<'a, S> {
    conn: &'a Connection<S>,
    armed: bool,
}

impl<'a, S> CancelGuard<'a, S> {
    fn new(conn: &'a Connection<S>) -> Self {
        Self { conn, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<S> Drop for CancelGuard<'_, S> {
    fn drop(&mut self) {
        if self.armed {
            self.conn.fatal(Error::Cancelled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;
    use bytes::Bytes;
    use std::io;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    fn command_name(cmd: &Reply) -> String {
        cmd.as_array()
            .and_then(|parts| parts.first())
            .and_then(Reply::as_str)
            .unwrap_or_default()
            .to_ascii_uppercase()
    }

    fn command_args(cmd: &Reply) -> Vec<Reply> {
        cmd.as_array()
            .map(|parts| parts[1..].to_vec())
            .unwrap_or_default()
    }

    /// Scripted server: decodes each command and writes whatever `respond`
    /// returns for it.
    fn spawn_server<T, F>(stream: T, mut respond: F) -> JoinHandle<()>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
        F: FnMut(Reply) -> Vec<Reply> + Send + 'static,
    {
        tokio::spawn(async move {
            let (read_half, mut write_half) = tokio::io::split(stream);
            let mut decoder = Decoder::new(read_half);
            while let Ok(cmd) = decoder.read_reply().await {
                let mut out = Vec::new();
                for reply in respond(cmd) {
                    reply.serialize_into(&mut out);
                }
                if write_half.write_all(&out).await.is_err() {
                    break;
                }
            }
        })
    }

    fn basic_responder(cmd: Reply) -> Vec<Reply> {
        match command_name(&cmd).as_str() {
            "PING" => vec![Reply::PONG],
            "ECHO" => vec![Reply::Array(command_args(&cmd))],
            "FAIL" => vec![Reply::error("ERR failed")],
            "SUBSCRIBE" => vec![
                Reply::Array(vec![Reply::bulk_string("subscribe"), Reply::Integer(1)]),
                Reply::Array(vec![Reply::bulk_string("message"), Reply::bulk_string("a")]),
                Reply::Array(vec![Reply::bulk_string("message"), Reply::bulk_string("b")]),
            ],
            "HANG" => vec![],
            _ => vec![Reply::OK],
        }
    }

    fn connected_pair(options: &ConnectOptions) -> (Connection<DuplexStream>, JoinHandle<()>) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let conn = Connection::with_stream(client, options);
        (conn, spawn_server(server, basic_responder))
    }

    #[tokio::test]
    async fn test_ping_wire_bytes() {
        let mock = tokio_test::io::Builder::new()
            .write(b"*1\r\n$4\r\nPING\r\n")
            .read(b"+PONG\r\n")
            .build();
        let conn = Connection::with_stream(mock, &ConnectOptions::default());

        conn.send("PING", &[]).await.unwrap();
        conn.flush().await.unwrap();
        assert_eq!(conn.receive().await.unwrap(), Reply::PONG);
        assert_eq!(conn.pending(), 0);
    }

    #[tokio::test]
    async fn test_error_reply_is_remote_error() {
        let mock = tokio_test::io::Builder::new()
            .write(b"*1\r\n$3\r\nFOO\r\n")
            .read(b"-ERR unknown command\r\n")
            .build();
        let conn = Connection::with_stream(mock, &ConnectOptions::default());

        conn.send("FOO", &[]).await.unwrap();
        conn.flush().await.unwrap();
        match conn.receive().await {
            Err(Error::Remote(e)) => assert_eq!(e.message(), "ERR unknown command"),
            other => panic!("expected remote error, got {:?}", other),
        }
        assert!(conn.err().is_none());
        assert_eq!(conn.stats().remote_errors.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_truncated_reply_latches_protocol_error() {
        let mock = tokio_test::io::Builder::new().read(b"+OK").build();
        let conn = Connection::with_stream(mock, &ConnectOptions::default());

        let first = conn.receive().await.unwrap_err();
        assert!(matches!(first, Error::Protocol("bad response line terminator")));
        assert_eq!(conn.err().map(|e| e.to_string()), Some(first.to_string()));

        // No further I/O: the mock has no actions left and would fail writes
        // with a different error.
        for err in [
            conn.send("PING", &[]).await.unwrap_err(),
            conn.flush().await.unwrap_err(),
            conn.receive().await.unwrap_err(),
            conn.do_command("PING", &[]).await.unwrap_err(),
        ] {
            assert!(matches!(err, Error::Protocol("bad response line terminator")));
        }
        assert!(matches!(conn.close().await, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn test_io_error_is_returned_verbatim() {
        let mock = tokio_test::io::Builder::new()
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let conn = Connection::with_stream(mock, &ConnectOptions::default());

        let first = conn.receive().await.unwrap_err();
        let second = conn.receive().await.unwrap_err();
        match (&first, &second) {
            (Error::Io(a), Error::Io(b)) => {
                assert_eq!(a.kind(), io::ErrorKind::ConnectionReset);
                assert!(Arc::ptr_eq(a, b));
            }
            other => panic!("expected io errors, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_pipelined_echo_fifo() {
        let (conn, _server) = connected_pair(&ConnectOptions::default());

        for i in 0..10 {
            conn.send("ECHO", &args!["abc", "123", i]).await.unwrap();
        }
        assert_eq!(conn.pending(), 10);
        conn.flush().await.unwrap();

        for i in 0..10 {
            let reply = conn.receive().await.unwrap();
            assert_eq!(
                reply,
                Reply::Array(vec![
                    Reply::bulk_string("abc"),
                    Reply::bulk_string("123"),
                    Reply::bulk_string(Bytes::from(i.to_string())),
                ])
            );
        }
        assert_eq!(conn.pending(), 0);
        assert_eq!(conn.stats().commands_sent.load(Ordering::Relaxed), 10);
        assert_eq!(conn.stats().flushes.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_argument_kinds_reach_server_intact() {
        let (conn, _server) = connected_pair(&ConnectOptions::default());

        let raw = Bytes::from_static(b"\x00\xff\r\n");
        let reply = conn
            .do_command("ECHO", &args!["text", raw.clone(), -12, 2.5, false, None::<i64>])
            .await
            .unwrap()
            .into_result()
            .unwrap();
        assert_eq!(
            reply,
            Reply::Array(vec![
                Reply::bulk_string("text"),
                Reply::BulkString(raw),
                Reply::bulk_string("-12"),
                Reply::bulk_string("2.5"),
                Reply::bulk_string("0"),
                Reply::bulk_string(""),
            ])
        );
    }

    #[tokio::test]
    async fn test_receive_never_drives_pending_negative() {
        let (conn, _server) = connected_pair(&ConnectOptions::default());

        conn.send("SUBSCRIBE", &args!["news"]).await.unwrap();
        conn.flush().await.unwrap();
        for _ in 0..3 {
            conn.receive().await.unwrap();
            assert_eq!(conn.pending(), 0);
        }

        // The connection is still in step for ordinary commands.
        let reply = conn.do_command("PING", &[]).await.unwrap();
        assert_eq!(reply.into_result().unwrap(), Reply::PONG);
    }

    #[tokio::test]
    async fn test_do_returns_last_reply_and_first_remote_error() {
        let (conn, _server) = connected_pair(&ConnectOptions::default());

        conn.send("SET", &args!["k", "v"]).await.unwrap();
        conn.send("FAIL", &[]).await.unwrap();
        conn.send("FAIL", &[]).await.unwrap();
        let response = conn.do_command("PING", &[]).await.unwrap();

        assert_eq!(response.reply(), &Reply::PONG);
        assert_eq!(response.remote_error().map(|e| e.message()), Some("ERR failed"));
        assert_eq!(conn.pending(), 0);
        assert!(conn.err().is_none());
        assert!(matches!(response.into_result(), Err(Error::Remote(_))));

        let response = conn.do_command("PING", &[]).await.unwrap();
        assert_eq!(response.into_parts(), (Reply::PONG, None));
    }

    #[tokio::test]
    async fn test_do_with_empty_command_drains_pipeline() {
        let (conn, _server) = connected_pair(&ConnectOptions::default());

        let empty = conn.do_command("", &[]).await.unwrap();
        assert_eq!(empty.reply(), &Reply::Array(vec![]));

        conn.send("PING", &[]).await.unwrap();
        conn.send("FAIL", &[]).await.unwrap();
        conn.send("SET", &args!["k", 1]).await.unwrap();
        let response = conn.do_command("", &[]).await.unwrap();

        assert_eq!(
            response.into_parts(),
            (
                Reply::Array(vec![Reply::PONG, Reply::error("ERR failed"), Reply::OK]),
                None
            )
        );
        assert_eq!(conn.pending(), 0);
    }

    #[tokio::test]
    async fn test_read_timeout_is_fatal() {
        let options = ConnectOptions::new().read_timeout(Duration::from_millis(50));
        let (conn, _server) = connected_pair(&options);

        conn.send("HANG", &[]).await.unwrap();
        conn.flush().await.unwrap();
        let err = conn.receive().await.unwrap_err();
        assert!(err.is_timeout());
        assert!(conn.err().unwrap().is_timeout());
        assert!(conn.send("PING", &[]).await.unwrap_err().is_timeout());
    }

    #[tokio::test]
    async fn test_receive_with_timeout_override() {
        let (conn, _server) = connected_pair(&ConnectOptions::default());

        conn.send("HANG", &[]).await.unwrap();
        conn.flush().await.unwrap();
        let err = conn
            .receive_with_timeout(Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_close_unblocks_blocked_receive() {
        let (conn, _server) = connected_pair(&ConnectOptions::default());
        let conn = Arc::new(conn);

        conn.send("HANG", &[]).await.unwrap();
        conn.flush().await.unwrap();
        let reader = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.receive().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        conn.close().await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(2), reader)
            .await
            .expect("blocked receive should wake up")
            .unwrap();
        assert!(matches!(result, Err(Error::Closed)));
        assert!(matches!(conn.close().await, Err(Error::Closed)));
        assert!(matches!(conn.err(), Some(Error::Closed)));
    }

    #[tokio::test]
    async fn test_write_failure_unblocks_reader() {
        let mock = tokio_test::io::Builder::new()
            .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
            .build();
        let conn = Arc::new(Connection::with_stream(mock, &ConnectOptions::default()));

        let reader = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.receive().await })
        };
        tokio::task::yield_now().await;

        conn.send("PING", &[]).await.unwrap();
        let err = conn.flush().await.unwrap_err();
        assert!(matches!(&err, Error::Io(e) if e.kind() == io::ErrorKind::BrokenPipe));

        let blocked = tokio::time::timeout(Duration::from_secs(2), reader)
            .await
            .expect("reader should wake up")
            .unwrap()
            .unwrap_err();
        assert_eq!(blocked.to_string(), err.to_string());
    }

    #[tokio::test]
    async fn test_handshake_runs_configured_commands() {
        let (client, server) = tokio::io::duplex(4096);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen);
        let _server = spawn_server(server, move |cmd| {
            recorder.lock().unwrap().push(cmd);
            vec![Reply::OK]
        });

        let options = ConnectOptions::new()
            .username("app")
            .password("secret")
            .client_name("worker")
            .database(2);
        let conn = Connection::handshake(client, options).await.unwrap();
        assert!(conn.err().is_none());

        let expected: Vec<Reply> = [
            vec!["AUTH", "app", "secret"],
            vec!["CLIENT", "SETNAME", "worker"],
            vec!["SELECT", "2"],
        ]
        .into_iter()
        .map(|parts| Reply::Array(parts.into_iter().map(Reply::bulk_string).collect()))
        .collect();
        assert_eq!(*seen.lock().unwrap(), expected);
    }

    #[tokio::test]
    async fn test_handshake_failure_closes_connection() {
        let (client, server) = tokio::io::duplex(4096);
        let _server = spawn_server(server, |_| vec![Reply::error("WRONGPASS invalid password")]);

        let options = ConnectOptions::new().password("nope");
        match Connection::handshake(client, options).await {
            Err(Error::Connect { step, source }) => {
                assert_eq!(step, "AUTH");
                assert_eq!(source.as_remote().map(|e| e.code()), Some("WRONGPASS"));
            }
            Err(other) => panic!("expected connect error, got {:?}", other),
            Ok(_) => panic!("handshake should fail"),
        }
    }

    #[tokio::test]
    async fn test_connect_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            spawn_server(stream, basic_responder).await.unwrap();
        });

        let options = ConnectOptions::new()
            .read_timeout(Duration::from_secs(2))
            .write_timeout(Duration::from_secs(2))
            .database(1);
        let conn = Connection::connect(addr, options).await.unwrap();
        let response = conn.do_command("PING", &[]).await.unwrap();
        assert_eq!(response.into_result().unwrap(), Reply::PONG);
        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        match Connection::connect(addr, ConnectOptions::default()).await {
            Err(Error::Connect { step, .. }) => assert_eq!(step, "dial"),
            Err(other) => panic!("expected connect error, got {:?}", other),
            Ok(_) => panic!("connect should fail"),
        }
    }

    #[tokio::test]
    async fn test_write_timeout_is_fatal() {
        // Nobody reads the far end, so the flush stalls once 16 bytes are queued.
        let (client, _server) = tokio::io::duplex(16);
        let options = ConnectOptions::new().write_timeout(Duration::from_millis(20));
        let conn = Connection::with_stream(client, &options);

        conn.send("SET", &args!["k", "x".repeat(1024)]).await.unwrap();
        let err = conn.flush().await.unwrap_err();
        assert!(err.is_timeout());
        assert!(conn.err().unwrap().is_timeout());
        assert!(conn.send("PING", &[]).await.unwrap_err().is_timeout());
    }

    #[tokio::test]
    async fn test_do_with_timeout_override() {
        let (conn, _server) = connected_pair(&ConnectOptions::default());

        let err = conn
            .do_with_timeout(Duration::from_millis(20), "HANG", &[])
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(conn.err().unwrap().is_timeout());
    }

    #[tokio::test]
    async fn test_abandoned_receive_mid_reply_breaks_connection() {
        let (client, mut server) = tokio::io::duplex(4096);
        let conn = Connection::with_stream(client, &ConnectOptions::default());
        conn.send("GET", &args!["a"]).await.unwrap();
        conn.send("GET", &args!["b"]).await.unwrap();
        conn.flush().await.unwrap();

        // Only the header of the first reply arrives before the caller gives up.
        server.write_all(b"$2\r\n").await.unwrap();
        let abandoned = tokio::time::timeout(Duration::from_millis(50), conn.receive()).await;
        assert!(abandoned.is_err());

        server.write_all(b":7\r\n$2\r\nok\r\n").await.unwrap();
        assert!(matches!(conn.err(), Some(Error::Cancelled)));
        assert!(matches!(conn.receive().await, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_abandoned_do_command_breaks_connection() {
        let (conn, _server) = connected_pair(&ConnectOptions::default());
        conn.send("PING", &[]).await.unwrap();

        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), conn.do_command("HANG", &[])).await;
        assert!(abandoned.is_err());
        assert!(matches!(conn.err(), Some(Error::Cancelled)));
        assert!(matches!(
            conn.do_command("PING", &[]).await,
            Err(Error::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_send_abandoned_while_waiting_for_writer() {
        let (conn, _server) = connected_pair(&ConnectOptions::default());

        let held = conn.writer.lock().await;
        let abandoned =
            tokio::time::timeout(Duration::from_millis(20), conn.send("PING", &[])).await;
        assert!(abandoned.is_err());
        drop(held);

        assert_eq!(conn.pending(), 0);
        assert!(conn.err().is_none());
        let response = conn.do_command("PING", &[]).await.unwrap();
        assert_eq!(response.into_result().unwrap(), Reply::PONG);
    }

    #[tokio::test]
    async fn test_fatal_error_shuts_down_stream() {
        let (client, mut server) = tokio::io::duplex(4096);
        let conn = Connection::with_stream(client, &ConnectOptions::default());

        server.write_all(b"?bad\r\n").await.unwrap();
        assert!(matches!(
            conn.receive().await,
            Err(Error::Protocol("unexpected response line"))
        ));

        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(Duration::from_millis(200), server.read(&mut buf))
            .await
            .expect("peer should see EOF")
            .unwrap();
        assert_eq!(n, 0);
        assert!(matches!(
            conn.close().await,
            Err(Error::Protocol("unexpected response line"))
        ));
    }
}
