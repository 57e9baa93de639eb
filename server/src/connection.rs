//! Per-socket connection actor.
//!
//! Each accepted socket is split into two tasks:
//! - **Read loop**: reads newline-delimited frames, decodes them and awaits
//!   the [`FrameHandler`] for each one, so a peer's frames are handled in the
//!   order they were sent while other connections proceed independently.
//!   A line that is too long or not UTF-8 is dropped like any other
//!   malformed frame; the connection stays open.
//! - **Writer**: drains a bounded outbound queue into the socket, so
//!   [`Connection::send`] never waits on a slow peer.
//!
//! The read loop is the only place a connection ends. Whatever triggers the
//! end (end of stream, read error, idle timeout, [`Connection::close`], or a
//! failed write), the loop exits once, the socket is released and
//! [`FrameHandler::on_disconnect`] fires exactly once.

use log::{debug, info, warn};
use shared::{decode_frame, ClientMessage};
use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::config::ConnectionConfig;

/// Transient identity minted by the accept loop.
pub type ConnectionId = u32;

/// A complete encoded frame, shareable between many connections.
pub type Frame = Arc<str>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Queued for the writer.
    Sent,
    /// Not queued: the connection is closed or its queue is full.
    Dropped,
}

/// Why a connection's read loop ended.
#[derive(Debug)]
pub enum CloseReason {
    EndOfStream,
    ReadError(io::Error),
    IdleTimeout,
    Cancelled,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::EndOfStream => write!(f, "end of stream"),
            CloseReason::ReadError(e) => write!(f, "read error: {}", e),
            CloseReason::IdleTimeout => write!(f, "idle timeout"),
            CloseReason::Cancelled => write!(f, "closed by server"),
        }
    }
}

/// Receives a connection's lifecycle events and decoded frames.
pub trait FrameHandler: Send + Sync + 'static {
    /// Called once, before the connection's read loop starts.
    fn on_connect(&self, connection: &Connection);

    /// Called for every decoded frame, in arrival order per connection.
    fn on_frame(
        &self,
        connection: &Connection,
        message: ClientMessage,
    ) -> impl Future<Output = ()> + Send;

    /// Called exactly once, after the socket has been released and after
    /// any in-flight `on_frame` of the same connection has completed.
    fn on_disconnect(
        &self,
        connection: &Connection,
        reason: &CloseReason,
    ) -> impl Future<Output = ()> + Send;
}

#[derive(Debug)]
struct Inner {
    id: ConnectionId,
    peer_addr: SocketAddr,
    outbound: mpsc::Sender<Frame>,
    shutdown: watch::Sender<bool>,
}

/// Cheap, cloneable handle to one client connection.
#[derive(Debug, Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

/// The socket halves and queues of a connection that has not started yet.
#[derive(Debug)]
pub struct ConnectionIo {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    outbound: mpsc::Receiver<Frame>,
    shutdown: watch::Receiver<bool>,
    config: ConnectionConfig,
}

impl Connection {
    /// Wraps an accepted socket. Nothing is read or written until
    /// [`ConnectionIo::spawn`] is called.
    pub fn open(
        stream: TcpStream,
        id: ConnectionId,
        config: ConnectionConfig,
    ) -> io::Result<(Connection, ConnectionIo)> {
        let peer_addr = stream.peer_addr()?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not disable Nagle for connection {}: {}", id, e);
        }

        let (reader, writer) = stream.into_split();
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_queue.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let connection = Connection {
            inner: Arc::new(Inner {
                id,
                peer_addr,
                outbound: outbound_tx,
                shutdown: shutdown_tx,
            }),
        };
        let io = ConnectionIo {
            reader,
            writer,
            outbound: outbound_rx,
            shutdown: shutdown_rx,
            config,
        };

        Ok((connection, io))
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer_addr
    }

    /// Queues a frame without waiting. Failures are reported, not retried.
    pub fn send(&self, frame: Frame) -> SendOutcome {
        if self.is_closed() {
            return SendOutcome::Dropped;
        }

        match self.inner.outbound.try_send(frame) {
            Ok(()) => SendOutcome::Sent,
            Err(TrySendError::Full(_)) => {
                debug!(
                    "Outbound queue of connection {} is full, dropping frame",
                    self.id()
                );
                SendOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => SendOutcome::Dropped,
        }
    }

    /// Asks the connection to shut down. Idempotent.
    pub fn close(&self) {
        self.inner.shutdown.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.shutdown.borrow()
    }
}

impl ConnectionIo {
    /// Starts the writer and the read loop. The returned handle resolves once
    /// the disconnect notification has been delivered.
    pub fn spawn<H: FrameHandler>(self, connection: Connection, handler: Arc<H>) -> JoinHandle<()> {
        let writer = tokio::spawn(write_loop(
            connection.clone(),
            self.writer,
            self.outbound,
            self.shutdown.clone(),
            self.config.write_timeout,
        ));

        tokio::spawn(read_loop(
            connection,
            self.reader,
            self.shutdown,
            self.config,
            handler,
            writer,
        ))
    }
}

/// Resolves once the watched flag is set. Never resolves if the sender is
/// dropped without setting it.
pub(crate) async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// One newline-terminated record off the wire.
#[derive(Debug, PartialEq)]
enum Line {
    Complete(Vec<u8>),
    /// Longer than the limit; its bytes were discarded as they arrived.
    Oversized(usize),
    EndOfStream,
}

/// Splits a byte stream into lines, holding at most `max_len` bytes of the
/// current line in memory.
struct LineReader<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
    discarded: usize,
    max_len: usize,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    fn new(reader: R, max_len: usize) -> Self {
        Self {
            reader: BufReader::new(reader),
            buf: Vec::new(),
            discarded: 0,
            max_len,
        }
    }

    /// Cancel safe: a partially read line is kept for the next call.
    async fn next_line(&mut self) -> io::Result<Line> {
        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                if self.discarded > 0 {
                    return Ok(Line::Oversized(std::mem::take(&mut self.discarded)));
                }
                if self.buf.is_empty() {
                    return Ok(Line::EndOfStream);
                }
                return Ok(Line::Complete(std::mem::take(&mut self.buf)));
            }

            let newline = available.iter().position(|&b| b == b'\n');
            let chunk = &available[..newline.unwrap_or(available.len())];
            if self.discarded == 0 && self.buf.len() + chunk.len() <= self.max_len {
                self.buf.extend_from_slice(chunk);
            } else {
                self.discarded += self.buf.len() + chunk.len();
                self.buf.clear();
            }

            let used = newline.map_or(available.len(), |i| i + 1);
            self.reader.consume(used);

            if newline.is_some() {
                if self.discarded > 0 {
                    return Ok(Line::Oversized(std::mem::take(&mut self.discarded)));
                }
                let mut line = std::mem::take(&mut self.buf);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(Line::Complete(line));
            }
        }
    }
}

async fn read_loop<H: FrameHandler>(
    connection: Connection,
    reader: OwnedReadHalf,
    mut shutdown: watch::Receiver<bool>,
    config: ConnectionConfig,
    handler: Arc<H>,
    writer: JoinHandle<()>,
) {
    let mut lines = LineReader::new(reader, config.max_frame_len);

    let reason = loop {
        let read = tokio::select! {
            biased;
            _ = cancelled(&mut shutdown) => break CloseReason::Cancelled,
            read = timeout(config.idle_timeout, lines.next_line()) => read,
        };

        let bytes = match read {
            Err(_) => break CloseReason::IdleTimeout,
            Ok(Err(e)) => break CloseReason::ReadError(e),
            Ok(Ok(Line::EndOfStream)) => break CloseReason::EndOfStream,
            Ok(Ok(Line::Oversized(len))) => {
                warn!(
                    "Dropping {} byte frame from connection {}: longer than {} bytes",
                    len,
                    connection.id(),
                    config.max_frame_len
                );
                continue;
            }
            Ok(Ok(Line::Complete(bytes))) => bytes,
        };

        let line = match std::str::from_utf8(&bytes) {
            Ok(line) => line,
            Err(e) => {
                warn!("Dropping frame from connection {}: {}", connection.id(), e);
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        debug!("Received from connection {}: {}", connection.id(), line);
        if let Some(message) = decode_frame(line, config.framing) {
            handler.on_frame(&connection, message).await;
        }
    };

    connection.close();
    if let Err(e) = writer.await {
        warn!("Writer of connection {} panicked: {}", connection.id(), e);
    }
    drop(lines);

    info!(
        "Connection {} ({}) closed: {}",
        connection.id(),
        connection.peer_addr(),
        reason
    );
    handler.on_disconnect(&connection, &reason).await;
}

async fn write_loop(
    connection: Connection,
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<Frame>,
    mut shutdown: watch::Receiver<bool>,
    write_timeout: Duration,
) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = cancelled(&mut shutdown) => break,
            frame = outbound.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let written = tokio::select! {
            biased;
            _ = cancelled(&mut shutdown) => break,
            written = timeout(write_timeout, writer.write_all(frame.as_bytes())) => written,
        };

        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("Error writing to connection {}: {}", connection.id(), e);
                connection.close();
                break;
            }
            Err(_) => {
                warn!("Write to connection {} timed out", connection.id());
                connection.close();
                break;
            }
        }
    }

    let _ = timeout(Duration::from_millis(100), writer.shutdown()).await;
}
