//! Connection Handler Module
//!
//! Each accepted Forward client gets its own handler task that runs in a
//! loop, reading bytes and buffering decoded frames until the client
//! disconnects.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects (accepted by the collector)
//!        │
//!        ▼
//! 2. ConnectionHandler spawned
//!        │
//!        ▼
//! 3. ┌──────────────────────────────┐
//!    │      Ingest Loop             │
//!    │                              │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Read bytes from socket  │ │
//!    │  └───────────┬─────────────┘ │
//!    │              │               │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Decode Forward frames   │ │
//!    │  └───────────┬─────────────┘ │
//!    │              │               │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Append canonical bytes  │ │
//!    │  │ to the shared buffer    │ │
//!    │  └───────────┬─────────────┘ │
//!    │              │               │
//!    │              ▼               │
//!    │         [Loop back]          │
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 4. Client disconnects / error
//!        │
//!        ▼
//! 5. Handler task ends, socket dropped
//! ```
//!
//! ## Buffer Management
//!
//! Incoming data accumulates in a `BytesMut`. TCP is a stream protocol:
//! a read may deliver half a frame, or several frames at once. Complete
//! frames are consumed and appended to the shared [`ChunkBuffer`]; a
//! partial frame stays in the read buffer across reads, so nothing is
//! lost and nothing is re-processed.
//!
//! The handler owns its socket. Once its task ends, for any reason, it
//! never touches the shared buffer again.

use crate::buffer::{BufferError, ChunkBuffer};
use crate::protocol::{DecodeError, EncodeError, Frame, FrameParser};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

/// Initial read buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total frames decoded and buffered
    pub frames_buffered: AtomicU64,
    /// Total bytes read off sockets
    pub bytes_read: AtomicU64,
    /// Total canonical bytes appended to the shared buffer
    pub bytes_buffered: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn frame_buffered(&self, bytes: usize) {
        self.frames_buffered.fetch_add(1, Ordering::Relaxed);
        self.bytes_buffered.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Handles a single Forward client connection.
///
/// Owns the socket and the partial-frame state; shares only the
/// [`ChunkBuffer`] it appends into.
pub struct ConnectionHandler {
    /// The TCP stream for this connection
    stream: TcpStream,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// Sequence number assigned at accept time (for log correlation)
    sequence: u64,

    /// Buffer for incoming data, including partial frames
    read_buf: BytesMut,

    /// Incremental Forward frame parser
    parser: FrameParser,

    /// The shared accumulation buffer
    buffer: Arc<ChunkBuffer>,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,

    /// Cap on the partial-frame read buffer
    max_frame_bytes: usize,
}

impl ConnectionHandler {
    /// Creates a new connection handler.
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        sequence: u64,
        buffer: Arc<ChunkBuffer>,
        stats: Arc<ConnectionStats>,
        max_frame_bytes: usize,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream,
            addr,
            sequence,
            read_buf: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            parser: FrameParser::new(),
            buffer,
            stats,
            max_frame_bytes,
        }
    }

    /// Runs the connection to completion.
    ///
    /// Reads bytes, decodes frames and appends them to the shared buffer
    /// until the client disconnects or an error closes the connection.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, conn = self.sequence, "client connected");

        let result = self.ingest_loop().await;

        match &result {
            Ok(()) => debug!(client = %self.addr, conn = self.sequence, "client disconnected"),
            Err(e) => match e {
                ConnectionError::Io(io_err)
                    if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
                {
                    debug!(client = %self.addr, conn = self.sequence, "connection reset by client")
                }
                ConnectionError::Buffer(BufferError::Closed) => {
                    debug!(client = %self.addr, conn = self.sequence, "buffer closed, dropping connection")
                }
                _ => warn!(client = %self.addr, conn = self.sequence, error = %e, "connection closed with error"),
            },
        }

        self.stats.connection_closed();
        result
    }

    /// The main read-decode-append loop.
    async fn ingest_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            // Drain every complete frame currently in the read buffer
            while let Some(frame) = self.try_decode_frame()? {
                self.buffer_frame(&frame)?;
            }

            // Need more data; a clean EOF ends the connection
            if !self.read_more_data().await? {
                return Ok(());
            }
        }
    }

    /// Attempts to decode one complete frame from the read buffer.
    fn try_decode_frame(&mut self) -> Result<Option<Frame>, ConnectionError> {
        if self.read_buf.is_empty() {
            return Ok(None);
        }

        match self.parser.parse(&self.read_buf) {
            Ok(Some((frame, consumed))) => {
                let _ = self.read_buf.split_to(consumed);
                trace!(
                    client = %self.addr,
                    consumed = consumed,
                    remaining = self.read_buf.len(),
                    "decoded frame"
                );
                Ok(Some(frame))
            }
            Ok(None) => {
                // A partial frame may keep growing, but not without bound
                if self.read_buf.len() >= self.max_frame_bytes {
                    return Err(ConnectionError::FrameTooLarge {
                        size: self.read_buf.len(),
                        max: self.max_frame_bytes,
                    });
                }
                trace!(
                    client = %self.addr,
                    buffered = self.read_buf.len(),
                    "incomplete frame, need more data"
                );
                Ok(None)
            }
            Err(e) => {
                warn!(client = %self.addr, error = %e, "malformed frame");
                Err(ConnectionError::Decode(e))
            }
        }
    }

    /// Appends one frame's canonical encoding to the shared buffer.
    ///
    /// A frame goes in with a single append, so flushes never observe a
    /// torn frame.
    fn buffer_frame(&mut self, frame: &Frame) -> Result<(), ConnectionError> {
        let encoded = frame.encode()?;
        self.buffer.append(&encoded)?;
        self.stats.frame_buffered(encoded.len());

        trace!(
            client = %self.addr,
            tag = %frame.tag,
            entries = frame.entry_count(),
            bytes = encoded.len(),
            "frame buffered"
        );
        Ok(())
    }

    /// Reads more data from the socket into the read buffer.
    ///
    /// Returns `Ok(false)` on an orderly close with no partial frame
    /// pending; a close mid-frame is an error.
    async fn read_more_data(&mut self) -> Result<bool, ConnectionError> {
        if self.read_buf.capacity() - self.read_buf.len() < 1024 {
            self.read_buf.reserve(4096);
        }

        let n = self.stream.read_buf(&mut self.read_buf).await?;

        if n == 0 {
            if self.read_buf.is_empty() {
                return Ok(false);
            }
            return Err(ConnectionError::TruncatedFrame {
                buffered: self.read_buf.len(),
            });
        }

        self.stats.bytes_read(n);
        trace!(client = %self.addr, bytes = n, "read data");

        Ok(true)
    }
}

/// Errors that close a single connection. None of these propagate to
/// service scope; the listener and all other connections keep running.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The client sent bytes that are not a valid Forward message
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Re-encoding a decoded frame failed
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    /// The shared buffer rejected the append
    #[error("buffer error: {0}")]
    Buffer(#[from] BufferError),

    /// The client closed the connection in the middle of a frame
    #[error("connection closed mid-frame with {buffered} bytes pending")]
    TruncatedFrame { buffered: usize },

    /// A single frame exceeded the configured size cap
    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },
}

/// Handles a Forward client connection to completion.
///
/// This is a convenience function that creates a [`ConnectionHandler`]
/// and runs it, logging rather than propagating connection-scoped
/// failures.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    sequence: u64,
    buffer: Arc<ChunkBuffer>,
    stats: Arc<ConnectionStats>,
    max_frame_bytes: usize,
) {
    let handler = ConnectionHandler::new(stream, addr, sequence, buffer, stats, max_frame_bytes);
    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::Io(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => {
                debug!(client = %addr, error = %e, "connection ended with error");
            }
        }
    }
}
