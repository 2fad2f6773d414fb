//! Forward Input Service
//!
//! [`ForwardInput`] is the long-lived context for one listening instance:
//! it owns the listening socket, the shared [`ChunkBuffer`] and the
//! lifecycle state machine, and exposes the four operations the host
//! drives: `init`, `collect`, `flush` and `exit`.
//!
//! ## State machine
//!
//! ```text
//! Uninitialized ──init──> Bound ──listen──> Running ──exit──> Stopped
//! ```
//!
//! `Uninitialized` is simply "no value exists yet"; `init` performs the
//! bind and listener registration internally and only ever returns a
//! context in `Running`, so no half-initialized context escapes. Only
//! `Running` permits `collect` and `flush`. `Stopped` is terminal.
//!
//! ## Ownership
//!
//! Accepted connections are not owned by the context: each handler task
//! owns its socket and holds its own `Arc` of the shared buffer. Shutdown
//! is cooperative; dropping the listener stops new accepts first, and
//! handlers still draining cannot touch freed memory because the buffer
//! lives as long as any `Arc` does.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpSocket};
use tracing::{debug, error, info, trace, warn};

use crate::buffer::{BufferError, ChunkBuffer, FlushChunk};
use crate::config::ForwardConfig;
use crate::connection::{handle_connection, ConnectionStats};

/// Lifecycle states of a [`ForwardInput`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Socket bound, listener not yet registered (internal to `init`)
    Bound,
    /// Accepting connections; `collect` and `flush` are permitted
    Running,
    /// Terminal; the listening socket is closed and the buffer released
    Stopped,
}

/// Errors surfaced by the input service.
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    /// The listening socket could not be created or bound (fatal, startup)
    #[error("could not bind address {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The bound socket could not be registered as a listener with the
    /// runtime (fatal, startup)
    #[error("could not register listener: {0}")]
    Registration(#[source] std::io::Error),

    /// A single accept attempt failed (recoverable; keep collecting)
    #[error("could not accept new connection: {0}")]
    Accept(#[source] std::io::Error),

    /// The operation is not valid in the current lifecycle state
    #[error("operation not permitted in state {state:?}")]
    State { state: ServiceState },

    /// The shared buffer failed (recoverable; buffered data preserved)
    #[error(transparent)]
    Buffer(#[from] BufferError),

    /// Shutdown completed with a degraded step (socket is closed anyway)
    #[error("shutdown incomplete: {0}")]
    Shutdown(String),
}

impl InputError {
    /// True for startup errors the host must treat as fatal. Everything
    /// else leaves the service running and may be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            InputError::Bind { .. } | InputError::Registration(_) | InputError::State { .. }
        )
    }
}

/// The lifecycle surface an input plugin exposes to its host.
///
/// The host holds a value implementing this trait and drives it: `init`
/// at startup (fatal on error), `collect` whenever it wants one pending
/// connection accepted, `flush` on the delivery scheduler's cadence, and
/// `exit` exactly once at shutdown.
pub trait Input: Sized {
    /// Builds a fully initialized, running input from configuration.
    fn init(
        config: ForwardConfig,
    ) -> impl std::future::Future<Output = Result<Self, InputError>> + Send;

    /// Accepts one pending connection and hands it to a handler.
    fn collect(&self)
        -> impl std::future::Future<Output = Result<SocketAddr, InputError>> + Send;

    /// Detaches the accumulated buffer for downstream delivery.
    fn flush(&self) -> Result<Option<FlushChunk>, InputError>;

    /// Shuts the input down: closes the listener, releases the buffer.
    fn exit(&mut self) -> Result<(), InputError>;
}

/// A Forward protocol ingestion instance.
#[derive(Debug)]
pub struct ForwardInput {
    config: ForwardConfig,
    listener: Option<TcpListener>,
    buffer: Arc<ChunkBuffer>,
    stats: Arc<ConnectionStats>,
    state: ServiceState,
}

impl ForwardInput {
    /// Binds the listening socket and returns a running input.
    ///
    /// Fatal on any failure: either a fully constructed context comes
    /// back or nothing does.
    pub async fn init(config: ForwardConfig) -> Result<Self, InputError> {
        let bind_address = config.bind_address();
        let addr: SocketAddr = bind_address.parse().map_err(|e| InputError::Bind {
            addr: bind_address.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("{e}")),
        })?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(|e| InputError::Bind {
            addr: bind_address.clone(),
            source: e,
        })?;

        socket.set_reuseaddr(true).map_err(|e| InputError::Bind {
            addr: bind_address.clone(),
            source: e,
        })?;
        socket.bind(addr).map_err(|e| InputError::Bind {
            addr: bind_address.clone(),
            source: e,
        })?;
        debug!(addr = %bind_address, "socket bound");

        // Registration with the runtime's reactor happens here; without
        // it the collector can never be driven, so failure is fatal too.
        let listener = socket
            .listen(config.backlog)
            .map_err(InputError::Registration)?;

        info!(
            addr = %bind_address,
            backlog = config.backlog,
            "forward input listening"
        );

        let buffer = Arc::new(ChunkBuffer::new(config.max_buffer_bytes));

        Ok(Self {
            config,
            listener: Some(listener),
            buffer,
            stats: Arc::new(ConnectionStats::new()),
            state: ServiceState::Running,
        })
    }

    /// Accepts one pending connection and spawns its handler.
    ///
    /// An accept failure is logged and returned as a recoverable error;
    /// the listener stays registered and the next call can succeed.
    pub async fn collect(&self) -> Result<SocketAddr, InputError> {
        let listener = self.running_listener()?;

        match listener.accept().await {
            Ok((stream, addr)) => {
                let sequence = self.buffer.next_sequence()?;
                trace!(client = %addr, conn = sequence, "new tcp connection arrived");

                tokio::spawn(handle_connection(
                    stream,
                    addr,
                    sequence,
                    Arc::clone(&self.buffer),
                    Arc::clone(&self.stats),
                    self.config.max_frame_bytes,
                ));

                Ok(addr)
            }
            Err(e) => {
                error!(error = %e, "could not accept new connection");
                Err(InputError::Accept(e))
            }
        }
    }

    /// Runs the accept loop until a fatal error occurs.
    ///
    /// Recoverable accept failures are already logged by [`collect`];
    /// the loop simply moves on to the next readiness event.
    ///
    /// [`collect`]: ForwardInput::collect
    pub async fn run(&self) -> Result<(), InputError> {
        loop {
            if let Err(e) = self.collect().await {
                Self::absorb_collect_error(e)?;
            }
        }
    }

    /// The accept loop's continue-or-stop decision: a failed accept is
    /// abandoned and the listener stays registered for the next readiness
    /// event, no matter how many failures come back to back. Only fatal
    /// errors stop the loop.
    fn absorb_collect_error(e: InputError) -> Result<(), InputError> {
        if e.is_fatal() {
            return Err(e);
        }
        Ok(())
    }

    /// Detaches the accumulated buffer for downstream delivery.
    ///
    /// Returns `None` when nothing has been buffered since the last
    /// flush. On success the live buffer is empty and the sequence
    /// counter is 0; on failure the buffer is untouched and the caller
    /// may retry.
    pub fn flush(&self) -> Result<Option<FlushChunk>, InputError> {
        if self.state != ServiceState::Running {
            return Err(InputError::State { state: self.state });
        }

        let chunk = self.buffer.detach_and_reset()?;
        if let Some(chunk) = &chunk {
            debug!(bytes = chunk.len, "buffer detached for delivery");
        }
        Ok(chunk)
    }

    /// Shuts the input down.
    ///
    /// Stops accepting before releasing the buffer, closes the listening
    /// socket exactly once, and transitions to the terminal `Stopped`
    /// state. Closing the buffer also fails every later append, so
    /// handler tasks still draining their sockets terminate instead of
    /// accumulating into a stopped service. Best effort: a degraded
    /// buffer release is reported, but the socket is closed regardless.
    pub fn exit(&mut self) -> Result<(), InputError> {
        if self.state == ServiceState::Stopped {
            return Err(InputError::State { state: self.state });
        }

        // Order matters: no new connection may appear once teardown of
        // shared state begins.
        if let Some(listener) = self.listener.take() {
            drop(listener);
            debug!("listening socket closed");
        }
        self.state = ServiceState::Stopped;

        match self.buffer.close() {
            Ok(dropped) => {
                if dropped > 0 {
                    warn!(bytes = dropped, "discarding undelivered buffered bytes");
                }
                info!("forward input stopped");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "buffer release degraded during shutdown");
                Err(InputError::Shutdown(e.to_string()))
            }
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServiceState {
        self.state
    }

    /// The address the listener is actually bound to (useful when the
    /// configured port is 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// The shared connection statistics.
    pub fn stats(&self) -> &Arc<ConnectionStats> {
        &self.stats
    }

    /// Number of bytes currently buffered and awaiting flush.
    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }

    fn running_listener(&self) -> Result<&TcpListener, InputError> {
        if self.state != ServiceState::Running {
            return Err(InputError::State { state: self.state });
        }
        self.listener
            .as_ref()
            .ok_or(InputError::State { state: self.state })
    }
}

impl Input for ForwardInput {
    async fn init(config: ForwardConfig) -> Result<Self, InputError> {
        ForwardInput::init(config).await
    }

    async fn collect(&self) -> Result<SocketAddr, InputError> {
        ForwardInput::collect(self).await
    }

    fn flush(&self) -> Result<Option<FlushChunk>, InputError> {
        ForwardInput::flush(self)
    }

    fn exit(&mut self) -> Result<(), InputError> {
        ForwardInput::exit(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Entry, Frame};
    use rmpv::Value;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;
    use tokio::time::{sleep, Duration};

    fn test_config(port: u16) -> ForwardConfig {
        let mut config = ForwardConfig::new(port);
        config.listen_address = "127.0.0.1".to_string();
        config
    }

    fn sample_wire() -> bytes::Bytes {
        Frame::new(
            "app.log",
            vec![Entry::new(
                1000,
                Value::Map(vec![(Value::from("msg"), Value::from("hello"))]),
            )],
        )
        .encode()
        .unwrap()
    }

    #[tokio::test]
    async fn test_init_reaches_running() {
        let input = ForwardInput::init(test_config(0)).await.unwrap();

        assert_eq!(input.state(), ServiceState::Running);
        assert!(input.local_addr().is_some());
        assert_eq!(input.buffered_bytes(), 0);
    }

    #[tokio::test]
    async fn test_bind_failure_is_fatal() {
        let first = ForwardInput::init(test_config(0)).await.unwrap();
        let taken_port = first.local_addr().unwrap().port();

        let err = ForwardInput::init(test_config(taken_port))
            .await
            .unwrap_err();
        assert!(matches!(err, InputError::Bind { .. }));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_empty_flush_returns_none() {
        let input = ForwardInput::init(test_config(0)).await.unwrap();

        assert!(input.flush().unwrap().is_none());
        assert!(input.flush().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_exit_closes_listener_and_stops() {
        let mut input = ForwardInput::init(test_config(0)).await.unwrap();
        let addr = input.local_addr().unwrap();

        input.exit().unwrap();
        assert_eq!(input.state(), ServiceState::Stopped);
        assert!(input.local_addr().is_none());

        // Stopped is terminal: neither flush nor collect is permitted
        assert!(matches!(
            input.flush().unwrap_err(),
            InputError::State { .. }
        ));
        assert!(matches!(
            input.collect().await.unwrap_err(),
            InputError::State { .. }
        ));

        // Double exit is rejected, not undefined
        assert!(matches!(
            input.exit().unwrap_err(),
            InputError::State { .. }
        ));

        // The port is actually released
        sleep(Duration::from_millis(50)).await;
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_collect_and_flush_end_to_end() {
        let input = Arc::new(ForwardInput::init(test_config(0)).await.unwrap());
        let addr = input.local_addr().unwrap();

        let server = Arc::clone(&input);
        tokio::spawn(async move {
            let _ = server.run().await;
        });

        let wire = sample_wire();
        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(&wire).await.unwrap();
        client.shutdown().await.unwrap();

        sleep(Duration::from_millis(100)).await;

        let chunk = input.flush().unwrap().unwrap();
        assert_eq!(chunk.bytes, wire);

        // Post-flush: buffer empty, next flush is the empty sentinel
        assert_eq!(input.buffered_bytes(), 0);
        assert!(input.flush().unwrap().is_none());
        assert_eq!(input.stats().frames_buffered.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_sequence_counter_resets_after_flush() {
        let input = Arc::new(ForwardInput::init(test_config(0)).await.unwrap());
        let addr = input.local_addr().unwrap();

        let server = Arc::clone(&input);
        tokio::spawn(async move {
            let _ = server.run().await;
        });

        for _ in 0..3 {
            let wire = sample_wire();
            let mut client = TcpStream::connect(addr).await.unwrap();
            client.write_all(&wire).await.unwrap();
            client.shutdown().await.unwrap();
        }
        sleep(Duration::from_millis(150)).await;

        assert_eq!(input.buffer.sequence(), 3);
        input.flush().unwrap().unwrap();
        assert_eq!(input.buffer.sequence(), 0);
    }

    #[tokio::test]
    async fn test_exit_stops_in_flight_handlers_from_appending() {
        let mut input = ForwardInput::init(test_config(0)).await.unwrap();
        let addr = input.local_addr().unwrap();

        // A client is connected and its handler task is running when the
        // service shuts down
        let mut client = TcpStream::connect(addr).await.unwrap();
        input.collect().await.unwrap();
        sleep(Duration::from_millis(50)).await;

        input.exit().unwrap();

        // The handler still holds its own buffer reference, but a frame
        // arriving after exit must not land anywhere
        let _ = client.write_all(&sample_wire()).await;
        let _ = client.flush().await;
        sleep(Duration::from_millis(100)).await;

        assert_eq!(input.buffered_bytes(), 0);
        assert_eq!(input.state(), ServiceState::Stopped);
    }

    #[tokio::test]
    async fn test_consecutive_accept_failures_keep_loop_serving() {
        // The continue-or-stop decision of the accept loop: any number of
        // back-to-back accept failures is absorbed
        for _ in 0..5 {
            let err = InputError::Accept(std::io::Error::new(
                std::io::ErrorKind::ConnectionAborted,
                "aborted in the accept queue",
            ));
            assert!(!err.is_fatal());
            assert!(ForwardInput::absorb_collect_error(err).is_ok());
        }

        // Fatal startup-class errors do stop it
        let err = InputError::Registration(std::io::Error::new(
            std::io::ErrorKind::Other,
            "reactor unavailable",
        ));
        assert!(err.is_fatal());
        assert!(ForwardInput::absorb_collect_error(err).is_err());
    }

    #[tokio::test]
    async fn test_run_keeps_serving_after_disruptive_clients() {
        let input = Arc::new(ForwardInput::init(test_config(0)).await.unwrap());
        let addr = input.local_addr().unwrap();

        let server = Arc::clone(&input);
        tokio::spawn(async move {
            let _ = server.run().await;
        });

        // Disruptive clients: one sends a malformed frame, one drops
        // mid-frame; both connections die, the loop does not
        let mut bad = TcpStream::connect(addr).await.unwrap();
        bad.write_all(&[0x01]).await.unwrap();
        drop(bad);

        let wire = sample_wire();
        let mut truncated = TcpStream::connect(addr).await.unwrap();
        truncated.write_all(&wire[..wire.len() / 2]).await.unwrap();
        drop(truncated);

        sleep(Duration::from_millis(100)).await;

        // A well-behaved client is still accepted and buffered
        let mut good = TcpStream::connect(addr).await.unwrap();
        good.write_all(&wire).await.unwrap();
        good.shutdown().await.unwrap();
        sleep(Duration::from_millis(100)).await;

        let chunk = input.flush().unwrap().unwrap();
        assert_eq!(chunk.bytes, wire);
    }

    #[tokio::test]
    async fn test_drive_through_input_trait() {
        async fn drive<I: Input>(config: ForwardConfig) -> Result<Option<FlushChunk>, InputError> {
            let mut input = I::init(config).await?;
            let flushed = input.flush()?;
            input.exit()?;
            Ok(flushed)
        }

        let flushed = drive::<ForwardInput>(test_config(0)).await.unwrap();
        assert!(flushed.is_none());
    }
}
