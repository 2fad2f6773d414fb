//! # logforward - A Fluentd Forward Protocol Ingestion Front-End
//!
//! logforward is the network ingestion stage of a log-shipping pipeline:
//! it listens for TCP clients speaking the Fluentd Forward protocol,
//! accumulates decoded records into an in-memory buffer, and periodically
//! hands that buffer to a downstream delivery stage.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                            logforward                               │
//! │                                                                     │
//! │  ┌─────────────┐    ┌──────────────┐    ┌──────────────┐            │
//! │  │ TCP Server  │───>│ Connection   │───>│ Frame        │            │
//! │  │ (collector) │    │ Handler (xN) │    │ Parser       │            │
//! │  └─────────────┘    └──────────────┘    └──────┬───────┘            │
//! │                                                │ canonical bytes    │
//! │                                                ▼                    │
//! │                                     ┌────────────────────┐          │
//! │                                     │    ChunkBuffer     │          │
//! │                                     │  (append / detach) │          │
//! │                                     └─────────┬──────────┘          │
//! │                                               │ flush()             │
//! │                                               ▼                    │
//! │                                      downstream delivery            │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use logforward::{ForwardConfig, ForwardInput};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let input = Arc::new(ForwardInput::init(ForwardConfig::new(24224)).await?);
//!
//!     // Accept loop; each connection gets its own task
//!     let server = Arc::clone(&input);
//!     tokio::spawn(async move { server.run().await });
//!
//!     // On the delivery scheduler's cadence:
//!     // if let Some(chunk) = input.flush()? { ship(chunk.bytes); }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: Forward frame model and incremental MessagePack parser
//! - [`buffer`]: the shared append-only accumulator with detach-and-reset
//! - [`connection`]: per-client connection handling
//! - [`service`]: lifecycle (`init`/`collect`/`flush`/`exit`) and the
//!   [`Input`] trait
//! - [`config`]: environment-based configuration
//!
//! ## Design Highlights
//!
//! ### Accept is decoupled from read
//!
//! The collector only accepts; decoding happens in per-connection tasks.
//! A slow or idle client occupies a connection slot but never blocks the
//! accept path or other clients.
//!
//! ### Flush is an ownership transfer
//!
//! Flushing swaps a fresh buffer in and hands the accumulated bytes out,
//! so there is no copy and no window where the buffer is partially
//! cleared. Appends and detaches are serialized by a single mutex whose
//! critical sections touch memory only.
//!
//! ### Failure isolation
//!
//! A malformed frame closes that one connection. An accept failure is
//! logged and retried. Only startup failures (bind, listener
//! registration, missing configuration) are fatal.

pub mod buffer;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod service;

// Re-export commonly used types for convenience
pub use buffer::{BufferError, ChunkBuffer, FlushChunk};
pub use config::{ConfigError, ForwardConfig};
pub use connection::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};
pub use protocol::{decode_message, DecodeError, EncodeError, Entry, Frame, FrameParser};
pub use service::{ForwardInput, Input, InputError, ServiceState};

/// The default port Forward clients connect to (same as Fluentd)
pub const DEFAULT_PORT: u16 = 24224;

/// The default host logforward binds to
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Version of logforward
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
