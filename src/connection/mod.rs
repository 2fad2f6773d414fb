//! Connection Handler Module
//!
//! This module manages individual Forward client connections. Each
//! accepted connection is handled by its own async task, so a slow or
//! idle client never holds up the accept path or any other connection.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     TCP Listener                            │
//! │                 (service::ForwardInput)                     │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │
//!                        │ accept()
//!                        ▼
//!           ┌────────────────────────┐
//!           │   For each client...   │
//!           └────────────┬───────────┘
//!                        │
//!                        │ spawn task
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ConnectionHandler                           │
//! │                                                             │
//! │  ┌─────────────┐    ┌──────────────┐    ┌───────────────┐   │
//! │  │ Read bytes  │───>│ Decode frame │───>│ Append to the │   │
//! │  └─────────────┘    └──────────────┘    │ shared buffer │   │
//! │                                         └───────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Async I/O**: non-blocking reads driven by Tokio readiness
//! - **Partial frames**: retained across reads, never lost or re-parsed
//! - **Isolation**: a malformed frame closes one connection, nothing else
//! - **Statistics**: per-service counters for connections and frames

pub mod handler;

// Re-export commonly used types
pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};
