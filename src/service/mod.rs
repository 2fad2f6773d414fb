//! Service Module
//!
//! The lifecycle layer of the ingestion front-end: binding the listening
//! socket, accepting connections (the collector), detaching the buffer
//! for delivery (flush) and tearing everything down (exit).
//!
//! ## Data flow
//!
//! ```text
//! listener readiness ──> collect() ──> accept ──> ConnectionHandler task
//!                                                     │ decode + append
//!                                                     ▼
//!                                               ChunkBuffer
//!                                                     │ flush() cadence
//!                                                     ▼
//!                                              downstream delivery
//! ```
//!
//! The [`Input`] trait is the surface a host runtime drives; the binary
//! in this crate is one such host, and tests act as another.

pub mod input;

// Re-export commonly used types
pub use input::{ForwardInput, Input, InputError, ServiceState};
