//! Forward Protocol Implementation
//!
//! This module implements the subset of the Fluentd Forward protocol this
//! service ingests: MessagePack-encoded `[tag, entries]` messages, where
//! `entries` is an array of `[timestamp, record]` pairs (bulk mode) or a
//! single `[timestamp, record]` pair (compact mode).
//!
//! ## Modules
//!
//! - `types`: the decoded [`Frame`]/[`Entry`] model and canonical encoding
//! - `parser`: incremental parser for data arriving fragmented over TCP
//!
//! ## Example
//!
//! ```ignore
//! use logforward::protocol::{decode_message, Frame, Entry};
//!
//! // Decoding incoming data
//! let (frame, consumed) = decode_message(&data)?.unwrap();
//!
//! // Canonical re-encoding (always bulk mode)
//! let bytes = frame.encode()?;
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{decode_message, DecodeError, DecodeResult, FrameParser};
pub use types::{EncodeError, Entry, Frame};
