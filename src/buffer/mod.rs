//! Buffer Module
//!
//! The in-memory accumulation stage between ingestion and delivery.
//! Connection handlers append canonical frame bytes here; on its own
//! cadence, the delivery path detaches everything accumulated so far and
//! ships it downstream.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  append   ┌──────────────────────┐  detach_and_reset
//! │ Connection   │──────────>│      ChunkBuffer     │─────────────────────>
//! │ Handlers (N) │           │  Mutex<bytes + seq>  │     FlushChunk
//! └──────────────┘           └──────────────────────┘   (to downstream)
//! ```
//!
//! ## Concurrency
//!
//! Flush may be driven from a different runtime thread than the
//! connection tasks, so both operations go through one mutex. The
//! critical sections are memory-only; no I/O and no awaiting happens
//! while the lock is held. Detaching is an ownership transfer (buffer
//! swap), not a copy.

pub mod chunk;

// Re-export commonly used types
pub use chunk::{BufferError, ChunkBuffer, FlushChunk, DEFAULT_MAX_BUFFER_BYTES};
