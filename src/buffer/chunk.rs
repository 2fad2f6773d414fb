//! Chunk Buffer
//!
//! The shared accumulator that connection handlers append canonical frame
//! bytes into and the delivery path drains. It exposes a deliberately
//! narrow surface: `append`, `next_sequence`, `detach_and_reset` and size
//! accessors. All mutation happens under a single mutex, so an append and
//! a detach can never interleave partially, even when the flush caller
//! runs on a different runtime thread than the connection tasks.
//!
//! Invariants:
//!
//! - Between flushes the buffer only grows, in append order.
//! - `detach_and_reset` hands the accumulated bytes out by ownership
//!   transfer (a swap, not a copy) and resets the sequence counter to 0 in
//!   the same critical section. On failure the contents are untouched.
//! - A rejected append (`Exhausted`) leaves the buffer byte-for-byte
//!   unchanged; a later flush returns exactly what was there before.
//! - After `close()` every append and sequence request fails, so handler
//!   tasks still draining their sockets at shutdown cannot resurrect a
//!   released buffer.

use std::sync::Mutex;

use bytes::{Bytes, BytesMut};
use thiserror::Error;

/// Default cap on accumulated bytes between flushes (32 MB).
pub const DEFAULT_MAX_BUFFER_BYTES: usize = 32 * 1024 * 1024;

/// Errors that can occur on the buffer.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BufferError {
    /// The append would exceed the configured cap; nothing was written
    #[error("buffer exhausted: {requested} bytes requested, {buffered} of {max} in use")]
    Exhausted {
        requested: usize,
        buffered: usize,
        max: usize,
    },

    /// The lock was poisoned by a panicking writer; contents are left as
    /// they were, the caller may retry
    #[error("buffer lock poisoned")]
    Poisoned,

    /// The buffer was closed at shutdown; no further appends are accepted
    #[error("buffer closed")]
    Closed,
}

/// A detached chunk of buffered bytes, ready for downstream delivery.
///
/// Ownership of the bytes transfers to the caller; the live buffer has
/// already been reset by the time this value exists.
#[derive(Debug, Clone, PartialEq)]
pub struct FlushChunk {
    /// The accumulated canonical frame bytes, in append order
    pub bytes: Bytes,

    /// Length of `bytes`, kept explicit for the delivery interface
    pub len: usize,
}

#[derive(Debug)]
struct Inner {
    bytes: BytesMut,
    sequence: u64,
    closed: bool,
}

/// Append-only byte accumulator with a per-cycle sequence counter.
#[derive(Debug)]
pub struct ChunkBuffer {
    inner: Mutex<Inner>,
    max_bytes: usize,
}

impl ChunkBuffer {
    /// Creates an empty buffer capped at `max_bytes` accumulated bytes.
    pub fn new(max_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                bytes: BytesMut::new(),
                sequence: 0,
                closed: false,
            }),
            max_bytes,
        }
    }

    /// Appends `bytes` atomically to the accumulator.
    ///
    /// Either the whole slice is appended or, if the cap would be
    /// exceeded, nothing is and `Exhausted` is returned with the buffered
    /// contents preserved.
    pub fn append(&self, bytes: &[u8]) -> Result<(), BufferError> {
        let mut inner = self.inner.lock().map_err(|_| BufferError::Poisoned)?;

        if inner.closed {
            return Err(BufferError::Closed);
        }

        if inner.bytes.len() + bytes.len() > self.max_bytes {
            return Err(BufferError::Exhausted {
                requested: bytes.len(),
                buffered: inner.bytes.len(),
                max: self.max_bytes,
            });
        }

        inner.bytes.extend_from_slice(bytes);
        Ok(())
    }

    /// Hands out the next sequence number for tagging a connection.
    ///
    /// The counter restarts from 0 after every successful detach.
    pub fn next_sequence(&self) -> Result<u64, BufferError> {
        let mut inner = self.inner.lock().map_err(|_| BufferError::Poisoned)?;
        if inner.closed {
            return Err(BufferError::Closed);
        }
        let sequence = inner.sequence;
        inner.sequence += 1;
        Ok(sequence)
    }

    /// Current value of the sequence counter.
    pub fn sequence(&self) -> u64 {
        self.inner.lock().map(|g| g.sequence).unwrap_or(0)
    }

    /// Detaches the accumulated bytes and resets the buffer, as one
    /// indivisible step with respect to concurrent appends.
    ///
    /// Returns `None` when nothing has been appended since the last
    /// detach; this performs no allocation and has no side effect. On
    /// success the live buffer is empty and the sequence counter is 0.
    pub fn detach_and_reset(&self) -> Result<Option<FlushChunk>, BufferError> {
        let mut inner = self.inner.lock().map_err(|_| BufferError::Poisoned)?;

        if inner.bytes.is_empty() {
            return Ok(None);
        }

        // Ownership transfer: swap a fresh buffer in, freeze the old one.
        let detached = std::mem::take(&mut inner.bytes);
        inner.sequence = 0;

        let len = detached.len();
        Ok(Some(FlushChunk {
            bytes: detached.freeze(),
            len,
        }))
    }

    /// Closes the buffer: drops any accumulated bytes, resets the
    /// counter, and rejects every append and sequence request from then
    /// on.
    ///
    /// Used during shutdown to release buffer memory. Handler tasks that
    /// are still draining their sockets see `Closed` on their next append
    /// and terminate instead of accumulating into a stopped service.
    /// Returns the number of bytes that were discarded.
    pub fn close(&self) -> Result<usize, BufferError> {
        let mut inner = self.inner.lock().map_err(|_| BufferError::Poisoned)?;
        let dropped = inner.bytes.len();
        inner.bytes = BytesMut::new();
        inner.sequence = 0;
        inner.closed = true;
        Ok(dropped)
    }

    /// Number of bytes currently buffered.
    pub fn len(&self) -> usize {
        self.inner.lock().map(|g| g.bytes.len()).unwrap_or(0)
    }

    /// True when nothing has been appended since the last detach.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The configured cap on accumulated bytes.
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }
}

impl Default for ChunkBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BUFFER_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_empty_flush_returns_none() {
        let buffer = ChunkBuffer::default();

        assert!(buffer.detach_and_reset().unwrap().is_none());
        // Repeated flushes of an untouched buffer stay empty
        assert!(buffer.detach_and_reset().unwrap().is_none());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_append_flush_concatenation() {
        let buffer = ChunkBuffer::default();

        buffer.append(b"first").unwrap();
        buffer.append(b"").unwrap();
        buffer.append(b"second").unwrap();
        buffer.append(b"third").unwrap();

        let chunk = buffer.detach_and_reset().unwrap().unwrap();
        assert_eq!(&chunk.bytes[..], b"firstsecondthird");
        assert_eq!(chunk.len, 16);
    }

    #[test]
    fn test_post_flush_reset() {
        let buffer = ChunkBuffer::default();

        buffer.append(b"old data").unwrap();
        buffer.detach_and_reset().unwrap().unwrap();

        buffer.append(b"new").unwrap();
        assert_eq!(buffer.len(), 3);

        let chunk = buffer.detach_and_reset().unwrap().unwrap();
        assert_eq!(&chunk.bytes[..], b"new");
    }

    #[test]
    fn test_sequence_counter_resets_on_flush() {
        let buffer = ChunkBuffer::default();

        assert_eq!(buffer.next_sequence().unwrap(), 0);
        assert_eq!(buffer.next_sequence().unwrap(), 1);
        assert_eq!(buffer.next_sequence().unwrap(), 2);
        assert_eq!(buffer.sequence(), 3);

        buffer.append(b"x").unwrap();
        buffer.detach_and_reset().unwrap().unwrap();

        assert_eq!(buffer.sequence(), 0);
        assert_eq!(buffer.next_sequence().unwrap(), 0);
    }

    #[test]
    fn test_empty_flush_does_not_reset_sequence() {
        // An empty detach is a no-op, so the counter keeps its value
        let buffer = ChunkBuffer::default();

        buffer.next_sequence().unwrap();
        buffer.next_sequence().unwrap();
        assert!(buffer.detach_and_reset().unwrap().is_none());
        assert_eq!(buffer.sequence(), 2);
    }

    #[test]
    fn test_exhaustion_preserves_contents() {
        let buffer = ChunkBuffer::new(8);

        buffer.append(b"12345678").unwrap();

        let err = buffer.append(b"x").unwrap_err();
        assert!(matches!(err, BufferError::Exhausted { .. }));

        // The failed append changed nothing; a later flush returns
        // exactly the pre-failure bytes
        let chunk = buffer.detach_and_reset().unwrap().unwrap();
        assert_eq!(&chunk.bytes[..], b"12345678");

        // And the buffer accepts appends again after the flush
        buffer.append(b"x").unwrap();
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_oversized_single_append_rejected() {
        let buffer = ChunkBuffer::new(4);
        let err = buffer.append(b"too large").unwrap_err();
        assert!(matches!(
            err,
            BufferError::Exhausted {
                requested: 9,
                buffered: 0,
                max: 4
            }
        ));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_close_releases_contents() {
        let buffer = ChunkBuffer::default();

        buffer.append(b"pending").unwrap();
        buffer.next_sequence().unwrap();

        assert_eq!(buffer.close().unwrap(), 7);
        assert!(buffer.is_empty());
        assert_eq!(buffer.sequence(), 0);
    }

    #[test]
    fn test_closed_buffer_rejects_appends() {
        let buffer = ChunkBuffer::default();
        buffer.close().unwrap();

        // A late writer cannot resurrect a closed buffer
        assert!(matches!(
            buffer.append(b"late frame").unwrap_err(),
            BufferError::Closed
        ));
        assert!(matches!(
            buffer.next_sequence().unwrap_err(),
            BufferError::Closed
        ));
        assert!(buffer.is_empty());
        assert!(buffer.detach_and_reset().unwrap().is_none());
    }

    #[test]
    fn test_concurrent_appends_never_tear() {
        let buffer = Arc::new(ChunkBuffer::default());
        let mut handles = Vec::new();

        // Each thread appends a distinct repeated byte pattern; if appends
        // could interleave partially, some pattern would come out split.
        for i in 0..4u8 {
            let buffer = Arc::clone(&buffer);
            handles.push(std::thread::spawn(move || {
                let pattern = [b'a' + i; 64];
                for _ in 0..100 {
                    buffer.append(&pattern).unwrap();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let chunk = buffer.detach_and_reset().unwrap().unwrap();
        assert_eq!(chunk.len, 4 * 100 * 64);

        for block in chunk.bytes.chunks(64) {
            assert!(block.iter().all(|b| *b == block[0]));
        }
    }
}
