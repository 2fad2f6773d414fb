//! Incremental Forward Frame Parser
//!
//! TCP is a stream protocol: a single read may contain half a message, or
//! several messages back to back. The parser therefore works incrementally
//! against whatever bytes have been buffered so far and returns either:
//!
//! - `Ok(Some((frame, consumed)))` - a complete message was decoded,
//!   `consumed` bytes of the buffer were used
//! - `Ok(None)` - the buffered bytes end mid-message, read more and retry
//! - `Err(DecodeError)` - the bytes are not a valid Forward message
//!
//! The caller appends incoming network data to a buffer, calls
//! [`FrameParser::parse`], advances the buffer by `consumed` on success and
//! keeps the remainder untouched otherwise. Nothing is ever re-processed:
//! a partial message stays in the buffer until the rest of it arrives.

use std::io::Cursor;

use rmpv::Value;
use thiserror::Error;

use crate::protocol::types::Frame;

/// Errors that can occur while decoding a Forward message.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DecodeError {
    /// The bytes are not a structurally valid Forward message
    #[error("malformed forward message: {0}")]
    Malformed(String),

    /// The tag is not valid UTF-8
    #[error("invalid UTF-8 in tag")]
    InvalidUtf8,

    /// The timestamp does not fit a 64-bit signed integer
    #[error("timestamp out of range")]
    TimestampOutOfRange,
}

/// Result type for decoding operations.
pub type DecodeResult<T> = Result<T, DecodeError>;

/// An incremental Forward protocol parser.
///
/// # Example
///
/// ```ignore
/// use logforward::protocol::FrameParser;
/// use bytes::BytesMut;
///
/// let mut parser = FrameParser::new();
/// let mut buffer = BytesMut::from(&incoming_bytes[..]);
///
/// if let Some((frame, consumed)) = parser.parse(&buffer)? {
///     buffer.advance(consumed);
///     println!("tag: {}", frame.tag);
/// }
/// ```
#[derive(Debug, Default)]
pub struct FrameParser;

impl FrameParser {
    /// Creates a new parser instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to decode one Forward message from the buffer.
    ///
    /// # Returns
    ///
    /// - `Ok(Some((frame, consumed)))` - successfully decoded a message
    /// - `Ok(None)` - incomplete data, need more bytes
    /// - `Err(e)` - decode error
    pub fn parse(&mut self, buf: &[u8]) -> DecodeResult<Option<(Frame, usize)>> {
        if buf.is_empty() {
            return Ok(None);
        }

        let mut cursor = Cursor::new(buf);
        match rmpv::decode::read_value(&mut cursor) {
            Ok(value) => {
                let consumed = cursor.position() as usize;
                let frame = Frame::from_value(value)?;
                Ok(Some((frame, consumed)))
            }
            Err(ref e) if is_incomplete(e) => Ok(None),
            Err(e) => Err(DecodeError::Malformed(e.to_string())),
        }
    }
}

/// True when the decoder simply ran out of bytes mid-value, which is the
/// normal "message still in flight" condition rather than a protocol error.
fn is_incomplete(err: &rmpv::decode::Error) -> bool {
    use rmpv::decode::Error;

    match err {
        Error::InvalidMarkerRead(io) | Error::InvalidDataRead(io) => {
            io.kind() == std::io::ErrorKind::UnexpectedEof
        }
        _ => false,
    }
}

/// Helper function to decode a single Forward message from bytes.
///
/// This is a convenience function for simple use cases.
pub fn decode_message(buf: &[u8]) -> DecodeResult<Option<(Frame, usize)>> {
    FrameParser::new().parse(buf)
}

/// Encodes a raw MessagePack value. Test and bench helper for producing
/// wire bytes without going through [`Frame`].
#[doc(hidden)]
pub fn encode_value(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    // Writing into a Vec cannot fail.
    let _ = rmpv::encode::write_value(&mut buf, value);
    buf
}
