//! Forward Protocol Frame Types
//!
//! This module defines the decoded representation of a Forward protocol
//! message and its canonical re-encoding.
//!
//! A Forward message on the wire is a MessagePack array of two elements:
//!
//! ```text
//! [tag, entries]
//!
//! entries (bulk mode):    [[timestamp, record], [timestamp, record], ...]
//! entries (compact mode): [timestamp, record]
//! ```
//!
//! `tag` is a UTF-8 string, `timestamp` is an integer and `record` is a map
//! of arbitrary MessagePack values. Both entry shapes decode into the same
//! [`Frame`], and [`Frame::encode`] always emits the bulk shape, so the
//! accumulated buffer downstream consumers see has a single, predictable
//! layout regardless of what clients sent.

use bytes::Bytes;
use rmpv::Value;
use thiserror::Error;

use crate::protocol::parser::DecodeError;

/// Errors that can occur while re-encoding a frame.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The MessagePack writer failed
    #[error("could not serialize frame: {0}")]
    Write(#[from] rmpv::encode::Error),
}

/// One `(timestamp, record)` pair carried by a Forward message.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    /// Event timestamp (seconds since the epoch, as sent by the client)
    pub timestamp: i64,

    /// The event record. Always a [`Value::Map`]; this is enforced during
    /// decoding and expected from callers constructing entries by hand.
    pub record: Value,
}

impl Entry {
    /// Creates a new entry. `record` must be a [`Value::Map`].
    pub fn new(timestamp: i64, record: Value) -> Self {
        Self { timestamp, record }
    }

    /// Decodes an entry from a `[timestamp, record]` value.
    pub(crate) fn from_value(value: Value) -> Result<Self, DecodeError> {
        match value {
            Value::Array(items) => Self::from_pair(items),
            other => Err(DecodeError::Malformed(format!(
                "entry must be a [timestamp, record] array, got {}",
                value_kind(&other)
            ))),
        }
    }

    /// Decodes an entry from the already-unwrapped pair elements.
    pub(crate) fn from_pair(items: Vec<Value>) -> Result<Self, DecodeError> {
        let [timestamp_value, record_value]: [Value; 2] = match items.try_into() {
            Ok(pair) => pair,
            Err(items) => {
                return Err(DecodeError::Malformed(format!(
                    "entry has {} elements, expected 2",
                    items.len()
                )))
            }
        };

        let timestamp = match &timestamp_value {
            Value::Integer(n) => n.as_i64().ok_or(DecodeError::TimestampOutOfRange)?,
            other => {
                return Err(DecodeError::Malformed(format!(
                    "timestamp must be an integer, got {}",
                    value_kind(other)
                )))
            }
        };

        if !matches!(record_value, Value::Map(_)) {
            return Err(DecodeError::Malformed(format!(
                "record must be a map, got {}",
                value_kind(&record_value)
            )));
        }

        Ok(Self {
            timestamp,
            record: record_value,
        })
    }

    /// Converts the entry back into a `[timestamp, record]` value.
    fn to_value(&self) -> Value {
        Value::Array(vec![Value::from(self.timestamp), self.record.clone()])
    }
}

/// A fully decoded Forward protocol message.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Routing tag, e.g. `"app.log"`
    pub tag: String,

    /// The entries carried by this message (always at least one)
    pub entries: Vec<Entry>,
}

impl Frame {
    /// Creates a new frame.
    pub fn new(tag: impl Into<String>, entries: Vec<Entry>) -> Self {
        Self {
            tag: tag.into(),
            entries,
        }
    }

    /// Validates a decoded MessagePack value as a Forward message.
    ///
    /// Accepts both bulk mode (`[tag, [[ts, record], ...]]`) and compact
    /// mode (`[tag, [ts, record]]`). Anything else is a [`DecodeError`].
    pub fn from_value(value: Value) -> Result<Self, DecodeError> {
        let items = match value {
            Value::Array(items) => items,
            other => {
                return Err(DecodeError::Malformed(format!(
                    "message must be an array, got {}",
                    value_kind(&other)
                )))
            }
        };

        let [tag_value, entries_value]: [Value; 2] = match items.try_into() {
            Ok(pair) => pair,
            Err(items) => {
                return Err(DecodeError::Malformed(format!(
                    "message has {} elements, expected 2",
                    items.len()
                )))
            }
        };

        let tag = match tag_value {
            Value::String(s) => s.into_str().ok_or(DecodeError::InvalidUtf8)?,
            other => {
                return Err(DecodeError::Malformed(format!(
                    "tag must be a string, got {}",
                    value_kind(&other)
                )))
            }
        };

        let entry_items = match entries_value {
            Value::Array(items) => items,
            other => {
                return Err(DecodeError::Malformed(format!(
                    "entries must be an array, got {}",
                    value_kind(&other)
                )))
            }
        };

        if entry_items.is_empty() {
            return Err(DecodeError::Malformed(
                "message carries no entries".to_string(),
            ));
        }

        // Compact mode puts the timestamp directly in the first slot;
        // bulk mode nests [timestamp, record] pairs there.
        let entries = if matches!(entry_items.first(), Some(Value::Integer(_))) {
            vec![Entry::from_pair(entry_items)?]
        } else {
            entry_items
                .into_iter()
                .map(Entry::from_value)
                .collect::<Result<Vec<_>, _>>()?
        };

        Ok(Self { tag, entries })
    }

    /// Converts the frame into its canonical bulk-mode value.
    pub fn to_value(&self) -> Value {
        Value::Array(vec![
            Value::from(self.tag.clone()),
            Value::Array(self.entries.iter().map(Entry::to_value).collect()),
        ])
    }

    /// Serializes the frame into its canonical MessagePack encoding.
    ///
    /// Compact-mode input is normalized into bulk mode here, so encoding
    /// is deterministic: decoding a frame and re-encoding it always yields
    /// the same bytes for the same logical content.
    pub fn encode(&self) -> Result<Bytes, EncodeError> {
        let mut buf = Vec::with_capacity(64);
        rmpv::encode::write_value(&mut buf, &self.to_value())?;
        Ok(Bytes::from(buf))
    }

    /// Total number of entries in this frame.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

/// Human-readable name of a value's MessagePack kind, for error messages.
fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Nil => "nil",
        Value::Boolean(_) => "bool",
        Value::Integer(_) => "integer",
        Value::F32(_) | Value::F64(_) => "float",
        Value::String(_) => "string",
        Value::Binary(_) => "binary",
        Value::Array(_) => "array",
        Value::Map(_) => "map",
        Value::Ext(..) => "ext",
    }
}
