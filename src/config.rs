//! Configuration for the Forward ingestion service.
//!
//! All settings can come from environment variables (the binary also
//! layers command-line flags on top):
//!
//! - `LOGFORWARD_LISTEN_ADDRESS`: bind address (default: 0.0.0.0)
//! - `LOGFORWARD_LISTEN_PORT`: TCP port, **required**
//! - `LOGFORWARD_BACKLOG`: listen backlog (default: 128)
//! - `LOGFORWARD_MAX_FRAME_BYTES`: per-connection frame size cap
//! - `LOGFORWARD_MAX_BUFFER_BYTES`: shared buffer cap between flushes
//! - `LOGFORWARD_FLUSH_INTERVAL_SECS`: seconds between delivery flushes
//!
//! A missing or unparsable port is a fatal startup error; the service
//! never comes up half-configured.

use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::buffer::DEFAULT_MAX_BUFFER_BYTES;

/// Default bind address
pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0";

/// Default listen backlog
pub const DEFAULT_BACKLOG: u32 = 128;

/// Default cap on a single in-flight frame (1 MB)
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Default flush interval in seconds
pub const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 5;

/// Minimum flush interval to avoid spinning the delivery path
const MIN_FLUSH_INTERVAL_SECS: u64 = 1;

/// Maximum flush interval to keep data reasonably fresh
const MAX_FLUSH_INTERVAL_SECS: u64 = 300;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    /// A required setting was not provided
    #[error("missing required setting {var}")]
    Missing { var: &'static str },

    /// A setting could not be parsed
    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },

    /// A setting was outside its allowed range
    #[error("{var} out of range: {value} (allowed: {min}..={max})")]
    OutOfRange {
        var: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },
}

/// Configuration for one Forward ingestion instance.
///
/// Immutable once handed to [`crate::service::ForwardInput::init`].
#[derive(Debug, Clone)]
pub struct ForwardConfig {
    /// Address to bind the listening socket to
    pub listen_address: String,

    /// TCP port to listen on
    pub listen_port: u16,

    /// Listen backlog for pending connections
    pub backlog: u32,

    /// Cap on a single connection's partial-frame buffer
    pub max_frame_bytes: usize,

    /// Cap on the shared buffer between flushes
    pub max_buffer_bytes: usize,

    /// How often the binary's delivery task flushes the buffer
    pub flush_interval: Duration,
}

impl ForwardConfig {
    /// Creates a configuration for `listen_port` with defaults everywhere
    /// else.
    pub fn new(listen_port: u16) -> Self {
        Self {
            listen_address: DEFAULT_LISTEN_ADDRESS.to_string(),
            listen_port,
            backlog: DEFAULT_BACKLOG,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            max_buffer_bytes: DEFAULT_MAX_BUFFER_BYTES,
            flush_interval: Duration::from_secs(DEFAULT_FLUSH_INTERVAL_SECS),
        }
    }

    /// Loads configuration from `LOGFORWARD_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if `LOGFORWARD_LISTEN_PORT` is absent or any
    /// provided setting fails to parse or lies outside its bounds.
    pub fn from_env() -> Result<Self, ConfigError> {
        let listen_port = match env::var("LOGFORWARD_LISTEN_PORT") {
            Ok(raw) => raw.parse::<u16>().map_err(|_| ConfigError::Invalid {
                var: "LOGFORWARD_LISTEN_PORT",
                value: raw,
            })?,
            Err(_) => {
                return Err(ConfigError::Missing {
                    var: "LOGFORWARD_LISTEN_PORT",
                })
            }
        };

        let mut config = Self::new(listen_port);

        if let Ok(addr) = env::var("LOGFORWARD_LISTEN_ADDRESS") {
            config.listen_address = addr;
        }

        if let Some(backlog) = parse_env("LOGFORWARD_BACKLOG")? {
            config.backlog = backlog;
        }

        if let Some(max_frame) = parse_env("LOGFORWARD_MAX_FRAME_BYTES")? {
            config.max_frame_bytes = max_frame;
        }

        if let Some(max_buffer) = parse_env("LOGFORWARD_MAX_BUFFER_BYTES")? {
            config.max_buffer_bytes = max_buffer;
        }

        if let Some(secs) = parse_env::<u64>("LOGFORWARD_FLUSH_INTERVAL_SECS")? {
            config.set_flush_interval_secs(secs)?;
        }

        Ok(config)
    }

    /// Sets the flush interval, enforcing the allowed bounds.
    pub fn set_flush_interval_secs(&mut self, secs: u64) -> Result<(), ConfigError> {
        if !(MIN_FLUSH_INTERVAL_SECS..=MAX_FLUSH_INTERVAL_SECS).contains(&secs) {
            return Err(ConfigError::OutOfRange {
                var: "flush interval",
                value: secs,
                min: MIN_FLUSH_INTERVAL_SECS,
                max: MAX_FLUSH_INTERVAL_SECS,
            });
        }
        self.flush_interval = Duration::from_secs(secs);
        Ok(())
    }

    /// Returns the bind address as `address:port`.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.listen_address, self.listen_port)
    }
}

/// Reads and parses an optional environment variable.
fn parse_env<T: std::str::FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(var) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value: raw }),
        Err(_) => Ok(None),
    }
}
