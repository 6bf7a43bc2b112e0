//! Error types shared across the crate
//!
//! One taxonomy for the whole library: configuration and reference
//! errors are fatal at bind/resolve time, connection errors are fatal
//! at connect time, timeouts are normal dequeue control flow.

use std::fmt;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by connectors, adapters, queues and storages
#[derive(Debug)]
pub enum Error {
    /// Invalid configuration (malformed delegation string, unknown
    /// adapter name, unsupported parameter combination)
    Config(String),

    /// Dangling or cyclic symbolic connection reference
    Reference(String),

    /// Network or authentication failure while establishing a
    /// connection; never retried by the core
    Connection(anyhow::Error),

    /// A store command failed server-side
    Command(redis::RedisError),

    /// Payload encoding/decoding failure, propagated unchanged
    Codec(serde_json::Error),

    /// A blocking dequeue exceeded its deadline with no element
    Timeout,
}

impl Error {
    /// Check whether this is the (recoverable) timeout signal
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "configuration error: {}", msg),
            Error::Reference(msg) => write!(f, "reference error: {}", msg),
            Error::Connection(e) => write!(f, "connection error: {}", e),
            Error::Command(e) => write!(f, "command error: {}", e),
            Error::Codec(e) => write!(f, "codec error: {}", e),
            Error::Timeout => write!(f, "timed out waiting for an element"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => Some(e.as_ref()),
            Error::Command(e) => Some(e),
            Error::Codec(e) => Some(e),
            _ => None,
        }
    }
}

impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Error::Command(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Codec(e)
    }
}
