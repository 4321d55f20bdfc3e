//! Error types for projected choreographies and their transports.

use std::time::Duration;
use thiserror::Error;

use crate::location::Location;

/// Errors that abort one participant's run of a choreography.
#[derive(Debug, Error)]
pub enum ChoreographyError {
    /// A located value was read on a projection where it is only a placeholder.
    #[error("value located at {location} is absent on this projection")]
    Absent { location: Location },

    /// The payload tag does not name the type the choreography asked for.
    #[error("type mismatch: expected {expected}, received {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    /// A `locally` computation failed.
    #[error("local computation failed: {0}")]
    Local(#[from] anyhow::Error),

    /// The worker task panicked or was cancelled before returning.
    #[error("worker for {location} failed: {reason}")]
    WorkerFailed { location: Location, reason: String },
}

impl ChoreographyError {
    /// Shorthand for failing a `locally` computation with a message.
    pub fn local(message: impl std::fmt::Display) -> Self {
        Self::Local(anyhow::anyhow!("{message}"))
    }
}

/// Result type for choreography operations
pub type Result<T> = std::result::Result<T, ChoreographyError>;

/// Errors reported by a transport backend.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("unknown location: {0}")]
    UnknownLocation(String),

    /// The queue or subscription was shut down.
    #[error("transport closed")]
    Closed,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The rendezvous server answered with a non-success status.
    #[error("rendezvous rejected message ({status}): {reason}")]
    Rejected { status: u16, reason: String },

    #[error("broker error: {0}")]
    Broker(String),

    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Errors raised while building a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("prefix cannot be empty")]
    EmptyPrefix,

    #[error("prefix contains invalid characters (must be ASCII alphanumeric or underscore)")]
    InvalidPrefixChars,

    #[error("queue capacity must be at least 1")]
    ZeroCapacity,

    #[error("invalid value for {var}: {details}")]
    InvalidValue { var: String, details: String },
}
