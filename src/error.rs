//! Error types for the neromon DHT and storage core.
//!
//! A centralized error type using thiserror, never a panic across the RPC
//! or bridge boundary: every fallible operation (RPC, store, index, bridge)
//! returns a `Result`, each variant maps to one of the bridge's structured
//! error codes, and `From` impls let internal code use `?` against
//! serde_json/bincode/rusqlite/io.

use thiserror::Error;

/// Primary error type for the neromon DHT/storage core.
///
/// Each variant's [`Error::code`] maps onto one of the bridge's error kinds:
/// `not_found`, `invalid`, `expired`, `busy`, `timeout`, `transport`, `storage`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Key absent after an exhaustive iterative lookup.
    #[error("not found: {0}")]
    NotFound(String),

    /// Record failed validation (hash mismatch, missing field, bad signature).
    #[error("invalid record: {0}")]
    Invalid(String),

    /// TTL has passed; record is logically absent.
    #[error("expired: {0}")]
    Expired(String),

    /// Worker pool or per-endpoint RPC concurrency limit saturated.
    #[error("busy: {0}")]
    Busy(String),

    /// A per-RPC or iterative-lookup deadline was exceeded.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The remote endpoint could not be reached or sent a malformed frame.
    #[error("transport error: {0}")]
    Transport(String),

    /// Local disk, blobstore, or SQLite index failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Malformed configuration (CLI flags, daemon.toml).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Generic I/O error not otherwise classified.
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON or bincode (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Unexpected internal error (should not occur in normal operation).
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Structured error code surfaced across the JSON-RPC bridge.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::Invalid(_) => "invalid",
            Error::Expired(_) => "expired",
            Error::Busy(_) => "busy",
            Error::Timeout(_) => "timeout",
            Error::Transport(_) => "transport",
            Error::Storage(_) => "storage",
            Error::Configuration(_) => "configuration",
            Error::Io(_) => "io",
            Error::Serialization(_) => "serialization",
            Error::Internal(_) => "internal",
        }
    }
}

/// Result type alias for neromon-core operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Storage(format!("sqlite: {err}"))
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Configuration(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout("deadline exceeded".to_string())
    }
}
