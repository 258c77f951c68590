//! Error types for lumina-core
//!
//! Expected outcomes of a generation turn (patch conflicts, incomplete
//! constructs, dependency load failures) are ordinary values and never show
//! up here. This enum covers the outer surfaces: I/O, configuration, the
//! project store and decoding of sandbox messages.

use thiserror::Error;

/// Main error type for the lumina-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Project store error (bad file name, unreadable project tree)
    #[error("store error: {0}")]
    Store(String),

    /// A message from the sandbox fell outside the protocol vocabulary
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Result type alias for lumina-core
pub type Result<T> = std::result::Result<T, Error>;
