//! Common error types for calldeck
//!
//! Defines shared error types using thiserror for clear error propagation.

use thiserror::Error;

/// Common result type for calldeck operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by calldeck components
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Envelope serialization or parse error (wraps serde_json::Error)
    #[error("Envelope error: {0}")]
    Envelope(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
