//! Error types for Portico services

use std::fmt;

/// Result type alias using PorticoError
pub type Result<T> = std::result::Result<T, PorticoError>;

/// Main error type for Portico services
#[derive(Debug, thiserror::Error)]
pub enum PorticoError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Malformed or truncated wire-protocol frame
    #[error("Framing error: {0}")]
    Framing(String),

    /// Message is well-formed but not valid for the current protocol state
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// Backend call failed
    #[error("Backend error: {0}")]
    Backend(String),

    /// Connection limit reached
    #[error("Connection limit reached ({0} active)")]
    ConnectionLimit(usize),

    /// I/O error on the client socket
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PorticoError {
    /// Create an internal error from any error type
    pub fn internal<E: fmt::Display>(err: E) -> Self {
        PorticoError::Internal(err.to_string())
    }

    /// Get the error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            PorticoError::ConfigError(_) => "CONFIG_ERROR",
            PorticoError::Framing(_) => "FRAMING_ERROR",
            PorticoError::Protocol(_) => "PROTOCOL_VIOLATION",
            PorticoError::Backend(_) => "BACKEND_ERROR",
            PorticoError::ConnectionLimit(_) => "CONNECTION_LIMIT",
            PorticoError::Io(_) => "IO_ERROR",
            PorticoError::Serialization(_) => "SERIALIZATION_ERROR",
            PorticoError::Internal(_) => "INTERNAL",
        }
    }

    /// Whether this error should tear down the connection rather than be
    /// reported to the client as an ErrorResponse.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PorticoError::Protocol(_) | PorticoError::Io(_) | PorticoError::ConnectionLimit(_)
        )
    }
}
