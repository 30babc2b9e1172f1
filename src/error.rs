//! Error types for Polly

use std::io;
use thiserror::Error;

/// Result type for Polly operations
pub type Result<T> = std::result::Result<T, PollyError>;

/// Errors that can occur in Polly
#[derive(Debug, Error)]
pub enum PollyError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Session file missing, unreadable, malformed or unwritable
    #[error("Storage error: {0}")]
    Storage(String),

    /// No pending exchange has the requested method and path
    #[error("No recorded exchange matches {method} {path}")]
    NoMatchingExchange {
        /// Request method
        method: String,
        /// Request path including query string
        path: String,
    },

    /// Ordinal replay ran past the end of the session
    #[error("Session exhausted: request #{cursor} but only {len} exchanges recorded")]
    SessionExhausted {
        /// Cursor position requested
        cursor: usize,
        /// Number of recorded exchanges
        len: usize,
    },

    /// Upstream call failed
    #[error("Forward error: {0}")]
    Forward(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Request too large
    #[error("Data too large: {size} bytes exceeds limit of {limit} bytes")]
    DataTooLarge {
        /// Actual size
        size: usize,
        /// Size limit
        limit: usize,
    },

    /// Invalid session name
    #[error("Invalid session name: {0}")]
    InvalidSessionName(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl PollyError {
    /// Whether this error only affects a single request
    #[must_use]
    pub fn is_per_request(&self) -> bool {
        matches!(
            self,
            Self::NoMatchingExchange { .. }
                | Self::SessionExhausted { .. }
                | Self::Forward(_)
                | Self::DataTooLarge { .. }
        )
    }
}
