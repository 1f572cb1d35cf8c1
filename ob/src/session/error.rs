//! Session error types

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur on the service connection
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    #[error("Read timed out after {0:?}")]
    Timeout(Duration),

    #[error("Connection closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Check if retrying the operation could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            SessionError::Connect { .. } => true,
            SessionError::ConnectTimeout { .. } => true,
            SessionError::Timeout(_) => true,
            SessionError::Io(_) => true,
            SessionError::Closed => false,
        }
    }
}
