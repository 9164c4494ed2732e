//! Server error types.

use std::net::SocketAddr;

use thiserror::Error;

/// Errors that end a server run.
///
/// A forced drain is not an error; it is reported through
/// [`ShutdownReport`](crate::ShutdownReport).
#[derive(Debug, Error)]
pub enum ServerError {
    /// The configured bind address does not parse.
    #[error("invalid address '{addr}': {source}")]
    InvalidAddress {
        /// The configured address.
        addr: String,
        /// Parse failure.
        #[source]
        source: std::net::AddrParseError,
    },

    /// The listener could not be bound.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        /// The address that failed to bind.
        addr: SocketAddr,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The accept loop failed with a non-transient error.
    #[error("accept loop failed: {0}")]
    Accept(#[source] std::io::Error),

    /// The accept loop task panicked or was cancelled.
    #[error("accept loop task failed: {0}")]
    Join(String),
}

impl From<tokio::task::JoinError> for ServerError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Join(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_address_display() {
        let source = "nope".parse::<SocketAddr>().unwrap_err();
        let err = ServerError::InvalidAddress {
            addr: "nope".to_string(),
            source,
        };
        assert!(err.to_string().starts_with("invalid address 'nope'"));
    }

    #[test]
    fn test_bind_display_includes_address() {
        let err = ServerError::Bind {
            addr: "127.0.0.1:7171".parse().unwrap(),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        };
        assert!(err.to_string().contains("127.0.0.1:7171"));
    }

    #[test]
    fn test_accept_source() {
        let err = ServerError::Accept(std::io::Error::other("listener gone"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
