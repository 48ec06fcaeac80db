//! Error types for the masquerading tunnel.

use thiserror::Error;

/// Result type alias for tunnel operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while dispatching or relaying a connection.
#[derive(Error, Debug)]
pub enum Error {
    /// ClientHello could not be parsed (truncated, inconsistent lengths, wrong types)
    #[error("malformed handshake: {0}")]
    MalformedHandshake(String),

    /// Covert credential in the ClientHello random field did not verify
    #[error("authentication failed")]
    AuthFailed,

    /// Network I/O error
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    /// Peer closed the stream at a record boundary
    #[error("connection closed")]
    ConnectionClosed,

    /// Peer closed the stream in the middle of a record
    #[error("incomplete read: expected {expected} bytes, got {actual}")]
    IncompleteRead {
        /// Bytes required to complete the record
        expected: usize,
        /// Bytes actually received
        actual: usize,
    },

    /// Record payload does not fit the caller's buffer
    #[error("buffer too small: record needs {needed} bytes, capacity is {capacity}")]
    BufferTooSmall {
        /// Total bytes the record occupies (header + payload)
        needed: usize,
        /// Caller-provided buffer capacity
        capacity: usize,
    },

    /// Payload exceeds the maximum TLS record size
    #[error("payload of {0} bytes exceeds the TLS record limit")]
    PayloadTooLarge(usize),

    /// Operation timed out
    #[error("timeout after {0}ms")]
    Timeout(u64),

    /// Local application asked for a target outside the allow-list
    #[error("target rejected: {0}")]
    TargetRejected(String),

    /// Local application sent something other than a proxy request
    #[error("invalid proxy request: {0}")]
    InvalidRequest(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a new malformed-handshake error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Error::MalformedHandshake(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Check if this error routes a connection to the decoy instead of closing it.
    ///
    /// Parse failures and credential failures are deliberately the same class.
    pub fn is_fallback_trigger(&self) -> bool {
        matches!(self, Error::MalformedHandshake(_) | Error::AuthFailed)
    }

    /// Check if this error came from the underlying transport
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Network(_)
                | Error::ConnectionClosed
                | Error::IncompleteRead { .. }
                | Error::Timeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::AuthFailed;
        assert_eq!(err.to_string(), "authentication failed");

        let err = Error::Timeout(3000);
        assert_eq!(err.to_string(), "timeout after 3000ms");

        let err = Error::BufferTooSmall {
            needed: 2000,
            capacity: 1024,
        };
        assert_eq!(
            err.to_string(),
            "buffer too small: record needs 2000 bytes, capacity is 1024"
        );
    }

    #[test]
    fn test_error_classes() {
        assert!(Error::malformed("short").is_fallback_trigger());
        assert!(Error::AuthFailed.is_fallback_trigger());
        assert!(!Error::ConnectionClosed.is_fallback_trigger());

        assert!(Error::ConnectionClosed.is_transport());
        assert!(Error::Timeout(1).is_transport());
        assert!(!Error::config("missing secret").is_transport());
    }
}
