//! Error types for relay operations.
//!
//! Transient failures (`Connection`, `Timeout`, `ConnectionClosed`) are
//! absorbed by reconnect logic and per-relay outcomes. Callers only see a
//! failure when every relay failed or the request itself was invalid.

use thiserror::Error;

use super::types::PublishOutcome;

/// Errors that can occur during relay operations.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Connection to relay failed.
    #[error("Failed to connect to relay {url}: {reason}")]
    Connection {
        /// The relay URL that failed.
        url: String,
        /// The reason for the failure.
        reason: String,
    },

    /// Timeout waiting for operation.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// A frame could not be parsed or encoded.
    #[error("Malformed protocol frame: {0}")]
    ProtocolFrame(String),

    /// Invalid relay URL.
    #[error("Invalid relay URL: {0}")]
    InvalidUrl(String),

    /// No relay accepted the event. Carries every relay's outcome.
    #[error("All relays failed to accept the event")]
    AllRelaysFailed(PublishOutcome),

    /// No relay was connected when the operation started.
    #[error("No connected relays")]
    NoRelays,

    /// The relay is not part of the pool.
    #[error("Unknown relay: {0}")]
    UnknownRelay(String),

    /// The transport closed underneath an operation.
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),
}

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;

impl RelayError {
    /// Returns true for failures that reconnect logic retries.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Timeout(_) | Self::ConnectionClosed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_error_display() {
        let error = RelayError::Connection {
            url: "wss://relay.example.com".to_string(),
            reason: "connection refused".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Failed to connect to relay wss://relay.example.com: connection refused"
        );
        assert!(error.is_transient());
    }

    #[test]
    fn pool_level_errors_display() {
        assert_eq!(RelayError::NoRelays.to_string(), "No connected relays");
        assert_eq!(
            RelayError::AllRelaysFailed(PublishOutcome::new("abc")).to_string(),
            "All relays failed to accept the event"
        );
        assert_eq!(
            RelayError::InvalidUrl("ftp://x".to_string()).to_string(),
            "Invalid relay URL: ftp://x"
        );
        assert!(!RelayError::NoRelays.is_transient());
    }
}
