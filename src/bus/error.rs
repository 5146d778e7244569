//! Error types for client-facing operations.

use thiserror::Error;

use crate::nostr::{IdentityError, NostrError};
use crate::relay::RelayError;
use crate::store::StoreError;

/// Error type for [`EventBus`](super::EventBus) operations.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Building, signing or encrypting an event failed.
    #[error(transparent)]
    Nostr(#[from] NostrError),

    /// Key handling failed.
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// Publishing or subscribing failed.
    #[error(transparent)]
    Relay(#[from] RelayError),

    /// Local persistence failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// No joined group or pending invite with this id.
    #[error("Unknown group: {0}")]
    UnknownGroup(String),

    /// A group invite could not be understood.
    #[error("Invalid group invite: {0}")]
    InvalidInvite(String),
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_group_display() {
        let err = ClientError::UnknownGroup("g1".to_string());
        assert_eq!(err.to_string(), "Unknown group: g1");
    }

    #[test]
    fn wrapped_errors_are_transparent() {
        let err: ClientError = RelayError::NoRelays.into();
        assert_eq!(err.to_string(), "No connected relays");

        let err: ClientError = NostrError::DecryptionFailed("bad mac".to_string()).into();
        assert_eq!(err.to_string(), NostrError::DecryptionFailed("bad mac".to_string()).to_string());
    }
}
