//! User identity: key pair, import/export and persistence.
//!
//! - [`Identity`]: the secp256k1 key pair used to sign events
//! - [`IdentityStore`]: loads and saves the identity through a
//!   [`KeyValueStore`](crate::store::KeyValueStore)

mod keypair;
mod storage;

use thiserror::Error;

pub use keypair::Identity;
pub use storage::{IdentityStore, IDENTITY_STORAGE_KEY};

/// Errors that can occur during identity operations.
#[derive(Error, Debug)]
pub enum IdentityError {
    /// The key material is not a valid secp256k1 key.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// The nsec string could not be parsed.
    #[error("Invalid nsec: {0}")]
    InvalidNsec(String),

    /// Bech32 encoding failed.
    #[error("Bech32 encoding failed: {0}")]
    Bech32(String),

    /// Signing failed.
    #[error("Signing failed: {0}")]
    Signing(String),

    /// Persisting or loading the identity failed.
    #[error("Identity storage error: {0}")]
    Storage(String),
}

impl From<IdentityError> for crate::nostr::NostrError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::InvalidKey(msg) | IdentityError::InvalidNsec(msg) => {
                Self::InvalidKey(msg)
            }
            IdentityError::Signing(msg) => Self::Signing(msg),
            other => Self::InvalidEvent(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nostr::NostrError;

    #[test]
    fn invalid_key_maps_to_nostr_invalid_key() {
        let err: NostrError = IdentityError::InvalidKey("zero".to_string()).into();
        assert!(matches!(err, NostrError::InvalidKey(_)));
    }

    #[test]
    fn invalid_nsec_maps_to_nostr_invalid_key() {
        let err: NostrError = IdentityError::InvalidNsec("bad".to_string()).into();
        assert!(matches!(err, NostrError::InvalidKey(_)));
    }

    #[test]
    fn error_display_storage() {
        let err = IdentityError::Storage("disk full".to_string());
        assert_eq!(err.to_string(), "Identity storage error: disk full");
    }
}
