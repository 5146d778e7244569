//! Error types for Nostr operations.

use thiserror::Error;

use super::kinds::KindValidationError;

/// Errors that can occur during event construction, validation and encryption.
#[derive(Error, Debug)]
pub enum NostrError {
    /// The bytes do not form a valid secp256k1 secret or public key.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// The stored event id does not match the recomputed id.
    #[error("Event ID mismatch")]
    IdMismatch,

    /// Event signature verification failed.
    #[error("Invalid event signature")]
    BadSignature,

    /// Ciphertext failed authentication or could not be parsed.
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// Encryption operation failed.
    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// Event signing failed.
    #[error("Event signing failed: {0}")]
    Signing(String),

    /// A kind handler rejected the event.
    #[error(transparent)]
    KindValidation(#[from] KindValidationError),

    /// Serialization failed.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid event structure or content.
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// Gift wrap construction or unwrapping failed.
    #[error("Gift wrap error: {0}")]
    GiftWrap(String),

    /// A hex field could not be decoded.
    #[error("Malformed hex: {0}")]
    MalformedHex(String),
}

/// Result type for Nostr operations.
pub type Result<T> = std::result::Result<T, NostrError>;

impl From<hex::FromHexError> for NostrError {
    fn from(e: hex::FromHexError) -> Self {
        Self::MalformedHex(e.to_string())
    }
}

impl NostrError {
    /// Returns true for errors that mean an inbound event must be discarded.
    #[must_use]
    pub const fn is_validation_failure(&self) -> bool {
        matches!(
            self,
            Self::IdMismatch
                | Self::BadSignature
                | Self::DecryptionFailed(_)
                | Self::KindValidation(_)
                | Self::InvalidEvent(_)
                | Self::GiftWrap(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_invalid_key() {
        let err = NostrError::InvalidKey("scalar out of range".to_string());
        assert_eq!(err.to_string(), "Invalid key: scalar out of range");
    }

    #[test]
    fn error_display_id_mismatch() {
        assert_eq!(NostrError::IdMismatch.to_string(), "Event ID mismatch");
    }

    #[test]
    fn error_display_bad_signature() {
        assert_eq!(
            NostrError::BadSignature.to_string(),
            "Invalid event signature"
        );
    }

    #[test]
    fn error_display_decryption() {
        let err = NostrError::DecryptionFailed("invalid mac".to_string());
        assert_eq!(err.to_string(), "Decryption failed: invalid mac");
    }

    #[test]
    fn error_from_serde_json() {
        let json_err = serde_json::from_str::<i32>("invalid").unwrap_err();
        let err: NostrError = json_err.into();
        assert!(matches!(err, NostrError::Serialization(_)));
    }

    #[test]
    fn error_from_hex() {
        let hex_err = hex::decode("not valid hex").unwrap_err();
        let err: NostrError = hex_err.into();
        assert!(matches!(err, NostrError::MalformedHex(_)));
    }

    #[test]
    fn error_from_kind_validation() {
        let err: NostrError = KindValidationError::new(7, "missing e tag").into();
        assert!(matches!(err, NostrError::KindValidation(_)));
        assert_eq!(err.to_string(), "Kind 7 validation failed: missing e tag");
    }

    #[test]
    fn validation_failures_are_classified() {
        assert!(NostrError::IdMismatch.is_validation_failure());
        assert!(NostrError::BadSignature.is_validation_failure());
        assert!(NostrError::DecryptionFailed(String::new()).is_validation_failure());
        assert!(!NostrError::InvalidKey(String::new()).is_validation_failure());
        assert!(!NostrError::Signing(String::new()).is_validation_failure());
    }
}
