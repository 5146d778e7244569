//! Identity persistence through the key-value store contract.
//!
//! The secret key is written as its raw 32 bytes. Encryption at rest is the
//! store implementation's concern; this module never logs or formats the
//! secret.

use std::sync::Arc;

use tracing::info;
use zeroize::Zeroizing;

use super::{Identity, IdentityError};
use crate::store::KeyValueStore;

/// Storage key for the identity secret bytes.
pub const IDENTITY_STORAGE_KEY: &str = "driftwood.nostr.identity";

/// Loads, creates, imports and deletes the persisted identity.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use driftwood_core::nostr::IdentityStore;
/// use driftwood_core::store::MemoryStore;
///
/// let store = IdentityStore::new(Arc::new(MemoryStore::new()));
/// let identity = store.load_or_generate().unwrap();
/// let again = store.load().unwrap().unwrap();
/// assert_eq!(identity.pubkey_hex(), again.pubkey_hex());
/// ```
pub struct IdentityStore {
    store: Arc<dyn KeyValueStore>,
}

impl IdentityStore {
    /// Creates an identity store backed by `store`.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Loads the persisted identity, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the stored bytes are not a valid key.
    pub fn load(&self) -> Result<Option<Identity>, IdentityError> {
        let Some(bytes) = self
            .store
            .get(IDENTITY_STORAGE_KEY)
            .map_err(|e| IdentityError::Storage(e.to_string()))?
        else {
            return Ok(None);
        };
        let bytes = Zeroizing::new(bytes);
        let secret: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| IdentityError::InvalidKey("stored key must be 32 bytes".to_string()))?;
        let secret = Zeroizing::new(secret);
        Identity::from_secret_bytes(*secret).map(Some)
    }

    /// Loads the persisted identity or generates and saves a new one.
    ///
    /// # Errors
    ///
    /// Returns an error if loading or saving fails.
    pub fn load_or_generate(&self) -> Result<Identity, IdentityError> {
        if let Some(identity) = self.load()? {
            return Ok(identity);
        }
        let identity = Identity::generate();
        self.save(&identity)?;
        info!(pubkey = %identity.pubkey_hex(), "generated new identity");
        Ok(identity)
    }

    /// Persists `identity`, replacing any existing one.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn save(&self, identity: &Identity) -> Result<(), IdentityError> {
        let secret = identity.secret_bytes();
        self.store
            .put(IDENTITY_STORAGE_KEY, secret.as_slice())
            .map_err(|e| IdentityError::Storage(e.to_string()))
    }

    /// Imports an nsec or 64-character hex secret and persists it.
    ///
    /// Invalid input fails synchronously and leaves the stored identity untouched.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::InvalidKey`] or [`IdentityError::InvalidNsec`]
    /// for malformed input, or a storage error.
    pub fn import(&self, secret: &str) -> Result<Identity, IdentityError> {
        let secret = secret.trim();
        let identity = if secret.starts_with("nsec1") {
            Identity::from_nsec(secret)?
        } else {
            Identity::from_secret_hex(secret)?
        };
        self.save(&identity)?;
        info!(pubkey = %identity.pubkey_hex(), "imported identity");
        Ok(identity)
    }

    /// Deletes the persisted identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn delete(&self) -> Result<(), IdentityError> {
        self.store
            .delete(IDENTITY_STORAGE_KEY)
            .map_err(|e| IdentityError::Storage(e.to_string()))
    }
}

impl std::fmt::Debug for IdentityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityStore").finish_non_exhaustive()
    }
}
