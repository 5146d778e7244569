//! NIP-44 v2 payload encryption.
//!
//! Two key sources feed the same framing:
//!
//! - pairwise: [`conversation_key`] runs the `nostr` crate's NIP-44 ECDH and
//!   HKDF between our identity and a peer; used for direct messages, seals
//!   and gift wraps
//! - group: a random 32-byte key shared with every member of a private group
//!
//! The framing is authenticated, so any tampering or wrong key surfaces as
//! [`NostrError::DecryptionFailed`].

use base64::Engine;
use nostr::nips::nip44::v2::{self, ConversationKey};
use zeroize::Zeroizing;

use crate::nostr::error::{NostrError, Result};
use crate::nostr::identity::Identity;

/// Derives the pairwise conversation key between `identity` and `peer_pubkey_hex`.
///
/// Symmetric: both sides derive the same key.
///
/// # Errors
///
/// Returns [`NostrError::InvalidKey`] if the peer key is not a valid point.
pub fn conversation_key(identity: &Identity, peer_pubkey_hex: &str) -> Result<Zeroizing<[u8; 32]>> {
    let derived = identity.conversation_key(peer_pubkey_hex)?;

    let mut key = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(derived.as_bytes());
    Ok(key)
}

/// Encrypts `plaintext` from `identity` to `peer_pubkey_hex`.
///
/// # Errors
///
/// Returns an error if the peer key is invalid or encryption fails
/// (including empty plaintext).
///
/// # Example
///
/// ```
/// use driftwood_core::nostr::{encryption, Identity};
///
/// let alice = Identity::generate();
/// let bob = Identity::generate();
/// let ct = encryption::encrypt(&alice, &bob.pubkey_hex(), "hi bob").unwrap();
/// assert_eq!(encryption::decrypt(&bob, &alice.pubkey_hex(), &ct).unwrap(), "hi bob");
/// ```
pub fn encrypt(identity: &Identity, peer_pubkey_hex: &str, plaintext: &str) -> Result<String> {
    let key = conversation_key(identity, peer_pubkey_hex)?;
    encrypt_nip44(plaintext, &key)
}

/// Decrypts `ciphertext` that `peer_pubkey_hex` encrypted to `identity`.
///
/// # Errors
///
/// Returns [`NostrError::DecryptionFailed`] on authentication failure.
pub fn decrypt(identity: &Identity, peer_pubkey_hex: &str, ciphertext: &str) -> Result<String> {
    let key = conversation_key(identity, peer_pubkey_hex)?;
    decrypt_nip44(ciphertext, &key)
}

/// Encrypts content using NIP-44 v2 under a raw 32-byte key.
///
/// # Known Gap
///
/// `ConversationKey` from the `nostr` crate does not implement `Zeroize`, so
/// the internal copy it holds is not scrubbed from memory.
///
/// # Errors
///
/// Returns an error if encryption fails.
pub fn encrypt_nip44(plaintext: &str, key: &Zeroizing<[u8; 32]>) -> Result<String> {
    let key_copy = Zeroizing::new(**key);
    let conv_key = ConversationKey::new(*key_copy);
    let encrypted_bytes = v2::encrypt_to_bytes(&conv_key, plaintext.as_bytes())
        .map_err(|e| NostrError::Encryption(e.to_string()))?;

    Ok(base64::engine::general_purpose::STANDARD.encode(&encrypted_bytes))
}

/// Decrypts NIP-44 v2 content under a raw 32-byte key.
///
/// # Errors
///
/// Returns [`NostrError::DecryptionFailed`] if decoding, authentication or
/// UTF-8 conversion fails.
pub fn decrypt_nip44(ciphertext: &str, key: &Zeroizing<[u8; 32]>) -> Result<String> {
    let key_copy = Zeroizing::new(**key);
    let conv_key = ConversationKey::new(*key_copy);

    let encrypted_bytes = base64::engine::general_purpose::STANDARD
        .decode(ciphertext)
        .map_err(|e| NostrError::DecryptionFailed(format!("Base64 decode error: {e}")))?;

    let decrypted_bytes = v2::decrypt_to_bytes(&conv_key, &encrypted_bytes)
        .map_err(|e| NostrError::DecryptionFailed(e.to_string()))?;

    String::from_utf8(decrypted_bytes)
        .map_err(|e| NostrError::DecryptionFailed(format!("UTF-8 decode error: {e}")))
}

/// Generates a random 32-byte symmetric key for a private group.
#[must_use]
pub fn generate_group_key() -> Zeroizing<[u8; 32]> {
    let mut key = Zeroizing::new([0u8; 32]);
    rand::Rng::fill(&mut rand::thread_rng(), key.as_mut_slice());
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> Zeroizing<[u8; 32]> {
        let mut key = [0u8; 32];
        key[0] = 0x42;
        key[31] = 0x42;
        Zeroizing::new(key)
    }

    #[test]
    fn group_key_roundtrip() {
        let key = test_key();
        let ciphertext = encrypt_nip44("Hello, World!", &key).unwrap();
        assert_eq!(decrypt_nip44(&ciphertext, &key).unwrap(), "Hello, World!");
    }

    #[test]
    fn random_nonce_per_encryption() {
        let key = test_key();
        let ct1 = encrypt_nip44("same", &key).unwrap();
        let ct2 = encrypt_nip44("same", &key).unwrap();
        assert_ne!(ct1, ct2);
    }

    #[test]
    fn wrong_key_is_decryption_failed() {
        let key1 = test_key();
        let mut key2 = test_key();
        key2[15] = 0xFF;

        let ciphertext = encrypt_nip44("secret", &key1).unwrap();
        assert!(matches!(
            decrypt_nip44(&ciphertext, &key2),
            Err(NostrError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn empty_plaintext_is_rejected() {
        assert!(matches!(
            encrypt_nip44("", &test_key()),
            Err(NostrError::Encryption(_))
        ));
    }

    #[test]
    fn corrupted_ciphertext_is_decryption_failed() {
        let key = test_key();
        let ciphertext = encrypt_nip44("test message", &key).unwrap();

        let mut bytes = base64::engine::general_purpose::STANDARD
            .decode(&ciphertext)
            .unwrap();
        bytes[40] ^= 0xFF;
        let corrupted = base64::engine::general_purpose::STANDARD.encode(&bytes);

        assert!(matches!(
            decrypt_nip44(&corrupted, &key),
            Err(NostrError::DecryptionFailed(_))
        ));
        assert!(matches!(
            decrypt_nip44("not base64!!!", &key),
            Err(NostrError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn conversation_key_is_symmetric() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let ab = conversation_key(&alice, &bob.pubkey_hex()).unwrap();
        let ba = conversation_key(&bob, &alice.pubkey_hex()).unwrap();
        assert_eq!(*ab, *ba);
    }

    #[test]
    fn pairwise_roundtrip_and_third_party_fails() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let eve = Identity::generate();

        let ct = encrypt(&alice, &bob.pubkey_hex(), "Hello 世界 🌍").unwrap();
        assert_eq!(decrypt(&bob, &alice.pubkey_hex(), &ct).unwrap(), "Hello 世界 🌍");
        assert!(matches!(
            decrypt(&eve, &alice.pubkey_hex(), &ct),
            Err(NostrError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn invalid_peer_key_is_rejected() {
        let alice = Identity::generate();
        assert!(matches!(
            encrypt(&alice, "zz", "x"),
            Err(NostrError::InvalidKey(_))
        ));
    }

    #[test]
    fn group_keys_are_random() {
        assert_ne!(*generate_group_key(), *generate_group_key());
    }
}
