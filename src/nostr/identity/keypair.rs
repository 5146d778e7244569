//! Signing identity for Nostr operations.
//!
//! [`Identity`] holds the user's long-lived secp256k1 key pair. It signs event
//! ids, verifies signatures and performs the NIP-44 key agreement used by the
//! encryption module. The same type doubles as a single-use key for the outer
//! layer of a gift wrap.
//!
//! # Security
//!
//! - The scalar is wiped on drop ([`ZeroizeOnDrop`]); every temporary copy
//!   lives in a [`Zeroizing`] wrapper
//! - `Debug` prints the public key only
//! - The raw scalar is only reachable from inside the crate

use nostr::nips::nip44::v2::ConversationKey;
use nostr::prelude::{Keys, PublicKey, ToBech32};
use nostr::secp256k1::{Keypair, Message, SecretKey as Secp256k1SecretKey};
use nostr::SecretKey as NostrSecretKey;
use zeroize::{ZeroizeOnDrop, Zeroizing};

use super::IdentityError;
use crate::nostr::keys::{verify_schnorr, SECP};

/// A Nostr identity key pair.
///
/// The public key is always the deterministic derivation of the secret key;
/// the pair cannot be changed after construction.
///
/// # Example
///
/// ```
/// use driftwood_core::nostr::Identity;
///
/// let identity = Identity::generate();
/// println!("Your npub: {}", identity.npub().unwrap());
///
/// let nsec = identity.export_nsec().unwrap();
/// assert!(nsec.starts_with("nsec1"));
/// ```
#[derive(ZeroizeOnDrop)]
pub struct Identity {
    secret_bytes: [u8; 32],
    /// x-only public key, derived once.
    #[zeroize(skip)]
    pubkey_bytes: [u8; 32],
}

impl Identity {
    /// Generates a new random identity from the OS CSPRNG.
    #[must_use]
    pub fn generate() -> Self {
        Self::from_keys(&Keys::generate())
    }

    /// Creates an identity from raw secret key bytes.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::InvalidKey`] if the bytes are not a valid
    /// secp256k1 scalar (zero, or not below the curve order).
    ///
    /// # Example
    ///
    /// ```
    /// use driftwood_core::nostr::Identity;
    ///
    /// let mut scalar = [0u8; 32];
    /// scalar[31] = 9;
    /// assert!(Identity::from_secret_bytes(scalar).is_ok());
    /// assert!(Identity::from_secret_bytes([0u8; 32]).is_err());
    /// ```
    pub fn from_secret_bytes(secret_bytes: [u8; 32]) -> Result<Self, IdentityError> {
        let secret_key = Secp256k1SecretKey::from_slice(&secret_bytes)
            .map_err(|e| IdentityError::InvalidKey(e.to_string()))?;
        let (x_only, _) = Keypair::from_secret_key(&SECP, &secret_key).x_only_public_key();

        Ok(Self {
            secret_bytes,
            pubkey_bytes: x_only.serialize(),
        })
    }

    /// Creates an identity from a 64-character hex secret key.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::InvalidKey`] for malformed hex or an invalid scalar.
    pub fn from_secret_hex(secret_hex: &str) -> Result<Self, IdentityError> {
        let decoded = Zeroizing::new(
            hex::decode(secret_hex.trim()).map_err(|e| IdentityError::InvalidKey(e.to_string()))?,
        );
        let scalar: Zeroizing<[u8; 32]> = Zeroizing::new(
            decoded
                .as_slice()
                .try_into()
                .map_err(|_| IdentityError::InvalidKey("secret key must be 32 bytes".to_string()))?,
        );
        Self::from_secret_bytes(*scalar)
    }

    /// Imports an identity from a NIP-19 `nsec`.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::InvalidNsec`] if the string does not decode to a
    /// secret key.
    pub fn from_nsec(nsec: &str) -> Result<Self, IdentityError> {
        Keys::parse(nsec)
            .map(|keys| Self::from_keys(&keys))
            .map_err(|e| IdentityError::InvalidNsec(e.to_string()))
    }

    fn from_keys(keys: &Keys) -> Self {
        Self {
            secret_bytes: keys.secret_key().secret_bytes(),
            pubkey_bytes: keys.public_key().to_bytes(),
        }
    }

    /// Exports the secret key as a NIP-19 `nsec`.
    ///
    /// The result is the user's whole identity; only show it on explicit request.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Bech32`] if encoding fails.
    pub fn export_nsec(&self) -> Result<String, IdentityError> {
        let scalar = self.secret_bytes();
        NostrSecretKey::from_slice(scalar.as_slice())
            .map_err(|e| IdentityError::InvalidKey(e.to_string()))?
            .to_bech32()
            .map_err(|e| IdentityError::Bech32(e.to_string()))
    }

    /// Public key as 64 hex characters, the form used in event `pubkey` fields.
    #[must_use]
    pub fn pubkey_hex(&self) -> String {
        hex::encode(self.pubkey_bytes)
    }

    /// Public key as a NIP-19 `npub`.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Bech32`] if encoding fails.
    pub fn npub(&self) -> Result<String, IdentityError> {
        PublicKey::from_slice(&self.pubkey_bytes)
            .map_err(|e| IdentityError::InvalidKey(e.to_string()))?
            .to_bech32()
            .map_err(|e| IdentityError::Bech32(e.to_string()))
    }

    /// Raw x-only public key.
    #[must_use]
    pub const fn pubkey_bytes(&self) -> [u8; 32] {
        self.pubkey_bytes
    }

    /// Produces a BIP-340 Schnorr signature over `message_hash`, hex encoded
    /// (128 characters).
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Signing`] if the stored scalar is unusable.
    ///
    /// # Example
    ///
    /// ```
    /// use driftwood_core::nostr::Identity;
    ///
    /// let identity = Identity::generate();
    /// let digest = [7u8; 32];
    /// let sig = identity.sign(&digest).unwrap();
    /// assert!(Identity::verify(&identity.pubkey_hex(), &digest, &sig));
    /// ```
    pub fn sign(&self, message_hash: &[u8; 32]) -> Result<String, IdentityError> {
        let secret_key = self
            .secret_key()
            .map_err(|e| IdentityError::Signing(e.to_string()))?;
        let keypair = Keypair::from_secret_key(&SECP, &secret_key);
        let signature = SECP.sign_schnorr(&Message::from_digest(*message_hash), &keypair);
        Ok(hex::encode(signature.serialize()))
    }

    /// Verifies a hex signature over `message_hash` by the hex public key.
    ///
    /// Never fails: invalid encodings are simply `false`.
    #[must_use]
    pub fn verify(pubkey_hex: &str, message_hash: &[u8; 32], signature_hex: &str) -> bool {
        let (Ok(pubkey), Ok(signature)) = (hex::decode(pubkey_hex), hex::decode(signature_hex))
        else {
            return false;
        };
        verify_schnorr(&pubkey, message_hash, &signature)
    }

    /// ECDH with a peer, run through the NIP-44 v2 key schedule.
    ///
    /// Symmetric: `a.conversation_key(b) == b.conversation_key(a)`.
    pub(crate) fn conversation_key(
        &self,
        peer_pubkey_hex: &str,
    ) -> Result<ConversationKey, IdentityError> {
        let peer = PublicKey::from_hex(peer_pubkey_hex)
            .map_err(|e| IdentityError::InvalidKey(e.to_string()))?;
        let secret = NostrSecretKey::from_slice(self.secret_bytes().as_slice())
            .map_err(|e| IdentityError::InvalidKey(e.to_string()))?;
        ConversationKey::derive(&secret, &peer).map_err(|e| IdentityError::InvalidKey(e.to_string()))
    }

    fn secret_key(&self) -> Result<Secp256k1SecretKey, IdentityError> {
        Secp256k1SecretKey::from_slice(self.secret_bytes().as_slice())
            .map_err(|e| IdentityError::InvalidKey(e.to_string()))
    }

    /// Copy of the secret scalar for persistence.
    #[must_use]
    pub(crate) fn secret_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.secret_bytes)
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("pubkey", &self.pubkey_hex())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar(last: u8) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        bytes[31] = last;
        bytes
    }

    fn hex32(s: &str) -> [u8; 32] {
        hex::decode(s).unwrap().try_into().unwrap()
    }

    #[test]
    fn generated_identities_differ() {
        let a = Identity::generate();
        let b = Identity::generate();
        assert_eq!(a.pubkey_hex().len(), 64);
        assert_ne!(a.pubkey_bytes(), b.pubkey_bytes());
    }

    #[test]
    fn scalar_range_is_enforced() {
        let below_order = hex32("fffffffffffffffffffffffffffffffebaaedce6af48a03bbfd25e8cd0364140");
        let order = hex32("fffffffffffffffffffffffffffffffebaaedce6af48a03bbfd25e8cd0364141");

        assert!(Identity::from_secret_bytes(below_order).is_ok());
        assert!(matches!(
            Identity::from_secret_bytes(order),
            Err(IdentityError::InvalidKey(_))
        ));
        assert!(matches!(
            Identity::from_secret_bytes([0u8; 32]),
            Err(IdentityError::InvalidKey(_))
        ));
    }

    #[test]
    fn secret_one_derives_generator() {
        let identity = Identity::from_secret_bytes(scalar(1)).unwrap();
        assert_eq!(
            identity.pubkey_hex(),
            "79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798"
        );
    }

    #[test]
    fn hex_and_bytes_agree() {
        let from_hex = Identity::from_secret_hex(&hex::encode(scalar(7))).unwrap();
        let from_bytes = Identity::from_secret_bytes(scalar(7)).unwrap();
        assert_eq!(from_hex.pubkey_bytes(), from_bytes.pubkey_bytes());

        for bad in ["zz", "abcd", ""] {
            assert!(Identity::from_secret_hex(bad).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn bech32_import_export() {
        let identity = Identity::generate();
        assert!(identity.npub().unwrap().starts_with("npub1"));

        let nsec = identity.export_nsec().unwrap();
        let restored = Identity::from_nsec(&nsec).unwrap();
        assert_eq!(restored.pubkey_hex(), identity.pubkey_hex());

        for bad in ["", "nsec1qqqq", "npub1invalid"] {
            assert!(matches!(
                Identity::from_nsec(bad),
                Err(IdentityError::InvalidNsec(_))
            ));
        }
    }

    #[test]
    fn signatures_bind_key_and_digest() {
        let signer = Identity::generate();
        let digest = [0x5au8; 32];
        let sig = signer.sign(&digest).unwrap();
        assert_eq!(sig.len(), 128);

        assert!(Identity::verify(&signer.pubkey_hex(), &digest, &sig));
        assert!(!Identity::verify(&signer.pubkey_hex(), &[0x5bu8; 32], &sig));
        assert!(!Identity::verify(
            &Identity::generate().pubkey_hex(),
            &digest,
            &sig
        ));
    }

    #[test]
    fn verify_rejects_malformed_input() {
        let digest = [0u8; 32];
        assert!(!Identity::verify("xyz", &digest, "xyz"));
        assert!(!Identity::verify("", &digest, ""));
        assert!(!Identity::verify(&"ab".repeat(32), &digest, &"00".repeat(64)));
    }

    #[test]
    fn conversation_key_agrees_between_peers() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let ab = alice.conversation_key(&bob.pubkey_hex()).unwrap();
        let ba = bob.conversation_key(&alice.pubkey_hex()).unwrap();
        assert_eq!(ab.as_bytes(), ba.as_bytes());
        assert!(matches!(
            alice.conversation_key("deadbeef"),
            Err(IdentityError::InvalidKey(_))
        ));
    }

    #[test]
    fn debug_shows_only_public_key() {
        let identity = Identity::from_secret_bytes(scalar(3)).unwrap();
        let rendered = format!("{identity:?}");
        assert!(rendered.contains(&identity.pubkey_hex()));
        assert!(!rendered.contains(&hex::encode(scalar(3))));
    }

    #[test]
    fn secret_is_wiped_on_drop() {
        fn wiped<T: ZeroizeOnDrop>() {}
        wiped::<Identity>();
    }
}
