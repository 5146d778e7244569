//! Shared secp256k1 context and public key helpers.
//!
//! Signature verification and public key parsing live here so that both the
//! identity module and the event codec use the same context and the same
//! notion of a "valid" public key.

use std::sync::LazyLock;

use nostr::nips::nip19::FromBech32;
use nostr::secp256k1::{schnorr::Signature, Message, Secp256k1, XOnlyPublicKey};
use nostr::PublicKey;

use crate::nostr::error::{NostrError, Result};

/// Global secp256k1 context for cryptographic operations.
///
/// Creating a `Secp256k1` context is expensive as it precomputes tables
/// for signing and verification. This shared context is initialized once
/// and reused across all operations.
pub static SECP: LazyLock<Secp256k1<nostr::secp256k1::All>> = LazyLock::new(Secp256k1::new);

/// Verifies a BIP-340 Schnorr signature over a 32-byte hash.
///
/// Never fails: malformed public keys or signatures simply yield `false`.
#[must_use]
pub fn verify_schnorr(pubkey: &[u8], message_hash: &[u8; 32], signature: &[u8]) -> bool {
    let Ok(pubkey) = XOnlyPublicKey::from_slice(pubkey) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };
    let message = Message::from_digest(*message_hash);
    SECP.verify_schnorr(&signature, &message, &pubkey).is_ok()
}

/// Decodes a 64-character hex public key into its x-only representation.
///
/// # Errors
///
/// Returns [`NostrError::InvalidKey`] if the string is not 32 bytes of hex or
/// is not a point on the curve.
pub fn decode_public_key(pubkey_hex: &str) -> Result<XOnlyPublicKey> {
    let bytes: [u8; 32] = hex::decode(pubkey_hex)
        .map_err(|e| NostrError::InvalidKey(e.to_string()))?
        .try_into()
        .map_err(|_| NostrError::InvalidKey("public key must be 32 bytes".to_string()))?;
    XOnlyPublicKey::from_slice(&bytes).map_err(|e| NostrError::InvalidKey(e.to_string()))
}

/// Parses a public key given as hex or NIP-19 `npub` and returns it as hex.
///
/// # Errors
///
/// Returns [`NostrError::InvalidKey`] if the input is neither form.
///
/// # Example
///
/// ```
/// use driftwood_core::nostr::{parse_public_key, Identity};
///
/// let identity = Identity::generate();
/// let npub = identity.npub().unwrap();
/// assert_eq!(parse_public_key(&npub).unwrap(), identity.pubkey_hex());
/// ```
pub fn parse_public_key(input: &str) -> Result<String> {
    let input = input.trim();
    if input.starts_with("npub1") {
        let pubkey =
            PublicKey::from_bech32(input).map_err(|e| NostrError::InvalidKey(e.to_string()))?;
        return Ok(pubkey.to_hex());
    }
    let key = decode_public_key(&input.to_ascii_lowercase())?;
    Ok(hex::encode(key.serialize()))
}

/// Returns true if the string is a lowercase 64-character hex value.
#[must_use]
pub fn is_hex_32(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
