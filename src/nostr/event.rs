//! Event model, canonical serialization, signing and verification (NIP-01).
//!
//! - [`UnsignedEvent`]: event fields before signing (also used as a gift-wrap rumor)
//! - [`Event`]: a signed, content-addressed event as it travels on the wire
//!
//! The id of an event is the SHA-256 of the compact JSON array
//! `[0, pubkey, created_at, kind, tags, content]`. [`Event::verify`] is the
//! single gate every inbound event passes before anything else looks at it.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::nostr::error::{NostrError, Result};
use crate::nostr::identity::Identity;
use crate::nostr::keys::verify_schnorr;

/// Event kind: profile metadata (replaceable).
pub const KIND_METADATA: u16 = 0;
/// Event kind: short text note.
pub const KIND_TEXT_NOTE: u16 = 1;
/// Event kind: contact list (replaceable).
pub const KIND_CONTACT_LIST: u16 = 3;
/// Event kind: encrypted direct message.
pub const KIND_DIRECT_MESSAGE: u16 = 4;
/// Event kind: deletion request.
pub const KIND_DELETION: u16 = 5;
/// Event kind: reaction.
pub const KIND_REACTION: u16 = 7;
/// Event kind: seal (inner layer of a gift wrap).
pub const KIND_SEAL: u16 = 13;
/// Event kind: public chat channel creation.
pub const KIND_CHANNEL_CREATE: u16 = 40;
/// Event kind: public chat channel message.
pub const KIND_CHANNEL_MESSAGE: u16 = 42;
/// Event kind: private group invitation (only ever sent inside a gift wrap).
pub const KIND_GROUP_INVITE: u16 = 444;
/// Event kind: private group message.
pub const KIND_GROUP_MESSAGE: u16 = 445;
/// Event kind: gift wrap envelope.
pub const KIND_GIFT_WRAP: u16 = 1059;

/// Returns true for kinds where only the newest event per author is current.
#[must_use]
pub const fn is_replaceable(kind: u16) -> bool {
    matches!(kind, KIND_METADATA | KIND_CONTACT_LIST | 10_000..=19_999)
}

/// Returns true for addressable kinds, replaceable per author and `d` tag.
#[must_use]
pub const fn is_addressable(kind: u16) -> bool {
    matches!(kind, 30_000..=39_999)
}

/// Builds the canonical serialization of the event fields.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn canonicalize(
    pubkey: &str,
    created_at: i64,
    kind: u16,
    tags: &[Vec<String>],
    content: &str,
) -> Result<String> {
    serde_json::to_string(&(0, pubkey, created_at, kind, tags, content)).map_err(NostrError::from)
}

/// Computes the hex event id over the canonical serialization.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn compute_id(
    pubkey: &str,
    created_at: i64,
    kind: u16,
    tags: &[Vec<String>],
    content: &str,
) -> Result<String> {
    let serialized = canonicalize(pubkey, created_at, kind, tags, content)?;

    let mut hasher = Sha256::new();
    hasher.update(serialized.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Builds an event for `identity` and signs it.
///
/// `created_at` defaults to the current time.
///
/// # Errors
///
/// Returns an error if signing fails.
///
/// # Example
///
/// ```
/// use driftwood_core::nostr::{build_and_sign, Identity};
///
/// let identity = Identity::generate();
/// let event = build_and_sign(&identity, 1, vec![], "hello", None).unwrap();
/// assert!(event.verify().is_ok());
/// ```
pub fn build_and_sign(
    identity: &Identity,
    kind: u16,
    tags: Vec<Vec<String>>,
    content: impl Into<String>,
    created_at: Option<i64>,
) -> Result<Event> {
    let mut unsigned = UnsignedEvent::new(&identity.pubkey_hex(), kind, tags, content);
    if let Some(ts) = created_at {
        unsigned.created_at = ts;
    }
    unsigned.sign(identity)
}

/// Event fields before signing.
///
/// Inside a gift wrap this is the "rumor": it carries an `id` so the
/// recipient can reference it, but it is never signed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnsignedEvent {
    /// Event id, present only on rumors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Author public key (hex).
    pub pubkey: String,

    /// Unix timestamp when the event was created.
    pub created_at: i64,

    /// Event kind.
    pub kind: u16,

    /// Event tags.
    pub tags: Vec<Vec<String>>,

    /// Event content.
    pub content: String,
}

impl UnsignedEvent {
    /// Creates unsigned event fields stamped with the current time.
    #[must_use]
    pub fn new(pubkey: &str, kind: u16, tags: Vec<Vec<String>>, content: impl Into<String>) -> Self {
        Self {
            id: None,
            pubkey: pubkey.to_string(),
            created_at: Utc::now().timestamp(),
            kind,
            tags,
            content: content.into(),
        }
    }

    /// Returns the canonical serialization of these fields.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn canonicalize(&self) -> Result<String> {
        canonicalize(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )
    }

    /// Computes the event id of these fields.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn compute_id(&self) -> Result<String> {
        compute_id(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )
    }

    /// Fills in the `id` field, turning these fields into a rumor.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn into_rumor(mut self) -> Result<Self> {
        self.id = Some(self.compute_id()?);
        Ok(self)
    }

    /// Computes the id and signs it with `identity`.
    ///
    /// # Errors
    ///
    /// Returns [`NostrError::InvalidEvent`] if `pubkey` is not the identity's
    /// public key, or a signing error.
    pub fn sign(self, identity: &Identity) -> Result<Event> {
        if self.pubkey != identity.pubkey_hex() {
            return Err(NostrError::InvalidEvent(
                "pubkey does not belong to signing identity".to_string(),
            ));
        }

        let id = self.compute_id()?;
        let id_bytes: [u8; 32] = hex::decode(&id)?
            .try_into()
            .map_err(|_| NostrError::InvalidEvent("Invalid ID length".to_string()))?;
        let sig = identity.sign(&id_bytes)?;

        Ok(Event {
            id,
            pubkey: self.pubkey,
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags,
            content: self.content,
            sig,
        })
    }

    /// Returns the first value of the first tag named `name`.
    #[must_use]
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        first_tag_value(&self.tags, name)
    }
}

/// A signed event.
///
/// # Structure
///
/// ```json
/// {
///   "id": "...",           // SHA256 of serialized event
///   "pubkey": "...",       // Author public key
///   "created_at": 123456,  // Unix timestamp
///   "kind": 1,
///   "tags": [["e", "..."], ["p", "..."]],
///   "content": "...",
///   "sig": "..."           // Schnorr signature
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    /// Event ID (32-byte SHA256 hash, hex-encoded)
    pub id: String,

    /// Author public key (32 bytes, hex-encoded)
    pub pubkey: String,

    /// Unix timestamp when the event was created
    pub created_at: i64,

    /// Event kind
    pub kind: u16,

    /// Event tags
    pub tags: Vec<Vec<String>>,

    /// Plaintext, or ciphertext for encrypted kinds
    pub content: String,

    /// Schnorr signature (64 bytes, hex-encoded)
    pub sig: String,
}

impl Event {
    /// Verifies the event id and then the signature.
    ///
    /// # Errors
    ///
    /// - [`NostrError::IdMismatch`] if the recomputed id differs from `id`
    /// - [`NostrError::BadSignature`] if the signature does not verify
    pub fn verify(&self) -> Result<()> {
        // Verify the ID matches using constant-time comparison to prevent timing attacks
        let calculated_id = compute_id(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )?;

        if !bool::from(calculated_id.as_bytes().ct_eq(self.id.as_bytes())) {
            return Err(NostrError::IdMismatch);
        }

        let Ok(id_bytes) = <[u8; 32]>::try_from(hex::decode(&self.id)?.as_slice()) else {
            return Err(NostrError::IdMismatch);
        };
        let (Ok(pubkey), Ok(sig)) = (hex::decode(&self.pubkey), hex::decode(&self.sig)) else {
            return Err(NostrError::BadSignature);
        };

        if verify_schnorr(&pubkey, &id_bytes, &sig) {
            Ok(())
        } else {
            Err(NostrError::BadSignature)
        }
    }

    /// Serializes this event to JSON for transmission.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(NostrError::from)
    }

    /// Deserializes an event from JSON. Does not verify it.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(NostrError::from)
    }

    /// Returns the first value of the first tag named `name`.
    #[must_use]
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        first_tag_value(&self.tags, name)
    }

    /// Returns all tags named `name`.
    pub fn tags_named<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a Vec<String>> + 'a {
        let name = name.to_owned();
        self.tags
            .iter()
            .filter(move |tag| tag.first().is_some_and(|first| *first == name))
    }

    /// Returns the `d` tag value used to address replaceable events.
    #[must_use]
    pub fn identifier(&self) -> &str {
        self.tag_value("d").unwrap_or_default()
    }

    /// Extracts the expiration timestamp from the `expiration` tag (NIP-40).
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.tag_value("expiration")
            .and_then(|ts| ts.parse::<i64>().ok())
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
    }

    /// Checks if this event has expired according to NIP-40.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at().is_some_and(|exp| Utc::now() > exp)
    }
}

fn first_tag_value<'a>(tags: &'a [Vec<String>], name: &str) -> Option<&'a str> {
    tags.iter()
        .find(|tag| tag.first().map(String::as_str) == Some(name))
        .and_then(|tag| tag.get(1).map(String::as_str))
}
