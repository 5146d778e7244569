//! NIP-59 gift wrap for private delivery.
//!
//! # Gift Wrap Structure
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │ Layer 3: Gift Wrap (kind 1059) - PUBLIC             │
//! │ • Signed by a single-use ephemeral key              │
//! │ • Timestamp randomized up to 48 hours in the past   │
//! │ • Only reveals: recipient (p-tag)                   │
//! │  ┌───────────────────────────────────────────────┐  │
//! │  │ Layer 2: Seal (kind 13) - ENCRYPTED           │  │
//! │  │ • NIP-44 encrypted for recipient              │  │
//! │  │ • Signed by sender's real key                 │  │
//! │  │  ┌─────────────────────────────────────────┐  │  │
//! │  │  │ Layer 1: Rumor - UNSIGNED               │  │  │
//! │  │  │ • Any kind, carries its own id          │  │  │
//! │  │  └─────────────────────────────────────────┘  │  │
//! │  └───────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! The rumor stays unsigned so a leaked rumor cannot be published as if the
//! sender had authored it publicly.

use chrono::Utc;
use rand::Rng;

use super::encryption;
use super::error::{NostrError, Result};
use super::event::{build_and_sign, Event, UnsignedEvent, KIND_GIFT_WRAP, KIND_SEAL};
use super::identity::Identity;
use super::tags::TagBuilder;

/// Maximum backdating applied to seal and wrap timestamps.
const MAX_TIMESTAMP_TWEAK_SECS: i64 = 2 * 24 * 60 * 60;

/// Result of unwrapping a gift wrap addressed to us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnwrappedGift {
    /// The sender's real public key (authenticated by the seal signature).
    pub sender_pubkey: String,

    /// The id of the outer kind 1059 event.
    pub wrapper_event_id: String,

    /// The unsigned inner event.
    pub rumor: UnsignedEvent,
}

/// Gift-wraps `rumor` from `sender` to `recipient_pubkey`.
///
/// `rumor.pubkey` must be the sender's public key. A fresh ephemeral key
/// signs the outer layer and is dropped when this function returns.
///
/// # Errors
///
/// Returns [`NostrError::GiftWrap`] if the rumor author is not the sender,
/// or an encryption/signing error.
///
/// # Example
///
/// ```
/// use driftwood_core::nostr::{giftwrap, Identity, UnsignedEvent};
///
/// let alice = Identity::generate();
/// let bob = Identity::generate();
/// let rumor = UnsignedEvent::new(&alice.pubkey_hex(), 14, vec![], "secret");
///
/// let wrap = giftwrap::wrap(&alice, &bob.pubkey_hex(), rumor).unwrap();
/// let gift = giftwrap::unwrap(&bob, &wrap).unwrap();
/// assert_eq!(gift.sender_pubkey, alice.pubkey_hex());
/// assert_eq!(gift.rumor.content, "secret");
/// ```
pub fn wrap(sender: &Identity, recipient_pubkey: &str, rumor: UnsignedEvent) -> Result<Event> {
    if rumor.pubkey != sender.pubkey_hex() {
        return Err(NostrError::GiftWrap(
            "rumor author must be the sender".to_string(),
        ));
    }

    let rumor = rumor.into_rumor()?;
    let rumor_json = serde_json::to_string(&rumor)?;
    let sealed = encryption::encrypt(sender, recipient_pubkey, &rumor_json)?;
    let seal = build_and_sign(sender, KIND_SEAL, vec![], sealed, Some(tweaked_timestamp()))?;

    let ephemeral = Identity::generate();
    let wrapped = encryption::encrypt(&ephemeral, recipient_pubkey, &seal.to_json()?)?;
    build_and_sign(
        &ephemeral,
        KIND_GIFT_WRAP,
        vec![TagBuilder::p_tag(recipient_pubkey)],
        wrapped,
        Some(tweaked_timestamp()),
    )
}

/// Unwraps a kind 1059 event addressed to `recipient`.
///
/// Verifies the seal signature and checks that the rumor was authored by
/// the seal signer.
///
/// # Errors
///
/// - [`NostrError::GiftWrap`] for structural problems (wrong kinds, author mismatch)
/// - [`NostrError::DecryptionFailed`] if either layer does not decrypt
/// - [`NostrError::IdMismatch`] / [`NostrError::BadSignature`] if the seal is forged
pub fn unwrap(recipient: &Identity, gift_wrap: &Event) -> Result<UnwrappedGift> {
    if gift_wrap.kind != KIND_GIFT_WRAP {
        return Err(NostrError::GiftWrap(format!(
            "expected kind {KIND_GIFT_WRAP}, got {}",
            gift_wrap.kind
        )));
    }

    let seal_json = encryption::decrypt(recipient, &gift_wrap.pubkey, &gift_wrap.content)?;
    let seal = Event::from_json(&seal_json)
        .map_err(|e| NostrError::GiftWrap(format!("malformed seal: {e}")))?;
    if seal.kind != KIND_SEAL {
        return Err(NostrError::GiftWrap(format!(
            "expected seal kind {KIND_SEAL}, got {}",
            seal.kind
        )));
    }
    seal.verify()?;

    let rumor_json = encryption::decrypt(recipient, &seal.pubkey, &seal.content)?;
    let rumor: UnsignedEvent = serde_json::from_str(&rumor_json)
        .map_err(|e| NostrError::GiftWrap(format!("malformed rumor: {e}")))?;

    if rumor.pubkey != seal.pubkey {
        return Err(NostrError::GiftWrap(
            "rumor author does not match seal signer".to_string(),
        ));
    }
    if let Some(id) = &rumor.id {
        if *id != rumor.compute_id()? {
            return Err(NostrError::IdMismatch);
        }
    }

    Ok(UnwrappedGift {
        sender_pubkey: seal.pubkey,
        wrapper_event_id: gift_wrap.id.clone(),
        rumor,
    })
}

fn tweaked_timestamp() -> i64 {
    Utc::now().timestamp() - rand::thread_rng().gen_range(0..=MAX_TIMESTAMP_TWEAK_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rumor_from(sender: &Identity, content: &str) -> UnsignedEvent {
        UnsignedEvent::new(&sender.pubkey_hex(), 14, vec![], content)
    }

    #[test]
    fn wrap_hides_sender() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let wrap = wrap(&alice, &bob.pubkey_hex(), rumor_from(&alice, "hi")).unwrap();

        assert_eq!(wrap.kind, KIND_GIFT_WRAP);
        assert_ne!(wrap.pubkey, alice.pubkey_hex());
        assert_eq!(wrap.tag_value("p"), Some(bob.pubkey_hex().as_str()));
        assert!(!wrap.content.contains("hi"));
        assert!(wrap.verify().is_ok());
    }

    #[test]
    fn wrap_timestamp_is_backdated_within_window() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let now = Utc::now().timestamp();
        let wrap = wrap(&alice, &bob.pubkey_hex(), rumor_from(&alice, "hi")).unwrap();
        assert!(wrap.created_at <= now + 1);
        assert!(wrap.created_at >= now - MAX_TIMESTAMP_TWEAK_SECS - 1);
    }

    #[test]
    fn each_wrap_uses_fresh_ephemeral_key() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let w1 = wrap(&alice, &bob.pubkey_hex(), rumor_from(&alice, "a")).unwrap();
        let w2 = wrap(&alice, &bob.pubkey_hex(), rumor_from(&alice, "a")).unwrap();
        assert_ne!(w1.pubkey, w2.pubkey);
    }

    #[test]
    fn roundtrip_recovers_sender_and_rumor() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let rumor = rumor_from(&alice, "meet at noon");
        let wrap = wrap(&alice, &bob.pubkey_hex(), rumor).unwrap();

        let gift = unwrap(&bob, &wrap).unwrap();
        assert_eq!(gift.sender_pubkey, alice.pubkey_hex());
        assert_eq!(gift.wrapper_event_id, wrap.id);
        assert_eq!(gift.rumor.content, "meet at noon");
        assert!(gift.rumor.id.is_some());
    }

    #[test]
    fn wrong_recipient_cannot_unwrap() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let eve = Identity::generate();
        let wrap = wrap(&alice, &bob.pubkey_hex(), rumor_from(&alice, "hi")).unwrap();
        assert!(matches!(
            unwrap(&eve, &wrap),
            Err(NostrError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn rumor_author_must_match_sender() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let mallory = Identity::generate();
        assert!(matches!(
            wrap(&alice, &bob.pubkey_hex(), rumor_from(&mallory, "hi")),
            Err(NostrError::GiftWrap(_))
        ));
    }

    #[test]
    fn non_wrap_kind_is_rejected() {
        let bob = Identity::generate();
        let note = build_and_sign(&bob, 1, vec![], "plain", None).unwrap();
        assert!(matches!(unwrap(&bob, &note), Err(NostrError::GiftWrap(_))));
    }
}
