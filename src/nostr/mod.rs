//! Protocol layer: identity, events, encryption and kind dispatch.
//!
//! # Architecture
//!
//! ```text
//! intent → build_and_sign (Identity signs the id) → Event → relay pool
//!
//! wire → Event::verify → KindRegistry::decode → DecodedPayload
//!                              ↓ (encrypted kinds)
//!                      encryption / giftwrap
//! ```
//!
//! # Security
//!
//! - Secret keys are zeroized on drop and never formatted
//! - Every inbound event passes [`Event::verify`] before it is decoded
//! - Encrypted payloads use NIP-44 v2, which is authenticated: a wrong key
//!   or tampered ciphertext is an error, never garbage plaintext
//! - Gift wraps hide the sender behind a single-use key

mod error;
mod event;
mod keys;
mod tags;

pub mod encryption;
pub mod giftwrap;
pub mod identity;
pub mod kinds;

pub use error::{NostrError, Result};
pub use event::{
    build_and_sign, canonicalize, compute_id, is_addressable, is_replaceable, Event,
    UnsignedEvent, KIND_CHANNEL_CREATE, KIND_CHANNEL_MESSAGE, KIND_CONTACT_LIST, KIND_DELETION,
    KIND_DIRECT_MESSAGE, KIND_GIFT_WRAP, KIND_GROUP_INVITE, KIND_GROUP_MESSAGE, KIND_METADATA,
    KIND_REACTION, KIND_SEAL, KIND_TEXT_NOTE,
};
pub use identity::{Identity, IdentityError, IdentityStore};
pub use keys::{is_hex_32, parse_public_key};
pub use kinds::{DecodedPayload, KindHandler, KindRegistry, KindValidationError};
pub use tags::TagBuilder;
