//! Kind dispatch: maps an event's kind number to a decoder/validator.
//!
//! Every handler turns a verified [`Event`] into a [`DecodedPayload`] or a
//! [`KindValidationError`]. Kinds with no registered handler decode to
//! [`DecodedPayload::Opaque`] so newer kinds still reach observers.
//!
//! # Example
//!
//! ```
//! use driftwood_core::nostr::kinds::{DecodedPayload, KindRegistry, KindValidationError};
//! use driftwood_core::nostr::{build_and_sign, Event, Identity};
//!
//! let mut registry = KindRegistry::with_defaults();
//! registry.register(30_311, |event: &Event| {
//!     if event.content.is_empty() {
//!         return Err(KindValidationError::new(event.kind, "empty status"));
//!     }
//!     Ok(DecodedPayload::Custom(serde_json::json!({ "status": event.content })))
//! });
//!
//! let identity = Identity::generate();
//! let event = build_and_sign(&identity, 30_311, vec![], "online", None).unwrap();
//! assert!(matches!(registry.decode(&event), Ok(DecodedPayload::Custom(_))));
//! ```

mod handlers;
mod payload;

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use super::event::{
    Event, KIND_CHANNEL_CREATE, KIND_CHANNEL_MESSAGE, KIND_CONTACT_LIST, KIND_DELETION,
    KIND_DIRECT_MESSAGE, KIND_GIFT_WRAP, KIND_GROUP_MESSAGE, KIND_METADATA, KIND_REACTION,
    KIND_TEXT_NOTE,
};

pub use payload::{
    ChannelMessage, ChannelMetadata, Contact, ContactList, DecodedPayload, Deletion,
    DirectMessage, GiftWrapEnvelope, GroupMessage, Profile, Reaction, TextNote,
};

/// A kind handler rejected an event.
///
/// Not fatal: the offending event is dropped and counted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Kind {kind} validation failed: {message}")]
pub struct KindValidationError {
    /// Kind of the rejected event.
    pub kind: u16,
    /// What was wrong.
    pub message: String,
}

impl KindValidationError {
    /// Creates a validation error for `kind`.
    #[must_use]
    pub fn new(kind: u16, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Decodes and validates events of one kind.
///
/// Implemented for any `Fn(&Event) -> Result<DecodedPayload, KindValidationError>`.
pub trait KindHandler: Send + Sync {
    /// Extracts kind-specific semantics from `event`.
    ///
    /// # Errors
    ///
    /// Returns a [`KindValidationError`] if the event violates the kind's rules.
    fn decode(&self, event: &Event) -> Result<DecodedPayload, KindValidationError>;
}

impl<F> KindHandler for F
where
    F: Fn(&Event) -> Result<DecodedPayload, KindValidationError> + Send + Sync,
{
    fn decode(&self, event: &Event) -> Result<DecodedPayload, KindValidationError> {
        self(event)
    }
}

/// Kind number to handler dispatch table.
#[derive(Clone)]
pub struct KindRegistry {
    handlers: HashMap<u16, Arc<dyn KindHandler>>,
}

impl KindRegistry {
    /// Creates an empty registry. Every kind decodes as opaque.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Creates a registry with the built-in handlers.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(KIND_METADATA, handlers::metadata);
        registry.register(KIND_TEXT_NOTE, handlers::text_note);
        registry.register(KIND_CONTACT_LIST, handlers::contact_list);
        registry.register(KIND_DIRECT_MESSAGE, handlers::direct_message);
        registry.register(KIND_DELETION, handlers::deletion);
        registry.register(KIND_REACTION, handlers::reaction);
        registry.register(KIND_CHANNEL_CREATE, handlers::channel_create);
        registry.register(KIND_CHANNEL_MESSAGE, handlers::channel_message);
        registry.register(KIND_GROUP_MESSAGE, handlers::group_message);
        registry.register(KIND_GIFT_WRAP, handlers::gift_wrap);
        registry
    }

    /// Associates `kind` with `handler`. The last registration for a kind wins.
    pub fn register<H>(&mut self, kind: u16, handler: H)
    where
        H: KindHandler + 'static,
    {
        self.handlers.insert(kind, Arc::new(handler));
    }

    /// Removes the handler for `kind`, reverting it to opaque decoding.
    pub fn unregister(&mut self, kind: u16) -> bool {
        self.handlers.remove(&kind).is_some()
    }

    /// Returns true if a handler is registered for `kind`.
    #[must_use]
    pub fn is_registered(&self, kind: u16) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Decodes `event` with the handler registered for its kind.
    ///
    /// # Errors
    ///
    /// Returns the handler's [`KindValidationError`].
    pub fn decode(&self, event: &Event) -> Result<DecodedPayload, KindValidationError> {
        match self.handlers.get(&event.kind) {
            Some(handler) => handler.decode(event),
            None => Ok(DecodedPayload::Opaque),
        }
    }
}

impl Default for KindRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for KindRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.handlers.keys().copied().collect();
        kinds.sort_unstable();
        f.debug_struct("KindRegistry").field("kinds", &kinds).finish()
    }
}
