//! Decoded, kind-specific views of events.

use serde::{Deserialize, Serialize};

/// The result of decoding an event through the kind registry.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedPayload {
    /// Kind 0 profile metadata.
    Metadata(Profile),
    /// Kind 1 short text note.
    TextNote(TextNote),
    /// Kind 3 contact list (the full list, not a delta).
    ContactList(ContactList),
    /// Kind 4 encrypted direct message.
    DirectMessage(DirectMessage),
    /// Kind 5 deletion request.
    Deletion(Deletion),
    /// Kind 7 reaction.
    Reaction(Reaction),
    /// Kind 40 public channel creation.
    ChannelCreate(ChannelMetadata),
    /// Kind 42 public channel message.
    ChannelMessage(ChannelMessage),
    /// Kind 445 private group message.
    GroupMessage(GroupMessage),
    /// Kind 1059 gift wrap envelope.
    GiftWrap(GiftWrapEnvelope),
    /// Value produced by an application-registered handler.
    Custom(serde_json::Value),
    /// No handler registered for the kind; the raw event is passed through.
    Opaque,
}

/// Kind 0 profile fields. Unknown fields are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nip05: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Kind 1 text note with its thread references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextNote {
    pub content: String,
    /// Thread root event id.
    pub root: Option<String>,
    /// Event this note replies to directly.
    pub reply_to: Option<String>,
    /// Mentioned pubkeys (`p` tags).
    pub mentions: Vec<String>,
}

/// One entry of a contact list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub pubkey: String,
    pub relay: Option<String>,
    pub petname: Option<String>,
}

/// Kind 3 contact list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactList {
    pub contacts: Vec<Contact>,
}

impl ContactList {
    /// Returns true if `pubkey` is in the list.
    #[must_use]
    pub fn contains(&self, pubkey: &str) -> bool {
        self.contacts.iter().any(|c| c.pubkey == pubkey)
    }
}

/// Kind 4 direct message, still encrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectMessage {
    pub recipient: String,
    pub ciphertext: String,
}

/// Kind 5 deletion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deletion {
    pub event_ids: Vec<String>,
    /// `a` tag coordinates (`kind:pubkey:d`).
    pub addresses: Vec<String>,
    pub reason: String,
}

/// Kind 7 reaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reaction {
    pub target_event: String,
    pub target_author: Option<String>,
    /// `+` when the content is empty.
    pub glyph: String,
}

/// Kind 40 channel metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
}

/// Kind 42 channel message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    /// Id of the kind 40 event that created the channel.
    pub channel_id: String,
    pub reply_to: Option<String>,
    pub content: String,
}

/// Kind 445 group message, still encrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMessage {
    pub group_id: String,
    pub ciphertext: String,
}

/// Kind 1059 gift wrap outer layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GiftWrapEnvelope {
    pub recipient: String,
}
