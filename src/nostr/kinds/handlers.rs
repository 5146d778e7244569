//! Built-in kind handlers.

use super::payload::{
    ChannelMessage, ChannelMetadata, Contact, ContactList, DecodedPayload, Deletion,
    DirectMessage, GiftWrapEnvelope, GroupMessage, Profile, Reaction, TextNote,
};
use super::KindValidationError;
use crate::nostr::event::Event;
use crate::nostr::keys::is_hex_32;

type HandlerResult = Result<DecodedPayload, KindValidationError>;

fn tag_values<'a>(event: &'a Event, name: &'a str) -> impl Iterator<Item = &'a [String]> + 'a {
    event.tags_named(name).map(Vec::as_slice)
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|v| !v.is_empty()).cloned()
}

/// Requires exactly one `name` tag and returns its value.
fn single_tag<'a>(event: &'a Event, name: &str) -> Result<&'a str, KindValidationError> {
    let mut tags = event.tags_named(name);
    match (tags.next(), tags.next()) {
        (Some(tag), None) => tag.get(1).map(String::as_str).ok_or_else(|| {
            KindValidationError::new(event.kind, format!("`{name}` tag has no value"))
        }),
        (None, _) => Err(KindValidationError::new(
            event.kind,
            format!("missing `{name}` tag"),
        )),
        (Some(_), Some(_)) => Err(KindValidationError::new(
            event.kind,
            format!("expected exactly one `{name}` tag"),
        )),
    }
}

fn require_hex_32(event: &Event, what: &str, value: &str) -> Result<(), KindValidationError> {
    if is_hex_32(value) {
        Ok(())
    } else {
        Err(KindValidationError::new(
            event.kind,
            format!("invalid {what}: {value}"),
        ))
    }
}

/// Checks every reference tag carries a value.
fn require_reference_values(event: &Event) -> Result<(), KindValidationError> {
    for tag in &event.tags {
        if matches!(tag.first().map(String::as_str), Some("e" | "p")) && tag.len() < 2 {
            return Err(KindValidationError::new(
                event.kind,
                format!("`{}` tag has no value", tag[0]),
            ));
        }
    }
    Ok(())
}

/// Finds `(root, reply)` event ids from NIP-10 markers, falling back to
/// positional `e` tags (first is root, last is reply).
fn thread_refs(event: &Event) -> (Option<String>, Option<String>) {
    let e_tags: Vec<&[String]> = tag_values(event, "e").collect();
    let marked = |marker: &str| {
        e_tags
            .iter()
            .find(|tag| tag.get(3).map(String::as_str) == Some(marker))
            .and_then(|tag| tag.get(1).cloned())
    };

    let root = marked("root");
    let reply = marked("reply");
    if root.is_some() || reply.is_some() {
        // A lone root marker is a direct reply to the root.
        let reply = reply.or_else(|| root.clone());
        return (root, reply);
    }

    let first = e_tags.first().and_then(|tag| tag.get(1).cloned());
    let last = e_tags.last().and_then(|tag| tag.get(1).cloned());
    (first, last)
}

pub(super) fn metadata(event: &Event) -> HandlerResult {
    let profile: Profile = serde_json::from_str(&event.content)
        .map_err(|e| KindValidationError::new(event.kind, format!("content is not a profile object: {e}")))?;
    Ok(DecodedPayload::Metadata(profile))
}

pub(super) fn text_note(event: &Event) -> HandlerResult {
    require_reference_values(event)?;
    let (root, reply_to) = thread_refs(event);
    let mentions = tag_values(event, "p")
        .filter_map(|tag| tag.get(1).cloned())
        .collect();

    Ok(DecodedPayload::TextNote(TextNote {
        content: event.content.clone(),
        root,
        reply_to,
        mentions,
    }))
}

pub(super) fn contact_list(event: &Event) -> HandlerResult {
    let mut contacts = Vec::new();
    for tag in tag_values(event, "p") {
        let pubkey = tag.get(1).map(String::as_str).unwrap_or_default();
        require_hex_32(event, "contact pubkey", pubkey)?;
        contacts.push(Contact {
            pubkey: pubkey.to_string(),
            relay: non_empty(tag.get(2)),
            petname: non_empty(tag.get(3)),
        });
    }
    Ok(DecodedPayload::ContactList(ContactList { contacts }))
}

pub(super) fn direct_message(event: &Event) -> HandlerResult {
    let recipient = single_tag(event, "p")?;
    require_hex_32(event, "recipient pubkey", recipient)?;
    if event.content.is_empty() {
        return Err(KindValidationError::new(event.kind, "empty ciphertext"));
    }
    Ok(DecodedPayload::DirectMessage(DirectMessage {
        recipient: recipient.to_string(),
        ciphertext: event.content.clone(),
    }))
}

pub(super) fn deletion(event: &Event) -> HandlerResult {
    let event_ids: Vec<String> = tag_values(event, "e")
        .filter_map(|tag| tag.get(1).cloned())
        .collect();
    let addresses: Vec<String> = tag_values(event, "a")
        .filter_map(|tag| tag.get(1).cloned())
        .collect();

    if event_ids.is_empty() && addresses.is_empty() {
        return Err(KindValidationError::new(
            event.kind,
            "deletion references no events",
        ));
    }
    Ok(DecodedPayload::Deletion(Deletion {
        event_ids,
        addresses,
        reason: event.content.clone(),
    }))
}

pub(super) fn reaction(event: &Event) -> HandlerResult {
    let target = single_tag(event, "e")?;
    require_hex_32(event, "target event id", target)?;
    let target_author = tag_values(event, "p")
        .last()
        .and_then(|tag| tag.get(1).cloned());
    let glyph = if event.content.is_empty() {
        "+".to_string()
    } else {
        event.content.clone()
    };

    Ok(DecodedPayload::Reaction(Reaction {
        target_event: target.to_string(),
        target_author,
        glyph,
    }))
}

pub(super) fn channel_create(event: &Event) -> HandlerResult {
    let metadata: ChannelMetadata = serde_json::from_str(&event.content).map_err(|e| {
        KindValidationError::new(event.kind, format!("content is not a channel object: {e}"))
    })?;
    Ok(DecodedPayload::ChannelCreate(metadata))
}

pub(super) fn channel_message(event: &Event) -> HandlerResult {
    let e_tags: Vec<&[String]> = tag_values(event, "e").collect();
    let channel_tag = e_tags
        .iter()
        .find(|tag| tag.get(3).map(String::as_str) == Some("root"))
        .or_else(|| e_tags.first())
        .ok_or_else(|| KindValidationError::new(event.kind, "missing channel `e` tag"))?;
    let channel_id = channel_tag.get(1).map(String::as_str).unwrap_or_default();
    require_hex_32(event, "channel id", channel_id)?;

    let reply_to = e_tags
        .iter()
        .find(|tag| tag.get(3).map(String::as_str) == Some("reply"))
        .and_then(|tag| tag.get(1).cloned());

    Ok(DecodedPayload::ChannelMessage(ChannelMessage {
        channel_id: channel_id.to_string(),
        reply_to,
        content: event.content.clone(),
    }))
}

pub(super) fn group_message(event: &Event) -> HandlerResult {
    let group_id = single_tag(event, "h")?;
    if group_id.is_empty() {
        return Err(KindValidationError::new(event.kind, "empty group id"));
    }
    if event.content.is_empty() {
        return Err(KindValidationError::new(event.kind, "empty ciphertext"));
    }
    Ok(DecodedPayload::GroupMessage(GroupMessage {
        group_id: group_id.to_string(),
        ciphertext: event.content.clone(),
    }))
}

pub(super) fn gift_wrap(event: &Event) -> HandlerResult {
    let recipient = single_tag(event, "p")?;
    require_hex_32(event, "recipient pubkey", recipient)?;
    Ok(DecodedPayload::GiftWrap(GiftWrapEnvelope {
        recipient: recipient.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nostr::{build_and_sign, Identity, TagBuilder};

    fn event(kind: u16, tags: Vec<Vec<String>>, content: &str) -> Event {
        build_and_sign(&Identity::generate(), kind, tags, content, None).unwrap()
    }

    fn hex_id(byte: u8) -> String {
        hex::encode([byte; 32])
    }

    #[test]
    fn metadata_parses_profile_and_keeps_extra_fields() {
        let decoded = metadata(&event(
            0,
            vec![],
            r#"{"name":"alice","about":"hi","lud16":"a@b.c"}"#,
        ))
        .unwrap();
        let DecodedPayload::Metadata(profile) = decoded else {
            panic!("expected metadata");
        };
        assert_eq!(profile.name.as_deref(), Some("alice"));
        assert!(profile.extra.contains_key("lud16"));
    }

    #[test]
    fn metadata_rejects_non_object() {
        assert!(metadata(&event(0, vec![], "not json")).is_err());
        assert!(metadata(&event(0, vec![], "[1,2]")).is_err());
    }

    #[test]
    fn text_note_marked_thread_refs() {
        let root = hex_id(1);
        let parent = hex_id(2);
        let decoded = text_note(&event(
            1,
            vec![
                TagBuilder::e_tag_with_marker(&root, "", "root"),
                TagBuilder::e_tag_with_marker(&parent, "", "reply"),
                TagBuilder::p_tag(&hex_id(3)),
            ],
            "reply body",
        ))
        .unwrap();
        let DecodedPayload::TextNote(note) = decoded else {
            panic!("expected note");
        };
        assert_eq!(note.root, Some(root));
        assert_eq!(note.reply_to, Some(parent));
        assert_eq!(note.mentions, vec![hex_id(3)]);
    }

    #[test]
    fn text_note_positional_thread_refs() {
        let decoded = text_note(&event(
            1,
            vec![TagBuilder::e_tag(&hex_id(1)), TagBuilder::e_tag(&hex_id(2))],
            "x",
        ))
        .unwrap();
        let DecodedPayload::TextNote(note) = decoded else {
            panic!("expected note");
        };
        assert_eq!(note.root, Some(hex_id(1)));
        assert_eq!(note.reply_to, Some(hex_id(2)));
    }

    #[test]
    fn text_note_without_refs() {
        let DecodedPayload::TextNote(note) = text_note(&event(1, vec![], "gm")).unwrap() else {
            panic!("expected note");
        };
        assert_eq!(note.content, "gm");
        assert!(note.root.is_none());
        assert!(note.reply_to.is_none());
    }

    #[test]
    fn text_note_rejects_valueless_reference() {
        assert!(text_note(&event(1, vec![vec!["e".to_string()]], "x")).is_err());
    }

    #[test]
    fn contact_list_collects_entries() {
        let decoded = contact_list(&event(
            3,
            vec![
                TagBuilder::contact_tag(&hex_id(1), "wss://r.example", "bob"),
                TagBuilder::p_tag(&hex_id(2)),
            ],
            "",
        ))
        .unwrap();
        let DecodedPayload::ContactList(list) = decoded else {
            panic!("expected contacts");
        };
        assert_eq!(list.contacts.len(), 2);
        assert_eq!(list.contacts[0].petname.as_deref(), Some("bob"));
        assert_eq!(list.contacts[1].relay, None);
        assert!(list.contains(&hex_id(2)));
    }

    #[test]
    fn contact_list_rejects_bad_pubkey() {
        let err = contact_list(&event(3, vec![TagBuilder::p_tag("nothex")], "")).unwrap_err();
        assert_eq!(err.kind, 3);
    }

    #[test]
    fn direct_message_requires_single_recipient_and_content() {
        assert!(direct_message(&event(4, vec![TagBuilder::p_tag(&hex_id(1))], "ct")).is_ok());
        assert!(direct_message(&event(4, vec![], "ct")).is_err());
        assert!(direct_message(&event(4, vec![TagBuilder::p_tag(&hex_id(1))], "")).is_err());
        assert!(direct_message(&event(
            4,
            vec![TagBuilder::p_tag(&hex_id(1)), TagBuilder::p_tag(&hex_id(2))],
            "ct"
        ))
        .is_err());
    }

    #[test]
    fn deletion_requires_reference() {
        assert!(deletion(&event(5, vec![], "oops")).is_err());
        let DecodedPayload::Deletion(del) =
            deletion(&event(5, vec![TagBuilder::e_tag(&hex_id(9))], "oops")).unwrap()
        else {
            panic!("expected deletion");
        };
        assert_eq!(del.event_ids, vec![hex_id(9)]);
        assert_eq!(del.reason, "oops");
    }

    #[test]
    fn reaction_requires_exactly_one_target() {
        let target = hex_id(7);
        let DecodedPayload::Reaction(r) = reaction(&event(
            7,
            vec![TagBuilder::e_tag(&target), TagBuilder::p_tag(&hex_id(8))],
            "🔥",
        ))
        .unwrap() else {
            panic!("expected reaction");
        };
        assert_eq!(r.target_event, target);
        assert_eq!(r.target_author, Some(hex_id(8)));
        assert_eq!(r.glyph, "🔥");

        assert!(reaction(&event(7, vec![], "+")).is_err());
        assert!(reaction(&event(
            7,
            vec![TagBuilder::e_tag(&hex_id(1)), TagBuilder::e_tag(&hex_id(2))],
            "+"
        ))
        .is_err());
        assert!(reaction(&event(7, vec![TagBuilder::e_tag("short")], "+")).is_err());
    }

    #[test]
    fn reaction_empty_content_is_like() {
        let DecodedPayload::Reaction(r) =
            reaction(&event(7, vec![TagBuilder::e_tag(&hex_id(1))], "")).unwrap()
        else {
            panic!("expected reaction");
        };
        assert_eq!(r.glyph, "+");
    }

    #[test]
    fn channel_create_parses_metadata() {
        let DecodedPayload::ChannelCreate(meta) =
            channel_create(&event(40, vec![], r#"{"name":"rust","about":"crabs"}"#)).unwrap()
        else {
            panic!("expected channel");
        };
        assert_eq!(meta.name.as_deref(), Some("rust"));
        assert!(channel_create(&event(40, vec![], "plain")).is_err());
    }

    #[test]
    fn channel_message_finds_channel() {
        let channel = hex_id(4);
        let DecodedPayload::ChannelMessage(msg) = channel_message(&event(
            42,
            vec![
                TagBuilder::e_tag_with_marker(&channel, "", "root"),
                TagBuilder::e_tag_with_marker(&hex_id(5), "", "reply"),
            ],
            "hello room",
        ))
        .unwrap() else {
            panic!("expected channel message");
        };
        assert_eq!(msg.channel_id, channel);
        assert_eq!(msg.reply_to, Some(hex_id(5)));

        assert!(channel_message(&event(42, vec![], "lost")).is_err());
    }

    #[test]
    fn group_message_requires_h_tag_and_content() {
        assert!(group_message(&event(445, vec![TagBuilder::h_tag("g1")], "ct")).is_ok());
        assert!(group_message(&event(445, vec![], "ct")).is_err());
        assert!(group_message(&event(445, vec![TagBuilder::h_tag("g1")], "")).is_err());
    }

    #[test]
    fn gift_wrap_requires_recipient() {
        assert!(gift_wrap(&event(1059, vec![TagBuilder::p_tag(&hex_id(1))], "ct")).is_ok());
        assert!(gift_wrap(&event(1059, vec![], "ct")).is_err());
    }
}
