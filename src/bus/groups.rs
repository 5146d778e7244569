//! Private groups keyed by a shared symmetric secret.
//!
//! # Group Lifecycle
//!
//! ```text
//! creator                                    member
//!   │ create_private_group(name, members)
//!   │   generate 32-byte key
//!   │   kind 444 invite rumor ──gift wrap──▶ pending invite
//!   │                                          │ join_private_group(id)
//!   ▼                                          ▼
//! kind 445 (h = group id, NIP-44 under group key) ◀──▶ both sides
//! ```
//!
//! Invites only travel inside gift wraps, so the key is never visible to
//! relays. Messages from pubkeys outside the member list are rejected.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use super::error::{ClientError, Result};
use crate::nostr::encryption::generate_group_key;
use crate::nostr::giftwrap::UnwrappedGift;
use crate::nostr::{is_hex_32, Identity, UnsignedEvent, KIND_GROUP_INVITE};

/// A group this client can read and write.
#[derive(Clone)]
pub struct PrivateGroup {
    /// Random 32-byte hex id, carried in the `h` tag.
    pub group_id: String,
    /// Display name.
    pub name: String,
    /// Member pubkeys (hex), the creator included.
    pub members: BTreeSet<String>,
    key: Zeroizing<[u8; 32]>,
}

impl PrivateGroup {
    /// Creates a new group with a fresh id and key. `creator` is always a member.
    #[must_use]
    pub fn create(name: &str, creator: &str, members: &[String]) -> Self {
        let mut all: BTreeSet<String> = members.iter().cloned().collect();
        all.insert(creator.to_string());
        Self {
            group_id: hex::encode(rand::random::<[u8; 32]>()),
            name: name.to_string(),
            members: all,
            key: generate_group_key(),
        }
    }

    /// Returns true if `pubkey` may post to the group.
    #[must_use]
    pub fn is_member(&self, pubkey: &str) -> bool {
        self.members.contains(pubkey)
    }

    pub(crate) const fn key(&self) -> &Zeroizing<[u8; 32]> {
        &self.key
    }

    /// Builds the kind 444 invite rumor, authored by `sender`.
    pub(crate) fn invite_rumor(&self, sender: &Identity) -> Result<UnsignedEvent> {
        let mut payload = InvitePayload {
            group_id: self.group_id.clone(),
            name: self.name.clone(),
            key: hex::encode(self.key.as_slice()),
            members: self.members.iter().cloned().collect(),
        };
        let content = serde_json::to_string(&payload).map(Zeroizing::new);
        payload.key.zeroize();
        let content = content.map_err(crate::nostr::NostrError::from)?;
        Ok(UnsignedEvent::new(
            &sender.pubkey_hex(),
            KIND_GROUP_INVITE,
            vec![],
            content.as_str(),
        ))
    }
}

impl std::fmt::Debug for PrivateGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateGroup")
            .field("group_id", &self.group_id)
            .field("name", &self.name)
            .field("members", &self.members.len())
            .field("key", &"<redacted>")
            .finish()
    }
}

/// An invitation received through a gift wrap and not yet answered.
#[derive(Clone)]
pub struct GroupInvite {
    /// Group being offered.
    pub group: PrivateGroup,
    /// Public key (hex) of who invited us, authenticated by the seal.
    pub inviter: String,
    /// Id of the kind 1059 event that carried the invite.
    pub wrapper_event_id: String,
    /// When the invite rumor was created (Unix timestamp).
    pub invited_at: i64,
}

impl GroupInvite {
    /// Parses an unwrapped kind 444 gift.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidInvite`] if the rumor is not a well-formed
    /// invite or the inviter is not a member of the group they invite to.
    pub fn from_gift(gift: &UnwrappedGift) -> Result<Self> {
        if gift.rumor.kind != KIND_GROUP_INVITE {
            return Err(ClientError::InvalidInvite(format!(
                "expected kind {KIND_GROUP_INVITE}, got {}",
                gift.rumor.kind
            )));
        }
        let mut payload: InvitePayload = serde_json::from_str(&gift.rumor.content)
            .map_err(|e| ClientError::InvalidInvite(format!("malformed content: {e}")))?;
        let key = parse_key(&payload.key);
        payload.key.zeroize();
        let key = key?;

        if !is_hex_32(&payload.group_id) {
            return Err(ClientError::InvalidInvite("group id is not 32-byte hex".to_string()));
        }
        let members: BTreeSet<String> = payload.members.into_iter().collect();
        if let Some(bad) = members.iter().find(|m| !is_hex_32(m)) {
            return Err(ClientError::InvalidInvite(format!("invalid member pubkey: {bad}")));
        }
        if !members.contains(&gift.sender_pubkey) {
            return Err(ClientError::InvalidInvite(
                "inviter is not a group member".to_string(),
            ));
        }

        Ok(Self {
            group: PrivateGroup {
                group_id: payload.group_id,
                name: payload.name,
                members,
                key,
            },
            inviter: gift.sender_pubkey.clone(),
            wrapper_event_id: gift.wrapper_event_id.clone(),
            invited_at: gift.rumor.created_at,
        })
    }
}

impl std::fmt::Debug for GroupInvite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupInvite")
            .field("group", &self.group)
            .field("inviter", &self.inviter)
            .field("invited_at", &self.invited_at)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize, Deserialize)]
struct InvitePayload {
    group_id: String,
    name: String,
    /// Group key, hex.
    key: String,
    members: Vec<String>,
}

fn parse_key(key_hex: &str) -> Result<Zeroizing<[u8; 32]>> {
    let bytes = Zeroizing::new(
        hex::decode(key_hex).map_err(|_| ClientError::InvalidInvite("key is not hex".to_string()))?,
    );
    let mut key = Zeroizing::new([0u8; 32]);
    if bytes.len() != key.len() {
        return Err(ClientError::InvalidInvite("key must be 32 bytes".to_string()));
    }
    key.copy_from_slice(&bytes);
    Ok(key)
}

/// Joined groups and pending invites.
#[derive(Debug, Default)]
pub struct GroupBook {
    joined: HashMap<String, PrivateGroup>,
    pending: HashMap<String, GroupInvite>,
}

impl GroupBook {
    /// Creates an empty book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a joined group.
    pub fn insert(&mut self, group: PrivateGroup) {
        self.pending.remove(&group.group_id);
        self.joined.insert(group.group_id.clone(), group);
    }

    /// Looks up a joined group.
    #[must_use]
    pub fn get(&self, group_id: &str) -> Option<&PrivateGroup> {
        self.joined.get(group_id)
    }

    /// Records an invite. Invites for groups already joined are ignored;
    /// a newer invite replaces an older one for the same group.
    pub fn offer(&mut self, invite: GroupInvite) -> bool {
        if self.joined.contains_key(&invite.group.group_id) {
            return false;
        }
        match self.pending.get(&invite.group.group_id) {
            Some(existing) if existing.invited_at > invite.invited_at => false,
            _ => {
                self.pending.insert(invite.group.group_id.clone(), invite);
                true
            }
        }
    }

    /// Moves a pending invite into the joined set.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::UnknownGroup`] if no invite is pending.
    pub fn accept(&mut self, group_id: &str) -> Result<PrivateGroup> {
        let invite = self
            .pending
            .remove(group_id)
            .ok_or_else(|| ClientError::UnknownGroup(group_id.to_string()))?;
        self.joined.insert(group_id.to_string(), invite.group.clone());
        Ok(invite.group)
    }

    /// Drops a pending invite. Returns false if none was pending.
    pub fn decline(&mut self, group_id: &str) -> bool {
        self.pending.remove(group_id).is_some()
    }

    /// Pending invites, oldest first.
    #[must_use]
    pub fn pending(&self) -> Vec<GroupInvite> {
        let mut invites: Vec<GroupInvite> = self.pending.values().cloned().collect();
        invites.sort_by_key(|invite| invite.invited_at);
        invites
    }

    /// Joined groups.
    #[must_use]
    pub fn joined(&self) -> Vec<PrivateGroup> {
        self.joined.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nostr::giftwrap;

    fn invite_for(creator: &Identity, member: &Identity) -> (PrivateGroup, GroupInvite) {
        let group = PrivateGroup::create("family", &creator.pubkey_hex(), &[member.pubkey_hex()]);
        let wrap = giftwrap::wrap(
            creator,
            &member.pubkey_hex(),
            group.invite_rumor(creator).unwrap(),
        )
        .unwrap();
        let gift = giftwrap::unwrap(member, &wrap).unwrap();
        (group, GroupInvite::from_gift(&gift).unwrap())
    }

    #[test]
    fn creator_is_always_member() {
        let creator = Identity::generate();
        let group = PrivateGroup::create("g", &creator.pubkey_hex(), &[]);
        assert!(group.is_member(&creator.pubkey_hex()));
        assert!(is_hex_32(&group.group_id));
    }

    #[test]
    fn invite_carries_group_through_gift_wrap() {
        let creator = Identity::generate();
        let member = Identity::generate();
        let (group, invite) = invite_for(&creator, &member);

        assert_eq!(invite.group.group_id, group.group_id);
        assert_eq!(invite.group.name, "family");
        assert_eq!(invite.group.members, group.members);
        assert_eq!(invite.group.key().as_slice(), group.key().as_slice());
        assert_eq!(invite.inviter, creator.pubkey_hex());
    }

    #[test]
    fn debug_output_redacts_key() {
        let creator = Identity::generate();
        let group = PrivateGroup::create("g", &creator.pubkey_hex(), &[]);
        let debug = format!("{group:?}");
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains(&hex::encode(group.key().as_slice())));
    }

    #[test]
    fn rejects_invite_from_non_member() {
        let outsider = Identity::generate();
        let member = Identity::generate();
        let group = PrivateGroup::create("g", &member.pubkey_hex(), &[]);
        // Signed by outsider, who is not in the member list.
        let mut rumor = group.invite_rumor(&member).unwrap();
        rumor.pubkey = outsider.pubkey_hex();
        let wrap = giftwrap::wrap(&outsider, &member.pubkey_hex(), rumor).unwrap();
        let gift = giftwrap::unwrap(&member, &wrap).unwrap();

        assert!(matches!(
            GroupInvite::from_gift(&gift),
            Err(ClientError::InvalidInvite(_))
        ));
    }

    #[test]
    fn rejects_non_invite_rumor() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let rumor = UnsignedEvent::new(&alice.pubkey_hex(), 14, vec![], "{}");
        let wrap = giftwrap::wrap(&alice, &bob.pubkey_hex(), rumor).unwrap();
        let gift = giftwrap::unwrap(&bob, &wrap).unwrap();
        assert!(GroupInvite::from_gift(&gift).is_err());
    }

    #[test]
    fn book_accept_and_decline() {
        let creator = Identity::generate();
        let member = Identity::generate();
        let (_, invite) = invite_for(&creator, &member);
        let group_id = invite.group.group_id.clone();

        let mut book = GroupBook::new();
        assert!(book.offer(invite.clone()));
        assert_eq!(book.pending().len(), 1);

        let joined = book.accept(&group_id).unwrap();
        assert_eq!(joined.group_id, group_id);
        assert!(book.get(&group_id).is_some());
        assert!(book.pending().is_empty());

        // Already joined: the invite is not offered again.
        assert!(!book.offer(invite));
        assert!(!book.decline(&group_id));
        assert!(matches!(
            book.accept("missing"),
            Err(ClientError::UnknownGroup(_))
        ));
    }
}
