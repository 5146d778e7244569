//! Current-state view of replaceable events.

use std::collections::HashMap;

use crate::nostr::{is_addressable, is_replaceable, Event};

/// Address of a replaceable event: kind, author and (for addressable kinds)
/// the `d` tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReplaceableKey {
    pub kind: u16,
    pub author: String,
    /// Empty for non-addressable kinds.
    pub identifier: String,
}

impl ReplaceableKey {
    /// Returns the key for `event`, or `None` if its kind is not replaceable.
    #[must_use]
    pub fn for_event(event: &Event) -> Option<Self> {
        let identifier = if is_addressable(event.kind) {
            event.identifier().to_string()
        } else if is_replaceable(event.kind) {
            String::new()
        } else {
            return None;
        };
        Some(Self {
            kind: event.kind,
            author: event.pubkey.clone(),
            identifier,
        })
    }
}

/// Latest event per [`ReplaceableKey`].
///
/// The newer `created_at` wins; equal timestamps keep the lexicographically
/// larger id, so every replica converges regardless of arrival order.
#[derive(Debug, Default)]
pub struct ReplaceableState {
    current: HashMap<ReplaceableKey, Event>,
}

impl ReplaceableState {
    /// Creates an empty view.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Offers `event` to the view. Returns true if it is now current.
    ///
    /// Non-replaceable kinds are ignored.
    pub fn apply(&mut self, event: &Event) -> bool {
        let Some(key) = ReplaceableKey::for_event(event) else {
            return false;
        };
        match self.current.get(&key) {
            Some(existing) if !supersedes(event, existing) => false,
            _ => {
                self.current.insert(key, event.clone());
                true
            }
        }
    }

    /// The current event at `key`.
    #[must_use]
    pub fn get(&self, key: &ReplaceableKey) -> Option<&Event> {
        self.current.get(key)
    }

    /// Number of addresses tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.current.len()
    }

    /// Returns true if nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }
}

fn supersedes(candidate: &Event, existing: &Event) -> bool {
    (candidate.created_at, &candidate.id) > (existing.created_at, &existing.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nostr::{build_and_sign, Identity, TagBuilder};

    fn contacts_at(identity: &Identity, created_at: i64) -> Event {
        build_and_sign(identity, 3, vec![], "", Some(created_at)).unwrap()
    }

    #[test]
    fn newer_wins_in_either_order() {
        let identity = Identity::generate();
        let old = contacts_at(&identity, 100);
        let new = contacts_at(&identity, 200);
        let key = ReplaceableKey::for_event(&old).unwrap();

        let mut forward = ReplaceableState::new();
        assert!(forward.apply(&old));
        assert!(forward.apply(&new));
        assert_eq!(forward.get(&key).unwrap().created_at, 200);

        let mut backward = ReplaceableState::new();
        assert!(backward.apply(&new));
        assert!(!backward.apply(&old));
        assert_eq!(backward.get(&key).unwrap().created_at, 200);
    }

    #[test]
    fn tie_keeps_larger_id() {
        let identity = Identity::generate();
        let a = build_and_sign(&identity, 3, vec![], "a", Some(100)).unwrap();
        let b = build_and_sign(&identity, 3, vec![], "b", Some(100)).unwrap();
        let larger = if a.id > b.id { a.clone() } else { b.clone() };
        let key = ReplaceableKey::for_event(&a).unwrap();

        let mut state = ReplaceableState::new();
        state.apply(&a);
        state.apply(&b);
        assert_eq!(state.get(&key).unwrap().id, larger.id);

        let mut state = ReplaceableState::new();
        state.apply(&b);
        state.apply(&a);
        assert_eq!(state.get(&key).unwrap().id, larger.id);
    }

    #[test]
    fn authors_are_tracked_separately() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let mut state = ReplaceableState::new();
        state.apply(&contacts_at(&alice, 200));
        assert!(state.apply(&contacts_at(&bob, 100)));
        assert_eq!(state.len(), 2);
    }

    #[test]
    fn addressable_kinds_key_on_d_tag() {
        let identity = Identity::generate();
        let first =
            build_and_sign(&identity, 30_000, vec![TagBuilder::d_tag("a")], "", Some(1)).unwrap();
        let second =
            build_and_sign(&identity, 30_000, vec![TagBuilder::d_tag("b")], "", Some(1)).unwrap();

        let mut state = ReplaceableState::new();
        assert!(state.apply(&first));
        assert!(state.apply(&second));
        assert_eq!(state.len(), 2);
    }

    #[test]
    fn regular_kinds_are_ignored() {
        let note = build_and_sign(&Identity::generate(), 1, vec![], "hi", None).unwrap();
        let mut state = ReplaceableState::new();
        assert!(!state.apply(&note));
        assert!(state.is_empty());
    }
}
