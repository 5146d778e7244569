//! Subscription filters (NIP-01).
//!
//! A filter serializes to the JSON object relays expect:
//!
//! ```json
//! {"ids":[..],"authors":[..],"kinds":[..],"#e":[..],"since":0,"until":0,"limit":0}
//! ```
//!
//! Absent fields are wildcards. Several filters in one request are OR-ed.

use std::collections::{BTreeMap, BTreeSet};

use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::nostr::Event;

/// Query describing which events a subscription wants.
///
/// # Example
///
/// ```
/// use driftwood_core::relay::Filter;
///
/// let filter = Filter::new().kind(3).author("ab".repeat(32)).limit(1);
/// let json = serde_json::to_string(&filter).unwrap();
/// assert_eq!(json, format!(r#"{{"authors":["{}"],"kinds":[3],"limit":1}}"#, "ab".repeat(32)));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub ids: Option<BTreeSet<String>>,
    pub authors: Option<BTreeSet<String>>,
    pub kinds: Option<BTreeSet<u16>>,
    /// Single-letter tag name to accepted values (`#e`, `#p`, `#h`, ...).
    pub tags: BTreeMap<char, BTreeSet<String>>,
    pub since: Option<i64>,
    pub until: Option<i64>,
    pub limit: Option<usize>,
}

impl Filter {
    /// Creates a wildcard filter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an event id.
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.ids.get_or_insert_with(BTreeSet::new).insert(id.into());
        self
    }

    /// Adds an author pubkey.
    #[must_use]
    pub fn author(mut self, pubkey: impl Into<String>) -> Self {
        self.authors
            .get_or_insert_with(BTreeSet::new)
            .insert(pubkey.into());
        self
    }

    /// Adds several author pubkeys.
    #[must_use]
    pub fn authors<I, S>(mut self, pubkeys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors
            .get_or_insert_with(BTreeSet::new)
            .extend(pubkeys.into_iter().map(Into::into));
        self
    }

    /// Adds a kind.
    #[must_use]
    pub fn kind(mut self, kind: u16) -> Self {
        self.kinds.get_or_insert_with(BTreeSet::new).insert(kind);
        self
    }

    /// Adds several kinds.
    #[must_use]
    pub fn kinds(mut self, kinds: impl IntoIterator<Item = u16>) -> Self {
        self.kinds.get_or_insert_with(BTreeSet::new).extend(kinds);
        self
    }

    /// Adds an accepted value for the single-letter tag `name`.
    #[must_use]
    pub fn tag(mut self, name: char, value: impl Into<String>) -> Self {
        self.tags.entry(name).or_default().insert(value.into());
        self
    }

    /// Events referencing `event_id` (`#e`).
    #[must_use]
    pub fn event_ref(self, event_id: impl Into<String>) -> Self {
        self.tag('e', event_id)
    }

    /// Events mentioning `pubkey` (`#p`).
    #[must_use]
    pub fn pubkey_ref(self, pubkey: impl Into<String>) -> Self {
        self.tag('p', pubkey)
    }

    /// Events created at or after `timestamp`.
    #[must_use]
    pub const fn since(mut self, timestamp: i64) -> Self {
        self.since = Some(timestamp);
        self
    }

    /// Events created at or before `timestamp`.
    #[must_use]
    pub const fn until(mut self, timestamp: i64) -> Self {
        self.until = Some(timestamp);
        self
    }

    /// Caps the number of stored events the relay returns.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Evaluates the filter against `event` locally. `limit` is ignored.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        if self.ids.as_ref().is_some_and(|ids| !ids.contains(&event.id)) {
            return false;
        }
        if self
            .authors
            .as_ref()
            .is_some_and(|authors| !authors.contains(&event.pubkey))
        {
            return false;
        }
        if self
            .kinds
            .as_ref()
            .is_some_and(|kinds| !kinds.contains(&event.kind))
        {
            return false;
        }
        if self.since.is_some_and(|since| event.created_at < since) {
            return false;
        }
        if self.until.is_some_and(|until| event.created_at > until) {
            return false;
        }

        self.tags.iter().all(|(name, values)| {
            let name = name.to_string();
            event
                .tags_named(&name)
                .any(|tag| tag.get(1).is_some_and(|value| values.contains(value)))
        })
    }
}

impl Serialize for Filter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        if let Some(ids) = &self.ids {
            map.serialize_entry("ids", ids)?;
        }
        if let Some(authors) = &self.authors {
            map.serialize_entry("authors", authors)?;
        }
        if let Some(kinds) = &self.kinds {
            map.serialize_entry("kinds", kinds)?;
        }
        for (name, values) in &self.tags {
            map.serialize_entry(&format!("#{name}"), values)?;
        }
        if let Some(since) = self.since {
            map.serialize_entry("since", &since)?;
        }
        if let Some(until) = self.until {
            map.serialize_entry("until", &until)?;
        }
        if let Some(limit) = self.limit {
            map.serialize_entry("limit", &limit)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Filter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Map::<String, Value>::deserialize(deserializer)?;
        Self::from_json_map(raw).map_err(D::Error::custom)
    }
}

impl Filter {
    fn from_json_map(raw: serde_json::Map<String, Value>) -> serde_json::Result<Self> {
        let mut filter = Self::new();
        for (key, value) in raw {
            match key.as_str() {
                "ids" => filter.ids = Some(serde_json::from_value(value)?),
                "authors" => filter.authors = Some(serde_json::from_value(value)?),
                "kinds" => filter.kinds = Some(serde_json::from_value(value)?),
                "since" => filter.since = Some(serde_json::from_value(value)?),
                "until" => filter.until = Some(serde_json::from_value(value)?),
                "limit" => filter.limit = Some(serde_json::from_value(value)?),
                tag => {
                    let mut chars = tag.chars();
                    if let (Some('#'), Some(name), None) = (chars.next(), chars.next(), chars.next())
                    {
                        filter.tags.insert(name, serde_json::from_value(value)?);
                    }
                    // Other extension fields (e.g. NIP-50 `search`) are ignored.
                }
            }
        }
        Ok(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nostr::{build_and_sign, Identity, TagBuilder};

    #[test]
    fn empty_filter_serializes_to_empty_object() {
        assert_eq!(serde_json::to_string(&Filter::new()).unwrap(), "{}");
    }

    #[test]
    fn tag_filters_use_hash_prefix() {
        let filter = Filter::new().kind(445).tag('h', "group-1");
        assert_eq!(
            serde_json::to_string(&filter).unwrap(),
            r##"{"kinds":[445],"#h":["group-1"]}"##
        );
    }

    #[test]
    fn json_roundtrip_preserves_fields() {
        let filter = Filter::new()
            .id("a".repeat(64))
            .authors(["b".repeat(64), "c".repeat(64)])
            .kinds([1, 7])
            .event_ref("d".repeat(64))
            .since(10)
            .until(20)
            .limit(5);
        let json = serde_json::to_string(&filter).unwrap();
        let parsed: Filter = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, filter);
    }

    #[test]
    fn deserialize_ignores_unknown_fields() {
        let parsed: Filter = serde_json::from_str(r#"{"kinds":[1],"search":"rust"}"#).unwrap();
        assert_eq!(parsed, Filter::new().kind(1));
    }

    #[test]
    fn deserialize_rejects_wrong_types() {
        assert!(serde_json::from_str::<Filter>(r#"{"kinds":"one"}"#).is_err());
    }

    #[test]
    fn matches_checks_every_field() {
        let identity = Identity::generate();
        let target = "e".repeat(64);
        let event = build_and_sign(
            &identity,
            7,
            vec![TagBuilder::e_tag(&target)],
            "+",
            Some(100),
        )
        .unwrap();

        assert!(Filter::new().matches(&event));
        assert!(Filter::new().kind(7).author(identity.pubkey_hex()).matches(&event));
        assert!(Filter::new().event_ref(&target).matches(&event));
        assert!(Filter::new().since(100).until(100).matches(&event));

        assert!(!Filter::new().kind(1).matches(&event));
        assert!(!Filter::new().author("f".repeat(64)).matches(&event));
        assert!(!Filter::new().id("0".repeat(64)).matches(&event));
        assert!(!Filter::new().pubkey_ref("f".repeat(64)).matches(&event));
        assert!(!Filter::new().since(101).matches(&event));
        assert!(!Filter::new().until(99).matches(&event));
    }
}
