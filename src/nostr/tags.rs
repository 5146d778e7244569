//! Tag builders for Nostr events.
//!
//! - `e` / `p` tags: event and pubkey references (NIP-01, NIP-10 markers)
//! - `h` tag: private group identifier
//! - `d` tag: addressable event identifier
//! - `expiration` tag: NIP-40 automatic expiration

use chrono::{DateTime, Utc};

/// Builder for Nostr event tags.
///
/// # Example
///
/// ```
/// use driftwood_core::nostr::TagBuilder;
///
/// let tag = TagBuilder::p_tag("abc123");
/// assert_eq!(tag, vec!["p", "abc123"]);
/// ```
pub struct TagBuilder;

impl TagBuilder {
    /// Builds an `e` tag referencing another event.
    #[must_use]
    pub fn e_tag(event_id: &str) -> Vec<String> {
        vec!["e".to_string(), event_id.to_string()]
    }

    /// Builds an `e` tag with a relay hint and a NIP-10 marker (`root`, `reply`).
    ///
    /// ```
    /// use driftwood_core::nostr::TagBuilder;
    ///
    /// let tag = TagBuilder::e_tag_with_marker("abc", "wss://relay.example", "root");
    /// assert_eq!(tag, vec!["e", "abc", "wss://relay.example", "root"]);
    /// ```
    #[must_use]
    pub fn e_tag_with_marker(event_id: &str, relay_hint: &str, marker: &str) -> Vec<String> {
        vec![
            "e".to_string(),
            event_id.to_string(),
            relay_hint.to_string(),
            marker.to_string(),
        ]
    }

    /// Builds a `p` tag referencing a pubkey.
    #[must_use]
    pub fn p_tag(pubkey: &str) -> Vec<String> {
        vec!["p".to_string(), pubkey.to_string()]
    }

    /// Builds a `p` tag with a relay hint and a petname (contact lists, NIP-02).
    #[must_use]
    pub fn contact_tag(pubkey: &str, relay_hint: &str, petname: &str) -> Vec<String> {
        vec![
            "p".to_string(),
            pubkey.to_string(),
            relay_hint.to_string(),
            petname.to_string(),
        ]
    }

    /// Builds the `h` tag carrying a private group id.
    #[must_use]
    pub fn h_tag(group_id: &str) -> Vec<String> {
        vec!["h".to_string(), group_id.to_string()]
    }

    /// Builds the `d` tag for addressable events.
    ///
    /// Publishing a new event with the same kind, author and `d` value
    /// replaces the previous one.
    #[must_use]
    pub fn d_tag(identifier: &str) -> Vec<String> {
        vec!["d".to_string(), identifier.to_string()]
    }

    /// Builds the `expiration` tag for NIP-40 automatic expiration.
    ///
    /// # Example
    ///
    /// ```
    /// use driftwood_core::nostr::TagBuilder;
    /// use chrono::{Utc, Duration};
    ///
    /// let expires = Utc::now() + Duration::hours(24);
    /// let tag = TagBuilder::expiration_tag(expires);
    /// assert_eq!(tag[0], "expiration");
    /// ```
    #[must_use]
    pub fn expiration_tag(expires_at: DateTime<Utc>) -> Vec<String> {
        vec!["expiration".to_string(), expires_at.timestamp().to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn reference_tags() {
        assert_eq!(TagBuilder::e_tag("id1"), vec!["e", "id1"]);
        assert_eq!(TagBuilder::p_tag("pk1"), vec!["p", "pk1"]);
        assert_eq!(
            TagBuilder::contact_tag("pk1", "", "alice"),
            vec!["p", "pk1", "", "alice"]
        );
    }

    #[test]
    fn marker_tag_has_four_elements() {
        let tag = TagBuilder::e_tag_with_marker("id", "", "reply");
        assert_eq!(tag.len(), 4);
        assert_eq!(tag[3], "reply");
    }

    #[test]
    fn group_and_identifier_tags() {
        assert_eq!(TagBuilder::h_tag("g1"), vec!["h", "g1"]);
        assert_eq!(TagBuilder::d_tag("profile"), vec!["d", "profile"]);
    }

    #[test]
    fn expiration_tag_matches_timestamp() {
        let expires = Utc::now() + Duration::hours(1);
        let tag = TagBuilder::expiration_tag(expires);
        let actual: i64 = tag[1].parse().unwrap();
        assert_eq!(actual, expires.timestamp());
    }
}
