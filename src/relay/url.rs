//! Validated relay endpoints.

use std::fmt;

use url::Url;

use super::error::{RelayError, RelayResult};

/// A normalized `wss://` (or, when allowed, `ws://`) relay URL.
///
/// Host is lowercased and a bare trailing `/` is removed, so
/// `wss://Relay.Example/` and `wss://relay.example` are the same relay.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelayUrl(String);

impl RelayUrl {
    /// Parses and normalizes a relay URL.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidUrl`] if the URL is malformed, is not a
    /// WebSocket URL, has no host, or is plaintext `ws://` while
    /// `allow_insecure` is false.
    ///
    /// # Example
    ///
    /// ```
    /// use driftwood_core::relay::RelayUrl;
    ///
    /// let url = RelayUrl::parse("wss://Relay.Example/", false).unwrap();
    /// assert_eq!(url.as_str(), "wss://relay.example");
    /// assert!(RelayUrl::parse("ws://relay.example", false).is_err());
    /// assert!(RelayUrl::parse("ws://localhost:7777", true).is_ok());
    /// ```
    pub fn parse(input: &str, allow_insecure: bool) -> RelayResult<Self> {
        let url = Url::parse(input.trim())
            .map_err(|e| RelayError::InvalidUrl(format!("{input}: {e}")))?;

        match url.scheme() {
            "wss" => {}
            "ws" if allow_insecure => {}
            "ws" => {
                return Err(RelayError::InvalidUrl(format!(
                    "{input}: plaintext ws:// is not allowed"
                )))
            }
            other => {
                return Err(RelayError::InvalidUrl(format!(
                    "{input}: unsupported scheme {other}"
                )))
            }
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(RelayError::InvalidUrl(format!("{input}: missing host")));
        }

        let normalized = url.as_str().trim_end_matches('/').to_string();
        Ok(Self(normalized))
    }

    /// The normalized URL.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true for `wss://`.
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.0.starts_with("wss://")
    }
}

impl fmt::Display for RelayUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RelayUrl {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
