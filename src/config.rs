//! Client configuration.
//!
//! Every field has a default, so a config file only needs to name what it
//! changes:
//!
//! ```json
//! {
//!   "relays": ["wss://relay.damus.io", "wss://nos.lol"],
//!   "pool": { "publish_timeout_ms": 5000 }
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors loading a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The JSON is malformed or has wrongly typed fields.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Top-level client configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Relays to add at startup.
    pub relays: Vec<String>,
    /// Accept plaintext `ws://` relays. Off by default.
    pub allow_insecure_relays: bool,
    /// Per-connection behavior.
    pub connection: ConnectionConfig,
    /// Pool behavior.
    pub pool: PoolConfig,
    /// Dedup cache sizing.
    pub dedup: DedupConfig,
}

impl ClientConfig {
    /// Parses a JSON configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the JSON is invalid.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Loads a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Adds a relay to the startup list.
    #[must_use]
    pub fn with_relay(mut self, url: impl Into<String>) -> Self {
        self.relays.push(url.into());
        self
    }

    /// Allows plaintext `ws://` relays.
    #[must_use]
    pub const fn allow_insecure(mut self, allow: bool) -> Self {
        self.allow_insecure_relays = allow;
        self
    }
}

/// Connection and reconnect settings for each relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Upper bound on the transport handshake.
    pub connect_timeout_ms: u64,
    /// First reconnect delay; doubled on every failed attempt.
    pub initial_backoff_ms: u64,
    /// Reconnect delay cap.
    pub max_backoff_ms: u64,
    /// Randomize each delay by up to ±10%.
    pub backoff_jitter: bool,
    /// Consecutive malformed frames tolerated before the connection is dropped.
    pub max_malformed_frames: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
            backoff_jitter: true,
            max_malformed_frames: 10,
        }
    }
}

impl ConnectionConfig {
    /// Handshake timeout as a [`Duration`].
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Delay before reconnect attempt `attempt` (0-based), without jitter.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
        let delay = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(delay)
    }
}

/// Pool-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// How long publish waits for each relay's `OK`.
    pub publish_timeout_ms: u64,
    /// Capacity of each subscriber channel. Items beyond it wait in the
    /// subscription backlog rather than being dropped.
    pub subscription_buffer: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            publish_timeout_ms: 10_000,
            subscription_buffer: 1_024,
        }
    }
}

impl PoolConfig {
    /// Per-relay publish timeout as a [`Duration`].
    #[must_use]
    pub const fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

/// Seen-id cache sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Maximum ids remembered.
    pub capacity: usize,
    /// Forget ids after this many seconds. `None` keeps them until evicted by count.
    pub max_age_secs: Option<u64>,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            capacity: 50_000,
            max_age_secs: Some(3_600),
        }
    }
}

impl DedupConfig {
    /// Age limit as a [`Duration`].
    #[must_use]
    pub fn max_age(&self) -> Option<Duration> {
        self.max_age_secs.map(Duration::from_secs)
    }
}
