//! Tracing setup and log-field helpers.
//!
//! The library only emits `tracing` events; installing a subscriber is the
//! application's choice. [`init_tracing`] is a convenience for binaries and
//! tests.

use std::fmt;

use tracing_subscriber::EnvFilter;

/// Installs a formatted subscriber filtered by `RUST_LOG`, or by
/// `default_filter` when the variable is unset.
///
/// Safe to call more than once; later calls are no-ops.
///
/// ```
/// driftwood_core::logging::init_tracing("driftwood_core=debug");
/// driftwood_core::logging::init_tracing("info");
/// ```
pub fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Shortens a hex id or pubkey to its first 8 characters for log fields.
pub struct ShortId<'a>(pub &'a str);

impl fmt::Display for ShortId<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.get(..8) {
            Some(prefix) if self.0.len() > 8 => write!(f, "{prefix}…"),
            _ => f.write_str(self.0),
        }
    }
}

impl fmt::Debug for ShortId<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Shows only the length of a secret or ciphertext.
pub struct RedactedBytes(pub usize);

impl fmt::Display for RedactedBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} bytes]", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_id_truncates_long_hex() {
        let id = "a".repeat(64);
        assert_eq!(ShortId(&id).to_string(), "aaaaaaaa…");
    }

    #[test]
    fn short_id_keeps_short_values() {
        assert_eq!(ShortId("abc").to_string(), "abc");
        assert_eq!(ShortId("12345678").to_string(), "12345678");
    }

    #[test]
    fn redacted_shows_length_only() {
        assert_eq!(RedactedBytes(32).to_string(), "[32 bytes]");
    }

    #[test]
    fn init_is_idempotent() {
        init_tracing("warn");
        init_tracing("debug");
    }
}
