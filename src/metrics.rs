//! Error and drop counters.
//!
//! Inbound failures never surface as errors to the application; they are
//! counted here and can be read with [`ClientMetrics::snapshot`].

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Shared atomic counters.
#[derive(Debug, Default)]
pub struct ClientMetrics {
    events_received: AtomicU64,
    duplicates_dropped: AtomicU64,
    invalid_events: AtomicU64,
    kind_validation_errors: AtomicU64,
    decryption_failures: AtomicU64,
    frame_errors: AtomicU64,
    expired_dropped: AtomicU64,
}

/// Point-in-time copy of [`ClientMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub events_received: u64,
    pub duplicates_dropped: u64,
    pub invalid_events: u64,
    pub kind_validation_errors: u64,
    pub decryption_failures: u64,
    pub frame_errors: u64,
    pub expired_dropped: u64,
}

macro_rules! counter {
    ($incr:ident, $field:ident) => {
        pub fn $incr(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl ClientMetrics {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    counter!(record_event_received, events_received);
    counter!(record_duplicate, duplicates_dropped);
    counter!(record_invalid_event, invalid_events);
    counter!(record_kind_validation_error, kind_validation_errors);
    counter!(record_decryption_failure, decryption_failures);
    counter!(record_frame_error, frame_errors);
    counter!(record_expired, expired_dropped);

    /// Reads every counter.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_received: self.events_received.load(Ordering::Relaxed),
            duplicates_dropped: self.duplicates_dropped.load(Ordering::Relaxed),
            invalid_events: self.invalid_events.load(Ordering::Relaxed),
            kind_validation_errors: self.kind_validation_errors.load(Ordering::Relaxed),
            decryption_failures: self.decryption_failures.load(Ordering::Relaxed),
            frame_errors: self.frame_errors.load(Ordering::Relaxed),
            expired_dropped: self.expired_dropped.load(Ordering::Relaxed),
        }
    }
}
