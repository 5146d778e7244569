//! Types for relay status, acknowledgements and publish results.

use std::collections::BTreeMap;

use serde::Serialize;

use super::url::RelayUrl;
use crate::nostr::Event;

/// Connection status for a relay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum RelayStatus {
    /// Not connected, and not trying to connect.
    #[default]
    Disconnected,

    /// Transport handshake in progress.
    Connecting,

    /// Connected and ready.
    Connected,

    /// Waiting before the next reconnect attempt.
    Backoff,
}

impl RelayStatus {
    /// Returns true if frames can be sent right now.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// A relay's `OK` answer to a published event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayAck {
    /// The event id the relay answered for.
    pub event_id: String,
    /// Whether the relay stored the event.
    pub accepted: bool,
    /// Machine-readable prefix plus human-readable text (may be empty).
    pub message: String,
}

/// What one relay did with a published event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishStatus {
    /// The relay answered `OK true`.
    Accepted,
    /// The relay answered `OK false` with a reason.
    Rejected(String),
    /// No answer within the per-relay timeout.
    TimedOut,
    /// The connection dropped before an answer arrived.
    Failed(String),
}

/// Result of publishing an event to relays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    /// The event ID that was published.
    pub event_id: String,
    /// Outcome per relay.
    pub relays: BTreeMap<RelayUrl, PublishStatus>,
}

impl PublishOutcome {
    /// Creates an outcome with no relay results yet.
    #[must_use]
    pub fn new(event_id: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            relays: BTreeMap::new(),
        }
    }

    /// Returns true if at least one relay accepted the event.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.success_count() > 0
    }

    /// Returns the number of relays that accepted the event.
    #[must_use]
    pub fn success_count(&self) -> usize {
        self.accepted_by().count()
    }

    /// Returns the total number of relays attempted.
    #[must_use]
    pub fn total_attempted(&self) -> usize {
        self.relays.len()
    }

    /// Relays that accepted the event.
    pub fn accepted_by(&self) -> impl Iterator<Item = &RelayUrl> {
        self.relays
            .iter()
            .filter(|(_, status)| matches!(status, PublishStatus::Accepted))
            .map(|(url, _)| url)
    }

    /// Relays that did not answer in time.
    pub fn timed_out(&self) -> impl Iterator<Item = &RelayUrl> {
        self.relays
            .iter()
            .filter(|(_, status)| matches!(status, PublishStatus::TimedOut))
            .map(|(url, _)| url)
    }

    /// Outcome for one relay.
    #[must_use]
    pub fn status_for(&self, relay: &RelayUrl) -> Option<&PublishStatus> {
        self.relays.get(relay)
    }
}

/// Something a single connection reports to its pool.
#[derive(Debug, Clone)]
pub enum RelayNotification {
    /// The connection changed state.
    Status(RelayStatus),
    /// An event delivered for a subscription. Not yet verified.
    Event {
        subscription_id: String,
        event: Box<Event>,
    },
    /// End of stored events for a subscription.
    Eose(String),
    /// Acceptance or rejection of a published event.
    Ok(RelayAck),
    /// Human-readable relay notice.
    Notice(String),
    /// The relay ended a subscription.
    Closed {
        subscription_id: String,
        message: String,
    },
    /// An inbound frame could not be parsed.
    FrameError(String),
}

/// Pool-level observations, broadcast to every listener.
#[derive(Debug, Clone)]
pub enum PoolNotification {
    /// A relay changed connection state.
    Status { relay: RelayUrl, status: RelayStatus },
    /// A relay answered a publish.
    Ok { relay: RelayUrl, ack: RelayAck },
    /// A relay sent a notice.
    Notice { relay: RelayUrl, message: String },
    /// A relay closed one of our subscriptions.
    Closed {
        relay: RelayUrl,
        subscription_id: String,
        message: String,
    },
    /// A relay delivered an event that failed verification.
    InvalidEvent {
        relay: RelayUrl,
        event_id: String,
        reason: String,
    },
    /// A relay sent a frame that could not be parsed.
    FrameError { relay: RelayUrl, error: String },
}

/// One item of a pool subscription stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionItem {
    /// A verified event seen for the first time on this subscription.
    Event { relay: RelayUrl, event: Box<Event> },
    /// A relay finished sending stored events.
    Eose { relay: RelayUrl },
    /// A relay closed the subscription.
    Closed { relay: RelayUrl, message: String },
}
