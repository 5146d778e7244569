//! Relay connectivity: one connection per relay, pooled behind a single
//! publish/subscribe surface.
//!
//! # Architecture
//!
//! ```text
//! RelayPool ──publish──▶ RelayConnection × N ──Transport──▶ relays
//!     ▲                          │
//!     └──── router task ◀────────┘ (status, EVENT, EOSE, OK, NOTICE, CLOSED)
//!              │
//!              ▼ verify once, dedup per subscription
//!        PoolSubscription
//! ```
//!
//! # Security Model
//!
//! - **Relays are untrusted**: every delivered event is verified before it
//!   reaches a subscriber, and forged events land on a poison list
//! - **WSS only**: plaintext `ws://` is rejected unless explicitly allowed
//! - **Isolation**: a slow, silent or misbehaving relay only affects its
//!   own connection and its own publish status

mod connection;
mod error;
mod filter;
mod message;
mod pool;
mod transport;
mod types;
mod url;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use connection::{NotificationSender, RelayConnection};
pub use error::{RelayError, RelayResult};
pub use filter::Filter;
pub use message::{ClientMessage, RelayMessage};
pub use pool::{PoolSubscription, RelayPool};
pub use transport::{FrameSink, FrameStream, Transport, WebSocketTransport};
pub use types::{
    PoolNotification, PublishOutcome, PublishStatus, RelayAck, RelayNotification, RelayStatus,
    SubscriptionItem,
};
pub use url::RelayUrl;
