//! Driftwood Core Library
//!
//! A multi-relay Nostr client engine: identity and signing, event encoding,
//! kind-specific validation, resilient relay connections, a deduplicating
//! relay pool and an event bus that turns application intents into signed
//! events and relay traffic into validated, decrypted events.
//!
//! Start with [`bus::EventBus`]:
//!
//! ```no_run
//! use driftwood_core::bus::EventBus;
//! use driftwood_core::config::ClientConfig;
//! use driftwood_core::nostr::Identity;
//! use driftwood_core::relay::RelayPool;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! driftwood_core::logging::init_tracing("info");
//! let config = ClientConfig::default().with_relay("wss://relay.example.com");
//! let bus = EventBus::new(Identity::generate(), RelayPool::with_websockets(config)?);
//! bus.subscribe_inbox();
//! bus.send_direct_message("npub1...", "hello").await?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![deny(unsafe_code)]

pub mod bus;
pub mod cache;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod nostr;
pub mod relay;
pub mod store;
