//! Reusable helpers for relay and bus integration tests.
//!
//! Everything runs against in-memory relays: each [`MemoryTransport`] hosts a
//! set of scriptable [`MockRelay`]s, and several pools may share one transport
//! to talk to the same relays.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use driftwood_core::bus::EventBus;
use driftwood_core::config::{ClientConfig, ConnectionConfig, PoolConfig};
use driftwood_core::metrics::ClientMetrics;
use driftwood_core::nostr::Identity;
use driftwood_core::relay::testing::{MemoryTransport, MockRelay};
use driftwood_core::relay::RelayPool;

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

/// Client settings tuned for fast tests: short backoff and publish timeout.
pub fn fast_config() -> ClientConfig {
    ClientConfig {
        connection: ConnectionConfig {
            connect_timeout_ms: 500,
            initial_backoff_ms: 10,
            max_backoff_ms: 50,
            backoff_jitter: false,
            ..ConnectionConfig::default()
        },
        pool: PoolConfig {
            publish_timeout_ms: 300,
            ..PoolConfig::default()
        },
        ..ClientConfig::default()
    }
}

/// Creates a transport hosting one mock relay per URL.
pub fn relays(urls: &[&str]) -> (Arc<MemoryTransport>, Vec<Arc<MockRelay>>) {
    let transport = Arc::new(MemoryTransport::new());
    let relays = urls.iter().map(|url| transport.add_relay(url)).collect();
    (transport, relays)
}

/// Creates a pool on `transport` connected to every URL, and waits for the
/// connections.
pub async fn connected_pool(transport: &Arc<MemoryTransport>, urls: &[&str]) -> RelayPool {
    connected_pool_with(fast_config(), transport, urls).await
}

/// Like [`connected_pool`], starting from `config`.
pub async fn connected_pool_with(
    mut config: ClientConfig,
    transport: &Arc<MemoryTransport>,
    urls: &[&str],
) -> RelayPool {
    for url in urls {
        config = config.with_relay(*url);
    }
    let pool = RelayPool::new(config, transport.clone(), Arc::new(ClientMetrics::new()))
        .expect("pool should accept test relays");
    assert!(
        pool.wait_for_connections(urls.len(), WAIT).await,
        "relays did not connect"
    );
    pool
}

/// Creates an event bus for a fresh identity, connected to `urls`.
pub async fn connected_bus(transport: &Arc<MemoryTransport>, urls: &[&str]) -> EventBus {
    connected_bus_for(Identity::generate(), transport, urls).await
}

/// Creates an event bus for `identity`, connected to `urls`.
pub async fn connected_bus_for(
    identity: Identity,
    transport: &Arc<MemoryTransport>,
    urls: &[&str],
) -> EventBus {
    EventBus::new(identity, connected_pool(transport, urls).await)
}

/// Polls `condition` until it holds, panicking after [`WAIT`].
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let reached = tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "timed out waiting for {what}");
}
