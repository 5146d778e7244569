//! A set of relay connections behind one publish/subscribe surface.
//!
//! Every connection reports to a single router task. The router verifies
//! inbound events, drops invalid ones, de-duplicates per subscription and
//! forwards the merged stream to the subscriber. It never awaits the
//! network, so a slow relay cannot hold up the others.
//!
//! # Back-pressure
//!
//! The router never waits on a subscriber either. Each subscription has a
//! forwarding task that moves items from an unbounded backlog into the
//! subscriber's bounded channel with `send().await`. A slow subscriber grows
//! its own backlog but never loses an event, and an event id is only marked
//! as seen once it has been queued for delivery.
//!
//! # Verification cache
//!
//! Events are keyed by `id:sig`. A pair that verified once is not verified
//! again; a pair that failed is remembered on a separate poison list so a
//! relay replaying a forged event is dropped cheaply. A forged copy of a
//! known id carries a different signature and is verified on its own.

// Locks are held only for O(1) map updates and non-blocking channel sends.
#![allow(clippy::significant_drop_tightening)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::connection::{NotificationSender, RelayConnection};
use super::error::{RelayError, RelayResult};
use super::filter::Filter;
use super::transport::{Transport, WebSocketTransport};
use super::types::{
    PoolNotification, PublishOutcome, PublishStatus, RelayNotification, RelayStatus,
    SubscriptionItem,
};
use super::url::RelayUrl;
use crate::cache::SeenCache;
use crate::config::ClientConfig;
use crate::logging::ShortId;
use crate::metrics::ClientMetrics;
use crate::nostr::Event;

const NOTIFICATION_CAPACITY: usize = 256;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct SubscriptionEntry {
    filters: Vec<Filter>,
    backlog: mpsc::UnboundedSender<SubscriptionItem>,
    seen: SeenCache,
}

struct Shared {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    relays: Mutex<BTreeMap<RelayUrl, Arc<RelayConnection>>>,
    subscriptions: Mutex<HashMap<String, SubscriptionEntry>>,
    verified: SeenCache,
    poison: SeenCache,
    metrics: Arc<ClientMetrics>,
    notifications: broadcast::Sender<PoolNotification>,
    relay_tx: NotificationSender,
    next_subscription: AtomicU64,
}

/// Owns relay connections and merges their traffic.
///
/// Dropping the pool closes every connection and ends every subscription.
pub struct RelayPool {
    shared: Arc<Shared>,
    router: JoinHandle<()>,
}

/// Merged, verified and de-duplicated stream for one pool subscription.
///
/// The subscription stays open on the relays until
/// [`RelayPool::unsubscribe`] is called or this handle is dropped.
#[derive(Debug)]
pub struct PoolSubscription {
    id: String,
    receiver: mpsc::Receiver<SubscriptionItem>,
}

impl PoolSubscription {
    /// Subscription id used on every relay.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Waits for the next item. `None` once the subscription is closed.
    pub async fn recv(&mut self) -> Option<SubscriptionItem> {
        self.receiver.recv().await
    }

    /// Returns an already buffered item without waiting.
    pub fn try_recv(&mut self) -> Option<SubscriptionItem> {
        self.receiver.try_recv().ok()
    }

    /// Waits for the next event, skipping end-of-stored-events and close markers.
    pub async fn next_event(&mut self) -> Option<(RelayUrl, Event)> {
        while let Some(item) = self.receiver.recv().await {
            if let SubscriptionItem::Event { relay, event } = item {
                return Some((relay, *event));
            }
        }
        None
    }
}

impl RelayPool {
    /// Creates a pool and connects to every relay in `config.relays`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidUrl`] if a configured relay URL is invalid.
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        metrics: Arc<ClientMetrics>,
    ) -> RelayResult<Self> {
        let (relay_tx, relay_rx) = mpsc::unbounded_channel();
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let initial = config.relays.clone();

        let shared = Arc::new(Shared {
            verified: SeenCache::new(config.dedup.capacity, config.dedup.max_age()),
            poison: SeenCache::new(config.dedup.capacity, config.dedup.max_age()),
            config,
            transport,
            relays: Mutex::new(BTreeMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            metrics,
            notifications,
            relay_tx,
            next_subscription: AtomicU64::new(0),
        });
        let router = tokio::spawn(route(Arc::clone(&shared), relay_rx));
        let pool = Self { shared, router };

        for url in &initial {
            pool.add_relay(url)?;
        }
        Ok(pool)
    }

    /// Creates a pool over WebSockets with fresh metrics.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidUrl`] if a configured relay URL is invalid.
    pub fn with_websockets(config: ClientConfig) -> RelayResult<Self> {
        Self::new(
            config,
            Arc::new(WebSocketTransport::new()),
            Arc::new(ClientMetrics::new()),
        )
    }

    /// Adds a relay and starts connecting to it. Adding a relay that is
    /// already in the pool does nothing.
    ///
    /// The new relay also receives every open pool subscription.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidUrl`] if `url` is not an acceptable relay URL.
    pub fn add_relay(&self, url: &str) -> RelayResult<RelayUrl> {
        let url = RelayUrl::parse(url, self.shared.config.allow_insecure_relays)?;
        let mut relays = lock(&self.shared.relays);
        if relays.contains_key(&url) {
            return Ok(url);
        }

        let connection = Arc::new(RelayConnection::new(
            url.clone(),
            Arc::clone(&self.shared.transport),
            self.shared.config.connection.clone(),
            self.shared.relay_tx.clone(),
        ));
        for (id, entry) in lock(&self.shared.subscriptions).iter() {
            connection.subscribe(id, entry.filters.clone());
        }
        connection.connect();
        info!(relay = %url, "relay added");
        relays.insert(url.clone(), connection);
        Ok(url)
    }

    /// Removes a relay, closing its connection and dropping its subscriptions.
    ///
    /// Subscriptions stay open on the remaining relays.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidUrl`] for a malformed URL and
    /// [`RelayError::UnknownRelay`] if the relay is not in the pool.
    pub fn remove_relay(&self, url: &str) -> RelayResult<()> {
        let url = RelayUrl::parse(url, self.shared.config.allow_insecure_relays)?;
        let connection = lock(&self.shared.relays)
            .remove(&url)
            .ok_or_else(|| RelayError::UnknownRelay(url.to_string()))?;
        connection.disconnect();
        info!(relay = %url, "relay removed");
        Ok(())
    }

    /// Relays currently in the pool.
    #[must_use]
    pub fn relays(&self) -> Vec<RelayUrl> {
        lock(&self.shared.relays).keys().cloned().collect()
    }

    /// Status of every relay in the pool.
    #[must_use]
    pub fn relay_statuses(&self) -> BTreeMap<RelayUrl, RelayStatus> {
        lock(&self.shared.relays)
            .iter()
            .map(|(url, connection)| (url.clone(), connection.status()))
            .collect()
    }

    /// Number of relays currently connected.
    #[must_use]
    pub fn connected_count(&self) -> usize {
        lock(&self.shared.relays)
            .values()
            .filter(|c| c.status().is_connected())
            .count()
    }

    /// Waits until at least `count` relays are connected.
    ///
    /// Returns false if that did not happen within `timeout`.
    pub async fn wait_for_connections(&self, count: usize, timeout: Duration) -> bool {
        let mut notifications = self.notifications();
        let wait = async {
            while self.connected_count() < count {
                match notifications.recv().await {
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return false,
                }
            }
            true
        };
        tokio::time::timeout(timeout, wait).await.unwrap_or(false)
    }

    /// Pool-level observations (status changes, acknowledgements, notices,
    /// closed subscriptions, invalid events, frame errors).
    #[must_use]
    pub fn notifications(&self) -> broadcast::Receiver<PoolNotification> {
        self.shared.notifications.subscribe()
    }

    /// Counters shared with the rest of the client.
    #[must_use]
    pub fn metrics(&self) -> Arc<ClientMetrics> {
        Arc::clone(&self.shared.metrics)
    }

    /// Settings the pool was created with.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Publishes `event` to every connected relay in parallel.
    ///
    /// Each relay gets `pool.publish_timeout` to answer before it is recorded
    /// as timed out.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::NoRelays`] if no relay is connected and
    /// [`RelayError::AllRelaysFailed`] (carrying every relay's status) if no
    /// relay accepted the event.
    pub async fn publish(&self, event: &Event) -> RelayResult<PublishOutcome> {
        let targets: Vec<Arc<RelayConnection>> = lock(&self.shared.relays)
            .values()
            .filter(|c| c.status().is_connected())
            .cloned()
            .collect();
        if targets.is_empty() {
            return Err(RelayError::NoRelays);
        }

        let timeout = self.shared.config.pool.publish_timeout();
        let attempts = targets.iter().map(|connection| {
            let ack = connection.publish(event);
            let url = connection.url().clone();
            async move {
                let status = match tokio::time::timeout(timeout, ack).await {
                    Ok(Ok(ack)) if ack.accepted => PublishStatus::Accepted,
                    Ok(Ok(ack)) => PublishStatus::Rejected(ack.message),
                    Ok(Err(_)) => PublishStatus::Failed("connection lost".to_string()),
                    Err(_) => PublishStatus::TimedOut,
                };
                (url, status)
            }
        });

        let mut outcome = PublishOutcome::new(&event.id);
        outcome.relays.extend(join_all(attempts).await);
        debug!(
            event = %ShortId(&event.id),
            accepted = outcome.success_count(),
            attempted = outcome.total_attempted(),
            "publish finished"
        );

        if outcome.is_success() {
            Ok(outcome)
        } else {
            warn!(event = %ShortId(&event.id), "no relay accepted event");
            Err(RelayError::AllRelaysFailed(outcome))
        }
    }

    /// Opens a subscription on every relay in the pool.
    ///
    /// Relays that are not connected yet receive it when they connect, and
    /// every relay re-sends it after a reconnect.
    #[must_use]
    pub fn subscribe(&self, filters: Vec<Filter>) -> PoolSubscription {
        let sequence = self.shared.next_subscription.fetch_add(1, Ordering::Relaxed);
        let id = format!("{sequence}-{}", hex::encode(rand::random::<[u8; 4]>()));
        let buffer = self.shared.config.pool.subscription_buffer.max(1);
        let (sender, receiver) = mpsc::channel(buffer);
        let (backlog, pending) = mpsc::unbounded_channel();
        tokio::spawn(forward(pending, sender));

        lock(&self.shared.subscriptions).insert(
            id.clone(),
            SubscriptionEntry {
                filters: filters.clone(),
                backlog,
                seen: SeenCache::new(
                    self.shared.config.dedup.capacity,
                    self.shared.config.dedup.max_age(),
                ),
            },
        );
        for connection in lock(&self.shared.relays).values() {
            connection.subscribe(&id, filters.clone());
        }
        debug!(subscription = %id, filters = filters.len(), "subscription opened");

        PoolSubscription { id, receiver }
    }

    /// Closes a subscription on every relay. Returns false if it was not open.
    pub fn unsubscribe(&self, subscription_id: &str) -> bool {
        self.shared.unsubscribe(subscription_id)
    }

    /// Disconnects every relay and ends every subscription.
    pub fn shutdown(&self) {
        let relays = std::mem::take(&mut *lock(&self.shared.relays));
        for connection in relays.values() {
            connection.disconnect();
        }
        lock(&self.shared.subscriptions).clear();
        info!(relays = relays.len(), "relay pool shut down");
    }
}

impl Drop for RelayPool {
    fn drop(&mut self) {
        self.router.abort();
        for connection in lock(&self.shared.relays).values() {
            connection.disconnect();
        }
    }
}

impl std::fmt::Debug for RelayPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayPool")
            .field("relays", &self.relay_statuses())
            .finish_non_exhaustive()
    }
}

impl Shared {
    fn unsubscribe(&self, subscription_id: &str) -> bool {
        if lock(&self.subscriptions).remove(subscription_id).is_none() {
            return false;
        }
        for connection in lock(&self.relays).values() {
            connection.unsubscribe(subscription_id);
        }
        debug!(subscription = %subscription_id, "subscription closed");
        true
    }

    fn broadcast(&self, notification: PoolNotification) {
        // No listeners is fine.
        let _ = self.notifications.send(notification);
    }

    /// Queues `item` for the subscriber. Returns false if the subscriber is gone.
    fn deliver(&self, subscription_id: &str, item: SubscriptionItem) -> bool {
        let subscriptions = lock(&self.subscriptions);
        let Some(entry) = subscriptions.get(subscription_id) else {
            return true;
        };
        let event_id = match &item {
            SubscriptionItem::Event { event, .. } => Some(event.id.clone()),
            _ => None,
        };
        if event_id.as_deref().is_some_and(|id| entry.seen.contains(id)) {
            self.metrics.record_duplicate();
            return true;
        }
        if entry.backlog.send(item).is_err() {
            return false;
        }
        if let Some(id) = &event_id {
            entry.seen.insert(id);
        }
        true
    }

    /// Returns true if `event` is authentic, verifying it at most once.
    fn check_event(&self, relay: &RelayUrl, event: &Event) -> bool {
        let key = format!("{}:{}", event.id, event.sig);
        if self.verified.contains(&key) {
            return true;
        }
        if self.poison.contains(&key) {
            self.metrics.record_invalid_event();
            return false;
        }
        match event.verify() {
            Ok(()) => {
                self.verified.insert(&key);
                self.metrics.record_event_received();
                true
            }
            Err(e) => {
                self.poison.insert(&key);
                self.metrics.record_invalid_event();
                warn!(relay = %relay, event = %ShortId(&event.id), error = %e, "dropping invalid event");
                self.broadcast(PoolNotification::InvalidEvent {
                    relay: relay.clone(),
                    event_id: event.id.clone(),
                    reason: e.to_string(),
                });
                false
            }
        }
    }

    fn handle(&self, relay: RelayUrl, notification: RelayNotification) {
        match notification {
            RelayNotification::Status(status) => {
                self.broadcast(PoolNotification::Status { relay, status });
            }
            RelayNotification::Event {
                subscription_id,
                event,
            } => {
                if !lock(&self.subscriptions).contains_key(&subscription_id) {
                    debug!(relay = %relay, subscription = %subscription_id, "event for unknown subscription");
                    return;
                }
                if !self.check_event(&relay, &event) {
                    return;
                }
                let delivered =
                    self.deliver(&subscription_id, SubscriptionItem::Event { relay, event });
                if !delivered {
                    self.unsubscribe(&subscription_id);
                }
            }
            RelayNotification::Eose(subscription_id) => {
                if !self.deliver(&subscription_id, SubscriptionItem::Eose { relay }) {
                    self.unsubscribe(&subscription_id);
                }
            }
            RelayNotification::Ok(ack) => self.broadcast(PoolNotification::Ok { relay, ack }),
            RelayNotification::Notice(message) => {
                self.broadcast(PoolNotification::Notice { relay, message });
            }
            RelayNotification::Closed {
                subscription_id,
                message,
            } => {
                let item = SubscriptionItem::Closed {
                    relay: relay.clone(),
                    message: message.clone(),
                };
                if !self.deliver(&subscription_id, item) {
                    self.unsubscribe(&subscription_id);
                }
                self.broadcast(PoolNotification::Closed {
                    relay,
                    subscription_id,
                    message,
                });
            }
            RelayNotification::FrameError(error) => {
                self.metrics.record_frame_error();
                self.broadcast(PoolNotification::FrameError { relay, error });
            }
        }
    }
}

/// Moves queued items into the subscriber's bounded channel, waiting for room.
/// Ends when the subscription is closed or the subscriber is dropped.
async fn forward(
    mut pending: mpsc::UnboundedReceiver<SubscriptionItem>,
    subscriber: mpsc::Sender<SubscriptionItem>,
) {
    loop {
        tokio::select! {
            item = pending.recv() => match item {
                Some(item) => {
                    if subscriber.send(item).await.is_err() {
                        return;
                    }
                }
                None => return,
            },
            () = subscriber.closed() => return,
        }
    }
}

async fn route(
    shared: Arc<Shared>,
    mut notifications: mpsc::UnboundedReceiver<(RelayUrl, RelayNotification)>,
) {
    while let Some((relay, notification)) = notifications.recv().await {
        shared.handle(relay, notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::relay::testing::MemoryTransport;

    fn config() -> ClientConfig {
        ClientConfig {
            connection: ConnectionConfig {
                initial_backoff_ms: 10,
                max_backoff_ms: 50,
                ..ConnectionConfig::default()
            },
            ..ClientConfig::default()
        }
    }

    fn pool(transport: &Arc<MemoryTransport>) -> RelayPool {
        RelayPool::new(config(), transport.clone(), Arc::new(ClientMetrics::new())).unwrap()
    }

    #[tokio::test]
    async fn publish_without_relays_fails() {
        let pool = pool(&Arc::new(MemoryTransport::new()));
        let event = crate::nostr::build_and_sign(
            &crate::nostr::Identity::generate(),
            1,
            vec![],
            "x",
            None,
        )
        .unwrap();
        assert!(matches!(pool.publish(&event).await, Err(RelayError::NoRelays)));
    }

    #[tokio::test]
    async fn add_relay_is_idempotent_and_validated() {
        let transport = Arc::new(MemoryTransport::new());
        transport.add_relay("wss://a.relay");
        let pool = pool(&transport);

        pool.add_relay("wss://a.relay").unwrap();
        pool.add_relay("wss://A.relay/").unwrap();
        assert_eq!(pool.relays().len(), 1);

        assert!(matches!(
            pool.add_relay("ws://plain.relay"),
            Err(RelayError::InvalidUrl(_))
        ));
        assert!(matches!(
            pool.add_relay("https://a.relay"),
            Err(RelayError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn insecure_relays_allowed_when_configured() {
        let transport = Arc::new(MemoryTransport::new());
        let config = config().allow_insecure(true);
        let pool = RelayPool::new(config, transport, Arc::new(ClientMetrics::new())).unwrap();
        assert!(pool.add_relay("ws://127.0.0.1:7777").is_ok());
    }

    #[tokio::test]
    async fn remove_unknown_relay_fails() {
        let pool = pool(&Arc::new(MemoryTransport::new()));
        assert!(matches!(
            pool.remove_relay("wss://missing.relay"),
            Err(RelayError::UnknownRelay(_))
        ));
    }

    #[tokio::test]
    async fn configured_relays_connect() {
        let transport = Arc::new(MemoryTransport::new());
        transport.add_relay("wss://a.relay");
        transport.add_relay("wss://b.relay");
        let config = config().with_relay("wss://a.relay").with_relay("wss://b.relay");
        let pool = RelayPool::new(config, transport, Arc::new(ClientMetrics::new())).unwrap();

        assert!(pool.wait_for_connections(2, Duration::from_secs(2)).await);
        assert!(pool
            .relay_statuses()
            .values()
            .all(|status| status.is_connected()));
    }

    #[tokio::test]
    async fn subscription_ids_are_unique() {
        let pool = pool(&Arc::new(MemoryTransport::new()));
        let a = pool.subscribe(vec![Filter::new()]);
        let b = pool.subscribe(vec![Filter::new()]);
        assert_ne!(a.id(), b.id());
        assert!(pool.unsubscribe(a.id()));
        assert!(!pool.unsubscribe(a.id()));
    }

    #[tokio::test]
    async fn shutdown_ends_subscriptions() {
        let transport = Arc::new(MemoryTransport::new());
        transport.add_relay("wss://a.relay");
        let pool = pool(&transport);
        pool.add_relay("wss://a.relay").unwrap();
        let mut subscription = pool.subscribe(vec![Filter::new()]);

        pool.shutdown();
        assert!(pool.relays().is_empty());
        let drained = tokio::time::timeout(Duration::from_secs(1), async {
            while subscription.recv().await.is_some() {}
        })
        .await;
        assert!(drained.is_ok());
    }
}
