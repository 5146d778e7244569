//! Orchestration: application intents in, validated events out.
//!
//! # Architecture
//!
//! ```text
//! publish_note / send_direct_message / react / send_group_message ...
//!     │  build_and_sign → KindRegistry::decode (self-check)
//!     ▼
//! RelayPool::publish ──▶ relays
//!
//! relays ──▶ RelayPool (verify, per-subscription dedup)
//!     │
//!     ▼
//! EventBus::process
//!     ├─ once per event id (SeenCache)
//!     ├─ drop expired (NIP-40)
//!     ├─ KindRegistry::decode
//!     ├─ decrypt DMs, group messages, gift wraps addressed to us
//!     ├─ update replaceable state, write event cache
//!     └─ observers whose predicate matches
//! ```
//!
//! Failures on the inbound path are never returned to the application. They
//! are logged and counted in [`ClientMetrics`].

// Locks are held only for O(1) map updates or to clone observer lists.
#![allow(clippy::significant_drop_tightening)]

mod error;
mod groups;
mod state;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use error::{ClientError, Result};
pub use groups::{GroupBook, GroupInvite, PrivateGroup};
pub use state::{ReplaceableKey, ReplaceableState};

use crate::cache::SeenCache;
use crate::config::DedupConfig;
use crate::logging::{RedactedBytes, ShortId};
use crate::metrics::ClientMetrics;
use crate::nostr::encryption::{self, decrypt_nip44, encrypt_nip44};
use crate::nostr::giftwrap::{self, UnwrappedGift};
use crate::nostr::kinds::{ChannelMetadata, Contact, ContactList, DecodedPayload, Profile};
use crate::nostr::{
    build_and_sign, parse_public_key, Event, Identity, KindRegistry, KindValidationError,
    NostrError, TagBuilder, KIND_CHANNEL_CREATE, KIND_CHANNEL_MESSAGE, KIND_CONTACT_LIST,
    KIND_DIRECT_MESSAGE, KIND_GIFT_WRAP, KIND_GROUP_INVITE, KIND_GROUP_MESSAGE, KIND_METADATA,
    KIND_REACTION, KIND_TEXT_NOTE,
};
use crate::relay::{
    Filter, PoolNotification, PublishOutcome, RelayPool, RelayStatus, RelayUrl, SubscriptionItem,
};
use crate::store::EventCache;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Application-level subscription handle, distinct from relay subscription ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionHandle(u64);

/// Handle returned when registering an observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Plaintext recovered from an event addressed to this identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decrypted {
    /// Kind 4 message, sent or received. `peer` is the other party.
    DirectMessage { peer: String, plaintext: String },
    /// Kind 445 message in a joined group.
    GroupMessage { group_id: String, plaintext: String },
    /// Kind 1059 gift wrap, unwrapped.
    Gift(UnwrappedGift),
}

/// A validated event as seen by observers.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub event: Event,
    pub payload: DecodedPayload,
    /// Set when the event was encrypted to us and decrypted successfully.
    pub decrypted: Option<Decrypted>,
    /// Relay that delivered the event; `None` for [`EventBus::ingest`].
    pub relay: Option<RelayUrl>,
}

/// What [`EventBus::ingest`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Validated and handed to observers.
    Delivered,
    /// Already processed.
    Duplicate,
    /// Id or signature check failed.
    Invalid,
    /// Past its NIP-40 expiration.
    Expired,
    /// A kind handler or the group membership check rejected it.
    Rejected,
    /// Addressed to us but could not be decrypted.
    Undecryptable,
}

/// A signed event and where it landed.
#[derive(Debug, Clone)]
pub struct Published {
    pub event: Event,
    pub outcome: PublishOutcome,
}

/// Result of [`EventBus::create_private_group`].
#[derive(Debug)]
pub struct GroupCreated {
    pub group_id: String,
    /// Subscription delivering the group's messages.
    pub subscription: SubscriptionHandle,
    /// One gift-wrapped invite per member other than the creator.
    pub invitations: Vec<Published>,
}

type Predicate = Arc<dyn Fn(&InboundEvent) -> bool + Send + Sync>;
type Callback = Arc<dyn Fn(&InboundEvent) + Send + Sync>;
type StatusCallback = Arc<dyn Fn(&RelayUrl, RelayStatus) + Send + Sync>;

struct Observer {
    id: ObserverId,
    predicate: Predicate,
    callback: Callback,
}

struct BusSubscription {
    pool_id: String,
    task: JoinHandle<()>,
}

struct Inner {
    identity: Identity,
    pool: RelayPool,
    registry: KindRegistry,
    metrics: Arc<ClientMetrics>,
    dispatched: SeenCache,
    state: Mutex<ReplaceableState>,
    groups: Mutex<GroupBook>,
    observers: Mutex<Vec<Observer>>,
    status_observers: Mutex<Vec<(ObserverId, StatusCallback)>>,
    subscriptions: Mutex<HashMap<SubscriptionHandle, BusSubscription>>,
    cache: Option<EventCache>,
    next_id: AtomicU64,
}

/// Configures an [`EventBus`].
pub struct EventBusBuilder {
    identity: Identity,
    pool: RelayPool,
    registry: KindRegistry,
    cache: Option<EventCache>,
    dedup: DedupConfig,
}

impl EventBusBuilder {
    /// Replaces the default kind registry.
    #[must_use]
    pub fn registry(mut self, registry: KindRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Persists every delivered event to `cache`.
    #[must_use]
    pub fn event_cache(mut self, cache: EventCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Bounds the set of already-processed event ids. Defaults to the pool's
    /// `dedup` settings.
    #[must_use]
    pub fn dedup(mut self, dedup: DedupConfig) -> Self {
        self.dedup = dedup;
        self
    }

    /// Builds the bus. Must be called from within a Tokio runtime.
    #[must_use]
    pub fn build(self) -> EventBus {
        let metrics = self.pool.metrics();
        let inner = Arc::new(Inner {
            dispatched: SeenCache::new(self.dedup.capacity, self.dedup.max_age()),
            identity: self.identity,
            pool: self.pool,
            registry: self.registry,
            metrics,
            state: Mutex::new(ReplaceableState::new()),
            groups: Mutex::new(GroupBook::new()),
            observers: Mutex::new(Vec::new()),
            status_observers: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(HashMap::new()),
            cache: self.cache,
            next_id: AtomicU64::new(0),
        });
        let status_task = tokio::spawn(watch_status(
            Arc::downgrade(&inner),
            inner.pool.notifications(),
        ));
        EventBus { inner, status_task }
    }
}

/// The client core: publishes intents and routes validated events to observers.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use driftwood_core::bus::EventBus;
/// use driftwood_core::config::ClientConfig;
/// use driftwood_core::nostr::Identity;
/// use driftwood_core::relay::{Filter, RelayPool};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ClientConfig::default().with_relay("wss://relay.example.com");
/// let pool = RelayPool::with_websockets(config)?;
/// let bus = EventBus::new(Identity::generate(), pool);
///
/// bus.on_event(|e| e.event.kind == 1, |e| println!("{}", e.event.content));
/// bus.subscribe(vec![Filter::new().kind(1).limit(20)]);
/// bus.publish_note("hello", vec![]).await?;
/// # Ok(())
/// # }
/// ```
pub struct EventBus {
    inner: Arc<Inner>,
    status_task: JoinHandle<()>,
}

impl EventBus {
    /// Creates a bus with the default kind registry.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(identity: Identity, pool: RelayPool) -> Self {
        Self::builder(identity, pool).build()
    }

    /// Starts configuring a bus.
    #[must_use]
    pub fn builder(identity: Identity, pool: RelayPool) -> EventBusBuilder {
        EventBusBuilder {
            dedup: pool.config().dedup.clone(),
            identity,
            pool,
            registry: KindRegistry::with_defaults(),
            cache: None,
        }
    }

    /// This client's public key (hex).
    #[must_use]
    pub fn pubkey(&self) -> String {
        self.inner.identity.pubkey_hex()
    }

    /// The underlying relay pool.
    #[must_use]
    pub fn pool(&self) -> &RelayPool {
        &self.inner.pool
    }

    /// Counters shared with the pool.
    #[must_use]
    pub fn metrics(&self) -> Arc<ClientMetrics> {
        Arc::clone(&self.inner.metrics)
    }

    // Publishing

    /// Publishes a kind 1 text note.
    ///
    /// # Errors
    ///
    /// Returns an error if signing fails or no relay accepts the note.
    pub async fn publish_note(
        &self,
        content: &str,
        tags: Vec<Vec<String>>,
    ) -> Result<Published> {
        self.sign_and_publish(KIND_TEXT_NOTE, tags, content).await
    }

    /// Sends an encrypted kind 4 direct message.
    ///
    /// `peer` may be hex or `npub`. The content is a NIP-44 v2 payload, not
    /// the NIP-04 `?iv=` form, so clients that only speak NIP-04 will show
    /// these messages as undecryptable.
    ///
    /// # Errors
    ///
    /// Returns [`NostrError::InvalidKey`] (wrapped) for a bad peer key, or a
    /// publish error.
    pub async fn send_direct_message(&self, peer: &str, plaintext: &str) -> Result<Published> {
        let peer = parse_public_key(peer)?;
        let ciphertext = encryption::encrypt(&self.inner.identity, &peer, plaintext)?;
        debug!(peer = %ShortId(&peer), content = %RedactedBytes(plaintext.len()), "sending direct message");
        self.sign_and_publish(KIND_DIRECT_MESSAGE, vec![TagBuilder::p_tag(&peer)], ciphertext)
            .await
    }

    /// Reacts to an event. An empty `glyph` means `+`.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `target_event_id` is not a 32-byte hex id,
    /// or a publish error.
    pub async fn react(&self, target_event_id: &str, glyph: &str) -> Result<Published> {
        self.sign_and_publish(KIND_REACTION, vec![TagBuilder::e_tag(target_event_id)], glyph)
            .await
    }

    /// Replaces this identity's kind 0 profile.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization, signing or publishing fails.
    pub async fn set_metadata(&self, profile: &Profile) -> Result<Published> {
        let content = serde_json::to_string(profile).map_err(NostrError::from)?;
        self.sign_and_publish(KIND_METADATA, vec![], content).await
    }

    /// Replaces this identity's kind 3 contact list with `contacts`.
    ///
    /// # Errors
    ///
    /// Returns an error if a contact key is invalid or publishing fails.
    pub async fn set_contacts(&self, contacts: &[Contact]) -> Result<Published> {
        let tags = contacts
            .iter()
            .map(|contact| -> crate::nostr::Result<Vec<String>> {
                let pubkey = parse_public_key(&contact.pubkey)?;
                Ok(TagBuilder::contact_tag(
                    &pubkey,
                    contact.relay.as_deref().unwrap_or_default(),
                    contact.petname.as_deref().unwrap_or_default(),
                ))
            })
            .collect::<std::result::Result<Vec<_>, NostrError>>()?;
        self.sign_and_publish(KIND_CONTACT_LIST, tags, "").await
    }

    /// Creates a public chat channel (kind 40). The channel id is the event id.
    ///
    /// # Errors
    ///
    /// Returns an error if signing or publishing fails.
    pub async fn create_channel(&self, metadata: &ChannelMetadata) -> Result<Published> {
        let content = serde_json::to_string(metadata).map_err(NostrError::from)?;
        self.sign_and_publish(KIND_CHANNEL_CREATE, vec![], content).await
    }

    /// Posts to a public chat channel (kind 42), optionally replying to a
    /// message in it.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed channel id, or a publish error.
    pub async fn send_channel_message(
        &self,
        channel_id: &str,
        content: &str,
        reply_to: Option<&str>,
    ) -> Result<Published> {
        let mut tags = vec![TagBuilder::e_tag_with_marker(channel_id, "", "root")];
        if let Some(reply_to) = reply_to {
            tags.push(TagBuilder::e_tag_with_marker(reply_to, "", "reply"));
        }
        self.sign_and_publish(KIND_CHANNEL_MESSAGE, tags, content).await
    }

    /// Signs, self-checks and publishes an arbitrary event.
    ///
    /// # Errors
    ///
    /// Returns an error if signing fails, the kind handler rejects the event,
    /// or no relay accepts it.
    pub async fn publish(
        &self,
        kind: u16,
        tags: Vec<Vec<String>>,
        content: &str,
    ) -> Result<Published> {
        self.sign_and_publish(kind, tags, content).await
    }

    /// Publishes an already signed event.
    ///
    /// Replaceable events also become current state immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if the event fails verification or the kind handler,
    /// or no relay accepts it.
    pub async fn publish_event(&self, event: Event) -> Result<Published> {
        event.verify()?;
        self.inner
            .registry
            .decode(&event)
            .map_err(NostrError::from)?;
        if ReplaceableKey::for_event(&event).is_some() {
            lock(&self.inner.state).apply(&event);
        }
        let outcome = self.inner.pool.publish(&event).await?;
        info!(
            event = %ShortId(&event.id),
            kind = event.kind,
            relays = outcome.success_count(),
            "event published"
        );
        Ok(Published { event, outcome })
    }

    async fn sign_and_publish(
        &self,
        kind: u16,
        tags: Vec<Vec<String>>,
        content: impl Into<String>,
    ) -> Result<Published> {
        let event = build_and_sign(&self.inner.identity, kind, tags, content, None)?;
        self.publish_event(event).await
    }

    // Private groups

    /// Creates a private group and invites `members` (hex or `npub`).
    ///
    /// Each member receives the group key in a gift-wrapped kind 444 invite.
    /// The creator is subscribed to the group immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if a member key is invalid or an invite cannot be
    /// published.
    pub async fn create_private_group(&self, name: &str, members: &[String]) -> Result<GroupCreated> {
        let me = self.pubkey();
        let members = members
            .iter()
            .map(|m| parse_public_key(m))
            .collect::<std::result::Result<Vec<_>, NostrError>>()?;
        let group = PrivateGroup::create(name, &me, &members);
        let group_id = group.group_id.clone();
        lock(&self.inner.groups).insert(group.clone());
        info!(group = %ShortId(&group_id), members = group.members.len(), "private group created");

        let subscription = self.subscribe_group(&group_id);
        let mut invitations = Vec::new();
        for member in group.members.iter().filter(|m| **m != me) {
            let rumor = group.invite_rumor(&self.inner.identity)?;
            let wrap = giftwrap::wrap(&self.inner.identity, member, rumor)?;
            invitations.push(self.publish_event(wrap).await?);
        }

        Ok(GroupCreated {
            group_id,
            subscription,
            invitations,
        })
    }

    /// Accepts a pending invite and subscribes to the group's messages.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::UnknownGroup`] if no invite for `group_id` is pending.
    pub fn join_private_group(&self, group_id: &str) -> Result<SubscriptionHandle> {
        let group = lock(&self.inner.groups).accept(group_id)?;
        info!(group = %ShortId(&group.group_id), name = %group.name, "joined private group");
        Ok(self.subscribe_group(group_id))
    }

    /// Discards a pending invite. Returns false if none was pending.
    pub fn decline_group_invite(&self, group_id: &str) -> bool {
        lock(&self.inner.groups).decline(group_id)
    }

    /// Invites received through gift wraps and not yet answered.
    #[must_use]
    pub fn pending_group_invites(&self) -> Vec<GroupInvite> {
        lock(&self.inner.groups).pending()
    }

    /// Groups this client has created or joined.
    #[must_use]
    pub fn groups(&self) -> Vec<PrivateGroup> {
        lock(&self.inner.groups).joined()
    }

    /// Sends an encrypted kind 445 message to a joined group.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::UnknownGroup`] if the group has not been joined.
    pub async fn send_group_message(&self, group_id: &str, plaintext: &str) -> Result<Published> {
        let key = lock(&self.inner.groups)
            .get(group_id)
            .map(|group| group.key().clone())
            .ok_or_else(|| ClientError::UnknownGroup(group_id.to_string()))?;
        let ciphertext = encrypt_nip44(plaintext, &key)?;
        self.sign_and_publish(KIND_GROUP_MESSAGE, vec![TagBuilder::h_tag(group_id)], ciphertext)
            .await
    }

    // Subscriptions

    /// Subscribes to `filters` on every relay. Matching events flow through
    /// validation to the observers.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn subscribe(&self, filters: Vec<Filter>) -> SubscriptionHandle {
        let mut subscription = self.inner.pool.subscribe(filters);
        let pool_id = subscription.id().to_string();
        let handle = SubscriptionHandle(self.inner.next_id());
        let weak = Arc::downgrade(&self.inner);

        let task = tokio::spawn(async move {
            while let Some(item) = subscription.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                match item {
                    SubscriptionItem::Event { relay, event } => {
                        inner.process(*event, Some(relay), false);
                    }
                    SubscriptionItem::Eose { relay } => {
                        debug!(relay = %relay, subscription = %subscription.id(), "end of stored events");
                    }
                    SubscriptionItem::Closed { relay, message } => {
                        debug!(relay = %relay, subscription = %subscription.id(), reason = %message, "relay closed subscription");
                    }
                }
            }
        });

        lock(&self.inner.subscriptions).insert(handle, BusSubscription { pool_id, task });
        handle
    }

    /// Subscribes to a public chat channel: its creation event and its messages.
    pub fn subscribe_room(&self, channel_id: &str) -> SubscriptionHandle {
        self.subscribe(vec![
            Filter::new().kind(KIND_CHANNEL_CREATE).id(channel_id),
            Filter::new().kind(KIND_CHANNEL_MESSAGE).event_ref(channel_id),
        ])
    }

    /// Subscribes to direct messages and gift wraps involving this identity.
    pub fn subscribe_inbox(&self) -> SubscriptionHandle {
        let me = self.pubkey();
        self.subscribe(vec![
            Filter::new().kind(KIND_DIRECT_MESSAGE).pubkey_ref(&me),
            Filter::new().kind(KIND_DIRECT_MESSAGE).author(&me),
            Filter::new().kind(KIND_GIFT_WRAP).pubkey_ref(&me),
        ])
    }

    fn subscribe_group(&self, group_id: &str) -> SubscriptionHandle {
        self.subscribe(vec![Filter::new()
            .kind(KIND_GROUP_MESSAGE)
            .tag('h', group_id)])
    }

    /// Closes a subscription. Returns false if the handle is unknown.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let Some(subscription) = lock(&self.inner.subscriptions).remove(&handle) else {
            return false;
        };
        subscription.task.abort();
        self.inner.pool.unsubscribe(&subscription.pool_id);
        true
    }

    // Observers

    /// Calls `callback` for every delivered event matching `predicate`.
    ///
    /// Callbacks run on the delivering task, in relay arrival order per
    /// subscription. Ordering across relays is unspecified.
    pub fn on_event<P, C>(&self, predicate: P, callback: C) -> ObserverId
    where
        P: Fn(&InboundEvent) -> bool + Send + Sync + 'static,
        C: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        let id = ObserverId(self.inner.next_id());
        lock(&self.inner.observers).push(Observer {
            id,
            predicate: Arc::new(predicate),
            callback: Arc::new(callback),
        });
        id
    }

    /// Calls `callback` for every delivered event matching `filter`.
    pub fn on_filter<C>(&self, filter: Filter, callback: C) -> ObserverId
    where
        C: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        self.on_event(move |inbound| filter.matches(&inbound.event), callback)
    }

    /// Calls `callback` whenever a relay changes connection state.
    pub fn on_connection_status_change<C>(&self, callback: C) -> ObserverId
    where
        C: Fn(&RelayUrl, RelayStatus) + Send + Sync + 'static,
    {
        let id = ObserverId(self.inner.next_id());
        lock(&self.inner.status_observers).push((id, Arc::new(callback)));
        id
    }

    /// Removes an event or status observer. Returns false if it was not registered.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let mut observers = lock(&self.inner.observers);
        let before = observers.len();
        observers.retain(|o| o.id != id);
        if observers.len() != before {
            return true;
        }
        drop(observers);

        let mut status = lock(&self.inner.status_observers);
        let before = status.len();
        status.retain(|(observer, _)| *observer != id);
        status.len() != before
    }

    // Inbound

    /// Processes an event obtained outside the relay pool.
    ///
    /// The event is verified, then follows the same path as relay-delivered
    /// events.
    pub fn ingest(&self, event: Event) -> IngestOutcome {
        self.inner.process(event, None, true)
    }

    // State queries

    /// Current event for a replaceable address. `identifier` is the `d` tag
    /// for addressable kinds and ignored otherwise.
    #[must_use]
    pub fn current(&self, kind: u16, author: &str, identifier: &str) -> Option<Event> {
        let identifier = if crate::nostr::is_addressable(kind) {
            identifier.to_string()
        } else {
            String::new()
        };
        let key = ReplaceableKey {
            kind,
            author: author.to_string(),
            identifier,
        };
        lock(&self.inner.state).get(&key).cloned()
    }

    /// The current contact list of `author`.
    #[must_use]
    pub fn contact_list(&self, author: &str) -> Option<ContactList> {
        let event = self.current(KIND_CONTACT_LIST, author, "")?;
        match self.inner.registry.decode(&event) {
            Ok(DecodedPayload::ContactList(list)) => Some(list),
            _ => None,
        }
    }

    /// The current profile of `author`.
    #[must_use]
    pub fn profile(&self, author: &str) -> Option<Profile> {
        let event = self.current(KIND_METADATA, author, "")?;
        match self.inner.registry.decode(&event) {
            Ok(DecodedPayload::Metadata(profile)) => Some(profile),
            _ => None,
        }
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        self.status_task.abort();
        for (_, subscription) in lock(&self.inner.subscriptions).drain() {
            subscription.task.abort();
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("pubkey", &self.pubkey())
            .field("pool", &self.inner.pool)
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn process(&self, event: Event, relay: Option<RelayUrl>, verify: bool) -> IngestOutcome {
        if verify {
            if let Err(e) = event.verify() {
                self.metrics.record_invalid_event();
                warn!(event = %ShortId(&event.id), error = %e, "dropping invalid event");
                return IngestOutcome::Invalid;
            }
        }
        if !self.dispatched.insert(&event.id) {
            self.metrics.record_duplicate();
            return IngestOutcome::Duplicate;
        }
        if event.is_expired() {
            self.metrics.record_expired();
            debug!(event = %ShortId(&event.id), "dropping expired event");
            return IngestOutcome::Expired;
        }

        let payload = match self.registry.decode(&event) {
            Ok(payload) => payload,
            Err(e) => {
                self.metrics.record_kind_validation_error();
                warn!(event = %ShortId(&event.id), error = %e, "dropping event rejected by kind handler");
                return IngestOutcome::Rejected;
            }
        };
        let decrypted = match self.open(&event, &payload) {
            Ok(decrypted) => decrypted,
            Err(outcome) => return outcome,
        };

        if ReplaceableKey::for_event(&event).is_some() && lock(&self.state).apply(&event) {
            debug!(event = %ShortId(&event.id), kind = event.kind, "replaceable state updated");
        }
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.put(&event) {
                warn!(event = %ShortId(&event.id), error = %e, "failed to cache event");
            }
        }

        self.dispatch(&InboundEvent {
            event,
            payload,
            decrypted,
            relay,
        });
        IngestOutcome::Delivered
    }

    /// Decrypts content addressed to us. Errors are already counted.
    fn open(
        &self,
        event: &Event,
        payload: &DecodedPayload,
    ) -> std::result::Result<Option<Decrypted>, IngestOutcome> {
        let me = self.identity.pubkey_hex();
        match payload {
            DecodedPayload::DirectMessage(dm) => {
                let peer = if dm.recipient == me {
                    &event.pubkey
                } else if event.pubkey == me {
                    &dm.recipient
                } else {
                    return Ok(None);
                };
                encryption::decrypt(&self.identity, peer, &dm.ciphertext)
                    .map(|plaintext| {
                        Some(Decrypted::DirectMessage {
                            peer: peer.clone(),
                            plaintext,
                        })
                    })
                    .map_err(|e| self.undecryptable(event, &e))
            }
            DecodedPayload::GroupMessage(message) => {
                let key = {
                    let groups = lock(&self.groups);
                    let Some(group) = groups.get(&message.group_id) else {
                        return Ok(None);
                    };
                    if !group.is_member(&event.pubkey) {
                        let e = KindValidationError::new(event.kind, "sender is not a group member");
                        self.metrics.record_kind_validation_error();
                        warn!(event = %ShortId(&event.id), author = %ShortId(&event.pubkey), error = %e, "dropping group message");
                        return Err(IngestOutcome::Rejected);
                    }
                    group.key().clone()
                };
                decrypt_nip44(&message.ciphertext, &key)
                    .map(|plaintext| {
                        Some(Decrypted::GroupMessage {
                            group_id: message.group_id.clone(),
                            plaintext,
                        })
                    })
                    .map_err(|e| self.undecryptable(event, &e))
            }
            DecodedPayload::GiftWrap(envelope) if envelope.recipient == me => {
                let gift = giftwrap::unwrap(&self.identity, event)
                    .map_err(|e| self.undecryptable(event, &e))?;
                if gift.rumor.kind == KIND_GROUP_INVITE {
                    match GroupInvite::from_gift(&gift) {
                        Ok(invite) => {
                            info!(
                                group = %ShortId(&invite.group.group_id),
                                inviter = %ShortId(&invite.inviter),
                                "group invite received"
                            );
                            lock(&self.groups).offer(invite);
                        }
                        Err(e) => {
                            self.metrics.record_kind_validation_error();
                            warn!(event = %ShortId(&event.id), error = %e, "dropping malformed group invite");
                            return Err(IngestOutcome::Rejected);
                        }
                    }
                }
                Ok(Some(Decrypted::Gift(gift)))
            }
            _ => Ok(None),
        }
    }

    fn undecryptable(&self, event: &Event, error: &NostrError) -> IngestOutcome {
        self.metrics.record_decryption_failure();
        warn!(event = %ShortId(&event.id), kind = event.kind, error = %error, "dropping undecryptable event");
        IngestOutcome::Undecryptable
    }

    fn dispatch(&self, inbound: &InboundEvent) {
        // Snapshot so callbacks may register or remove observers.
        let observers: Vec<(Predicate, Callback)> = lock(&self.observers)
            .iter()
            .map(|o| (Arc::clone(&o.predicate), Arc::clone(&o.callback)))
            .collect();
        for (predicate, callback) in observers {
            if predicate(inbound) {
                callback(inbound);
            }
        }
    }

    fn notify_status(&self, relay: &RelayUrl, status: RelayStatus) {
        let observers: Vec<StatusCallback> = lock(&self.status_observers)
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in observers {
            callback(relay, status);
        }
    }
}

async fn watch_status(
    bus: Weak<Inner>,
    mut notifications: broadcast::Receiver<PoolNotification>,
) {
    loop {
        match notifications.recv().await {
            Ok(PoolNotification::Status { relay, status }) => {
                let Some(inner) = bus.upgrade() else { break };
                inner.notify_status(&relay, status);
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "status observer lagged behind pool notifications");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
