//! In-memory relays for tests.
//!
//! [`MemoryTransport`] hands out channel-backed connections to
//! [`MockRelay`]s registered on it. A mock relay speaks enough of the
//! protocol to store, acknowledge and replay events, and exposes knobs for
//! dropping connections, refusing connects and injecting raw frames.

#![allow(clippy::missing_panics_doc)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::channel::mpsc::{self, UnboundedSender};
use futures::future::BoxFuture;
use futures::{FutureExt, SinkExt, StreamExt};

use super::error::{RelayError, RelayResult};
use super::filter::Filter;
use super::message::{ClientMessage, RelayMessage};
use super::transport::{FrameSink, FrameStream, Transport};
use super::url::RelayUrl;
use crate::nostr::Event;

const WAIT_LIMIT: Duration = Duration::from_secs(5);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn normalize(url: &str) -> String {
    RelayUrl::parse(url, true).map_or_else(|_| url.to_string(), |u| u.to_string())
}

/// How a [`MockRelay`] answers `EVENT` frames.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PublishBehavior {
    /// Verify, store and answer `OK true`. Invalid events get `OK false`.
    #[default]
    Accept,
    /// Answer `OK false` with this message.
    Reject(String),
    /// Record the event but never answer.
    Silent,
}

#[derive(Default)]
struct MockState {
    behavior: PublishBehavior,
    stored: Vec<Event>,
    received: Vec<Event>,
    connections: HashMap<u64, UnboundedSender<RelayResult<String>>>,
    subscriptions: HashMap<(u64, String), Vec<Filter>>,
    next_connection: u64,
    connect_count: usize,
    req_count: usize,
    fail_next: u32,
}

impl MockState {
    fn send_to(&self, connection: u64, message: &RelayMessage) {
        if let (Some(sender), Ok(frame)) = (self.connections.get(&connection), message.to_json()) {
            let _ = sender.unbounded_send(Ok(frame));
        }
    }

    fn broadcast(&self, event: &Event) {
        for ((connection, subscription_id), filters) in &self.subscriptions {
            if filters.iter().any(|f| f.matches(event)) {
                self.send_to(
                    *connection,
                    &RelayMessage::Event {
                        subscription_id: subscription_id.clone(),
                        event: Box::new(event.clone()),
                    },
                );
            }
        }
    }
}

/// A scriptable relay living in memory.
pub struct MockRelay {
    url: String,
    state: Mutex<MockState>,
}

impl MockRelay {
    fn new(url: String) -> Self {
        Self {
            url,
            state: Mutex::new(MockState::default()),
        }
    }

    /// The relay's normalized URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Changes how subsequent `EVENT` frames are answered.
    pub fn set_behavior(&self, behavior: PublishBehavior) {
        lock(&self.state).behavior = behavior;
    }

    /// Makes the next `count` connect attempts fail.
    pub fn fail_next_connects(&self, count: u32) {
        lock(&self.state).fail_next = count;
    }

    /// Stores an event without it being published, as if it predated the test.
    pub fn store_event(&self, event: Event) {
        lock(&self.state).stored.push(event);
    }

    /// Sends `["EVENT", subscription_id, event]` to every open connection,
    /// whether or not the subscription exists or the event is valid.
    pub fn send_event(&self, subscription_id: &str, event: &Event) {
        let message = RelayMessage::Event {
            subscription_id: subscription_id.to_string(),
            event: Box::new(event.clone()),
        };
        if let Ok(frame) = message.to_json() {
            self.send_raw(&frame);
        }
    }

    /// Sends a raw text frame to every open connection.
    pub fn send_raw(&self, frame: &str) {
        let state = lock(&self.state);
        for sender in state.connections.values() {
            let _ = sender.unbounded_send(Ok(frame.to_string()));
        }
    }

    /// Drops every open connection as if the network failed.
    pub fn disconnect_all(&self) {
        let mut state = lock(&self.state);
        for (_, sender) in state.connections.drain() {
            let _ = sender.unbounded_send(Err(RelayError::ConnectionClosed(
                "mock relay dropped the connection".to_string(),
            )));
        }
        state.subscriptions.clear();
    }

    /// Every event received through `EVENT` frames, in arrival order.
    #[must_use]
    pub fn received_events(&self) -> Vec<Event> {
        lock(&self.state).received.clone()
    }

    /// Ids of live subscriptions across all connections.
    #[must_use]
    pub fn active_subscriptions(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.state)
            .subscriptions
            .keys()
            .map(|(_, id)| id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Returns true if any connection holds `subscription_id`.
    #[must_use]
    pub fn has_subscription(&self, subscription_id: &str) -> bool {
        lock(&self.state)
            .subscriptions
            .keys()
            .any(|(_, id)| id == subscription_id)
    }

    /// Currently open connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        lock(&self.state).connections.len()
    }

    /// Successful connects so far.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        lock(&self.state).connect_count
    }

    /// `REQ` frames received so far.
    #[must_use]
    pub fn req_count(&self) -> usize {
        lock(&self.state).req_count
    }

    /// Waits until `subscription_id` is open on some connection.
    pub async fn wait_for_subscription(&self, subscription_id: &str) {
        self.wait_until(|relay| relay.has_subscription(subscription_id))
            .await;
    }

    /// Waits until at least `count` connects have succeeded.
    pub async fn wait_for_connections(&self, count: usize) {
        self.wait_until(|relay| relay.connect_count() >= count).await;
    }

    /// Waits until at least `count` events were received.
    pub async fn wait_for_received(&self, count: usize) {
        self.wait_until(|relay| relay.received_events().len() >= count)
            .await;
    }

    async fn wait_until(&self, condition: impl Fn(&Self) -> bool) {
        let reached = tokio::time::timeout(WAIT_LIMIT, async {
            while !condition(self) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(reached.is_ok(), "mock relay {} wait timed out", self.url);
    }

    fn open(self: &Arc<Self>) -> RelayResult<(FrameSink, FrameStream)> {
        let (to_client, client_stream) = mpsc::unbounded();
        let (client_sink, mut from_client) = mpsc::unbounded::<String>();

        let connection = {
            let mut state = lock(&self.state);
            if state.fail_next > 0 {
                state.fail_next -= 1;
                return Err(RelayError::Connection {
                    url: self.url.clone(),
                    reason: "mock relay refused the connection".to_string(),
                });
            }
            let id = state.next_connection;
            state.next_connection += 1;
            state.connect_count += 1;
            state.connections.insert(id, to_client);
            id
        };

        let relay = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(frame) = from_client.next().await {
                relay.handle_frame(connection, &frame);
            }
            let mut state = lock(&relay.state);
            state.connections.remove(&connection);
            state.subscriptions.retain(|(c, _), _| *c != connection);
        });

        let sink = client_sink.sink_map_err(|e| RelayError::ConnectionClosed(e.to_string()));
        Ok((Box::pin(sink), Box::pin(client_stream)))
    }

    fn handle_frame(&self, connection: u64, frame: &str) {
        let mut state = lock(&self.state);
        if !state.connections.contains_key(&connection) {
            return;
        }
        let message = match ClientMessage::from_json(frame) {
            Ok(message) => message,
            Err(e) => {
                state.send_to(connection, &RelayMessage::Notice(format!("error: {e}")));
                return;
            }
        };

        match message {
            ClientMessage::Event(event) => {
                state.received.push((*event).clone());
                let answer = match state.behavior.clone() {
                    PublishBehavior::Silent => return,
                    PublishBehavior::Reject(message) => (false, message),
                    PublishBehavior::Accept => match event.verify() {
                        Ok(()) => {
                            state.broadcast(&event);
                            state.stored.push(*event.clone());
                            (true, String::new())
                        }
                        Err(e) => (false, format!("invalid: {e}")),
                    },
                };
                state.send_to(
                    connection,
                    &RelayMessage::Ok {
                        event_id: event.id.clone(),
                        accepted: answer.0,
                        message: answer.1,
                    },
                );
            }
            ClientMessage::Req {
                subscription_id,
                filters,
            } => {
                state.req_count += 1;
                let matching: Vec<Event> = state
                    .stored
                    .iter()
                    .filter(|event| filters.iter().any(|f| f.matches(event)))
                    .cloned()
                    .collect();
                for event in matching {
                    state.send_to(
                        connection,
                        &RelayMessage::Event {
                            subscription_id: subscription_id.clone(),
                            event: Box::new(event),
                        },
                    );
                }
                state.send_to(connection, &RelayMessage::Eose(subscription_id.clone()));
                state
                    .subscriptions
                    .insert((connection, subscription_id), filters);
            }
            ClientMessage::Close(subscription_id) => {
                state.subscriptions.remove(&(connection, subscription_id));
            }
        }
    }
}

impl std::fmt::Debug for MockRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRelay")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

/// [`Transport`] that connects to registered [`MockRelay`]s.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    relays: Mutex<HashMap<String, Arc<MockRelay>>>,
}

impl MemoryTransport {
    /// Creates a transport with no relays.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a relay at `url`, or returns the one already there.
    pub fn add_relay(&self, url: &str) -> Arc<MockRelay> {
        let url = normalize(url);
        Arc::clone(
            lock(&self.relays)
                .entry(url.clone())
                .or_insert_with(|| Arc::new(MockRelay::new(url))),
        )
    }

    /// Looks up a registered relay.
    #[must_use]
    pub fn relay(&self, url: &str) -> Option<Arc<MockRelay>> {
        lock(&self.relays).get(&normalize(url)).cloned()
    }
}

impl Transport for MemoryTransport {
    fn connect(&self, url: &RelayUrl) -> BoxFuture<'static, RelayResult<(FrameSink, FrameStream)>> {
        let relay = lock(&self.relays).get(url.as_str()).cloned();
        let url = url.clone();
        async move {
            relay
                .ok_or_else(|| RelayError::Connection {
                    url: url.to_string(),
                    reason: "no mock relay registered".to_string(),
                })?
                .open()
        }
        .boxed()
    }
}
