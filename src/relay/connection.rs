//! One logical connection to one relay.
//!
//! # State machine
//!
//! ```text
//! Disconnected ──connect()──▶ Connecting ──ok──▶ Connected
//!       ▲                        │  ▲                │
//!       │                   fail │  │ delay elapsed  │ send/receive failure,
//!  disconnect()                  ▼  │                │ relay close, too many
//!  (any state)                  Backoff ◀────────────┘ malformed frames
//! ```
//!
//! The connection runs as a spawned task that owns the transport. The
//! [`RelayConnection`] handle talks to it over a command channel and reads
//! status from shared state that is only locked for O(1) updates, never
//! across an `.await`.
//!
//! Subscriptions live in that shared state until unsubscribed (or closed by
//! the relay) and are re-sent on every successful connect.

// State locks are held only for O(1) reads and writes.
#![allow(clippy::significant_drop_tightening)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::error::RelayError;
use super::filter::Filter;
use super::message::{ClientMessage, RelayMessage};
use super::transport::{FrameSink, FrameStream, Transport};
use super::types::{RelayAck, RelayNotification, RelayStatus};
use super::url::RelayUrl;
use crate::config::ConnectionConfig;
use crate::logging::ShortId;
use crate::nostr::Event;

/// Channel a connection reports on. The pool owns the receiving end.
pub type NotificationSender = mpsc::UnboundedSender<(RelayUrl, RelayNotification)>;

#[derive(Debug, Default)]
struct ConnectionState {
    status: RelayStatus,
    subscriptions: BTreeMap<String, Vec<Filter>>,
    last_error: Option<String>,
    attempts: u32,
    pending_publishes: usize,
}

enum Command {
    Publish {
        event: Box<Event>,
        ack: oneshot::Sender<RelayAck>,
    },
    Subscribe(String),
    Unsubscribe(String),
}

/// Publishers waiting for the relay's `OK`, keyed by event id.
///
/// Waiters whose receiver is gone (the publisher stopped waiting) are pruned
/// on every registration, so a relay that never answers cannot grow the map.
#[derive(Default)]
struct PendingAcks {
    waiters: HashMap<String, Vec<oneshot::Sender<RelayAck>>>,
}

impl PendingAcks {
    fn register(&mut self, event_id: String, ack: oneshot::Sender<RelayAck>) {
        self.waiters.retain(|_, senders| {
            senders.retain(|sender| !sender.is_closed());
            !senders.is_empty()
        });
        self.waiters.entry(event_id).or_default().push(ack);
    }

    fn resolve(&mut self, ack: &RelayAck) {
        for sender in self.waiters.remove(&ack.event_id).into_iter().flatten() {
            let _ = sender.send(ack.clone());
        }
    }

    fn len(&self) -> usize {
        self.waiters.values().map(Vec::len).sum()
    }
}

struct Worker {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

/// Handle to one relay connection.
pub struct RelayConnection {
    url: RelayUrl,
    transport: Arc<dyn Transport>,
    config: ConnectionConfig,
    state: Arc<Mutex<ConnectionState>>,
    notifications: NotificationSender,
    worker: Mutex<Option<Worker>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RelayConnection {
    /// Creates a disconnected connection. Call [`connect`](Self::connect) to start it.
    #[must_use]
    pub fn new(
        url: RelayUrl,
        transport: Arc<dyn Transport>,
        config: ConnectionConfig,
        notifications: NotificationSender,
    ) -> Self {
        Self {
            url,
            transport,
            config,
            state: Arc::new(Mutex::new(ConnectionState::default())),
            notifications,
            worker: Mutex::new(None),
        }
    }

    /// The relay endpoint.
    #[must_use]
    pub const fn url(&self) -> &RelayUrl {
        &self.url
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> RelayStatus {
        lock(&self.state).status
    }

    /// The most recent connection failure, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        lock(&self.state).last_error.clone()
    }

    /// Failed connect attempts since the last successful connect.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        lock(&self.state).attempts
    }

    /// Publishes sent on the current session that still await an `OK`.
    #[must_use]
    pub fn pending_publishes(&self) -> usize {
        lock(&self.state).pending_publishes
    }

    /// Ids of the subscriptions that will be replayed on reconnect.
    #[must_use]
    pub fn subscription_ids(&self) -> Vec<String> {
        lock(&self.state).subscriptions.keys().cloned().collect()
    }

    /// Starts the connection task. Does nothing if it is already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(&self) {
        let mut worker = lock(&self.worker);
        if worker.as_ref().is_some_and(|w| !w.task.is_finished()) {
            return;
        }

        let (commands, receiver) = mpsc::unbounded_channel();
        let task = ConnectionTask {
            url: self.url.clone(),
            transport: Arc::clone(&self.transport),
            config: self.config.clone(),
            state: Arc::clone(&self.state),
            commands: receiver,
            notifications: self.notifications.clone(),
        };
        info!(relay = %self.url, "starting relay connection");
        *worker = Some(Worker {
            commands,
            task: tokio::spawn(task.run()),
        });
    }

    /// Sends `event` to the relay.
    ///
    /// The receiver resolves with the relay's `OK`. It is cancelled if the
    /// connection drops first or is not running.
    pub fn publish(&self, event: &Event) -> oneshot::Receiver<RelayAck> {
        let (ack, receiver) = oneshot::channel();
        // On send failure the command, and with it `ack`, is dropped.
        self.send(Command::Publish {
            event: Box::new(event.clone()),
            ack,
        });
        receiver
    }

    /// Registers a subscription and sends it if connected.
    ///
    /// Re-sent automatically after every reconnect until unsubscribed.
    pub fn subscribe(&self, subscription_id: &str, filters: Vec<Filter>) {
        lock(&self.state)
            .subscriptions
            .insert(subscription_id.to_string(), filters);
        self.send(Command::Subscribe(subscription_id.to_string()));
    }

    /// Closes a subscription. Returns false if it was not registered.
    pub fn unsubscribe(&self, subscription_id: &str) -> bool {
        let removed = lock(&self.state)
            .subscriptions
            .remove(subscription_id)
            .is_some();
        if removed {
            self.send(Command::Unsubscribe(subscription_id.to_string()));
        }
        removed
    }

    /// Aborts the connection task without waiting for in-flight I/O.
    ///
    /// Pending acknowledgements are cancelled. Registered subscriptions are
    /// kept and replayed if [`connect`](Self::connect) is called again.
    pub fn disconnect(&self) {
        if let Some(worker) = lock(&self.worker).take() {
            worker.task.abort();
        }
        let changed = {
            let mut state = lock(&self.state);
            let changed = state.status != RelayStatus::Disconnected;
            state.status = RelayStatus::Disconnected;
            state.pending_publishes = 0;
            changed
        };
        if changed {
            info!(relay = %self.url, "relay disconnected");
            let _ = self.notifications.send((
                self.url.clone(),
                RelayNotification::Status(RelayStatus::Disconnected),
            ));
        }
    }

    fn send(&self, command: Command) {
        if let Some(worker) = lock(&self.worker).as_ref() {
            let _ = worker.commands.send(command);
        }
    }
}

impl Drop for RelayConnection {
    fn drop(&mut self) {
        if let Some(worker) = lock(&self.worker).take() {
            worker.task.abort();
        }
    }
}

impl std::fmt::Debug for RelayConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConnection")
            .field("url", &self.url)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

/// Why a connected session ended.
enum SessionEnd {
    /// The handle went away; stop for good.
    Stopped,
    /// The connection failed; back off and reconnect.
    Failed(String),
}

struct ConnectionTask {
    url: RelayUrl,
    transport: Arc<dyn Transport>,
    config: ConnectionConfig,
    state: Arc<Mutex<ConnectionState>>,
    commands: mpsc::UnboundedReceiver<Command>,
    notifications: NotificationSender,
}

impl ConnectionTask {
    async fn run(mut self) {
        loop {
            self.set_status(RelayStatus::Connecting);

            let failure = match tokio::time::timeout(
                self.config.connect_timeout(),
                self.transport.connect(&self.url),
            )
            .await
            {
                Ok(Ok((sink, stream))) => {
                    {
                        let mut state = lock(&self.state);
                        state.attempts = 0;
                        state.last_error = None;
                    }
                    self.set_status(RelayStatus::Connected);
                    let end = self.session(sink, stream).await;
                    lock(&self.state).pending_publishes = 0;
                    match end {
                        SessionEnd::Stopped => return,
                        SessionEnd::Failed(reason) => reason,
                    }
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => RelayError::Timeout(format!("connect to {}", self.url)).to_string(),
            };

            let attempt = {
                let mut state = lock(&self.state);
                state.last_error = Some(failure.clone());
                let attempt = state.attempts;
                state.attempts = state.attempts.saturating_add(1);
                attempt
            };
            let delay = self.backoff_delay(attempt);
            warn!(relay = %self.url, error = %failure, ?delay, "relay connection lost, backing off");
            self.set_status(RelayStatus::Backoff);

            if !self.wait_backoff(delay).await {
                return;
            }
        }
    }

    /// Sleeps for `delay` while refusing commands. Returns false if the
    /// handle is gone.
    async fn wait_backoff(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                () = &mut sleep => return true,
                command = self.commands.recv() => match command {
                    // Dropping a publish cancels its acknowledgement; subscription
                    // changes are already in shared state.
                    Some(_) => {}
                    None => return false,
                },
            }
        }
    }

    async fn session(&mut self, mut sink: FrameSink, mut stream: FrameStream) -> SessionEnd {
        let replay: Vec<(String, Vec<Filter>)> = lock(&self.state)
            .subscriptions
            .iter()
            .map(|(id, filters)| (id.clone(), filters.clone()))
            .collect();
        if !replay.is_empty() {
            debug!(relay = %self.url, count = replay.len(), "replaying subscriptions");
        }
        for (subscription_id, filters) in replay {
            let frame = ClientMessage::Req {
                subscription_id,
                filters,
            };
            if let Err(e) = send_frame(&mut sink, &frame).await {
                return SessionEnd::Failed(e.to_string());
            }
        }

        let mut pending_acks = PendingAcks::default();
        let mut malformed: u32 = 0;

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        return SessionEnd::Stopped;
                    };
                    if let Err(e) = self.handle_command(command, &mut sink, &mut pending_acks).await {
                        return SessionEnd::Failed(e.to_string());
                    }
                }
                frame = stream.next() => match frame {
                    None => return SessionEnd::Failed("connection closed by relay".to_string()),
                    Some(Ok(text)) => match RelayMessage::from_json(&text) {
                        Ok(message) => {
                            malformed = 0;
                            self.handle_message(message, &mut pending_acks);
                        }
                        Err(e) => {
                            if let Some(end) = self.record_malformed(&mut malformed, e) {
                                return end;
                            }
                        }
                    },
                    Some(Err(e @ RelayError::ProtocolFrame(_))) => {
                        if let Some(end) = self.record_malformed(&mut malformed, e) {
                            return end;
                        }
                    }
                    Some(Err(e)) => return SessionEnd::Failed(e.to_string()),
                },
            }
        }
    }

    async fn handle_command(
        &self,
        command: Command,
        sink: &mut FrameSink,
        pending_acks: &mut PendingAcks,
    ) -> Result<(), RelayError> {
        match command {
            Command::Publish { event, ack } => {
                let event_id = event.id.clone();
                send_frame(sink, &ClientMessage::Event(event)).await?;
                debug!(relay = %self.url, event = %ShortId(&event_id), "event sent");
                pending_acks.register(event_id, ack);
                lock(&self.state).pending_publishes = pending_acks.len();
            }
            Command::Subscribe(subscription_id) => {
                let filters = lock(&self.state)
                    .subscriptions
                    .get(&subscription_id)
                    .cloned();
                if let Some(filters) = filters {
                    send_frame(
                        sink,
                        &ClientMessage::Req {
                            subscription_id,
                            filters,
                        },
                    )
                    .await?;
                }
            }
            Command::Unsubscribe(subscription_id) => {
                send_frame(sink, &ClientMessage::Close(subscription_id)).await?;
            }
        }
        Ok(())
    }

    fn handle_message(
        &self,
        message: RelayMessage,
        pending_acks: &mut PendingAcks,
    ) {
        let notification = match message {
            RelayMessage::Event {
                subscription_id,
                event,
            } => RelayNotification::Event {
                subscription_id,
                event,
            },
            RelayMessage::Eose(subscription_id) => RelayNotification::Eose(subscription_id),
            RelayMessage::Ok {
                event_id,
                accepted,
                message,
            } => {
                let ack = RelayAck {
                    event_id,
                    accepted,
                    message,
                };
                if !ack.accepted {
                    debug!(relay = %self.url, event = %ShortId(&ack.event_id), reason = %ack.message, "event rejected");
                }
                pending_acks.resolve(&ack);
                lock(&self.state).pending_publishes = pending_acks.len();
                RelayNotification::Ok(ack)
            }
            RelayMessage::Notice(message) => {
                info!(relay = %self.url, notice = %message, "relay notice");
                RelayNotification::Notice(message)
            }
            RelayMessage::Closed {
                subscription_id,
                message,
            } => {
                lock(&self.state).subscriptions.remove(&subscription_id);
                info!(relay = %self.url, subscription = %subscription_id, reason = %message, "subscription closed by relay");
                RelayNotification::Closed {
                    subscription_id,
                    message,
                }
            }
            RelayMessage::Unknown(kind) => {
                debug!(relay = %self.url, frame = %kind, "ignoring unsupported frame type");
                return;
            }
        };
        self.notify(notification);
    }

    /// Counts a malformed frame. Returns `Some` once the limit is exceeded.
    fn record_malformed(&self, count: &mut u32, error: RelayError) -> Option<SessionEnd> {
        *count += 1;
        warn!(relay = %self.url, %error, consecutive = *count, "dropping malformed frame");
        self.notify(RelayNotification::FrameError(error.to_string()));
        (*count > self.config.max_malformed_frames).then(|| {
            SessionEnd::Failed(format!("{count} consecutive malformed frames"))
        })
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.backoff_delay(attempt);
        if self.config.backoff_jitter {
            base.mul_f64(rand::thread_rng().gen_range(0.9..=1.1))
        } else {
            base
        }
    }

    fn set_status(&self, status: RelayStatus) {
        let changed = {
            let mut state = lock(&self.state);
            let changed = state.status != status;
            state.status = status;
            changed
        };
        if changed {
            debug!(relay = %self.url, ?status, "relay status changed");
            self.notify(RelayNotification::Status(status));
        }
    }

    fn notify(&self, notification: RelayNotification) {
        let _ = self.notifications.send((self.url.clone(), notification));
    }
}

async fn send_frame(sink: &mut FrameSink, message: &ClientMessage) -> Result<(), RelayError> {
    sink.send(message.to_json()?).await
}
