//! JSON event cache on top of a [`KeyValueStore`].

use std::sync::Arc;

use super::{KeyValueStore, Result};
use crate::nostr::Event;

const EVENT_KEY_PREFIX: &str = "event:";

/// Stores validated events by id.
#[derive(Clone)]
pub struct EventCache {
    store: Arc<dyn KeyValueStore>,
}

impl EventCache {
    /// Creates a cache writing through to `store`.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Stores `event` under its id.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the store fails.
    pub fn put(&self, event: &Event) -> Result<()> {
        let json = serde_json::to_vec(event)?;
        self.store.put(&Self::key(&event.id), &json)
    }

    /// Loads the event with `id`, if cached.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the cached bytes are corrupt.
    pub fn get(&self, id: &str) -> Result<Option<Event>> {
        self.store
            .get(&Self::key(id))?
            .map(|bytes| serde_json::from_slice(&bytes))
            .transpose()
            .map_err(Into::into)
    }

    /// Removes the event with `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn remove(&self, id: &str) -> Result<()> {
        self.store.delete(&Self::key(id))
    }

    fn key(id: &str) -> String {
        format!("{EVENT_KEY_PREFIX}{id}")
    }
}

impl std::fmt::Debug for EventCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventCache").finish_non_exhaustive()
    }
}
