//! Bounded set of seen event ids.
//!
//! Eviction is first-in-first-out by count, plus an optional age limit.
//! Instances are owned explicitly and passed to whoever needs them; there is
//! no process-wide cache.

// The lock is held only for O(1) map/queue operations.
#![allow(clippy::significant_drop_tightening)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Bounded dedup cache keyed by event id.
///
/// # Example
///
/// ```
/// use driftwood_core::cache::SeenCache;
///
/// let cache = SeenCache::new(2, None);
/// assert!(cache.insert("a"));
/// assert!(!cache.insert("a"));
/// cache.insert("b");
/// cache.insert("c");
/// assert!(!cache.contains("a"));
/// ```
#[derive(Debug)]
pub struct SeenCache {
    inner: Mutex<Inner>,
    capacity: usize,
    max_age: Option<Duration>,
}

#[derive(Debug, Default)]
struct Inner {
    seen: HashMap<String, Instant>,
    order: VecDeque<(String, Instant)>,
}

impl Inner {
    fn evict_expired(&mut self, max_age: Option<Duration>, now: Instant) {
        let Some(max_age) = max_age else { return };
        while let Some((id, at)) = self.order.front() {
            if now.duration_since(*at) < max_age {
                break;
            }
            // Only drop the map entry if it was not re-inserted later.
            if self.seen.get(id) == Some(at) {
                self.seen.remove(id);
            }
            self.order.pop_front();
        }
    }

    fn evict_over_capacity(&mut self, capacity: usize) {
        while self.seen.len() > capacity {
            let Some((id, at)) = self.order.pop_front() else { break };
            if self.seen.get(&id) == Some(&at) {
                self.seen.remove(&id);
            }
        }
    }
}

impl SeenCache {
    /// Creates a cache holding at most `capacity` ids, each for at most `max_age`.
    #[must_use]
    pub fn new(capacity: usize, max_age: Option<Duration>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity: capacity.max(1),
            max_age,
        }
    }

    /// Records `id`. Returns true if it was not already present.
    pub fn insert(&self, id: &str) -> bool {
        let now = Instant::now();
        let Ok(mut inner) = self.inner.lock() else {
            return true;
        };
        inner.evict_expired(self.max_age, now);
        if inner.seen.contains_key(id) {
            return false;
        }
        inner.seen.insert(id.to_string(), now);
        inner.order.push_back((id.to_string(), now));
        inner.evict_over_capacity(self.capacity);
        true
    }

    /// Returns true if `id` is present and not expired.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        let Ok(mut inner) = self.inner.lock() else {
            return false;
        };
        inner.evict_expired(self.max_age, Instant::now());
        inner.seen.contains_key(id)
    }

    /// Forgets `id`.
    pub fn remove(&self, id: &str) -> bool {
        self.inner
            .lock()
            .map(|mut inner| inner.seen.remove(id).is_some())
            .unwrap_or(false)
    }

    /// Number of ids currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.seen.len()).unwrap_or(0)
    }

    /// Returns true if the cache holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forgets every id.
    pub fn clear(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.seen.clear();
            inner.order.clear();
        }
    }

    /// Maximum number of ids held.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}
