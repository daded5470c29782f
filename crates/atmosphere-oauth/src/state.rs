//! Short-lived authorization-state store.
//!
//! Holds the state nonces that correlate a callback with the request that
//! produced it. TTL-bounded (10 minutes) and capacity-bounded (10 entries,
//! oldest evicted first); expired entries are purged on every access.

use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

pub const STATE_TTL: Duration = Duration::from_secs(10 * 60);
pub const STATE_CAPACITY: usize = 10;

struct StateEntry<V> {
    key: String,
    value: V,
    inserted_at: Instant,
}

/// Insertion-ordered nonce -> value store with TTL and capacity bounds.
pub struct StateStore<V> {
    entries: Mutex<Vec<StateEntry<V>>>,
    ttl: Duration,
    capacity: usize,
}

impl<V> StateStore<V> {
    pub fn new() -> Self {
        Self::with_bounds(STATE_TTL, STATE_CAPACITY)
    }

    pub fn with_bounds(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            ttl,
            capacity,
        }
    }

    /// Record a state nonce. At capacity, the oldest live entry is evicted.
    pub fn insert(&self, key: impl Into<String>, value: V) {
        let key = key.into();
        let mut entries = self.entries.lock().unwrap();
        Self::purge(&mut entries, self.ttl);
        entries.retain(|e| e.key != key);
        if entries.len() >= self.capacity {
            entries.remove(0);
        }
        entries.push(StateEntry {
            key,
            value,
            inserted_at: Instant::now(),
        });
    }

    /// Consume a state nonce. Each nonce is single-use; expired or unknown
    /// nonces return `None`.
    pub fn take(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.lock().unwrap();
        Self::purge(&mut entries, self.ttl);
        let index = entries.iter().position(|e| e.key == key)?;
        Some(entries.remove(index).value)
    }

    pub fn len(&self) -> usize {
        let mut entries = self.entries.lock().unwrap();
        Self::purge(&mut entries, self.ttl);
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn purge(entries: &mut Vec<StateEntry<V>>, ttl: Duration) {
        entries.retain(|e| e.inserted_at.elapsed() < ttl);
    }
}

impl<V> Default for StateStore<V> {
    fn default() -> Self {
        Self::new()
    }
}
