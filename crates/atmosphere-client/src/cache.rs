//! Strict-expiry TTL cache.
//!
//! Entries are visible only while `now - inserted_at < ttl`; an expired entry
//! is treated as absent and purged on the access that finds it. Reads do not
//! refresh the TTL. There is no background sweep and no entry bound beyond
//! TTL expiry, so unbounded growth in a long-lived process is a known
//! limitation of this cache.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

/// A key -> value store with per-cache expiration.
///
/// Values are cloned out on read so one caller can never mutate another
/// caller's view of a cached value.
pub struct TtlCache<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    ttl: Duration,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Look up a key. Expired entries are removed and reported as absent.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Insert a value, overwriting any previous entry (and its age).
    pub fn set(&self, key: impl Into<String>, value: V) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key.into(),
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Number of entries currently held, including not-yet-purged expired ones.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
