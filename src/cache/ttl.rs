//! Bounded, expiring local key/value store.
//!
//! Foundation of the hybrid cache's local tier, but usable on its own. The
//! entry bound is enforced with a deterministic first-inserted-first-evicted
//! policy: when inserting a new key would exceed `max_entries`, the key that
//! was inserted earliest is evicted first. Expired entries are deleted lazily
//! by the read that encounters them, so stale data is never returned even
//! before any sweep runs.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::trace;

use crate::config::TtlCacheConfig;

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

struct Inner<V> {
    entries: HashMap<String, Entry<V>>,
    /// Keys in first-insertion order. May contain keys that were since
    /// deleted; stale fronts are skipped during eviction.
    insertion_order: VecDeque<String>,
}

/// Bounded TTL cache keyed by string.
pub struct TtlCache<V> {
    config: TtlCacheConfig,
    inner: Mutex<Inner<V>>,
}

impl<V: Clone> TtlCache<V> {
    /// Create a new cache with the given configuration.
    #[must_use]
    pub fn new(config: TtlCacheConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                insertion_order: VecDeque::new(),
            }),
        }
    }

    /// Store `value` under `key`.
    ///
    /// `ttl` defaults to the configured TTL. Re-inserting an existing key
    /// refreshes its value and expiry without triggering eviction; its
    /// position in the eviction order is the original insertion.
    pub fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or_else(|| self.config.default_ttl());
        let expires_at = Instant::now() + ttl;
        let mut inner = self.inner.lock();

        if !inner.entries.contains_key(key) {
            if inner.entries.len() >= self.config.max_entries {
                Self::evict_oldest(&mut inner);
            }
            inner.insertion_order.push_back(key.to_string());
        }
        inner.entries.insert(key.to_string(), Entry { value, expires_at });
    }

    /// Fetch the value under `key`, if present and unexpired.
    ///
    /// An expired entry encountered here is deleted on the spot.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.inner.lock();
        let expired = match inner.entries.get(key) {
            Some(entry) if Instant::now() > entry.expires_at => true,
            Some(entry) => return Some(entry.value.clone()),
            None => return None,
        };
        if expired {
            inner.entries.remove(key);
            Self::maybe_compact_order(&mut inner);
            trace!(key, "expired entry deleted on read");
        }
        None
    }

    /// Remove `key` unconditionally. Safe to call for an absent key.
    pub fn delete(&self, key: &str) {
        let mut inner = self.inner.lock();
        inner.entries.remove(key);
        Self::maybe_compact_order(&mut inner);
    }

    /// Current entry count.
    ///
    /// Expired entries still count until a read or eviction removes them.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the cache currently holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove all entries.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.insertion_order.clear();
    }

    /// Evict the earliest-inserted key that is still present.
    fn evict_oldest(inner: &mut Inner<V>) {
        while let Some(key) = inner.insertion_order.pop_front() {
            if inner.entries.remove(&key).is_some() {
                trace!(key = %key, "evicted oldest entry");
                return;
            }
            // Key was deleted earlier; its order slot is stale.
        }
    }

    /// Drop stale order slots once they outnumber live entries.
    ///
    /// Deletions and lazy expiry leave slots behind; without this, a churning
    /// workload that stays under `max_entries` grows the queue without limit.
    /// Walks from the back so a key deleted and re-inserted keeps its newest
    /// position.
    fn maybe_compact_order(inner: &mut Inner<V>) {
        if inner.insertion_order.len() < inner.entries.len() * 2 + 8 {
            return;
        }
        let Inner {
            entries,
            insertion_order,
        } = inner;
        let mut seen = HashSet::with_capacity(entries.len());
        let mut kept = VecDeque::with_capacity(entries.len());
        while let Some(key) = insertion_order.pop_back() {
            if entries.contains_key(&key) && seen.insert(key.clone()) {
                kept.push_front(key);
            }
        }
        *insertion_order = kept;
    }
}
