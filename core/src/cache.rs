//! Expiring in-memory caches
//!
//! Every cache in the crate is built from [`CacheEntry`] values held in an
//! [`ExpiringCache`]. Expired entries are never served as hits; they are
//! moved aside on access and kept only as a last-resort fallback for when
//! the network fails.
//!
//! Timestamps come from `tokio::time::Instant` so tests can pause the clock.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

/// A cached value with its creation time and optional explicit expiry
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    value: T,
    timestamp: Instant,
    expires_at: Option<Instant>,
}

impl<T> CacheEntry<T> {
    /// Create an entry whose expiry is derived from the cache's window
    pub fn new(value: T) -> Self {
        Self {
            value,
            timestamp: Instant::now(),
            expires_at: None,
        }
    }

    /// Create an entry that expires `ttl` from now regardless of window
    pub fn with_ttl(value: T, ttl: Duration) -> Self {
        let timestamp = Instant::now();
        Self {
            value,
            timestamp,
            expires_at: Some(timestamp + ttl),
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    pub fn age(&self) -> Duration {
        Instant::now().saturating_duration_since(self.timestamp)
    }

    /// Whether the entry may still be served as a cache hit
    ///
    /// An explicit expiry wins; otherwise the entry is valid while
    /// `now - timestamp < window`.
    pub fn is_valid(&self, window: Duration) -> bool {
        self.is_valid_at(Instant::now(), window)
    }

    pub fn is_valid_at(&self, now: Instant, window: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => now < expires_at,
            None => now.saturating_duration_since(self.timestamp) < window,
        }
    }
}

/// String-keyed cache with a fixed expiration window and a stale tier
#[derive(Debug)]
pub struct ExpiringCache<V> {
    window: Duration,
    fresh: HashMap<String, CacheEntry<V>>,
    stale: HashMap<String, CacheEntry<V>>,
}

impl<V: Clone> ExpiringCache<V> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            fresh: HashMap::new(),
            stale: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Return the value for `key` if it is still valid
    ///
    /// An expired entry is evicted into the stale tier and `None` is returned.
    pub fn get_fresh(&mut self, key: &str) -> Option<V> {
        let entry = self.fresh.get(key)?;
        if entry.is_valid(self.window) {
            return Some(entry.value().clone());
        }

        if let Some(expired) = self.fresh.remove(key) {
            log::debug!("Cache entry {key} expired after {:?}", expired.age());
            self.stale.insert(key.to_string(), expired);
        }
        None
    }

    /// Return the value for `key` whether valid or expired
    pub fn get_stale(&self, key: &str) -> Option<V> {
        self.fresh
            .get(key)
            .or_else(|| self.stale.get(key))
            .map(|entry| entry.value().clone())
    }

    /// Store a value that expires after the cache's window
    pub fn insert(&mut self, key: impl Into<String>, value: V) {
        self.put(key.into(), CacheEntry::new(value));
    }

    /// Store a value with an explicit lifetime
    pub fn insert_with_ttl(&mut self, key: impl Into<String>, value: V, ttl: Duration) {
        self.put(key.into(), CacheEntry::with_ttl(value, ttl));
    }

    fn put(&mut self, key: String, entry: CacheEntry<V>) {
        self.stale.remove(&key);
        self.fresh.insert(key, entry);
    }

    /// Drop `key` from both tiers, returning whether anything was removed
    pub fn remove(&mut self, key: &str) -> bool {
        let fresh = self.fresh.remove(key).is_some();
        let stale = self.stale.remove(key).is_some();
        fresh || stale
    }

    /// Keep only the keys for which `keep` returns true; returns how many were dropped
    pub fn retain_keys(&mut self, mut keep: impl FnMut(&str) -> bool) -> usize {
        let before = self.fresh.len() + self.stale.len();
        self.fresh.retain(|key, _| keep(key));
        self.stale.retain(|key, _| keep(key));
        before - (self.fresh.len() + self.stale.len())
    }

    pub fn clear(&mut self) {
        self.fresh.clear();
        self.stale.clear();
    }

    /// Number of keys held in either tier
    pub fn len(&self) -> usize {
        self.fresh.len() + self.stale.keys().filter(|k| !self.fresh.contains_key(*k)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.fresh.is_empty() && self.stale.is_empty()
    }
}
