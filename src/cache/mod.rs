//! Revocation & cache layer: ephemeral, TTL-bounded state that never lives in
//! the durable stores — OTP challenges, 2FA step-up tickets, authorization
//! codes, device-flow records, rate counters, and the access-token
//! blacklist. Grounded on the teacher's `src/sso.rs` cache statics
//! (`moka`-backed, per-entry TTL) composed with `dashmap::DashMap` for the
//! atomic single-shot "Take" primitive Design Notes calls out: a separate
//! get-then-delete is a replay bug, `DashMap::remove` is one atomic op.

use std::hash::Hash;
use std::time::Duration;

use dashmap::DashMap;
use moka::sync::Cache;

/// A single-use challenge store: `put` registers a value with a TTL, `take`
/// atomically removes and returns it (or `None` if absent/already taken/
/// expired). Used for OTP challenges, 2FA step-up tickets, OAuth
/// authorization codes, and device-flow records.
pub struct TakeStore<K, V>
where
    K: Eq + Hash + Send + Sync + Clone + 'static,
    V: Clone + Send + Sync + 'static,
{
    entries: DashMap<K, (V, std::time::Instant)>,
}

impl<K, V> TakeStore<K, V>
where
    K: Eq + Hash + Send + Sync + Clone + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Registers `value` under `key`, expiring after `ttl`. Overwrites any
    /// previous live entry under the same key (used to implement "issuing a
    /// new challenge invalidates the old one for that key").
    pub fn put(&self, key: K, value: V, ttl: Duration) {
        self.entries.insert(key, (value, std::time::Instant::now() + ttl));
    }

    /// Atomically removes and returns the entry, or `None` if it was never
    /// there, already consumed, or has expired. This is the single atomic
    /// operation that makes replay impossible: two concurrent callers racing
    /// on the same key can never both succeed.
    pub fn take(&self, key: &K) -> Option<V> {
        let (_, (value, expires_at)) = self.entries.remove(key)?;
        if std::time::Instant::now() > expires_at {
            None
        } else {
            Some(value)
        }
    }

    /// Removes an entry without returning it (explicit invalidation, e.g. a
    /// fresh challenge superseding an older one for the same principal).
    pub fn invalidate(&self, key: &K) {
        self.entries.remove(key);
    }

    /// Drops expired entries. Called opportunistically; correctness never
    /// depends on this running (an expired-but-present entry is rejected by
    /// `take` regardless), it only bounds memory growth.
    pub fn sweep(&self) {
        self.entries.retain(|_, (_, expires_at)| std::time::Instant::now() <= *expires_at);
    }
}

impl<K, V> Default for TakeStore<K, V>
where
    K: Eq + Hash + Send + Sync + Clone + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// A natural-expiry cache for entries that are read many times before they
/// expire (access-token blacklist entries, verified-session markers) rather
/// than consumed exactly once. Grounded on `src/sso.rs`'s
/// `AC_CACHE: Lazy<Cache<OIDCState, AuthenticatedUser>>`.
pub struct TtlCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    cache: Cache<K, V>,
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            cache: Cache::builder().time_to_live(ttl).build(),
        }
    }

    pub fn insert(&self, key: K, value: V) {
        self.cache.insert(key, value);
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.cache.get(key)
    }

    pub fn invalidate(&self, key: &K) {
        self.cache.invalidate(key);
    }

    pub fn contains(&self, key: &K) -> bool {
        self.cache.contains_key(key)
    }
}

pub mod rate;
pub mod revocation;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_is_single_use() {
        let store: TakeStore<String, u32> = TakeStore::new();
        store.put("k".to_string(), 42, Duration::from_secs(30));
        assert_eq!(store.take(&"k".to_string()), Some(42));
        assert_eq!(store.take(&"k".to_string()), None);
    }

    #[test]
    fn take_rejects_expired_entries() {
        let store: TakeStore<String, u32> = TakeStore::new();
        store.put("k".to_string(), 1, Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(store.take(&"k".to_string()), None);
    }

    #[test]
    fn put_overwrites_previous_live_entry() {
        let store: TakeStore<String, u32> = TakeStore::new();
        store.put("k".to_string(), 1, Duration::from_secs(30));
        store.put("k".to_string(), 2, Duration::from_secs(30));
        assert_eq!(store.take(&"k".to_string()), Some(2));
    }
}
