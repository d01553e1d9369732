//! Reference-counted, idle-time evicted caches.
//!
//! [`RefCountCache`] is the bare policy: `key -> (value, refcount, last use)`
//! with eviction predicate `refcount < 1 && now - last_use > ttl`. It does no
//! locking and takes the current time as a parameter.
//!
//! [`IdentityCache`] is the server's handle table built on it: keys are
//! minted sequentially, re-exposing the same object yields the same key, and
//! every operation runs under one mutex shared with the background sweep.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::object::{Identity, Value};

#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub ref_count: u64,
    pub last_used: Instant,
}

#[derive(Debug)]
pub struct RefCountCache<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    ttl: Duration,
}

impl<K: Eq + Hash + Clone, V> RefCountCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert with a zero refcount; returns the value previously stored.
    pub fn put(&mut self, key: K, value: V, now: Instant) -> Option<V> {
        self.entries
            .insert(
                key,
                CacheEntry {
                    value,
                    ref_count: 0,
                    last_used: now,
                },
            )
            .map(|old| old.value)
    }

    /// Look up and mark as used.
    pub fn get(&mut self, key: &K, now: Instant) -> Option<&V> {
        let entry = self.entries.get_mut(key)?;
        entry.last_used = now;
        Some(&entry.value)
    }

    /// Look up without touching.
    pub fn peek(&self, key: &K) -> Option<&CacheEntry<V>> {
        self.entries.get(key)
    }

    /// Returns the new refcount, `None` if the key is unknown.
    pub fn increase(&mut self, key: &K, now: Instant) -> Option<u64> {
        let entry = self.entries.get_mut(key)?;
        entry.ref_count = entry.ref_count.saturating_add(1);
        entry.last_used = now;
        Some(entry.ref_count)
    }

    /// Returns the new refcount, `None` if the key is unknown.
    ///
    /// The count is clamped at zero: a decrease with nothing outstanding is
    /// logged and otherwise only refreshes the last-use time.
    pub fn decrease(&mut self, key: &K, now: Instant) -> Option<u64> {
        let entry = self.entries.get_mut(key)?;
        if entry.ref_count == 0 {
            tracing::warn!("Refcount decrease below zero, clamping");
        }
        entry.ref_count = entry.ref_count.saturating_sub(1);
        entry.last_used = now;
        Some(entry.ref_count)
    }

    pub fn is_expired(&self, entry: &CacheEntry<V>, now: Instant) -> bool {
        entry.ref_count < 1 && now.saturating_duration_since(entry.last_used) > self.ttl
    }

    /// Remove and return every expired entry.
    pub fn sweep(&mut self, now: Instant) -> Vec<(K, V)> {
        let expired: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, entry)| self.is_expired(entry, now))
            .map(|(key, _)| key.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|key| self.entries.remove(&key).map(|e| (key, e.value)))
            .collect()
    }
}

struct IdentityInner {
    entries: RefCountCache<String, Value>,
    index: HashMap<Identity, String>,
    next_key: u64,
}

impl IdentityInner {
    fn forget(&mut self, value: &Value) {
        if let Some(identity) = value.identity() {
            self.index.remove(&identity);
        }
    }
}

/// Server-side key <-> object table.
pub struct IdentityCache {
    inner: Mutex<IdentityInner>,
}

impl IdentityCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(IdentityInner {
                entries: RefCountCache::new(ttl),
                index: HashMap::new(),
                next_key: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, IdentityInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Key for `value`, reusing the existing one when the same object is
    /// already cached. `None` for values without identity (literals, classes).
    pub fn cache_key(&self, value: &Value) -> Option<String> {
        let identity = value.identity()?;
        let now = Instant::now();
        let mut inner = self.lock();
        if let Some(key) = inner.index.get(&identity).cloned() {
            inner.entries.get(&key, now);
            return Some(key);
        }
        inner.next_key += 1;
        let key = inner.next_key.to_string();
        inner.entries.put(key.clone(), value.clone(), now);
        inner.index.insert(identity, key.clone());
        Some(key)
    }

    /// Object cached under `key`; marks it as used.
    pub fn lookup(&self, key: &str) -> Option<Value> {
        self.lock()
            .entries
            .get(&key.to_string(), Instant::now())
            .cloned()
    }

    /// Increase every key's count, or none of them: an unknown key is
    /// returned and nothing changes.
    pub fn increase_all(&self, keys: &[&str]) -> Result<(), String> {
        self.adjust_all(keys, RefCountCache::increase)
    }

    /// [`IdentityCache::increase_all`], downwards.
    pub fn decrease_all(&self, keys: &[&str]) -> Result<(), String> {
        self.adjust_all(keys, RefCountCache::decrease)
    }

    fn adjust_all(
        &self,
        keys: &[&str],
        op: fn(&mut RefCountCache<String, Value>, &String, Instant) -> Option<u64>,
    ) -> Result<(), String> {
        let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        let now = Instant::now();
        let mut inner = self.lock();
        if let Some(unknown) = keys.iter().find(|k| inner.entries.peek(k).is_none()) {
            return Err(unknown.clone());
        }
        for key in &keys {
            op(&mut inner.entries, key, now);
        }
        Ok(())
    }

    pub fn ref_count(&self, key: &str) -> Option<u64> {
        self.lock()
            .entries
            .peek(&key.to_string())
            .map(|e| e.ref_count)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn ttl(&self) -> Duration {
        self.lock().entries.ttl()
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// Evict every entry expired as of `now`; returns how many were removed.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut inner = self.lock();
        let evicted = inner.entries.sweep(now);
        for (_, value) in &evicted {
            inner.forget(value);
        }
        evicted.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::object::ClassBuilder;
    use std::sync::Arc;

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn increase_then_decrease_returns_to_zero() {
        let now = Instant::now();
        let mut cache = RefCountCache::new(TTL);
        cache.put("k", 1, now);
        for i in 1..=5 {
            assert_eq!(cache.increase(&"k", now), Some(i));
        }
        for _ in 0..5 {
            cache.decrease(&"k", now);
        }
        assert_eq!(cache.peek(&"k").unwrap().ref_count, 0);
    }

    #[test]
    fn decrease_clamps_at_zero() {
        let now = Instant::now();
        let mut cache = RefCountCache::new(TTL);
        cache.put("k", (), now);
        assert_eq!(cache.decrease(&"k", now), Some(0));
        assert_eq!(cache.decrease(&"k", now), Some(0));
        assert_eq!(cache.increase(&"k", now), Some(1));
        assert_eq!(cache.decrease(&"missing", now), None);
    }

    #[test]
    fn sweep_requires_zero_refcount_and_idle_past_ttl() {
        let start = Instant::now();
        let mut cache = RefCountCache::new(TTL);
        cache.put("idle", (), start);
        cache.put("held", (), start);
        cache.increase(&"held", start);

        assert!(cache.sweep(start + TTL).is_empty());
        assert_eq!(cache.len(), 2);

        let evicted = cache.sweep(start + TTL + Duration::from_millis(1));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].0, "idle");
        assert!(cache.peek(&"held").is_some());
    }

    #[test]
    fn use_postpones_eviction() {
        let start = Instant::now();
        let mut cache = RefCountCache::new(TTL);
        cache.put("k", (), start);
        cache.get(&"k", start + TTL);
        assert!(cache.sweep(start + TTL + Duration::from_secs(1)).is_empty());

        cache.increase(&"k", start + TTL * 2);
        cache.decrease(&"k", start + TTL * 3);
        assert!(cache.sweep(start + TTL * 4).is_empty());
        assert_eq!(cache.sweep(start + TTL * 4 + Duration::from_secs(1)).len(), 1);
    }

    fn widget() -> Value {
        Arc::new(ClassBuilder::new("Widget").build())
            .new_instance()
            .unwrap()
    }

    #[test]
    fn same_object_same_key() {
        let cache = IdentityCache::new(TTL);
        let a = widget();
        let b = widget();
        assert_eq!(cache.cache_key(&a).as_deref(), Some("1"));
        assert_eq!(cache.cache_key(&b).as_deref(), Some("2"));
        assert_eq!(cache.cache_key(&a.clone()).as_deref(), Some("1"));
        assert_eq!(cache.len(), 2);
        assert!(cache.cache_key(&Value::Number(3.0)).is_none());
    }

    #[test]
    fn lookup_returns_the_cached_object() {
        let cache = IdentityCache::new(TTL);
        let a = widget();
        let key = cache.cache_key(&a).unwrap();
        assert_eq!(cache.lookup(&key).unwrap().identity(), a.identity());
        assert!(cache.lookup("999").is_none());
    }

    #[test]
    fn sweep_forgets_identity() {
        let cache = IdentityCache::new(TTL);
        let a = widget();
        let held = widget();
        let key = cache.cache_key(&a).unwrap();
        let held_key = cache.cache_key(&held).unwrap();
        cache.increase_all(&[held_key.as_str()]).unwrap();

        assert_eq!(cache.sweep_at(Instant::now() + TTL * 2), 1);
        assert!(cache.lookup(&key).is_none());
        assert_eq!(cache.ref_count(&held_key), Some(1));

        // re-exposure after eviction mints a new key
        let again = cache.cache_key(&a).unwrap();
        assert_ne!(again, key);
    }

    #[test]
    fn concurrent_exposure_is_consistent() {
        let cache = Arc::new(IdentityCache::new(TTL));
        let shared = widget();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let shared = shared.clone();
                std::thread::spawn(move || {
                    let key = cache.cache_key(&shared).unwrap();
                    cache.increase_all(&[key.as_str()]).unwrap();
                    cache.decrease_all(&[key.as_str()]).unwrap();
                    key
                })
            })
            .collect();
        let keys: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(keys.iter().all(|k| k == &keys[0]));
        assert_eq!(cache.ref_count(&keys[0]), Some(0));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn adjusting_many_keys_is_all_or_nothing() {
        let cache = IdentityCache::new(TTL);
        let a = cache.cache_key(&widget()).unwrap();
        let b = cache.cache_key(&widget()).unwrap();
        let (a, b) = (a.as_str(), b.as_str());

        assert_eq!(cache.increase_all(&[a, "404", b]), Err("404".to_string()));
        assert_eq!(cache.ref_count(a), Some(0));
        assert_eq!(cache.ref_count(b), Some(0));

        cache.increase_all(&[a, b, a]).unwrap();
        assert_eq!(cache.ref_count(a), Some(2));
        assert_eq!(cache.ref_count(b), Some(1));

        assert!(cache.decrease_all(&[b, "404"]).is_err());
        assert_eq!(cache.ref_count(b), Some(1));
    }
}
