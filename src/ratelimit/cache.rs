//! Bounded LRU cache with per-entry expiry.

use std::borrow::Borrow;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// A single cached value with its expiry and recency stamp.
#[derive(Debug)]
struct Slot<V> {
    value: V,
    /// Millisecond timestamp at which the entry stops being visible
    expires_at: i64,
    /// Position in the recency order (higher is more recent)
    stamp: u64,
}

/// A map capped at `capacity` keys, evicting the least recently used key
/// when full. Every entry also expires `ttl_ms` after it was last written.
///
/// Time is passed in by the caller so the cache itself has no clock.
#[derive(Debug)]
pub struct BoundedCache<K, V> {
    capacity: usize,
    ttl_ms: i64,
    entries: HashMap<K, Slot<V>>,
    recency: BTreeMap<u64, K>,
    next_stamp: u64,
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create a cache holding at most `capacity` keys whose entries live for
    /// `ttl_ms` milliseconds after each write.
    pub fn new(capacity: usize, ttl_ms: u64) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl_ms: i64::try_from(ttl_ms).unwrap_or(i64::MAX),
            entries: HashMap::with_capacity(capacity.min(1024)),
            recency: BTreeMap::new(),
            next_stamp: 0,
        }
    }

    /// Maximum number of keys held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of keys currently held, including ones that expired but have
    /// not been touched or purged yet.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a live entry and mark it most recently used.
    pub fn get<Q>(&mut self, key: &Q, now: i64) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.get_mut(key, now).map(|v| &*v)
    }

    /// Look up a live entry mutably and mark it most recently used.
    ///
    /// An expired entry is removed and reported as absent.
    pub fn get_mut<Q>(&mut self, key: &Q, now: i64) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        if self.evict_if_expired(key, now) {
            return None;
        }

        let stamp = self.bump_stamp();
        let slot = self.entries.get_mut(key)?;
        Self::restamp(&mut self.recency, slot, stamp);
        Some(&mut slot.value)
    }

    /// Whether a live entry exists, without changing its recency.
    pub fn contains<Q>(&self, key: &Q, now: i64) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.entries
            .get(key)
            .is_some_and(|slot| slot.expires_at > now)
    }

    /// Write `value` under `key`, resetting its expiry and marking it most
    /// recently used.
    ///
    /// Returns the key evicted to make room, if any.
    pub fn insert(&mut self, key: K, value: V, now: i64) -> Option<K> {
        let stamp = self.bump_stamp();
        let expires_at = now.saturating_add(self.ttl_ms);

        if let Some(old) = self.entries.insert(
            key.clone(),
            Slot {
                value,
                expires_at,
                stamp,
            },
        ) {
            self.recency.remove(&old.stamp);
        }
        self.recency.insert(stamp, key);

        if self.entries.len() > self.capacity {
            return self.evict_lru();
        }
        None
    }

    /// Reset the expiry of an existing entry and mark it most recently used.
    ///
    /// Returns `false` if the key is not present.
    pub fn renew<Q>(&mut self, key: &Q, now: i64) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let stamp = self.bump_stamp();
        let expires_at = now.saturating_add(self.ttl_ms);
        match self.entries.get_mut(key) {
            Some(slot) => {
                Self::restamp(&mut self.recency, slot, stamp);
                slot.expires_at = expires_at;
                true
            }
            None => false,
        }
    }

    /// Remove an entry, returning its value whether or not it had expired.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let slot = self.entries.remove(key)?;
        self.recency.remove(&slot.stamp);
        Some(slot.value)
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&mut self, now: i64) -> usize {
        let expired: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, slot)| slot.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
    }

    fn evict_if_expired<Q>(&mut self, key: &Q, now: i64) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let expired = self
            .entries
            .get(key)
            .is_some_and(|slot| slot.expires_at <= now);
        if expired {
            self.remove(key);
        }
        expired
    }

    /// Move a slot to the head of the recency order, reusing its owned key.
    fn restamp(recency: &mut BTreeMap<u64, K>, slot: &mut Slot<V>, stamp: u64) {
        if let Some(owned) = recency.remove(&slot.stamp) {
            recency.insert(stamp, owned);
            slot.stamp = stamp;
        }
    }

    fn evict_lru(&mut self) -> Option<K> {
        let (_, key) = self.recency.pop_first()?;
        self.entries.remove(&key);
        Some(key)
    }

    fn bump_stamp(&mut self) -> u64 {
        let stamp = self.next_stamp;
        self.next_stamp += 1;
        stamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut cache = BoundedCache::new(4, 1_000);
        cache.insert("a".to_string(), 1, 0);

        assert_eq!(cache.get(&"a".to_string(), 10), Some(&1));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_owned_keys_found_by_borrowed_form() {
        let mut cache: BoundedCache<String, u32> = BoundedCache::new(2, 1_000);
        cache.insert("a".to_string(), 1, 0);
        cache.insert("b".to_string(), 2, 1);

        *cache.get_mut("a", 2).unwrap() += 1;
        assert!(cache.renew("a", 3));
        assert!(cache.contains("b", 3));

        // "a" was touched last, so "b" goes first
        assert_eq!(cache.insert("c".to_string(), 3, 4), Some("b".to_string()));
        assert_eq!(cache.remove("a"), Some(2));
    }

    #[test]
    fn test_huge_ttl_does_not_wrap() {
        let mut cache = BoundedCache::new(2, u64::MAX);
        cache.insert("a", 1, 1_700_000_000_000);

        assert!(cache.contains(&"a", i64::MAX - 1));
        assert_eq!(cache.purge_expired(1_700_000_000_001), 0);
    }

    #[test]
    fn test_evicts_least_recently_used_when_full() {
        let mut cache = BoundedCache::new(2, 10_000);
        cache.insert("a", 1, 0);
        cache.insert("b", 2, 1);

        let evicted = cache.insert("c", 3, 2);

        assert_eq!(evicted, Some("a"));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&"a", 3).is_none());
        assert_eq!(cache.get(&"b", 3), Some(&2));
        assert_eq!(cache.get(&"c", 3), Some(&3));
    }

    #[test]
    fn test_get_refreshes_recency() {
        let mut cache = BoundedCache::new(2, 10_000);
        cache.insert("a", 1, 0);
        cache.insert("b", 2, 1);

        // Touch "a" so "b" becomes the eviction candidate
        cache.get(&"a", 2);
        let evicted = cache.insert("c", 3, 3);

        assert_eq!(evicted, Some("b"));
        assert!(cache.contains(&"a", 4));
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let mut cache = BoundedCache::new(2, 10_000);
        cache.insert("a", 1, 0);
        cache.insert("b", 2, 1);

        assert_eq!(cache.insert("a", 10, 2), None);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"a", 3), Some(&10));
    }

    #[test]
    fn test_entries_expire_after_ttl() {
        let mut cache = BoundedCache::new(4, 100);
        cache.insert("a", 1, 0);

        assert!(cache.contains(&"a", 99));
        assert!(!cache.contains(&"a", 100));
        assert!(cache.get(&"a", 100).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_get_does_not_extend_ttl() {
        let mut cache = BoundedCache::new(4, 100);
        cache.insert("a", 1, 0);

        cache.get(&"a", 90);
        assert!(cache.get(&"a", 100).is_none());
    }

    #[test]
    fn test_renew_extends_ttl() {
        let mut cache = BoundedCache::new(4, 100);
        cache.insert("a", 1, 0);

        assert!(cache.renew(&"a", 90));
        assert_eq!(cache.get(&"a", 150), Some(&1));
        assert!(!cache.renew(&"missing", 150));
    }

    #[test]
    fn test_purge_expired() {
        let mut cache = BoundedCache::new(8, 100);
        cache.insert("old", 1, 0);
        cache.insert("older", 2, 0);
        cache.insert("fresh", 3, 80);

        assert_eq!(cache.purge_expired(120), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&"fresh", 120));
    }

    #[test]
    fn test_remove_and_clear() {
        let mut cache = BoundedCache::new(4, 1_000);
        cache.insert("a", 1, 0);
        cache.insert("b", 2, 0);

        assert_eq!(cache.remove(&"a"), Some(1));
        assert_eq!(cache.remove(&"a"), None);

        cache.clear();
        assert!(cache.is_empty());
        // Recency bookkeeping is reset too; a fresh insert must not evict
        assert_eq!(cache.insert("c", 3, 0), None);
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let mut cache = BoundedCache::new(3, 10_000);
        for i in 0..50i64 {
            cache.insert(i, i, i);
            assert!(cache.len() <= 3);
        }
        assert_eq!(cache.capacity(), 3);
    }
}
