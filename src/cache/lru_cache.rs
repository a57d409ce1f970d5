use dashmap::DashMap;
use std::{
    hash::Hash,
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::debug;

/// Cache entry con TTL
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    last_access: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V) -> Self {
        let now = Instant::now();
        Self {
            value,
            created_at: now,
            last_access: now,
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() > ttl
    }
}

/// Concurrent map bounded by capacity and entry age.
///
/// When full, expired entries are purged first and then the least recently
/// accessed entry is evicted.
#[derive(Debug)]
pub struct LruCache<K: Clone + Eq + Hash, V> {
    data: Arc<DashMap<K, CacheEntry<V>>>,
    capacity: usize,
    ttl: Duration,
}

impl<K, V> LruCache<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            data: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
            ttl,
        }
    }

    pub fn insert(&self, key: K, value: V) {
        if !self.data.contains_key(&key) && self.data.len() >= self.capacity {
            self.cleanup_expired();
            if self.data.len() >= self.capacity {
                self.evict_least_recent();
            }
        }
        self.data.insert(key, CacheEntry::new(value));
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut entry = self.data.get_mut(key)?;
        if entry.is_expired(self.ttl) {
            drop(entry);
            self.data.remove(key);
            return None;
        }
        entry.last_access = Instant::now();
        Some(entry.value.clone())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn cleanup_expired(&self) -> usize {
        let before = self.data.len();
        let ttl = self.ttl;
        self.data.retain(|_, entry| !entry.is_expired(ttl));
        before.saturating_sub(self.data.len())
    }

    fn evict_least_recent(&self) {
        let oldest = self
            .data
            .iter()
            .min_by_key(|entry| entry.value().last_access)
            .map(|entry| entry.key().clone());

        if let Some(key) = oldest {
            self.data.remove(&key);
            debug!("🧹 Cache lleno, entrada más antigua descartada");
        }
    }
}
