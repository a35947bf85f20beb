//! Write-through in-memory cache with LRU eviction and TTL expiry.
//!
//! Values are stored type-erased so one cache instance can serve every
//! sub-store. Hot paths take the read lock only; eviction and expiry take the
//! write lock. A background sweeper drops expired entries once a minute.

use std::{
    any::Any,
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);
/// Listings go stale faster than single objects; cache them for less.
pub const LIST_TTL: Duration = Duration::from_secs(60);
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct Entry {
    value: Arc<dyn Any + Send + Sync>,
    expires_at: Instant,
    /// Logical access clock value at last touch; lowest value is evicted first.
    last_access: AtomicU64,
}

/// Point-in-time counter snapshot.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub sets: u64,
    pub size: usize,
    pub max_size: usize,
    pub hit_rate: f64,
}

pub struct LruTtlCache {
    entries: RwLock<HashMap<String, Entry>>,
    max_size: usize,
    default_ttl: Duration,
    access_clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    sets: AtomicU64,
}

impl LruTtlCache {
    pub fn new(max_size: usize) -> Self {
        Self::with_ttl(max_size, DEFAULT_TTL)
    }

    pub fn with_ttl(max_size: usize, default_ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_size,
            default_ttl,
            access_clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            sets: AtomicU64::new(0),
        }
    }

    pub fn get<T>(&self, key: &str) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            if let Some(entry) = entries.get(key) {
                if entry.expires_at > now {
                    let tick = self.access_clock.fetch_add(1, Ordering::Relaxed);
                    entry.last_access.store(tick, Ordering::Relaxed);
                    if let Some(value) = entry.value.downcast_ref::<T>() {
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        return Some(value.clone());
                    }
                }
            } else {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        }
        // Expired (or wrong type): evict and treat as a miss.
        let mut entries = self.entries.write();
        if entries
            .get(key)
            .is_some_and(|e| e.expires_at <= Instant::now() || !e.value.is::<T>())
        {
            entries.remove(key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn set<T>(&self, key: impl Into<String>, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    pub fn set_with_ttl<T>(&self, key: impl Into<String>, value: T, ttl: Duration)
    where
        T: Send + Sync + 'static,
    {
        let key = key.into();
        let tick = self.access_clock.fetch_add(1, Ordering::Relaxed);
        let entry = Entry {
            value: Arc::new(value),
            expires_at: Instant::now() + ttl,
            last_access: AtomicU64::new(tick),
        };
        let mut entries = self.entries.write();
        entries.insert(key, entry);
        self.sets.fetch_add(1, Ordering::Relaxed);
        while entries.len() > self.max_size {
            let victim = entries
                .iter()
                .min_by_key(|(_, e)| e.last_access.load(Ordering::Relaxed))
                .map(|(k, _)| k.clone());
            match victim {
                Some(k) => {
                    entries.remove(&k);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                None => break,
            }
        }
    }

    pub fn delete(&self, key: &str) -> bool {
        self.entries.write().remove(key).is_some()
    }

    /// Drop every key starting with `prefix` (used to invalidate all pages of
    /// a listing). Returns the number of keys removed.
    pub fn delete_with_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        before - entries.len()
    }

    /// Remove expired entries. Returns the number removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        let removed = before - entries.len();
        self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            size: self.len(),
            max_size: self.max_size,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }

    /// Periodic expiry sweep until cancelled.
    pub fn run_sweeper(self: Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(SWEEP_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {
                        let removed = self.sweep();
                        if removed > 0 {
                            tracing::debug!(removed, "cache sweep dropped expired entries");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_within_ttl() {
        let cache = LruTtlCache::new(10);
        cache.set("cluster:name:prod", "value".to_string());
        assert_eq!(
            cache.get::<String>("cluster:name:prod"),
            Some("value".to_string())
        );
        assert_eq!(cache.get::<String>("cluster:name:missing"), None);
    }

    #[test]
    fn delete_makes_get_miss_until_next_set() {
        let cache = LruTtlCache::new(10);
        cache.set("k", 1u32);
        assert!(cache.delete("k"));
        assert_eq!(cache.get::<u32>("k"), None);
        cache.set("k", 2u32);
        assert_eq!(cache.get::<u32>("k"), Some(2));
    }

    #[test]
    fn expired_entries_read_as_miss() {
        let cache = LruTtlCache::new(10);
        cache.set_with_ttl("k", 1u32, Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get::<u32>("k"), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn lru_evicts_least_recently_used() {
        let cache = LruTtlCache::new(3);
        cache.set("a", 1u32);
        cache.set("b", 2u32);
        cache.set("c", 3u32);
        // Touch "a" so "b" becomes the coldest entry.
        assert_eq!(cache.get::<u32>("a"), Some(1));
        cache.set("d", 4u32);
        assert_eq!(cache.get::<u32>("b"), None);
        assert_eq!(cache.get::<u32>("a"), Some(1));
        assert_eq!(cache.get::<u32>("d"), Some(4));
    }

    #[test]
    fn first_insert_evicted_after_capacity_plus_one_sets() {
        let cache = LruTtlCache::new(3);
        for (i, key) in ["a", "b", "c", "d"].iter().enumerate() {
            cache.set(*key, i as u32);
        }
        assert_eq!(cache.get::<u32>("a"), None);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn prefix_delete_drops_all_pages() {
        let cache = LruTtlCache::new(10);
        cache.set("clusters:list", 0u32);
        cache.set("clusters:list:page:3:abc", 1u32);
        cache.set("clusters:list:page:3:def", 2u32);
        cache.set("cluster:name:prod", 3u32);
        assert_eq!(cache.delete_with_prefix("clusters:list"), 3);
        assert_eq!(cache.get::<u32>("cluster:name:prod"), Some(3));
    }

    #[test]
    fn stats_track_hits_and_misses() {
        let cache = LruTtlCache::new(2);
        cache.set("a", 1u32);
        cache.get::<u32>("a");
        cache.get::<u32>("a");
        cache.get::<u32>("missing");
        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.sets, 1);
        assert_eq!(stats.size, 1);
        assert_eq!(stats.max_size, 2);
        assert!((stats.hit_rate - 2.0 / 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn sweep_counts_evictions() {
        let cache = LruTtlCache::new(10);
        cache.set_with_ttl("a", 1u32, Duration::from_millis(1));
        cache.set("b", 2u32);
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.len(), 1);
    }
}
