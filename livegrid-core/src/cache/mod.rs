//! Bounded in-memory cache with pluggable eviction
//!
//! A single read-heavy lock guards the entry map; statistics are kept in
//! atomics so `stats()` never contends with the data path. Expired entries
//! are dropped lazily on read and in bulk by [`Cache::evict_expired`], which
//! a spawned sweeper task runs on an interval.

mod multi_level;

pub use multi_level::MultiLevelCache;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Victim selection policy when the cache is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Evict the least recently accessed entry
    Lru,
    /// Evict the least frequently accessed entry (ties broken by recency)
    Lfu,
    /// Evict the oldest entry by insertion order
    Fifo,
    /// Evict the entry closest to expiry
    Ttl,
}

impl std::str::FromStr for EvictionPolicy {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_lowercase().as_str() {
            "lru" => Ok(Self::Lru),
            "lfu" => Ok(Self::Lfu),
            "fifo" => Ok(Self::Fifo),
            "ttl" => Ok(Self::Ttl),
            other => Err(crate::Error::InvalidArgument(format!(
                "unknown eviction policy: {other}"
            ))),
        }
    }
}

struct CacheEntry<V> {
    value: V,
    /// Monotonic insertion sequence, used for FIFO ordering and tie breaks.
    inserted_seq: u64,
    last_access: Instant,
    access_count: u64,
    expires_at: Option<Instant>,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Cache statistics snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub sets: u64,
    pub size: usize,
}

impl CacheStats {
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct StatsInner {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    sets: AtomicU64,
}

/// Bounded map `key -> value` with pluggable eviction
pub struct Cache<V> {
    capacity: usize,
    default_ttl: Option<Duration>,
    policy: EvictionPolicy,
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
    seq: AtomicU64,
    stats: StatsInner,
}

impl<V: Clone + Send + Sync + 'static> Cache<V> {
    /// Create a cache holding at most `capacity` entries.
    ///
    /// `default_ttl` of `None` means entries never expire unless a per-entry
    /// TTL is given at `set` time.
    #[must_use]
    pub fn new(capacity: usize, default_ttl: Option<Duration>, policy: EvictionPolicy) -> Self {
        Self {
            capacity: capacity.max(1),
            default_ttl,
            policy,
            entries: RwLock::new(HashMap::new()),
            seq: AtomicU64::new(0),
            stats: StatsInner {
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                evictions: AtomicU64::new(0),
                expirations: AtomicU64::new(0),
                sets: AtomicU64::new(0),
            },
        }
    }

    /// Look up a value, refreshing its access bookkeeping.
    ///
    /// An entry past its expiry is removed and reported as a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.entries.write();

        match entries.get_mut(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                self.stats.expirations.fetch_add(1, Ordering::Relaxed);
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Some(entry) => {
                entry.last_access = now;
                entry.access_count += 1;
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert with the cache's default TTL.
    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    /// Insert with an explicit TTL (`None` = no expiry).
    ///
    /// Replacing an existing key never triggers eviction; inserting a new key
    /// into a full cache evicts one victim chosen by the configured policy.
    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let key = key.into();
        let now = Instant::now();
        let expires_at = ttl.map(|ttl| now + ttl);
        let mut entries = self.entries.write();

        self.stats.sets.fetch_add(1, Ordering::Relaxed);

        if let Some(entry) = entries.get_mut(&key) {
            entry.value = value;
            entry.expires_at = expires_at;
            entry.last_access = now;
            return;
        }

        if entries.len() >= self.capacity {
            // Prefer reclaiming expired entries before evicting a live one.
            let before = entries.len();
            entries.retain(|_, e| !e.is_expired(now));
            let expired = before - entries.len();
            self.stats
                .expirations
                .fetch_add(expired as u64, Ordering::Relaxed);

            if entries.len() >= self.capacity {
                if let Some(victim) = self.pick_victim(&entries) {
                    entries.remove(&victim);
                    self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %victim, policy = ?self.policy, "cache eviction");
                }
            }
        }

        entries.insert(
            key,
            CacheEntry {
                value,
                inserted_seq: self.seq.fetch_add(1, Ordering::Relaxed),
                last_access: now,
                access_count: 0,
                expires_at,
            },
        );
    }

    /// Remove a key. Returns whether it was present.
    pub fn delete(&self, key: &str) -> bool {
        self.entries.write().remove(key).is_some()
    }

    /// Drop every entry past its expiry, returning the count removed.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        let removed = before - entries.len();
        self.stats
            .expirations
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .read()
            .get(key)
            .is_some_and(|e| !e.is_expired(now))
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            expirations: self.stats.expirations.load(Ordering::Relaxed),
            sets: self.stats.sets.load(Ordering::Relaxed),
            size: self.len(),
        }
    }

    fn pick_victim(&self, entries: &HashMap<String, CacheEntry<V>>) -> Option<String> {
        let victim = match self.policy {
            EvictionPolicy::Lru => entries.iter().min_by_key(|(_, e)| e.last_access),
            EvictionPolicy::Lfu => entries
                .iter()
                .min_by_key(|(_, e)| (e.access_count, e.last_access)),
            EvictionPolicy::Fifo => entries.iter().min_by_key(|(_, e)| e.inserted_seq),
            // Entries with no expiry sort last so bounded entries go first.
            EvictionPolicy::Ttl => entries
                .iter()
                .min_by_key(|(_, e)| (e.expires_at.is_none(), e.expires_at, e.inserted_seq)),
        };
        victim.map(|(k, _)| k.clone())
    }

    /// Spawn a background task that calls [`Self::evict_expired`] on an
    /// interval until the token is cancelled.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = cache.evict_expired();
                        if removed > 0 {
                            debug!(removed, "cache sweep evicted expired entries");
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

    fn lru_cache(capacity: usize) -> Cache<String> {
        Cache::new(capacity, None, EvictionPolicy::Lru)
    }

    #[test]
    fn test_set_get_round_trip() {
        let cache = lru_cache(8);
        cache.set("k", "v".to_string());
        assert_eq!(cache.get("k"), Some("v".to_string()));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.sets, 1);
    }

    #[test]
    fn test_two_gets_after_one_set_count_two_hits() {
        let cache = lru_cache(8);
        cache.set("k", "v".to_string());
        cache.get("k");
        cache.get("k");
        assert_eq!(cache.stats().hits, 2);
    }

    #[test]
    fn test_miss_is_counted() {
        let cache = lru_cache(8);
        assert_eq!(cache.get("absent"), None);
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_capacity_never_exceeded() {
        let cache = lru_cache(4);
        for i in 0..32 {
            cache.set(format!("k{i}"), "v".to_string());
            assert!(cache.len() <= 4);
        }
        assert_eq!(cache.stats().evictions, 28);
    }

    #[test]
    fn test_lru_evicts_least_recently_used() {
        let cache = lru_cache(2);
        cache.set("a", "1".to_string());
        cache.set("b", "2".to_string());
        cache.get("a");
        cache.set("c", "3".to_string());

        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert!(cache.contains("c"));
    }

    #[test]
    fn test_lfu_evicts_least_frequently_used() {
        let cache = Cache::new(2, None, EvictionPolicy::Lfu);
        cache.set("a", "1".to_string());
        cache.set("b", "2".to_string());
        cache.get("a");
        cache.get("a");
        cache.get("b");
        cache.set("c", "3".to_string());

        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
    }

    #[test]
    fn test_fifo_evicts_oldest_insert() {
        let cache = Cache::new(2, None, EvictionPolicy::Fifo);
        cache.set("a", "1".to_string());
        cache.set("b", "2".to_string());
        cache.get("a");
        cache.set("c", "3".to_string());

        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
    }

    #[test]
    fn test_ttl_policy_evicts_soonest_expiry() {
        let cache = Cache::new(2, None, EvictionPolicy::Ttl);
        cache.set_with_ttl("short", "1".to_string(), Some(Duration::from_secs(1)));
        cache.set_with_ttl("long", "2".to_string(), Some(Duration::from_secs(3600)));
        cache.set("fresh", "3".to_string());

        assert!(!cache.contains("short"));
        assert!(cache.contains("long"));
        assert!(cache.contains("fresh"));
    }

    #[test]
    fn test_replace_existing_key_does_not_evict() {
        let cache = lru_cache(2);
        cache.set("a", "1".to_string());
        cache.set("b", "2".to_string());
        cache.set("a", "updated".to_string());

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), Some("updated".to_string()));
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_expired_entry_is_a_miss() {
        let cache = lru_cache(8);
        cache.set_with_ttl("k", "v".to_string(), Some(Duration::from_millis(10)));
        std::thread::sleep(Duration::from_millis(30));

        assert_eq!(cache.get("k"), None);
        let stats = cache.stats();
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_evict_expired_returns_count() {
        let cache = lru_cache(8);
        cache.set_with_ttl("a", "1".to_string(), Some(Duration::from_millis(5)));
        cache.set_with_ttl("b", "2".to_string(), Some(Duration::from_millis(5)));
        cache.set("c", "3".to_string());
        std::thread::sleep(Duration::from_millis(25));

        assert_eq!(cache.evict_expired(), 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_delete() {
        let cache = lru_cache(8);
        cache.set("k", "v".to_string());
        assert!(cache.delete("k"));
        assert!(!cache.delete("k"));
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!(
            "lfu".parse::<EvictionPolicy>().unwrap(),
            EvictionPolicy::Lfu
        );
        assert!("random".parse::<EvictionPolicy>().is_err());
    }

    #[tokio::test]
    async fn test_sweeper_removes_expired() {
        let cache = Arc::new(lru_cache(8));
        cache.set_with_ttl("k", "v".to_string(), Some(Duration::from_millis(10)));

        let cancel = CancellationToken::new();
        let handle = cache.spawn_sweeper(Duration::from_millis(20), cancel.clone());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(cache.len(), 0);

        cancel.cancel();
        handle.await.expect("sweeper task");
    }
}
