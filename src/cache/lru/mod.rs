
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, warn};

use super::{CacheEntry, CacheLayer, CacheStats, SetOptions, hit_rate};
use crate::config::CacheOptions;

/// Bounded key/value cache with per-entry TTL and least-recently-used eviction.
///
/// Entries and recency live in one arena guarded by a single mutex: each entry
/// records the logical tick of its last use and `recency` maps ticks back to
/// keys, so both always hold the same key set.
pub struct EvictionCache<V> {
    shared: Arc<Shared<V>>,
    cleanup: Option<JoinHandle<()>>,
}

struct Shared<V> {
    state: Mutex<CacheState<V>>,
    max_size: usize,
    default_ttl: Duration,
}

struct CacheState<V> {
    slots: HashMap<String, Slot<V>>,
    recency: BTreeMap<u64, String>,
    clock: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

struct Slot<V> {
    entry: CacheEntry<V>,
    tick: u64,
}

impl<V> Default for CacheState<V> {
    fn default() -> Self {
        Self {
            slots: HashMap::new(),
            recency: BTreeMap::new(),
            clock: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }
}

impl<V> CacheState<V> {
    fn next_tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn touch(&mut self, key: &str) {
        let tick = self.next_tick();
        if let Some(slot) = self.slots.get_mut(key) {
            self.recency.remove(&slot.tick);
            slot.tick = tick;
            self.recency.insert(tick, key.to_string());
        }
    }

    fn insert(&mut self, entry: CacheEntry<V>) {
        let tick = self.next_tick();
        let key = entry.key.clone();
        if let Some(previous) = self.slots.insert(key.clone(), Slot { entry, tick }) {
            self.recency.remove(&previous.tick);
        }
        self.recency.insert(tick, key);
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let slot = self.slots.remove(key)?;
        self.recency.remove(&slot.tick);
        Some(slot.entry)
    }

    fn evict_least_recent(&mut self) -> Option<String> {
        let (_, key) = self.recency.pop_first()?;
        self.slots.remove(&key);
        self.evictions += 1;
        Some(key)
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    fn live_count(&self, now: Instant) -> usize {
        self.slots
            .values()
            .filter(|slot| !slot.entry.is_expired_at(now))
            .count()
    }
}

impl<V> Shared<V> {
    async fn purge_expired(&self) -> usize {
        let mut state = self.state.lock().await;
        state.purge_expired(Instant::now())
    }
}

impl<V> EvictionCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Cache without background cleanup
    #[inline]
    pub fn new(max_size: usize, default_ttl: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(CacheState::default()),
                max_size: max_size.max(1),
                default_ttl,
            }),
            cleanup: None,
        }
    }

    /// Cache whose expired entries are purged every `interval`.
    ///
    /// Needs a running Tokio runtime; without one the cache works but only
    /// purges lazily. The task holds a weak reference and ends with the cache.
    #[inline]
    pub fn with_cleanup_interval(max_size: usize, default_ttl: Duration, interval: Duration) -> Self {
        let mut cache = Self::new(max_size, default_ttl);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let shared = Arc::downgrade(&cache.shared);
                cache.cleanup = Some(handle.spawn(run_cleanup(shared, interval)));
            }
            Err(_) => warn!("No Tokio runtime available; background cache cleanup disabled"),
        }

        cache
    }

    #[inline]
    pub fn from_options(options: &CacheOptions) -> Self {
        match options.cleanup_interval() {
            Some(interval) => {
                Self::with_cleanup_interval(options.max_size, options.default_ttl(), interval)
            }
            None => Self::new(options.max_size, options.default_ttl()),
        }
    }

    #[inline]
    pub fn max_size(&self) -> usize {
        self.shared.max_size
    }

    #[inline]
    pub fn default_ttl(&self) -> Duration {
        self.shared.default_ttl
    }

    /// Value for `key`, refreshing its recency. Expired entries count as misses and are dropped.
    #[inline]
    pub async fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut state = self.shared.state.lock().await;

        let expired = match state.slots.get(key) {
            None => {
                state.misses += 1;
                return None;
            }
            Some(slot) => slot.entry.is_expired_at(now),
        };

        if expired {
            state.remove(key);
            state.misses += 1;
            debug!("Cache entry '{}' expired", key);
            return None;
        }

        state.touch(key);
        state.hits += 1;
        let slot = state.slots.get_mut(key)?;
        slot.entry.access_count += 1;
        slot.entry.last_accessed = now;
        Some(slot.entry.value.clone())
    }

    /// Insert or replace `key`.
    ///
    /// A new key at capacity first purges expired entries, then evicts the
    /// least recently used one.
    #[inline]
    pub async fn set(&self, key: &str, value: V, options: SetOptions) {
        let now = Instant::now();
        let mut state = self.shared.state.lock().await;

        if !state.slots.contains_key(key) && state.slots.len() >= self.shared.max_size {
            let purged = state.purge_expired(now);
            if purged > 0 {
                debug!("Purged {} expired entries to make room", purged);
            }
            if state.slots.len() >= self.shared.max_size {
                if let Some(victim) = state.evict_least_recent() {
                    debug!("Evicted least recently used entry '{}'", victim);
                }
            }
        }

        state.insert(CacheEntry {
            key: key.to_string(),
            value,
            timestamp: now,
            ttl: options.ttl.unwrap_or(self.shared.default_ttl),
            access_count: 0,
            last_accessed: now,
            metadata: options.metadata,
        });
    }

    /// Whether a live entry exists. Does not affect recency or hit counters.
    #[inline]
    pub async fn has(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut state = self.shared.state.lock().await;

        let expired = match state.slots.get(key) {
            None => return false,
            Some(slot) => slot.entry.is_expired_at(now),
        };

        if expired {
            state.remove(key);
        }
        !expired
    }

    #[inline]
    pub async fn delete(&self, key: &str) -> bool {
        self.shared.state.lock().await.remove(key).is_some()
    }

    /// Drop every entry. Hit, miss and eviction counters are kept.
    #[inline]
    pub async fn clear(&self) {
        let mut state = self.shared.state.lock().await;
        state.slots.clear();
        state.recency.clear();
    }

    /// Number of live entries
    #[inline]
    pub async fn size(&self) -> usize {
        let now = Instant::now();
        self.shared.state.lock().await.live_count(now)
    }

    /// Remove expired entries now, returning how many were removed
    #[inline]
    pub async fn purge_expired(&self) -> usize {
        self.shared.purge_expired().await
    }

    /// Live keys, least recently used first
    #[inline]
    pub async fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let state = self.shared.state.lock().await;
        state
            .recency
            .values()
            .filter(|key| {
                state
                    .slots
                    .get(*key)
                    .is_some_and(|slot| !slot.entry.is_expired_at(now))
            })
            .cloned()
            .collect()
    }

    /// Snapshot of a live entry without touching its recency
    #[inline]
    pub async fn entry(&self, key: &str) -> Option<CacheEntry<V>> {
        let now = Instant::now();
        let state = self.shared.state.lock().await;
        state
            .slots
            .get(key)
            .filter(|slot| !slot.entry.is_expired_at(now))
            .map(|slot| slot.entry.clone())
    }

    #[inline]
    pub async fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let state = self.shared.state.lock().await;

        let memory_usage = state
            .slots
            .keys()
            .map(|key| 2 * key.len() + size_of::<Slot<V>>() + size_of::<u64>())
            .sum();

        CacheStats {
            hits: state.hits,
            misses: state.misses,
            hit_rate: hit_rate(state.hits, state.misses),
            size: state.live_count(now),
            evictions: state.evictions,
            memory_usage,
        }
    }

    /// Stop the background cleanup task, if any
    #[inline]
    pub fn shutdown(&self) {
        if let Some(handle) = &self.cleanup {
            handle.abort();
            debug!("Cache cleanup task stopped");
        }
    }

    #[inline]
    pub fn has_cleanup_task(&self) -> bool {
        self.cleanup.as_ref().is_some_and(|handle| !handle.is_finished())
    }
}

impl<V> Drop for EvictionCache<V> {
    fn drop(&mut self) {
        if let Some(handle) = &self.cleanup {
            handle.abort();
        }
    }
}

async fn run_cleanup<V>(shared: Weak<Shared<V>>, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(shared) = shared.upgrade() else {
            break;
        };
        let purged = shared.purge_expired().await;
        if purged > 0 {
            debug!("Background cleanup purged {} expired entries", purged);
        }
    }
}

#[async_trait]
impl<V> CacheLayer<V> for EvictionCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    #[inline]
    async fn get(&self, key: &str) -> Option<V> {
        Self::get(self, key).await
    }

    #[inline]
    async fn set(&self, key: &str, value: V, options: SetOptions) {
        Self::set(self, key, value, options).await;
    }

    #[inline]
    async fn has(&self, key: &str) -> bool {
        Self::has(self, key).await
    }

    #[inline]
    async fn delete(&self, key: &str) -> bool {
        Self::delete(self, key).await
    }

    #[inline]
    async fn clear(&self) {
        Self::clear(self).await;
    }

    #[inline]
    async fn size(&self) -> usize {
        Self::size(self).await
    }
}
