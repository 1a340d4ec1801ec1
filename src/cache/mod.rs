// Cache module
// LRU+TTL eviction cache, embedding-aware semantic cache and layered composition

pub mod lru;
pub mod multi_layer;
pub mod semantic;


use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

pub use lru::EvictionCache;
pub use multi_layer::{MultiLayerCache, MultiLayerStats};
pub use semantic::{SemanticCache, SemanticCacheStats};

/// Optional bookkeeping about how a cached value was produced
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheEntryMetadata {
    pub tokens: Option<u64>,
    pub cost: Option<f64>,
    pub model: Option<String>,
    pub provider: Option<String>,
}

/// A stored value plus its expiry and access bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    /// Insertion time; expiry is measured from here
    pub timestamp: Instant,
    pub ttl: Duration,
    pub access_count: u64,
    pub last_accessed: Instant,
    pub metadata: Option<CacheEntryMetadata>,
}

impl<V> CacheEntry<V> {
    /// Logically absent once more than `ttl` has passed since insertion
    #[inline]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now.duration_since(self.timestamp) > self.ttl
    }
}

/// Per-call overrides for `set`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetOptions {
    /// Falls back to the cache's default TTL
    pub ttl: Option<Duration>,
    pub metadata: Option<CacheEntryMetadata>,
}

impl SetOptions {
    #[must_use]
    #[inline]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    #[must_use]
    #[inline]
    pub fn with_metadata(mut self, metadata: CacheEntryMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses)`, 0 before any lookup
    pub hit_rate: f64,
    pub size: usize,
    pub evictions: u64,
    /// Approximate bytes held by keys and entry records
    pub memory_usage: usize,
}

#[inline]
pub fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

/// One tier of a [`MultiLayerCache`]
#[async_trait]
pub trait CacheLayer<V>: Send + Sync {
    async fn get(&self, key: &str) -> Option<V>;
    async fn set(&self, key: &str, value: V, options: SetOptions);
    async fn has(&self, key: &str) -> bool;
    async fn delete(&self, key: &str) -> bool;
    async fn clear(&self);
    async fn size(&self) -> usize;
}
