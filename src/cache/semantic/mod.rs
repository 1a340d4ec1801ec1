#[cfg(test)]
mod tests;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{CacheLayer, CacheStats, EvictionCache, SetOptions};
use crate::config::CacheOptions;
use crate::embeddings::math::cosine_similarity;
use crate::embeddings::{Embedding, EmbeddingGenerator};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SemanticCacheStats {
    /// Counters of the wrapped eviction cache. A semantic hit shows up there as
    /// one miss (the exact lookup) plus one hit (the matched key), so use
    /// `exact_hits`, `semantic_hits` and `misses` for lookup outcomes.
    pub cache: CacheStats,
    pub exact_hits: u64,
    pub semantic_hits: u64,
    pub misses: u64,
    /// Keys that currently have an embedding
    pub embeddings: usize,
}

/// Eviction cache that also answers lookups for keys whose embedding is close
/// enough to a stored key's embedding.
///
/// Key embeddings live in an insertion-ordered side-table. It is reconciled
/// against the wrapped cache's live keys on every write and scan, so entries
/// that were evicted or expired never produce a match.
pub struct SemanticCache<V> {
    cache: EvictionCache<V>,
    embedder: Arc<dyn EmbeddingGenerator>,
    threshold: f32,
    enabled: bool,
    state: Mutex<SemanticState>,
}

#[derive(Default)]
struct SemanticState {
    embeddings: Vec<(String, Embedding)>,
    exact_hits: u64,
    semantic_hits: u64,
    misses: u64,
}

impl SemanticState {
    fn forget(&mut self, key: &str) {
        self.embeddings.retain(|(stored, _)| stored != key);
    }

    fn retain_live(&mut self, live: &HashSet<String>) {
        let before = self.embeddings.len();
        self.embeddings.retain(|(key, _)| live.contains(key));
        let pruned = before - self.embeddings.len();
        if pruned > 0 {
            debug!("Pruned {} stale key embeddings", pruned);
        }
    }

    /// Best key strictly above `threshold`; the first of equal maxima wins
    fn best_match(&self, query: &[f32], threshold: f32) -> Option<(&str, f32)> {
        let mut best: Option<(&str, f32)> = None;

        for (key, embedding) in &self.embeddings {
            let Ok(similarity) = cosine_similarity(query, embedding) else {
                continue;
            };
            if similarity <= threshold {
                continue;
            }
            if best.is_none_or(|(_, current)| similarity > current) {
                best = Some((key.as_str(), similarity));
            }
        }

        best
    }
}

impl<V> SemanticCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    #[inline]
    pub fn new(
        cache: EvictionCache<V>,
        embedder: Arc<dyn EmbeddingGenerator>,
        threshold: f32,
        enabled: bool,
    ) -> Self {
        Self {
            cache,
            embedder,
            threshold,
            enabled,
            state: Mutex::new(SemanticState::default()),
        }
    }

    #[inline]
    pub fn from_options(options: &CacheOptions, embedder: Arc<dyn EmbeddingGenerator>) -> Self {
        Self::new(
            EvictionCache::from_options(options),
            embedder,
            options.semantic_threshold,
            options.enable_semantic_cache,
        )
    }

    #[inline]
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    #[inline]
    pub fn is_semantic_enabled(&self) -> bool {
        self.enabled
    }

    /// The wrapped eviction cache
    #[inline]
    pub fn inner(&self) -> &EvictionCache<V> {
        &self.cache
    }

    /// Exact lookup first, then the most similar live key above the threshold
    #[inline]
    pub async fn get(&self, key: &str) -> Option<V> {
        if let Some(value) = self.cache.get(key).await {
            self.state.lock().await.exact_hits += 1;
            return Some(value);
        }

        if !self.enabled {
            self.state.lock().await.misses += 1;
            return None;
        }

        let query = match self.embedder.generate_embedding(key).await {
            Ok(embedding) => embedding,
            Err(e) => {
                warn!("Semantic lookup skipped, failed to embed '{}': {}", key, e);
                self.state.lock().await.misses += 1;
                return None;
            }
        };

        let mut state = self.state.lock().await;
        let live: HashSet<String> = self.cache.keys().await.into_iter().collect();
        state.retain_live(&live);

        let matched = state
            .best_match(&query, self.threshold)
            .map(|(matched, similarity)| (matched.to_string(), similarity));

        let value = match matched {
            Some((matched, similarity)) => {
                debug!(
                    "Semantic cache match for '{}' via '{}' (similarity {:.4})",
                    key, matched, similarity
                );
                self.cache.get(&matched).await
            }
            None => None,
        };

        if value.is_some() {
            state.semantic_hits += 1;
        } else {
            state.misses += 1;
        }
        value
    }

    /// Store `value` under `key` and record the key's embedding.
    ///
    /// Embedding failures are logged and leave the key reachable by exact
    /// lookup only.
    #[inline]
    pub async fn set(&self, key: &str, value: V, options: SetOptions) {
        let embedding = if self.enabled {
            match self.embedder.generate_embedding(key).await {
                Ok(embedding) => Some(embedding),
                Err(e) => {
                    warn!("Failed to embed cache key '{}', exact match only: {}", key, e);
                    None
                }
            }
        } else {
            None
        };

        let mut state = self.state.lock().await;
        self.cache.set(key, value, options).await;
        state.forget(key);
        if let Some(embedding) = embedding {
            state.embeddings.push((key.to_string(), embedding));
        }

        let live: HashSet<String> = self.cache.keys().await.into_iter().collect();
        state.retain_live(&live);
    }

    #[inline]
    pub async fn has(&self, key: &str) -> bool {
        self.cache.has(key).await
    }

    #[inline]
    pub async fn delete(&self, key: &str) -> bool {
        let mut state = self.state.lock().await;
        state.forget(key);
        self.cache.delete(key).await
    }

    #[inline]
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.embeddings.clear();
        self.cache.clear().await;
    }

    #[inline]
    pub async fn size(&self) -> usize {
        self.cache.size().await
    }

    /// Purge expired entries and their embeddings
    #[inline]
    pub async fn purge_expired(&self) -> usize {
        let mut state = self.state.lock().await;
        let purged = self.cache.purge_expired().await;
        let live: HashSet<String> = self.cache.keys().await.into_iter().collect();
        state.retain_live(&live);
        purged
    }

    /// Number of live keys holding an embedding
    #[inline]
    pub async fn embedding_count(&self) -> usize {
        let mut state = self.state.lock().await;
        let live: HashSet<String> = self.cache.keys().await.into_iter().collect();
        state.retain_live(&live);
        state.embeddings.len()
    }

    #[inline]
    pub async fn stats(&self) -> SemanticCacheStats {
        let state = self.state.lock().await;
        SemanticCacheStats {
            cache: self.cache.stats().await,
            exact_hits: state.exact_hits,
            semantic_hits: state.semantic_hits,
            misses: state.misses,
            embeddings: state.embeddings.len(),
        }
    }

    #[inline]
    pub fn shutdown(&self) {
        self.cache.shutdown();
    }
}

#[async_trait]
impl<V> CacheLayer<V> for SemanticCache<V>
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
