#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use super::{CacheLayer, SetOptions, hit_rate};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MultiLayerStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    /// Hits served by each layer, in probe order
    pub layer_hits: Vec<u64>,
}

/// Ordered stack of cache layers, fastest first.
///
/// Lookups probe layers in order and promote a hit into every earlier layer.
/// Writes, deletes and clears fan out to all layers.
pub struct MultiLayerCache<V> {
    layers: Vec<Arc<dyn CacheLayer<V>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    layer_hits: Vec<AtomicU64>,
}

impl<V> MultiLayerCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    #[inline]
    pub fn new(layers: Vec<Arc<dyn CacheLayer<V>>>) -> Self {
        let layer_hits = layers.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            layers,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            layer_hits,
        }
    }

    #[inline]
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    #[inline]
    pub async fn get(&self, key: &str) -> Option<V> {
        for (index, layer) in self.layers.iter().enumerate() {
            let Some(value) = layer.get(key).await else {
                continue;
            };

            self.hits.fetch_add(1, Ordering::Relaxed);
            if let Some(counter) = self.layer_hits.get(index) {
                counter.fetch_add(1, Ordering::Relaxed);
            }

            for upper in self.layers.iter().take(index) {
                upper.set(key, value.clone(), SetOptions::default()).await;
            }
            if index > 0 {
                debug!("Promoted '{}' from layer {} to {} upper layers", key, index, index);
            }
            return Some(value);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    #[inline]
    pub async fn set(&self, key: &str, value: V, options: SetOptions) {
        for layer in &self.layers {
            layer.set(key, value.clone(), options.clone()).await;
        }
    }

    #[inline]
    pub async fn has(&self, key: &str) -> bool {
        for layer in &self.layers {
            if layer.has(key).await {
                return true;
            }
        }
        false
    }

    /// Delete from every layer; true when any layer held the key
    #[inline]
    pub async fn delete(&self, key: &str) -> bool {
        let mut removed = false;
        for layer in &self.layers {
            removed |= layer.delete(key).await;
        }
        removed
    }

    #[inline]
    pub async fn clear(&self) {
        for layer in &self.layers {
            layer.clear().await;
        }
    }

    /// Size of the primary layer only; layers may differ in capacity
    #[inline]
    pub async fn size(&self) -> usize {
        match self.layers.first() {
            Some(primary) => primary.size().await,
            None => 0,
        }
    }

    #[inline]
    pub fn stats(&self) -> MultiLayerStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        MultiLayerStats {
            hits,
            misses,
            hit_rate: hit_rate(hits, misses),
            layer_hits: self
                .layer_hits
                .iter()
                .map(|counter| counter.load(Ordering::Relaxed))
                .collect(),
        }
    }
}
