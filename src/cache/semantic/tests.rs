use super::*;
use crate::{RagError, Result};
use std::collections::HashMap;
use std::time::Duration;

/// Embedder with a fixed vocabulary; unknown texts fail
struct FixedEmbedder {
    vectors: HashMap<String, Embedding>,
}

impl FixedEmbedder {
    fn new(pairs: &[(&str, [f32; 2])]) -> Arc<Self> {
        Arc::new(Self {
            vectors: pairs
                .iter()
                .map(|(text, vector)| ((*text).to_string(), vector.to_vec()))
                .collect(),
        })
    }
}

#[async_trait]
impl EmbeddingGenerator for FixedEmbedder {
    async fn generate_embedding(&self, text: &str) -> Result<Embedding> {
        self.vectors
            .get(text)
            .cloned()
            .ok_or_else(|| RagError::Embedding(format!("no vector for '{text}'")))
    }
}

fn semantic(
    embedder: Arc<FixedEmbedder>,
    max_size: usize,
    threshold: f32,
) -> SemanticCache<String> {
    SemanticCache::new(
        EvictionCache::new(max_size, Duration::from_secs(60)),
        embedder,
        threshold,
        true,
    )
}

fn vocabulary() -> Arc<FixedEmbedder> {
    FixedEmbedder::new(&[
        ("what is rust", [1.0, 0.0]),
        ("explain rust", [0.99, 0.1]),
        ("bread recipe", [0.0, 1.0]),
        ("tell me about rust", [0.98, 0.15]),
    ])
}

#[tokio::test]
async fn exact_key_wins_over_similarity() {
    let cache = semantic(vocabulary(), 10, 0.9);
    cache
        .set("what is rust", "exact".to_string(), SetOptions::default())
        .await;
    cache
        .set("explain rust", "similar".to_string(), SetOptions::default())
        .await;

    assert_eq!(cache.get("explain rust").await, Some("similar".to_string()));
    assert_eq!(cache.stats().await.exact_hits, 1);
}

#[tokio::test]
async fn similar_key_is_served_above_threshold() {
    let cache = semantic(vocabulary(), 10, 0.9);
    cache
        .set("what is rust", "answer".to_string(), SetOptions::default())
        .await;

    assert_eq!(cache.get("tell me about rust").await, Some("answer".to_string()));

    let stats = cache.stats().await;
    assert_eq!(stats.semantic_hits, 1);
    assert_eq!(stats.exact_hits, 0);
    assert_eq!(stats.misses, 0);
    // the wrapped cache saw the failed exact lookup and the matched fetch
    assert_eq!(stats.cache.misses, 1);
    assert_eq!(stats.cache.hits, 1);
}

#[tokio::test]
async fn dissimilar_key_is_a_miss() {
    let cache = semantic(vocabulary(), 10, 0.9);
    cache
        .set("what is rust", "answer".to_string(), SetOptions::default())
        .await;

    assert_eq!(cache.get("bread recipe").await, None);
    assert_eq!(cache.stats().await.misses, 1);
}

#[tokio::test]
async fn similarity_must_exceed_threshold_strictly() {
    let embedder = FixedEmbedder::new(&[("stored", [1.0, 0.0]), ("probe", [1.0, 0.0])]);
    let cache = semantic(embedder, 10, 1.0);
    cache
        .set("stored", "value".to_string(), SetOptions::default())
        .await;

    assert_eq!(cache.get("probe").await, None);
}

#[tokio::test]
async fn first_seen_wins_among_equal_matches() {
    let embedder = FixedEmbedder::new(&[
        ("first", [1.0, 0.0]),
        ("second", [1.0, 0.0]),
        ("probe", [1.0, 0.0]),
    ]);
    let cache = semantic(embedder, 10, 0.5);
    cache
        .set("first", "one".to_string(), SetOptions::default())
        .await;
    cache
        .set("second", "two".to_string(), SetOptions::default())
        .await;

    assert_eq!(cache.get("probe").await, Some("one".to_string()));
}

#[tokio::test]
async fn evicted_keys_lose_their_embeddings() {
    let cache = semantic(vocabulary(), 2, 0.9);
    for key in ["what is rust", "explain rust", "bread recipe"] {
        cache.set(key, key.to_string(), SetOptions::default()).await;
    }

    assert_eq!(cache.size().await, 2);
    assert_eq!(cache.embedding_count().await, 2);
    assert!(!cache.has("what is rust").await);
}

#[tokio::test(start_paused = true)]
async fn expired_keys_lose_their_embeddings() {
    let cache = semantic(vocabulary(), 10, 0.9);
    cache
        .set(
            "what is rust",
            "answer".to_string(),
            SetOptions::default().with_ttl(Duration::from_secs(1)),
        )
        .await;
    assert_eq!(cache.embedding_count().await, 1);

    tokio::time::advance(Duration::from_secs(2)).await;

    assert_eq!(cache.get("tell me about rust").await, None);
    assert_eq!(cache.embedding_count().await, 0);
}

#[tokio::test]
async fn embedding_failure_degrades_to_exact_match() {
    let cache = semantic(vocabulary(), 10, 0.9);
    cache
        .set("unknown phrase", "stored".to_string(), SetOptions::default())
        .await;

    assert_eq!(cache.size().await, 1);
    assert_eq!(cache.embedding_count().await, 0);
    assert_eq!(cache.get("unknown phrase").await, Some("stored".to_string()));
    assert_eq!(cache.get("another unknown").await, None);
}

#[tokio::test]
async fn disabled_semantic_matching_is_exact_only() {
    let cache = SemanticCache::new(
        EvictionCache::new(10, Duration::from_secs(60)),
        vocabulary(),
        0.9,
        false,
    );
    cache
        .set("what is rust", "answer".to_string(), SetOptions::default())
        .await;

    assert_eq!(cache.get("tell me about rust").await, None);
    assert_eq!(cache.embedding_count().await, 0);
}

#[tokio::test]
async fn delete_and_clear_drop_embeddings() {
    let cache = semantic(vocabulary(), 10, 0.9);
    cache
        .set("what is rust", "a".to_string(), SetOptions::default())
        .await;
    cache
        .set("bread recipe", "b".to_string(), SetOptions::default())
        .await;

    assert!(cache.delete("what is rust").await);
    assert_eq!(cache.embedding_count().await, 1);
    assert_eq!(cache.get("tell me about rust").await, None);

    cache.clear().await;
    assert_eq!(cache.size().await, 0);
    assert_eq!(cache.embedding_count().await, 0);
}

#[tokio::test]
async fn from_options_uses_configured_threshold() {
    let options = CacheOptions {
        semantic_threshold: 0.8,
        cleanup_interval_ms: 0,
        ..CacheOptions::default()
    };
    let cache: SemanticCache<String> = SemanticCache::from_options(&options, vocabulary());

    assert!((cache.threshold() - 0.8).abs() < f32::EPSILON);
    assert!(cache.is_semantic_enabled());
    assert_eq!(cache.inner().max_size(), 1000);
    cache.shutdown();
}
