use super::*;
use crate::embeddings::HashingEmbedder;
use async_trait::async_trait;
use serde_json::json;

struct FailingEmbedder;

#[async_trait]
impl EmbeddingGenerator for FailingEmbedder {
    async fn generate_embedding(&self, _text: &str) -> Result<Embedding> {
        Err(RagError::Embedding("model offline".to_string()))
    }
}

/// Hashing embedder that waits for a semaphore permit on every call
struct GatedEmbedder {
    gate: Arc<tokio::sync::Semaphore>,
    inner: HashingEmbedder,
}

#[async_trait]
impl EmbeddingGenerator for GatedEmbedder {
    async fn generate_embedding(&self, text: &str) -> Result<Embedding> {
        let _permit = self.gate.acquire().await.expect("gate open");
        Ok(self.inner.embed(text))
    }
}

fn hashing_store() -> VectorStore {
    VectorStore::with_embedder(Arc::new(HashingEmbedder::default()))
}

fn doc(id: &str, embedding: Vec<f32>) -> VectorDocument {
    VectorDocument::new(id, format!("content of {id}")).with_embedding(embedding)
}

fn tagged(id: &str, embedding: Vec<f32>, kind: &str) -> VectorDocument {
    let mut metadata = Metadata::new();
    metadata.insert("kind".to_string(), json!(kind));
    doc(id, embedding).with_metadata(metadata)
}

#[tokio::test]
async fn add_and_get_round_trip() {
    let store = VectorStore::new();
    store
        .add(doc("a", vec![1.0, 0.0]))
        .await
        .expect("add should succeed");

    let stored = store.get("a").await.expect("document should exist");
    assert_eq!(stored.embedding, vec![1.0, 0.0]);
    assert_eq!(store.size().await, 1);
    assert_eq!(store.dimension().await, Some(2));
    assert!(store.get("missing").await.is_none());
}

#[tokio::test]
async fn add_rejects_missing_id_or_content() {
    let store = VectorStore::new();

    let err = store
        .add(VectorDocument::new("", "content").with_embedding(vec![1.0]))
        .await
        .expect_err("empty id must fail");
    assert!(err.to_string().contains("Document must have id and content"));

    let err = store
        .add(VectorDocument::new("id", "").with_embedding(vec![1.0]))
        .await
        .expect_err("empty content must fail");
    assert!(matches!(err, RagError::Validation(_)));
    assert_eq!(store.size().await, 0);
}

#[tokio::test]
async fn add_overwrites_existing_id_in_place() {
    let store = VectorStore::new();
    store.add(doc("a", vec![1.0, 0.0])).await.expect("add a");
    store.add(doc("b", vec![0.0, 1.0])).await.expect("add b");
    store
        .add(VectorDocument::new("a", "replaced").with_embedding(vec![0.5, 0.5]))
        .await
        .expect("overwrite a");

    assert_eq!(store.size().await, 2);
    assert_eq!(store.ids().await, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(
        store.get("a").await.map(|d| d.content),
        Some("replaced".to_string())
    );
}

#[tokio::test]
async fn add_generates_missing_embedding() {
    let store = hashing_store();
    store
        .add(VectorDocument::new("a", "Machine learning with data"))
        .await
        .expect("add should embed");

    let stored = store.get("a").await.expect("document should exist");
    assert_eq!(stored.embedding.len(), 256);
}

#[tokio::test]
async fn add_without_embedder_fails_for_empty_embedding() {
    let store = VectorStore::new();
    let err = store
        .add(VectorDocument::new("a", "no vector"))
        .await
        .expect_err("no embedder configured");

    assert!(matches!(err, RagError::Embedding(_)));
    assert_eq!(store.size().await, 0);
}

#[tokio::test]
async fn embedder_failure_propagates() {
    let store = VectorStore::with_embedder(Arc::new(FailingEmbedder));
    let err = store
        .add(VectorDocument::new("a", "text"))
        .await
        .expect_err("embedder failure must surface");

    assert!(err.to_string().contains("model offline"));
    assert_eq!(store.size().await, 0);
}

#[tokio::test]
async fn add_rejects_dimension_mismatch() {
    let store = VectorStore::new();
    store.add(doc("a", vec![1.0, 0.0])).await.expect("add a");

    let err = store
        .add(doc("b", vec![1.0, 0.0, 0.0]))
        .await
        .expect_err("dimension mismatch");

    assert!(matches!(err, RagError::Validation(_)));
    assert_eq!(store.size().await, 1);
}

#[tokio::test]
async fn add_batch_is_all_or_nothing() {
    let store = VectorStore::new();
    let err = store
        .add_batch(vec![
            doc("a", vec![1.0, 0.0]),
            doc("b", vec![0.0, 1.0]),
            doc("c", vec![1.0]),
        ])
        .await
        .expect_err("mixed dimensions in batch");

    assert!(matches!(err, RagError::Validation(_)));
    assert_eq!(store.size().await, 0);

    store
        .add_batch(vec![doc("a", vec![1.0, 0.0]), doc("b", vec![0.0, 1.0])])
        .await
        .expect("valid batch");
    assert_eq!(store.size().await, 2);
}

#[tokio::test]
async fn delete_and_delete_batch() {
    let store = VectorStore::new();
    store
        .add_batch(vec![
            doc("a", vec![1.0, 0.0]),
            doc("b", vec![0.0, 1.0]),
            doc("c", vec![1.0, 1.0]),
        ])
        .await
        .expect("batch");

    assert!(store.delete("b").await);
    assert!(!store.delete("b").await);
    assert_eq!(store.get("c").await.map(|d| d.id), Some("c".to_string()));

    let removed = store
        .delete_batch(&["a".to_string(), "zzz".to_string()])
        .await;
    assert_eq!(removed, 1);
    assert_eq!(store.ids().await, vec!["c".to_string()]);
}

#[tokio::test]
async fn clear_resets_dimension() {
    let store = VectorStore::new();
    store.add(doc("a", vec![1.0, 0.0])).await.expect("add");
    store.clear().await;

    assert_eq!(store.size().await, 0);
    assert_eq!(store.dimension().await, None);
    store
        .add(doc("b", vec![1.0, 0.0, 0.0]))
        .await
        .expect("new dimension after clear");
}

#[tokio::test]
async fn search_sorts_descending_and_limits() {
    let store = VectorStore::new();
    store
        .add_batch(vec![
            doc("far", vec![0.0, 1.0]),
            doc("near", vec![1.0, 0.1]),
            doc("mid", vec![1.0, 1.0]),
        ])
        .await
        .expect("batch");

    let results = store
        .search(&[1.0, 0.0], &SearchOptions::default().with_limit(2))
        .await
        .expect("search");

    let ids: Vec<&str> = results.iter().map(|r| r.document.id.as_str()).collect();
    assert_eq!(ids, vec!["near", "mid"]);
    assert!(results[0].similarity >= results[1].similarity);
    for result in &results {
        assert!((result.distance - (1.0 - result.similarity)).abs() < 1e-6);
    }
}

#[tokio::test]
async fn search_applies_threshold_and_filter() {
    let store = VectorStore::new();
    store
        .add_batch(vec![
            tagged("a", vec![1.0, 0.0], "guide"),
            tagged("b", vec![0.9, 0.1], "reference"),
            tagged("c", vec![0.0, 1.0], "guide"),
        ])
        .await
        .expect("batch");

    let options = SearchOptions::default()
        .with_threshold(0.5)
        .with_filter(|metadata| metadata.get("kind") == Some(&json!("guide")));
    let results = store.search(&[1.0, 0.0], &options).await.expect("search");

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].document.id, "a");
}

#[tokio::test]
async fn search_can_strip_metadata() {
    let store = VectorStore::new();
    store
        .add(tagged("a", vec![1.0, 0.0], "guide"))
        .await
        .expect("add");

    let results = store
        .search(&[1.0, 0.0], &SearchOptions::default().with_metadata(false))
        .await
        .expect("search");
    assert!(results[0].document.metadata.is_none());
    assert!(store.get("a").await.and_then(|d| d.metadata).is_some());
}

#[tokio::test]
async fn search_rejects_mismatched_query() {
    let store = VectorStore::new();
    store.add(doc("a", vec![1.0, 0.0])).await.expect("add");

    let err = store
        .search(&[1.0, 0.0, 0.0], &SearchOptions::default())
        .await
        .expect_err("dimension mismatch");
    assert!(err.to_string().contains("Vector dimension mismatch"));
}

#[tokio::test]
async fn search_on_empty_store_is_empty() {
    let store = VectorStore::new();
    let results = store
        .search(&[1.0], &SearchOptions::default())
        .await
        .expect("search");
    assert!(results.is_empty());
}

#[tokio::test]
async fn search_by_text_requires_embedder() {
    let store = VectorStore::new();
    let err = store
        .search_by_text("anything", &SearchOptions::default())
        .await
        .expect_err("no embedder");
    assert!(matches!(err, RagError::Embedding(_)));
}

#[tokio::test]
async fn search_by_text_ranks_shared_vocabulary_first() {
    let store = hashing_store();
    store
        .add_batch(vec![
            VectorDocument::new("cooking", "Bake the bread in a hot oven."),
            VectorDocument::new("ml", "Machine learning algorithms learn from data."),
        ])
        .await
        .expect("batch");

    let results = store
        .search_by_text("machine learning algorithms", &SearchOptions::default())
        .await
        .expect("search");
    assert_eq!(results[0].document.id, "ml");
}

#[tokio::test]
async fn find_similar_excludes_source_document() {
    let store = VectorStore::new();
    store
        .add_batch(vec![
            doc("a", vec![1.0, 0.0]),
            doc("b", vec![0.9, 0.1]),
            doc("c", vec![0.0, 1.0]),
        ])
        .await
        .expect("batch");

    let results = store
        .find_similar_documents("a", &SearchOptions::default().with_limit(1))
        .await
        .expect("similar");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].document.id, "b");

    let err = store
        .find_similar_documents("zzz", &SearchOptions::default())
        .await
        .expect_err("unknown id");
    assert!(matches!(err, RagError::NotFound(_)));
}

#[tokio::test]
async fn update_document_reembeds_content() {
    let store = hashing_store();
    store
        .add(VectorDocument::new("a", "original words"))
        .await
        .expect("add");
    let before = store.get("a").await.expect("exists").embedding;

    let mut metadata = Metadata::new();
    metadata.insert("edited".to_string(), json!(true));
    let updated = store
        .update_document("a", "completely different vocabulary", Some(metadata))
        .await
        .expect("update");

    assert_eq!(updated.content, "completely different vocabulary");
    assert_ne!(updated.embedding, before);
    assert_eq!(
        updated.metadata.and_then(|m| m.get("edited").cloned()),
        Some(json!(true))
    );
    assert!(updated.timestamp.is_some());
}

#[tokio::test]
async fn update_missing_document_is_not_found() {
    let store = hashing_store();
    let err = store
        .update_document("ghost", "text", None)
        .await
        .expect_err("not found");
    assert!(err.to_string().contains("Document ghost not found"));
}

#[tokio::test]
async fn update_loses_to_concurrent_delete() {
    let gate = Arc::new(tokio::sync::Semaphore::new(1));
    let store = Arc::new(VectorStore::with_embedder(Arc::new(GatedEmbedder {
        gate: Arc::clone(&gate),
        inner: HashingEmbedder::default(),
    })));
    store
        .add(VectorDocument::new("a", "original words"))
        .await
        .expect("add");

    let held = Arc::clone(&gate).acquire_owned().await.expect("gate open");
    let update = tokio::spawn({
        let store = Arc::clone(&store);
        async move { store.update_document("a", "new words", None).await }
    });
    tokio::task::yield_now().await;

    assert!(store.delete("a").await);
    drop(held);

    let err = update
        .await
        .expect("task joins")
        .expect_err("deleted document must not be resurrected");
    assert!(matches!(err, RagError::NotFound(_)));
    assert!(store.get("a").await.is_none());
}

#[tokio::test]
async fn replace_by_metadata_swaps_matching_documents() {
    let store = VectorStore::new();
    store
        .add_batch(vec![
            tagged("old-1", vec![1.0, 0.0], "draft"),
            tagged("old-2", vec![0.0, 1.0], "draft"),
            tagged("keep", vec![1.0, 1.0], "final"),
        ])
        .await
        .expect("seed");

    let removed = store
        .replace_by_metadata(
            |metadata| metadata.get("kind") == Some(&json!("draft")),
            vec![tagged("new", vec![0.5, 0.5], "draft")],
        )
        .await
        .expect("replace");

    assert_eq!(removed, 2);
    assert_eq!(store.ids().await, vec!["keep".to_string(), "new".to_string()]);
}

#[tokio::test]
async fn failed_replace_leaves_store_untouched() {
    let store = VectorStore::new();
    store
        .add_batch(vec![
            tagged("draft", vec![1.0, 0.0], "draft"),
            tagged("keep", vec![0.0, 1.0], "final"),
        ])
        .await
        .expect("seed");

    let err = store
        .replace_by_metadata(
            |metadata| metadata.get("kind") == Some(&json!("draft")),
            vec![tagged("wide", vec![1.0, 0.0, 0.0], "draft")],
        )
        .await
        .expect_err("dimension mismatch");
    assert!(matches!(err, RagError::Validation(_)));
    assert_eq!(store.ids().await, vec!["draft".to_string(), "keep".to_string()]);
}

#[tokio::test]
async fn replace_may_change_dimension_when_nothing_survives() {
    let store = VectorStore::new();
    store
        .add(tagged("only", vec![1.0, 0.0], "draft"))
        .await
        .expect("seed");

    store
        .replace_by_metadata(|_| true, vec![doc("wide", vec![1.0, 0.0, 0.0])])
        .await
        .expect("replace");
    assert_eq!(store.dimension().await, Some(3));
}

#[tokio::test]
async fn metadata_queries_and_deletes() {
    let store = VectorStore::new();
    store
        .add_batch(vec![
            tagged("a", vec![1.0, 0.0], "guide"),
            tagged("b", vec![0.0, 1.0], "reference"),
            doc("c", vec![1.0, 1.0]),
        ])
        .await
        .expect("batch");

    let guides = store
        .get_documents_by_metadata(|m| m.get("kind") == Some(&json!("guide")))
        .await;
    assert_eq!(guides.len(), 1);
    assert_eq!(guides[0].id, "a");

    let untagged = store
        .get_documents_by_metadata(|m| !m.contains_key("kind"))
        .await;
    assert_eq!(untagged.len(), 1);

    let removed = store
        .delete_by_metadata(|m| m.get("kind") == Some(&json!("reference")))
        .await;
    assert_eq!(removed, 1);
    assert_eq!(store.ids().await, vec!["a".to_string(), "c".to_string()]);
}

#[tokio::test]
async fn clustering_covers_every_document_once() {
    let store = VectorStore::new();
    store
        .add_batch(vec![
            doc("x1", vec![1.0, 0.0]),
            doc("y1", vec![0.0, 1.0]),
            doc("x2", vec![0.95, 0.05]),
            doc("y2", vec![0.05, 0.95]),
        ])
        .await
        .expect("batch");

    let clusters = store.cluster_documents(0.9).await;

    assert_eq!(clusters.len(), 2);
    assert_eq!(clusters[0].representative_id, "x1");
    let first: Vec<&str> = clusters[0].documents.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(first, vec!["x1", "x2"]);
    let total: usize = clusters.iter().map(|c| c.documents.len()).sum();
    assert_eq!(total, 4);
}

#[tokio::test]
async fn stats_report_contents() {
    let store = VectorStore::new();
    assert_eq!(store.stats().await, VectorStoreStats::default());

    store
        .add_batch(vec![doc("a", vec![1.0, 0.0, 0.0]), doc("b", vec![0.0, 1.0, 0.0])])
        .await
        .expect("batch");
    let stats = store.stats().await;

    assert_eq!(stats.document_count, 2);
    assert_eq!(stats.embedding_count, 2);
    assert!((stats.average_dimension - 3.0).abs() < f64::EPSILON);
    assert!(stats.memory_usage > 0);
    assert!(stats.last_modified > 0);
}
