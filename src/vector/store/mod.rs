#[cfg(test)]
mod tests;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{
    DocumentCluster, Metadata, SearchOptions, VectorDocument, VectorSearchResult,
    VectorStoreStats,
};
use crate::embeddings::math::cosine_similarity;
use crate::embeddings::{Embedding, EmbeddingGenerator};
use crate::{RagError, Result};

/// In-memory vector store with linear-scan cosine search.
///
/// Documents keep insertion order; re-adding an existing id overwrites it in
/// place. All non-empty embeddings share one dimensionality. Reads run
/// concurrently, mutations take the write lock for their whole update.
pub struct VectorStore {
    state: RwLock<StoreState>,
    embedder: Option<Arc<dyn EmbeddingGenerator>>,
}

#[derive(Default)]
struct StoreState {
    documents: Vec<VectorDocument>,
    positions: HashMap<String, usize>,
    dimension: Option<usize>,
    last_modified: i64,
}

impl StoreState {
    fn upsert(&mut self, document: VectorDocument) {
        if self.dimension.is_none() && !document.embedding.is_empty() {
            self.dimension = Some(document.embedding.len());
        }

        if let Some(&position) = self.positions.get(&document.id) {
            self.documents[position] = document;
        } else {
            self.positions
                .insert(document.id.clone(), self.documents.len());
            self.documents.push(document);
        }
        self.last_modified = now_millis();
    }

    fn remove_where<F>(&mut self, mut predicate: F) -> usize
    where
        F: FnMut(&VectorDocument) -> bool,
    {
        let before = self.documents.len();
        self.documents.retain(|document| !predicate(document));
        let removed = before - self.documents.len();

        if removed > 0 {
            self.reindex();
            self.last_modified = now_millis();
        }
        removed
    }

    fn reindex(&mut self) {
        self.positions = self
            .documents
            .iter()
            .enumerate()
            .map(|(position, document)| (document.id.clone(), position))
            .collect();

        if self.documents.iter().all(|d| d.embedding.is_empty()) {
            self.dimension = None;
        }
    }

    fn check_dimension(&self, document: &VectorDocument) -> Result<()> {
        match self.dimension {
            Some(dimension) if dimension != document.embedding.len() => {
                Err(RagError::Validation(format!(
                    "Vector dimension mismatch: document '{}' has {} dimensions, store uses {}",
                    document.id,
                    document.embedding.len(),
                    dimension
                )))
            }
            _ => Ok(()),
        }
    }
}

impl Default for VectorStore {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl VectorStore {
    /// Create a store that only accepts pre-embedded documents
    #[inline]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            embedder: None,
        }
    }

    /// Create a store that embeds documents and text queries on demand
    #[inline]
    pub fn with_embedder(embedder: Arc<dyn EmbeddingGenerator>) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            embedder: Some(embedder),
        }
    }

    #[inline]
    pub fn has_embedder(&self) -> bool {
        self.embedder.is_some()
    }

    /// Add or overwrite a document, generating its embedding when empty
    #[inline]
    pub async fn add(&self, document: VectorDocument) -> Result<()> {
        validate_document(&document)?;
        let document = self.ensure_embedding(document).await?;

        let mut state = self.state.write().await;
        state.check_dimension(&document)?;
        debug!("Storing document '{}'", document.id);
        state.upsert(document);
        Ok(())
    }

    /// Add several documents. Either every document is stored or none is.
    #[inline]
    pub async fn add_batch(&self, documents: Vec<VectorDocument>) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }

        for document in &documents {
            validate_document(document)?;
        }

        let documents = self.ensure_embeddings(documents).await?;
        let count = documents.len();

        let mut state = self.state.write().await;
        check_batch_dimension(state.dimension, &documents)?;

        for document in documents {
            state.upsert(document);
        }

        info!("Stored batch of {} documents", count);
        Ok(())
    }

    /// Delete every document whose metadata satisfies `predicate` and store
    /// `documents` in the same write. On error nothing is deleted or stored.
    ///
    /// Returns how many documents were deleted.
    #[inline]
    pub async fn replace_by_metadata<F>(
        &self,
        predicate: F,
        documents: Vec<VectorDocument>,
    ) -> Result<usize>
    where
        F: Fn(&Metadata) -> bool + Send + Sync,
    {
        for document in &documents {
            validate_document(document)?;
        }

        let documents = self.ensure_embeddings(documents).await?;
        let count = documents.len();

        let empty = Metadata::new();
        let stale = |document: &VectorDocument| {
            predicate(document.metadata.as_ref().unwrap_or(&empty))
        };

        let mut state = self.state.write().await;
        let surviving_dimension = state
            .documents
            .iter()
            .filter(|&document| !stale(document) && !document.embedding.is_empty())
            .map(|document| document.embedding.len())
            .next();
        check_batch_dimension(surviving_dimension, &documents)?;

        let removed = state.remove_where(stale);
        for document in documents {
            state.upsert(document);
        }

        info!("Replaced {} documents with {}", removed, count);
        Ok(removed)
    }

    #[inline]
    pub async fn get(&self, id: &str) -> Option<VectorDocument> {
        let state = self.state.read().await;
        state
            .positions
            .get(id)
            .map(|&position| state.documents[position].clone())
    }

    #[inline]
    pub async fn delete(&self, id: &str) -> bool {
        let mut state = self.state.write().await;
        let removed = state.remove_where(|document| document.id == id) > 0;
        if removed {
            debug!("Deleted document '{}'", id);
        }
        removed
    }

    /// Delete every listed id, returning how many existed
    #[inline]
    pub async fn delete_batch(&self, ids: &[String]) -> usize {
        let ids: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut state = self.state.write().await;
        state.remove_where(|document| ids.contains(document.id.as_str()))
    }

    /// Delete every document whose metadata satisfies the predicate
    #[inline]
    pub async fn delete_by_metadata<F>(&self, predicate: F) -> usize
    where
        F: Fn(&Metadata) -> bool + Send + Sync,
    {
        let empty = Metadata::new();
        let mut state = self.state.write().await;
        state.remove_where(|document| predicate(document.metadata.as_ref().unwrap_or(&empty)))
    }

    #[inline]
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        *state = StoreState {
            last_modified: now_millis(),
            ..StoreState::default()
        };
        debug!("Cleared vector store");
    }

    #[inline]
    pub async fn size(&self) -> usize {
        self.state.read().await.documents.len()
    }

    /// Dimensionality shared by stored embeddings, if any are stored
    #[inline]
    pub async fn dimension(&self) -> Option<usize> {
        self.state.read().await.dimension
    }

    /// Document ids in store order
    #[inline]
    pub async fn ids(&self) -> Vec<String> {
        let state = self.state.read().await;
        state.documents.iter().map(|d| d.id.clone()).collect()
    }

    /// Rank every stored document by cosine similarity to `query_embedding`.
    ///
    /// Threshold and metadata filter are applied before sorting; the result is
    /// sorted descending and truncated to `options.limit`.
    #[inline]
    pub async fn search(
        &self,
        query_embedding: &[f32],
        options: &SearchOptions,
    ) -> Result<Vec<VectorSearchResult>> {
        let state = self.state.read().await;
        if state.documents.is_empty() {
            return Ok(Vec::new());
        }

        let empty = Metadata::new();
        let mut results = Vec::new();

        for document in &state.documents {
            let similarity = cosine_similarity(query_embedding, &document.embedding)?;

            if options.threshold.is_some_and(|threshold| similarity < threshold) {
                continue;
            }

            if let Some(filter) = &options.filter {
                if !filter(document.metadata.as_ref().unwrap_or(&empty)) {
                    continue;
                }
            }

            let mut document = document.clone();
            if !options.include_metadata {
                document.metadata = None;
            }

            results.push(VectorSearchResult {
                document,
                similarity,
                distance: 1.0 - similarity,
            });
        }
        drop(state);

        results.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        results.truncate(options.limit);

        debug!(
            "Vector search returned {} results (limit {})",
            results.len(),
            options.limit
        );
        Ok(results)
    }

    /// Embed `query` with the configured generator and search with it
    #[inline]
    pub async fn search_by_text(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<VectorSearchResult>> {
        let embedder = self.embedder.as_ref().ok_or_else(|| {
            RagError::Embedding(
                "No embedding generator configured; text search is unavailable".to_string(),
            )
        })?;

        let query_embedding = embedder.generate_embedding(query).await?;
        self.search(&query_embedding, options).await
    }

    /// Documents most similar to the document `id`, excluding itself
    #[inline]
    pub async fn find_similar_documents(
        &self,
        id: &str,
        options: &SearchOptions,
    ) -> Result<Vec<VectorSearchResult>> {
        let document = self
            .get(id)
            .await
            .ok_or_else(|| not_found(id))?;

        let unbounded = SearchOptions {
            limit: usize::MAX,
            ..options.clone()
        };

        let mut results = self.search(&document.embedding, &unbounded).await?;
        results.retain(|result| result.document.id != id);
        results.truncate(options.limit);
        Ok(results)
    }

    /// Replace a document's content (and optionally metadata), re-embedding it.
    ///
    /// Fails with `NotFound` if the document is deleted while its new
    /// embedding is generated.
    #[inline]
    pub async fn update_document(
        &self,
        id: &str,
        content: &str,
        metadata: Option<Metadata>,
    ) -> Result<VectorDocument> {
        if !self.state.read().await.positions.contains_key(id) {
            return Err(not_found(id));
        }

        let draft = VectorDocument {
            id: id.to_string(),
            content: content.to_string(),
            embedding: Vec::new(),
            metadata: None,
            timestamp: Some(now_millis()),
        };
        validate_document(&draft)?;
        let mut updated = self.ensure_embedding(draft).await?;

        let mut state = self.state.write().await;
        let Some(&position) = state.positions.get(id) else {
            debug!("Document '{}' was deleted during update", id);
            return Err(not_found(id));
        };
        state.check_dimension(&updated)?;

        updated.metadata = metadata.or_else(|| state.documents[position].metadata.clone());
        state.upsert(updated.clone());
        Ok(updated)
    }

    /// Documents whose metadata satisfies the predicate, in store order
    #[inline]
    pub async fn get_documents_by_metadata<F>(&self, predicate: F) -> Vec<VectorDocument>
    where
        F: Fn(&Metadata) -> bool,
    {
        let empty = Metadata::new();
        let state = self.state.read().await;
        state
            .documents
            .iter()
            .filter(|document| predicate(document.metadata.as_ref().unwrap_or(&empty)))
            .cloned()
            .collect()
    }

    /// Single-pass greedy clustering in store order.
    ///
    /// A document joins the first cluster whose representative it matches with
    /// similarity >= `threshold`, otherwise it starts a new cluster.
    #[inline]
    pub async fn cluster_documents(&self, threshold: f32) -> Vec<DocumentCluster> {
        let state = self.state.read().await;
        let mut clusters: Vec<(Embedding, DocumentCluster)> = Vec::new();

        for document in &state.documents {
            let home = clusters.iter_mut().find(|(representative, _)| {
                cosine_similarity(representative, &document.embedding)
                    .is_ok_and(|similarity| similarity >= threshold)
            });

            match home {
                Some((_, cluster)) => cluster.documents.push(document.clone()),
                None => clusters.push((
                    document.embedding.clone(),
                    DocumentCluster {
                        representative_id: document.id.clone(),
                        documents: vec![document.clone()],
                    },
                )),
            }
        }

        debug!(
            "Clustered {} documents into {} clusters",
            state.documents.len(),
            clusters.len()
        );
        clusters.into_iter().map(|(_, cluster)| cluster).collect()
    }

    #[inline]
    pub async fn stats(&self) -> VectorStoreStats {
        let state = self.state.read().await;
        if state.documents.is_empty() {
            return VectorStoreStats::default();
        }

        let embedded: Vec<usize> = state
            .documents
            .iter()
            .map(|d| d.embedding.len())
            .filter(|&len| len > 0)
            .collect();

        let average_dimension = if embedded.is_empty() {
            0.0
        } else {
            embedded.iter().sum::<usize>() as f64 / embedded.len() as f64
        };

        let memory_usage = state
            .documents
            .iter()
            .map(|d| {
                d.id.len()
                    + d.content.len()
                    + d.embedding.len() * size_of::<f32>()
                    + d.metadata
                        .as_ref()
                        .and_then(|m| serde_json::to_string(m).ok())
                        .map_or(0, |json| json.len())
            })
            .sum();

        VectorStoreStats {
            document_count: state.documents.len(),
            embedding_count: embedded.len(),
            average_dimension,
            memory_usage,
            last_modified: state.last_modified,
        }
    }

    async fn ensure_embedding(&self, mut document: VectorDocument) -> Result<VectorDocument> {
        if !document.embedding.is_empty() {
            return Ok(document);
        }

        let embedder = self.require_embedder(&document.id)?;
        document.embedding = embedder.generate_embedding(&document.content).await?;
        check_generated(&document)?;
        Ok(document)
    }

    async fn ensure_embeddings(
        &self,
        mut documents: Vec<VectorDocument>,
    ) -> Result<Vec<VectorDocument>> {
        let missing: Vec<usize> = documents
            .iter()
            .enumerate()
            .filter(|(_, d)| d.embedding.is_empty())
            .map(|(i, _)| i)
            .collect();

        if missing.is_empty() {
            return Ok(documents);
        }

        let embedder = self.require_embedder(&documents[missing[0]].id)?;
        let texts: Vec<String> = missing
            .iter()
            .map(|&i| documents[i].content.clone())
            .collect();
        let embeddings = embedder.generate_embeddings(&texts).await?;

        if embeddings.len() != missing.len() {
            return Err(RagError::Embedding(format!(
                "Embedding generator returned {} embeddings for {} documents",
                embeddings.len(),
                missing.len()
            )));
        }

        for (index, embedding) in missing.into_iter().zip(embeddings) {
            documents[index].embedding = embedding;
            check_generated(&documents[index])?;
        }

        Ok(documents)
    }

    fn require_embedder(&self, id: &str) -> Result<&Arc<dyn EmbeddingGenerator>> {
        self.embedder.as_ref().ok_or_else(|| {
            RagError::Embedding(format!(
                "No embedding generator configured; cannot embed document '{id}'"
            ))
        })
    }
}

pub(crate) fn validate_document(document: &VectorDocument) -> Result<()> {
    if document.id.trim().is_empty() || document.content.trim().is_empty() {
        return Err(RagError::Validation(
            "Document must have id and content".to_string(),
        ));
    }
    Ok(())
}

fn check_batch_dimension(current: Option<usize>, documents: &[VectorDocument]) -> Result<()> {
    let mut dimension = current;
    for document in documents {
        match dimension {
            Some(expected) if expected != document.embedding.len() => {
                return Err(RagError::Validation(format!(
                    "Vector dimension mismatch: document '{}' has {} dimensions, batch uses {}",
                    document.id,
                    document.embedding.len(),
                    expected
                )));
            }
            Some(_) => {}
            None => dimension = Some(document.embedding.len()),
        }
    }
    Ok(())
}

fn not_found(id: &str) -> RagError {
    RagError::NotFound(format!("Document {id} not found"))
}

fn check_generated(document: &VectorDocument) -> Result<()> {
    if document.embedding.is_empty() {
        return Err(RagError::Embedding(format!(
            "Embedding generator returned an empty embedding for document '{}'",
            document.id
        )));
    }
    Ok(())
}

#[inline]
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
