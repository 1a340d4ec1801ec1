// Vector module
// Document model and the in-memory linear-scan vector store

pub mod store;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::embeddings::Embedding;

pub use store::VectorStore;

/// Schema-less metadata carried through the engine untouched
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Predicate over document metadata used by search filters
pub type MetadataFilter = Arc<dyn Fn(&Metadata) -> bool + Send + Sync>;

/// A document held by the vector store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorDocument {
    /// Unique, non-empty identifier
    pub id: String,
    /// Non-empty text content
    pub content: String,
    /// May be empty, in which case the store generates it on insert
    #[serde(default)]
    pub embedding: Embedding,
    #[serde(default)]
    pub metadata: Option<Metadata>,
    /// Epoch milliseconds
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl VectorDocument {
    #[inline]
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            embedding: Vec::new(),
            metadata: None,
            timestamp: None,
        }
    }

    #[must_use]
    #[inline]
    pub fn with_embedding(mut self, embedding: Embedding) -> Self {
        self.embedding = embedding;
        self
    }

    #[must_use]
    #[inline]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    #[must_use]
    #[inline]
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// A ranked hit, produced at query time only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorSearchResult {
    pub document: VectorDocument,
    /// Cosine similarity, or the weighted relevance score after re-ranking
    pub similarity: f32,
    /// `1 - similarity` of the raw cosine score
    pub distance: f32,
}

/// Options for `VectorStore::search`
#[derive(Clone)]
pub struct SearchOptions {
    pub limit: usize,
    /// Minimum similarity a result must reach
    pub threshold: Option<f32>,
    pub filter: Option<MetadataFilter>,
    pub include_metadata: bool,
}

impl Default for SearchOptions {
    #[inline]
    fn default() -> Self {
        Self {
            limit: 10,
            threshold: None,
            filter: None,
            include_metadata: true,
        }
    }
}

impl fmt::Debug for SearchOptions {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchOptions")
            .field("limit", &self.limit)
            .field("threshold", &self.threshold)
            .field("filter", &self.filter.as_ref().map(|_| "<predicate>"))
            .field("include_metadata", &self.include_metadata)
            .finish()
    }
}

impl SearchOptions {
    #[must_use]
    #[inline]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    #[must_use]
    #[inline]
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = Some(threshold);
        self
    }

    #[must_use]
    #[inline]
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Metadata) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    #[must_use]
    #[inline]
    pub fn with_metadata(mut self, include_metadata: bool) -> Self {
        self.include_metadata = include_metadata;
        self
    }
}

/// Snapshot of store contents. An empty store reports all zeros.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorStoreStats {
    pub document_count: usize,
    pub embedding_count: usize,
    pub average_dimension: f64,
    /// Approximate bytes held by contents, embeddings and metadata
    pub memory_usage: usize,
    /// Epoch milliseconds of the last mutation
    pub last_modified: i64,
}

/// One group produced by greedy clustering
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentCluster {
    /// Id of the first document, whose embedding represents the cluster
    pub representative_id: String,
    pub documents: Vec<VectorDocument>,
}
