// RAG module
// Composes chunking, vector search, relevance scoring and context assembly

pub mod context;
pub mod scoring;


use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::Result;
use crate::config::{RagConfig, RagConfigUpdate};
use crate::embeddings::{DocumentChunker, EmbeddingGenerator};
use crate::vector::store::validate_document;
use crate::vector::{SearchOptions, VectorDocument, VectorSearchResult, VectorStore, VectorStoreStats};

pub use context::{CONTEXT_PREAMBLE, ContextWindowManager, RagContext};
pub use scoring::{RelevanceScorer, ScoreBreakdown};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One role-tagged turn of a chat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    #[inline]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    #[inline]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    #[inline]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    #[inline]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RagResultMetadata {
    pub documents_retrieved: usize,
    pub processing_time_ms: u64,
    pub total_tokens: usize,
    pub truncated: bool,
}

/// Outcome of one enhance call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RagResult {
    pub original_prompt: String,
    pub enhanced_prompt: String,
    pub context: RagContext,
    pub metadata: RagResultMetadata,
}

impl RagResult {
    /// Result that leaves `prompt` untouched and reports nothing retrieved
    #[inline]
    pub fn passthrough(prompt: &str) -> Self {
        Self {
            original_prompt: prompt.to_string(),
            enhanced_prompt: prompt.to_string(),
            context: RagContext::empty(prompt),
            metadata: RagResultMetadata::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RagStats {
    pub enabled: bool,
    pub vector_store: VectorStoreStats,
    pub config: RagConfig,
}

/// Components derived from one configuration snapshot
#[derive(Debug, Clone)]
struct Pipeline {
    config: RagConfig,
    chunker: DocumentChunker,
    scorer: RelevanceScorer,
    context: ContextWindowManager,
}

impl Pipeline {
    fn new(config: RagConfig) -> Self {
        Self {
            chunker: DocumentChunker::from_config(&config),
            scorer: RelevanceScorer::new(config.relevance_scoring.clone()),
            context: ContextWindowManager::from_config(&config),
            config,
        }
    }
}

/// Retrieval-augmented prompt enhancement over an in-memory vector store
pub struct RagSystem {
    store: Arc<VectorStore>,
    pipeline: RwLock<Pipeline>,
}

impl RagSystem {
    /// Build a system with its own store backed by `embedder`
    #[inline]
    pub fn new(config: RagConfig, embedder: Arc<dyn EmbeddingGenerator>) -> Result<Self> {
        Self::with_store(config, Arc::new(VectorStore::with_embedder(embedder)))
    }

    /// Build a system over an existing store. The store needs an embedder for
    /// ingestion of raw text and for query search.
    #[inline]
    pub fn with_store(config: RagConfig, store: Arc<VectorStore>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            pipeline: RwLock::new(Pipeline::new(config)),
        })
    }

    #[inline]
    pub fn vector_store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    /// Chunk documents and insert every chunk, returning the chunk count.
    ///
    /// Re-ingesting a parent id replaces all of its earlier chunks. Any invalid
    /// document rejects the whole call before anything is stored.
    #[inline]
    pub async fn add_documents(&self, documents: Vec<VectorDocument>) -> Result<usize> {
        for document in &documents {
            validate_document(document)?;
        }

        let chunker = self.pipeline.read().await.chunker.clone();
        let chunks: Vec<VectorDocument> = chunker
            .chunk_documents(&documents)
            .into_iter()
            .map(VectorDocument::from)
            .collect();

        let parents: HashSet<String> = documents.iter().map(|d| d.id.clone()).collect();
        let count = chunks.len();
        let replaced = self
            .store
            .replace_by_metadata(
                move |metadata| {
                    metadata
                        .get("parentDocument")
                        .and_then(Value::as_str)
                        .is_some_and(|parent| parents.contains(parent))
                },
                chunks,
            )
            .await?;

        if replaced > 0 {
            debug!("Replaced {} chunks of re-ingested documents", replaced);
        }
        info!("Ingested {} documents as {} chunks", documents.len(), count);
        Ok(count)
    }

    /// Remove every chunk produced from `parent_id`
    #[inline]
    pub async fn remove_document(&self, parent_id: &str) -> usize {
        let parent = Value::from(parent_id);
        let removed = self
            .store
            .delete_by_metadata(move |metadata| metadata.get("parentDocument") == Some(&parent))
            .await;
        debug!("Removed {} chunks of '{}'", removed, parent_id);
        removed
    }

    #[inline]
    pub async fn clear_documents(&self) {
        self.store.clear().await;
    }

    /// Retrieve and re-rank without touching any prompt
    #[inline]
    pub async fn search(&self, query: &str) -> Result<Vec<VectorSearchResult>> {
        let pipeline = self.pipeline.read().await.clone();
        self.retrieve(&pipeline, query).await
    }

    /// Enhance the last user message of `request` in place
    #[inline]
    pub async fn enhance_chat(&self, request: &mut ChatRequest) -> Result<RagResult> {
        let Some(message) = request
            .messages
            .iter_mut()
            .rev()
            .find(|message| message.role == Role::User)
        else {
            return Ok(RagResult::default());
        };

        let result = self.enhance_prompt(&message.content).await?;
        message.content.clone_from(&result.enhanced_prompt);
        Ok(result)
    }

    /// Enhance the prompt of `request` in place
    #[inline]
    pub async fn enhance_completion(&self, request: &mut CompletionRequest) -> Result<RagResult> {
        let result = self.enhance_prompt(&request.prompt).await?;
        request.prompt.clone_from(&result.enhanced_prompt);
        Ok(result)
    }

    /// Apply a partial update. The current configuration stays on validation failure.
    #[inline]
    pub async fn update_config(&self, update: RagConfigUpdate) -> Result<()> {
        let mut pipeline = self.pipeline.write().await;
        let merged = pipeline.config.merged(update);
        merged.validate()?;
        *pipeline = Pipeline::new(merged);
        debug!("RAG configuration updated");
        Ok(())
    }

    #[inline]
    pub async fn get_config(&self) -> RagConfig {
        self.pipeline.read().await.config.clone()
    }

    #[inline]
    pub async fn get_stats(&self) -> RagStats {
        let config = self.get_config().await;
        RagStats {
            enabled: config.enabled,
            vector_store: self.store.stats().await,
            config,
        }
    }

    async fn enhance_prompt(&self, prompt: &str) -> Result<RagResult> {
        if prompt.trim().is_empty() {
            return Ok(RagResult::passthrough(prompt));
        }

        let pipeline = self.pipeline.read().await.clone();
        if !pipeline.config.enabled {
            return Ok(RagResult::passthrough(prompt));
        }

        let started = Instant::now();
        let results = self.retrieve(&pipeline, prompt).await?;
        let context = pipeline.context.build_context(&results, prompt);
        let enhanced_prompt = pipeline.context.inject_context(prompt, &context);

        let metadata = RagResultMetadata {
            documents_retrieved: context.retrieved_documents.len(),
            processing_time_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            total_tokens: context.total_tokens,
            truncated: context.truncated,
        };

        debug!(
            "Enhanced prompt with {} documents ({} tokens)",
            metadata.documents_retrieved, metadata.total_tokens
        );

        Ok(RagResult {
            original_prompt: prompt.to_string(),
            enhanced_prompt,
            context,
            metadata,
        })
    }

    async fn retrieve(&self, pipeline: &Pipeline, query: &str) -> Result<Vec<VectorSearchResult>> {
        let options = SearchOptions::default()
            .with_limit(pipeline.config.max_documents)
            .with_threshold(pipeline.config.similarity_threshold)
            .with_metadata(pipeline.config.include_metadata);

        let results = self.store.search_by_text(query, &options).await?;
        Ok(pipeline.scorer.score_results(results, query))
    }
}
