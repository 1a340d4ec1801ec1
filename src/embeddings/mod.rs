// Embeddings module
// Embedding generation collaborators, vector math and document chunking

pub mod chunking;
pub mod hashing;
pub mod math;
pub mod ollama;

use async_trait::async_trait;

use crate::Result;

pub use chunking::{DocumentChunk, DocumentChunker};
pub use hashing::HashingEmbedder;
pub use math::{cosine_similarity, estimate_token_count, normalize};
pub use ollama::OllamaClient;

/// A point in similarity space. Two embeddings are only comparable when equal in length.
pub type Embedding = Vec<f32>;

/// Turns text into an embedding.
///
/// This is the only suspension point in the engine that can stall indefinitely;
/// callers needing bounded latency should wrap calls in `tokio::time::timeout`.
#[async_trait]
pub trait EmbeddingGenerator: Send + Sync {
    async fn generate_embedding(&self, text: &str) -> Result<Embedding>;

    /// Embed several texts in order
    async fn generate_embeddings(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.generate_embedding(text).await?);
        }
        Ok(embeddings)
    }
}
