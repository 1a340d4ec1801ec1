use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{Config, RagConfig};
use crate::embeddings::{DocumentChunker, EmbeddingGenerator, HashingEmbedder, OllamaClient};
use crate::rag::{CompletionRequest, RagSystem};
use crate::vector::{Metadata, VectorDocument};

/// Print the effective configuration as TOML
#[inline]
pub fn show_config(config: &Config) -> Result<()> {
    let content = toml::to_string_pretty(config).context("Failed to serialize configuration")?;
    println!(
        "{} {}",
        style("Configuration file:").bold(),
        config.config_file_path().display()
    );
    println!();
    print!("{content}");
    Ok(())
}

/// Write the effective configuration (defaults when absent) to disk
#[inline]
pub fn write_config(config: &Config) -> Result<()> {
    config.save()?;
    println!(
        "{} {}",
        style("Configuration written to").green(),
        config.config_file_path().display()
    );
    Ok(())
}

/// Print the chunks the configured chunker produces for `path`
#[inline]
pub fn chunk_file(config: &RagConfig, path: &Path) -> Result<()> {
    let document = load_document(path)?;
    let chunker = DocumentChunker::from_config(config);
    let chunks = chunker.chunk_document(&document);

    println!(
        "{} {} ({} chars, chunk size {}, overlap {})",
        style("Chunked").bold(),
        path.display(),
        document.content.chars().count(),
        chunker.chunk_size(),
        chunker.chunk_overlap()
    );

    for chunk in &chunks {
        println!();
        println!(
            "{}",
            style(format!(
                "--- {} [{}/{}] {} chars",
                chunk.id,
                chunk.chunk_index + 1,
                chunk.total_chunks,
                chunk.content.chars().count()
            ))
            .cyan()
        );
        println!("{}", chunk.content);
    }

    Ok(())
}

/// Ingest `paths` into a fresh system and print the enhanced prompt for `question`
#[inline]
pub async fn query_documents(
    config: &Config,
    question: &str,
    paths: &[PathBuf],
    offline: bool,
    limit: Option<usize>,
) -> Result<()> {
    let mut rag_config = config.rag.clone();
    if let Some(limit) = limit {
        rag_config.max_documents = limit;
    }

    let rag = build_system(config, rag_config, offline).await?;
    ingest(&rag, paths).await?;

    let mut request = CompletionRequest {
        prompt: question.to_string(),
        model: None,
    };
    let result = rag.enhance_completion(&mut request).await?;

    println!("{}", style("Enhanced prompt").bold());
    println!("{}", result.enhanced_prompt);
    println!();
    println!("{}", style("Retrieval").bold());
    println!("  Documents retrieved: {}", result.metadata.documents_retrieved);
    println!("  Context tokens: {}", result.metadata.total_tokens);
    println!("  Truncated: {}", result.metadata.truncated);
    println!("  Processing time: {} ms", result.metadata.processing_time_ms);
    for (retrieved, score) in result
        .context
        .retrieved_documents
        .iter()
        .zip(&result.context.relevance_scores)
    {
        println!("  {:.4}  {}", score, retrieved.document.id);
    }

    Ok(())
}

/// Ingest `paths` and print store statistics plus greedy clusters
#[inline]
pub async fn show_stats(config: &Config, paths: &[PathBuf], offline: bool) -> Result<()> {
    let rag = build_system(config, config.rag.clone(), offline).await?;
    ingest(&rag, paths).await?;

    let stats = rag.get_stats().await;
    let clusters = rag
        .vector_store()
        .cluster_documents(config.rag.similarity_threshold)
        .await;

    println!("{}", style("Vector store").bold());
    println!("  Chunks: {}", stats.vector_store.document_count);
    println!("  Embeddings: {}", stats.vector_store.embedding_count);
    println!(
        "  Average dimension: {:.1}",
        stats.vector_store.average_dimension
    );
    println!("  Approximate memory: {} bytes", stats.vector_store.memory_usage);
    println!();
    println!(
        "{} (threshold {})",
        style(format!("{} clusters", clusters.len())).bold(),
        config.rag.similarity_threshold
    );
    for cluster in &clusters {
        println!(
            "  {} ({} members)",
            cluster.representative_id,
            cluster.documents.len()
        );
    }

    Ok(())
}

/// Read a text file into a document keyed by its path
#[inline]
pub fn load_document(path: &Path) -> Result<VectorDocument> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read document: {}", path.display()))?;

    let mut metadata = Metadata::new();
    metadata.insert("source".to_string(), json!(path.display().to_string()));
    if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
        metadata.insert("format".to_string(), json!(extension));
    }

    let mut document =
        VectorDocument::new(path.display().to_string(), content).with_metadata(metadata);

    match fs::metadata(path).and_then(|m| m.modified()) {
        Ok(modified) => {
            document.timestamp =
                Some(chrono::DateTime::<chrono::Utc>::from(modified).timestamp_millis());
        }
        Err(e) => warn!("No modification time for {}: {}", path.display(), e),
    }

    Ok(document)
}

/// Embedding backend for the CLI: hashing when offline, Ollama otherwise
#[inline]
pub async fn build_embedder(
    config: &Config,
    offline: bool,
) -> Result<Arc<dyn EmbeddingGenerator>> {
    if offline {
        info!("Using offline hashing embedder");
        return Ok(Arc::new(HashingEmbedder::default()));
    }

    let client = OllamaClient::new(&config.ollama).context("Failed to create Ollama client")?;
    let probe = client.clone();
    tokio::task::spawn_blocking(move || probe.health_check())
        .await
        .context("Ollama health check task failed")?
        .context("Ollama is not reachable; pass --offline to use the hashing embedder")?;
    Ok(Arc::new(client))
}

async fn build_system(config: &Config, rag_config: RagConfig, offline: bool) -> Result<RagSystem> {
    let embedder = build_embedder(config, offline).await?;
    Ok(RagSystem::new(rag_config, embedder)?)
}

async fn ingest(rag: &RagSystem, paths: &[PathBuf]) -> Result<()> {
    let bar = if console::user_attended_stderr() {
        ProgressBar::new(paths.len() as u64).with_style(
            ProgressStyle::with_template("{bar:30} [{pos}/{len}] Ingesting {msg}")
                .context("Invalid progress bar template")?,
        )
    } else {
        ProgressBar::hidden()
    };

    let mut chunks = 0;
    for path in paths {
        bar.set_message(path.display().to_string());
        let document = load_document(path)?;
        chunks += rag.add_documents(vec![document]).await?;
        bar.inc(1);
    }
    bar.finish_and_clear();

    info!("Ingested {} files as {} chunks", paths.len(), chunks);
    Ok(())
}
