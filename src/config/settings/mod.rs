
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::embeddings::ollama::DEFAULT_EMBEDDING_DIMENSION;

pub const DEFAULT_CONTEXT_TEMPLATE: &str = "[{id}]\n{content}";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub rag: RagConfig,
    #[serde(default)]
    pub cache: CacheOptions,
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// Retrieval and prompt-enhancement settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RagConfig {
    pub enabled: bool,
    /// Token budget for the assembled context block
    pub max_context_length: usize,
    pub max_documents: usize,
    pub similarity_threshold: f32,
    /// Supports `{content}`, `{id}`, `{metadata}` and `{timestamp}`
    pub context_template: String,
    pub include_metadata: bool,
    /// Chunk size in characters
    pub chunk_size: usize,
    /// Overlap carried between adjacent chunks, in characters
    pub chunk_overlap: usize,
    pub relevance_scoring: RelevanceScoringConfig,
}

impl Default for RagConfig {
    #[inline]
    fn default() -> Self {
        Self {
            enabled: true,
            max_context_length: 4000,
            max_documents: 5,
            similarity_threshold: 0.7,
            context_template: DEFAULT_CONTEXT_TEMPLATE.to_string(),
            include_metadata: true,
            chunk_size: 1000,
            chunk_overlap: 200,
            relevance_scoring: RelevanceScoringConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelevanceScoringConfig {
    pub enabled: bool,
    pub weights: ScoringWeights,
}

impl Default for RelevanceScoringConfig {
    #[inline]
    fn default() -> Self {
        Self {
            enabled: true,
            weights: ScoringWeights::default(),
        }
    }
}

/// Weights for the three relevance components. Expected, not required, to sum to 1.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScoringWeights {
    pub similarity: f32,
    pub recency: f32,
    pub metadata: f32,
}

impl Default for ScoringWeights {
    #[inline]
    fn default() -> Self {
        Self {
            similarity: 0.6,
            recency: 0.2,
            metadata: 0.2,
        }
    }
}

/// Partial update accepted by `RagSystem::update_config`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RagConfigUpdate {
    pub enabled: Option<bool>,
    pub max_context_length: Option<usize>,
    pub max_documents: Option<usize>,
    pub similarity_threshold: Option<f32>,
    pub context_template: Option<String>,
    pub include_metadata: Option<bool>,
    pub chunk_size: Option<usize>,
    pub chunk_overlap: Option<usize>,
    pub relevance_scoring: Option<RelevanceScoringConfig>,
}

/// Eviction and semantic cache settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheOptions {
    pub max_size: usize,
    pub default_ttl_ms: u64,
    pub enable_semantic_cache: bool,
    pub semantic_threshold: f32,
    /// Background purge interval; 0 disables the cleanup task
    pub cleanup_interval_ms: u64,
}

impl Default for CacheOptions {
    #[inline]
    fn default() -> Self {
        Self {
            max_size: 1000,
            default_ttl_ms: 3_600_000,
            enable_semantic_cache: true,
            semantic_threshold: 0.95,
            cleanup_interval_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OllamaConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub model: String,
    pub batch_size: u32,
    pub embedding_dimension: u32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            model: "nomic-embed-text:latest".to_string(),
            batch_size: 16,
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid embedding dimension: {0} (must be between 64 and 4096)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid chunk size: {0} (must be greater than 0)")]
    InvalidChunkSize(usize),
    #[error("Chunk overlap ({0}) must be smaller than chunk size ({1})")]
    ChunkOverlapTooLarge(usize, usize),
    #[error("Invalid max context length: {0} (must be greater than 0)")]
    InvalidMaxContextLength(usize),
    #[error("Invalid max documents: {0} (must be greater than 0)")]
    InvalidMaxDocuments(usize),
    #[error("Invalid similarity threshold: {0} (must be between -1 and 1)")]
    InvalidSimilarityThreshold(f32),
    #[error("Invalid scoring weight for {0}: {1} (must be finite and non-negative)")]
    InvalidScoringWeight(&'static str, f32),
    #[error("Invalid cache size: {0} (must be greater than 0)")]
    InvalidCacheSize(usize),
    #[error("Invalid semantic threshold: {0} (must be between 0 and 1)")]
    InvalidSemanticThreshold(f32),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Resolve the per-user configuration directory
    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join("rag-engine"))
            .or_else(|| dirs::home_dir().map(|home| home.join(".rag-engine")))
            .ok_or(ConfigError::DirectoryError)
    }

    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self {
                base_dir: config_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        self.ollama.ollama_url()
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ollama.validate()?;
        self.rag.validate()?;
        self.cache.validate()?;
        Ok(())
    }
}

impl RagConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidChunkSize(self.chunk_size));
        }

        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::ChunkOverlapTooLarge(
                self.chunk_overlap,
                self.chunk_size,
            ));
        }

        if self.max_context_length == 0 {
            return Err(ConfigError::InvalidMaxContextLength(
                self.max_context_length,
            ));
        }

        if self.max_documents == 0 {
            return Err(ConfigError::InvalidMaxDocuments(self.max_documents));
        }

        if !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ConfigError::InvalidSimilarityThreshold(
                self.similarity_threshold,
            ));
        }

        self.relevance_scoring.weights.validate()
    }

    /// Apply a partial update, returning the merged configuration
    #[must_use]
    #[inline]
    pub fn merged(&self, update: RagConfigUpdate) -> Self {
        Self {
            enabled: update.enabled.unwrap_or(self.enabled),
            max_context_length: update
                .max_context_length
                .unwrap_or(self.max_context_length),
            max_documents: update.max_documents.unwrap_or(self.max_documents),
            similarity_threshold: update
                .similarity_threshold
                .unwrap_or(self.similarity_threshold),
            context_template: update
                .context_template
                .unwrap_or_else(|| self.context_template.clone()),
            include_metadata: update.include_metadata.unwrap_or(self.include_metadata),
            chunk_size: update.chunk_size.unwrap_or(self.chunk_size),
            chunk_overlap: update.chunk_overlap.unwrap_or(self.chunk_overlap),
            relevance_scoring: update
                .relevance_scoring
                .unwrap_or_else(|| self.relevance_scoring.clone()),
        }
    }
}

impl ScoringWeights {
    fn validate(&self) -> Result<(), ConfigError> {
        for (name, weight) in [
            ("similarity", self.similarity),
            ("recency", self.recency),
            ("metadata", self.metadata),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(ConfigError::InvalidScoringWeight(name, weight));
            }
        }
        Ok(())
    }
}

impl CacheOptions {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_size == 0 {
            return Err(ConfigError::InvalidCacheSize(self.max_size));
        }

        if !(0.0..=1.0).contains(&self.semantic_threshold) {
            return Err(ConfigError::InvalidSemanticThreshold(
                self.semantic_threshold,
            ));
        }

        Ok(())
    }

    #[inline]
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    /// `None` when background cleanup is disabled
    #[inline]
    pub fn cleanup_interval(&self) -> Option<Duration> {
        (self.cleanup_interval_ms > 0).then(|| Duration::from_millis(self.cleanup_interval_ms))
    }
}

impl OllamaConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(ConfigError::InvalidProtocol(self.protocol.clone()));
        }

        if self.host.trim().is_empty() {
            return Err(ConfigError::InvalidUrl(format!(
                "{}://{}:{}",
                self.protocol, self.host, self.port
            )));
        }

        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))?;

        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        if !(64..=4096).contains(&self.embedding_dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(
                self.embedding_dimension,
            ));
        }

        Ok(())
    }

    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }

    pub fn set_protocol(&mut self, protocol: String) -> Result<(), ConfigError> {
        if protocol != "http" && protocol != "https" {
            return Err(ConfigError::InvalidProtocol(protocol));
        }
        self.protocol = protocol;
        Ok(())
    }

    pub fn set_port(&mut self, port: u16) -> Result<(), ConfigError> {
        if port == 0 {
            return Err(ConfigError::InvalidPort(port));
        }
        self.port = port;
        Ok(())
    }

    pub fn set_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.model = model;
        Ok(())
    }

    pub fn set_batch_size(&mut self, batch_size: u32) -> Result<(), ConfigError> {
        if batch_size == 0 || batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(batch_size));
        }
        self.batch_size = batch_size;
        Ok(())
    }
}
