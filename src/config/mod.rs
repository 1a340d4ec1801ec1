// Configuration management module
// TOML-backed settings for retrieval, caching and the Ollama embedding backend

pub mod settings;


pub use settings::{
    CacheOptions, Config, ConfigError, OllamaConfig, RagConfig, RagConfigUpdate,
    RelevanceScoringConfig, ScoringWeights,
};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::config_dir()
}
