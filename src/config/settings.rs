//! Configuration settings for kihub.

use crate::chunking::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use crate::error::{KihubError, Result};
use crate::vector_store::{IndexSpec, Metric};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub embedding: EmbeddingSettings,
    pub chunking: ChunkingSettings,
    pub index: IndexSettings,
    pub retrieval: RetrievalSettings,
    pub web_search: WebSearchSettings,
    pub context: ContextSettings,
    pub generation: GenerationSettings,
    pub prompts: PromptSettings,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Directory for storing application data.
    pub data_dir: String,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            data_dir: "~/.kihub".to_string(),
            log_level: "warn".to_string(),
        }
    }
}

/// Embedding provider type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    /// Any OpenAI-compatible embeddings endpoint.
    #[default]
    OpenAI,
    /// Local feature-hashing embedder, no network.
    Hashing,
}

impl std::str::FromStr for EmbeddingProviderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(EmbeddingProviderKind::OpenAI),
            "hashing" | "local" => Ok(EmbeddingProviderKind::Hashing),
            _ => Err(format!("Unknown embedding provider: {}", s)),
        }
    }
}

impl std::fmt::Display for EmbeddingProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbeddingProviderKind::OpenAI => write!(f, "openai"),
            EmbeddingProviderKind::Hashing => write!(f, "hashing"),
        }
    }
}

/// Embedding generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// Embedding provider (openai, hashing).
    pub provider: EmbeddingProviderKind,
    /// Embedding model to use.
    pub model: String,
    /// Embedding dimensions.
    pub dimensions: u32,
    /// Base URL of the OpenAI-compatible API (None = api.openai.com).
    pub api_base: Option<String>,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Maximum number of texts per provider request.
    pub batch_size: usize,
    /// Maximum attempts per batch before the error is surfaced.
    pub max_attempts: u32,
    /// Backoff before the first retry, in milliseconds. Doubles per attempt.
    pub initial_backoff_ms: u64,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::OpenAI,
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
            api_base: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            batch_size: 100,
            max_attempts: 3,
            initial_backoff_ms: 250,
        }
    }
}

impl EmbeddingSettings {
    /// Identity of the embedding model, pinned into every index built with it.
    ///
    /// Matches `Embedder::model_id` of the embedder these settings create.
    pub fn model_id(&self) -> String {
        match self.provider {
            EmbeddingProviderKind::OpenAI => format!("openai:{}", self.model),
            EmbeddingProviderKind::Hashing => format!("hashing:xxh64-{}", self.dimensions),
        }
    }
}

/// Document chunking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    /// Window size in characters.
    pub chunk_size: usize,
    /// Characters shared by consecutive chunks.
    pub overlap: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// Vector index settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    /// Path to the persisted index (SQLite file).
    pub path: String,
    /// Similarity metric used when a new index is created.
    pub metric: Metric,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            path: "~/.kihub/index.db".to_string(),
            metric: Metric::Cosine,
        }
    }
}

/// Query-time retrieval defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    /// Number of document chunks to retrieve.
    pub top_k: usize,
    /// Maximum number of web results to merge.
    pub max_web_results: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: 3,
            max_web_results: 3,
        }
    }
}

/// Web search settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSearchSettings {
    /// Whether a web search provider is configured at all.
    pub enabled: bool,
    /// Provider name (tavily).
    pub provider: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Search topic (general, news, finance).
    pub topic: String,
}

impl Default for WebSearchSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: "tavily".to_string(),
            api_key_env: "TAVILY_API_KEY".to_string(),
            timeout_secs: 8,
            topic: "general".to_string(),
        }
    }
}

/// Context assembly settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSettings {
    /// Character budget of the assembled context.
    pub max_context_length: usize,
    /// Weight applied to normalized document scores.
    pub document_weight: f32,
    /// Weight applied to normalized web scores.
    pub web_weight: f32,
    /// Smallest body worth keeping when the last item has to be truncated.
    pub min_truncated_chars: usize,
    /// Fraction of the shorter range two chunks must share to count as duplicates.
    pub dedup_min_overlap: f32,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            max_context_length: 6000,
            document_weight: 1.0,
            web_weight: 1.0,
            min_truncated_chars: 80,
            dedup_min_overlap: 0.0,
        }
    }
}

/// Answer generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    /// LLM model for response generation.
    pub model: String,
    /// Base URL of the OpenAI-compatible chat API.
    pub api_base: Option<String>,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Conversation messages kept in the prompt.
    pub max_history_messages: usize,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            model: "llama-3.1-8b-instant".to_string(),
            api_base: Some("https://api.groq.com/openai/v1".to_string()),
            api_key_env: "GROQ_API_KEY".to_string(),
            temperature: 0.5,
            max_history_messages: 20,
            timeout_secs: 300,
        }
    }
}

/// Prompt customization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct PromptSettings {
    /// Directory for custom prompts (overrides defaults).
    pub custom_dir: Option<String>,
    /// Custom variables available in all prompts as {{variable_name}}.
    pub variables: std::collections::HashMap<String, String>,
}

impl Settings {
    /// Load settings from the default configuration file.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load settings from a specific path, or default location if None.
    pub fn load_from(path: Option<&PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let settings: Settings = toml::from_str(&content)?;
            Ok(settings)
        } else {
            Ok(Settings::default())
        }
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| KihubError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("kihub")
            .join("config.toml")
    }

    /// Expand shell variables in paths (e.g., ~).
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).to_string())
    }

    /// Get the expanded data directory path.
    pub fn data_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.data_dir)
    }

    /// Get the expanded index path.
    pub fn index_path(&self) -> PathBuf {
        Self::expand_path(&self.index.path)
    }

    /// Spec of the index these settings read and write.
    pub fn index_spec(&self) -> IndexSpec {
        IndexSpec {
            dimension: self.embedding.dimensions as usize,
            metric: self.index.metric,
            embedding_model: self.embedding.model_id(),
        }
    }

    /// Read an API key from the named environment variable.
    pub fn api_key(env_var: &str) -> Result<String> {
        match std::env::var(env_var) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            Ok(_) => Err(KihubError::Config(format!("{} is empty", env_var))),
            Err(_) => Err(KihubError::Config(format!("{} not set", env_var))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_constants() {
        let settings = Settings::default();
        assert_eq!(settings.chunking.chunk_size, 1000);
        assert_eq!(settings.chunking.overlap, 200);
        assert_eq!(settings.retrieval.top_k, 3);
        assert_eq!(settings.embedding.model_id(), "openai:text-embedding-3-small");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            [embedding]
            provider = "hashing"
            dimensions = 256

            [index]
            metric = "l2"
            "#,
        )
        .unwrap();

        assert_eq!(settings.embedding.provider, EmbeddingProviderKind::Hashing);
        assert_eq!(settings.embedding.dimensions, 256);
        assert_eq!(settings.embedding.max_attempts, 3);
        assert_eq!(settings.index.metric, Metric::L2);
        assert_eq!(settings.index_spec().embedding_model, "hashing:xxh64-256");
        assert_eq!(settings.generation.model, "llama-3.1-8b-instant");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut settings = Settings::default();
        settings.context.max_context_length = 1234;
        settings.save_to(&path).unwrap();

        let loaded = Settings::load_from(Some(&path)).unwrap();
        assert_eq!(loaded.context.max_context_length, 1234);
    }
}
