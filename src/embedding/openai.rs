//! OpenAI-compatible embeddings implementation.

use super::Embedder;
use crate::config::{EmbeddingSettings, Settings};
use crate::error::{KihubError, Result};
use crate::openai::{create_client, DEFAULT_TIMEOUT_SECS};
use async_openai::config::OpenAIConfig;
use async_openai::types::{CreateEmbeddingRequestArgs, EmbeddingInput};
use async_openai::Client;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, instrument};

/// Default number of inputs per embeddings request.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Embedder backed by an OpenAI-compatible embeddings endpoint.
pub struct OpenAIEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
    dimensions: usize,
    batch_size: usize,
}

impl OpenAIEmbedder {
    /// Create an embedder from an existing client.
    pub fn with_client(client: Client<OpenAIConfig>, model: &str, dimensions: usize) -> Self {
        Self {
            client,
            model: model.to_string(),
            dimensions,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Create an embedder from settings; reads the API key from the environment.
    pub fn from_settings(settings: &EmbeddingSettings) -> Result<Self> {
        let api_key = Settings::api_key(&settings.api_key_env)?;
        let client = create_client(
            settings.api_base.as_deref(),
            &api_key,
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        )?;

        Ok(Self::with_client(client, &settings.model, settings.dimensions as usize)
            .with_batch_size(settings.batch_size))
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    #[instrument(skip(self, texts), fields(count = texts.len(), model = %self.model))]
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Generating embeddings for {} texts", texts.len());

        let mut all_embeddings = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            let request = CreateEmbeddingRequestArgs::default()
                .model(&self.model)
                .input(EmbeddingInput::StringArray(batch.to_vec()))
                .dimensions(self.dimensions as u32)
                .build()
                .map_err(|e| {
                    KihubError::InvalidConfiguration(format!("Failed to build request: {}", e))
                })?;

            let response = self.client.embeddings().create(request).await.map_err(|e| {
                KihubError::EmbeddingProvider(format!("Embedding API error: {}", e))
            })?;

            let mut embeddings = response.data;
            embeddings.sort_by_key(|e| e.index);
            all_embeddings.extend(embeddings.into_iter().map(|e| e.embedding));
        }

        debug!("Generated {} embeddings", all_embeddings.len());
        Ok(all_embeddings)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> String {
        format!("openai:{}", self.model)
    }
}
