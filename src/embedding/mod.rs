//! Embedding generation for semantic search and retrieval.

mod hashing;
mod openai;
mod retry;

pub use hashing::HashingEmbedder;
pub use openai::OpenAIEmbedder;
pub use retry::{RetryPolicy, RetryingEmbedder};

use crate::config::{EmbeddingProviderKind, EmbeddingSettings};
use crate::error::{KihubError, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Trait for embedding generation.
///
/// Implementations must return one vector per input, in input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate embeddings for multiple texts.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Generate an embedding for a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| KihubError::EmbeddingProvider("Empty embedding response".to_string()))
    }

    /// Get the embedding dimensions.
    fn dimensions(&self) -> usize;

    /// Identity of the model, e.g. `openai:text-embedding-3-small`.
    fn model_id(&self) -> String;
}

/// Create the configured embedder, wrapped with retries.
pub fn create_embedder(settings: &EmbeddingSettings) -> Result<Arc<dyn Embedder>> {
    let inner: Arc<dyn Embedder> = match settings.provider {
        EmbeddingProviderKind::OpenAI => Arc::new(OpenAIEmbedder::from_settings(settings)?),
        EmbeddingProviderKind::Hashing => {
            Arc::new(HashingEmbedder::new(settings.dimensions as usize))
        }
    };

    Ok(Arc::new(RetryingEmbedder::new(
        inner,
        RetryPolicy::from_settings(settings),
    )))
}
