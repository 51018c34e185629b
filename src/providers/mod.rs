// External model capabilities
// Embedding and text generation behind narrow traits, with HTTP clients for
// Ollama and OpenAI-compatible servers

#[cfg(test)]
pub(crate) mod fake;
pub mod http;
pub mod ollama;
pub mod openai;

use std::sync::Arc;

use tracing::info;

use crate::config::{Config, ProviderKind};
use crate::{RagError, Result};

pub use http::HttpClient;
pub use ollama::OllamaClient;
pub use openai::OpenAiClient;

/// Produces fixed-dimension embeddings for text
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier, recorded alongside persisted indexes
    fn model(&self) -> &str;

    /// Dimension of every vector this provider returns
    fn dimension(&self) -> usize;

    /// Embed several texts, returning one vector per input in input order
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut embeddings = self.embed_batch(&[text.to_string()])?;
        match (embeddings.pop(), embeddings.is_empty()) {
            (Some(embedding), true) => Ok(embedding),
            _ => Err(RagError::Embedding(
                "Provider did not return exactly one embedding".to_string(),
            )),
        }
    }
}

/// Produces a textual completion for a prompt
pub trait LanguageModel: Send + Sync {
    fn model(&self) -> &str;

    fn generate(&self, prompt: &str) -> Result<String>;
}

/// Construct the configured embedding provider
#[inline]
pub fn embedding_provider(config: &Config) -> Result<Arc<dyn EmbeddingProvider>> {
    let http = HttpClient::from_config(&config.http);
    let dimension = config.embedding.dimension as usize;
    let provider: Arc<dyn EmbeddingProvider> = match config.embedding.provider {
        ProviderKind::Ollama => Arc::new(
            OllamaClient::new(&config.ollama, &config.embedding.model, http)?
                .with_dimension(dimension),
        ),
        ProviderKind::OpenAi => Arc::new(
            OpenAiClient::from_config(&config.openai, &config.embedding.model, http)?
                .with_dimension(dimension),
        ),
    };
    info!(
        "Using {:?} embeddings with model {} ({} dimensions)",
        config.embedding.provider, config.embedding.model, dimension
    );
    Ok(provider)
}

/// Construct the configured language model
#[inline]
pub fn language_model(config: &Config) -> Result<Arc<dyn LanguageModel>> {
    let http = HttpClient::from_config(&config.http);
    let temperature = config.generation.temperature;
    let model: Arc<dyn LanguageModel> = match config.generation.provider {
        ProviderKind::Ollama => Arc::new(
            OllamaClient::new(&config.ollama, &config.generation.model, http)?
                .with_temperature(temperature),
        ),
        ProviderKind::OpenAi => Arc::new(
            OpenAiClient::from_config(&config.openai, &config.generation.model, http)?
                .with_temperature(temperature),
        ),
    };
    info!(
        "Using {:?} generation with model {} (temperature {})",
        config.generation.provider, config.generation.model, temperature
    );
    Ok(model)
}
