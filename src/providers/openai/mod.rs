
use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::{EmbeddingProvider, HttpClient, LanguageModel};
use crate::config::{ConfigError, OpenAiConfig};
use crate::{RagError, Result};

const DEFAULT_EMBEDDING_DIMENSION: usize = 3072;
const DEFAULT_TEMPERATURE: f32 = 0.3;

/// Client for OpenAI-compatible embedding and chat completion endpoints
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    base_url: Url,
    api_key: String,
    model: String,
    dimension: usize,
    temperature: f32,
    http: HttpClient,
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

impl OpenAiClient {
    /// Create a client, reading the API key from the configured environment variable
    #[inline]
    pub fn from_config(
        config: &OpenAiConfig,
        model: &str,
        http: HttpClient,
    ) -> std::result::Result<Self, ConfigError> {
        let api_key = config.api_key()?;
        Self::new(config.api_url()?, api_key, model, http)
    }

    #[inline]
    pub fn new(
        base_url: Url,
        api_key: String,
        model: &str,
        http: HttpClient,
    ) -> std::result::Result<Self, ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model.to_string()));
        }

        Ok(Self {
            base_url,
            api_key,
            model: model.to_string(),
            dimension: DEFAULT_EMBEDDING_DIMENSION,
            temperature: DEFAULT_TEMPERATURE,
            http,
        })
    }

    #[inline]
    #[must_use]
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Only the third generation embedding models accept a `dimensions` parameter
    fn requested_dimensions(&self) -> Option<usize> {
        self.model
            .starts_with("text-embedding-3")
            .then_some(self.dimension)
    }

    fn request_embeddings(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let url = self
            .base_url
            .join("embeddings")
            .context("Failed to build embeddings URL")?;

        debug!("Requesting {} embeddings from {}", texts.len(), url);

        let response: EmbeddingsResponse = self.http.post_json(
            &url,
            &EmbeddingsRequest {
                model: &self.model,
                input: texts,
                dimensions: self.requested_dimensions(),
            },
            Some(&self.api_key),
        )?;

        let mut data = response.data;
        if data.len() != texts.len() {
            return Err(anyhow::anyhow!(
                "Mismatch between request and response counts: {} vs {}",
                texts.len(),
                data.len()
            ));
        }
        data.sort_by_key(|d| d.index);

        Ok(data.into_iter().map(|d| d.embedding).collect())
    }

    fn request_completion(&self, prompt: &str) -> anyhow::Result<Option<String>> {
        let url = self
            .base_url
            .join("chat/completions")
            .context("Failed to build chat completions URL")?;

        debug!(
            "Requesting chat completion from {} (prompt length: {})",
            url,
            prompt.len()
        );

        let response: ChatResponse = self.http.post_json(
            &url,
            &ChatRequest {
                model: &self.model,
                temperature: self.temperature,
                messages: [ChatMessage {
                    role: "user",
                    content: prompt,
                }],
            },
            Some(&self.api_key),
        )?;

        Ok(response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content))
    }
}

impl EmbeddingProvider for OpenAiClient {
    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request_embeddings(texts)
            .map_err(|e| RagError::Embedding(format!("OpenAI ({}): {:#}", self.model, e)))
    }
}

impl LanguageModel for OpenAiClient {
    fn model(&self) -> &str {
        &self.model
    }

    fn generate(&self, prompt: &str) -> Result<String> {
        let content = self
            .request_completion(prompt)
            .map_err(|e| RagError::Generation(format!("OpenAI ({}): {:#}", self.model, e)))?;

        match content {
            Some(text) if !text.trim().is_empty() => Ok(text),
            _ => Err(RagError::Generation(format!(
                "OpenAI ({}) returned no content",
                self.model
            ))),
        }
    }
}
