
use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::{EmbeddingProvider, HttpClient, LanguageModel};
use crate::config::{ConfigError, OllamaConfig};
use crate::{RagError, Result};

pub const DEFAULT_EMBEDDING_DIMENSION: usize = 768;
const DEFAULT_TEMPERATURE: f32 = 0.3;

/// Client for a local Ollama server, usable for both embeddings and generation
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    model: String,
    dimension: usize,
    temperature: f32,
    http: HttpClient,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

impl OllamaClient {
    #[inline]
    pub fn new(
        config: &OllamaConfig,
        model: &str,
        http: HttpClient,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model.to_string()));
        }

        Ok(Self {
            base_url: config.ollama_url()?,
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

    #[inline]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn request_embeddings(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let url = self
            .base_url
            .join("/api/embed")
            .context("Failed to build embedding URL")?;

        debug!("Requesting {} embeddings from {}", texts.len(), url);

        let response: EmbedResponse = self.http.post_json(
            &url,
            &EmbedRequest {
                model: &self.model,
                input: texts,
            },
            None,
        )?;

        if response.embeddings.len() != texts.len() {
            return Err(anyhow::anyhow!(
                "Mismatch between request and response counts: {} vs {}",
                texts.len(),
                response.embeddings.len()
            ));
        }

        Ok(response.embeddings)
    }

    fn request_completion(&self, prompt: &str) -> anyhow::Result<String> {
        let url = self
            .base_url
            .join("/api/generate")
            .context("Failed to build generation URL")?;

        debug!(
            "Requesting completion from {} (prompt length: {})",
            url,
            prompt.len()
        );

        let response: GenerateResponse = self.http.post_json(
            &url,
            &GenerateRequest {
                model: &self.model,
                prompt,
                stream: false,
                options: GenerateOptions {
                    temperature: self.temperature,
                },
            },
            None,
        )?;

        Ok(response.response)
    }
}

impl EmbeddingProvider for OllamaClient {
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
            .map_err(|e| RagError::Embedding(format!("Ollama ({}): {:#}", self.model, e)))
    }
}

impl LanguageModel for OllamaClient {
    fn model(&self) -> &str {
        &self.model
    }

    fn generate(&self, prompt: &str) -> Result<String> {
        let response = self
            .request_completion(prompt)
            .map_err(|e| RagError::Generation(format!("Ollama ({}): {:#}", self.model, e)))?;

        if response.trim().is_empty() {
            return Err(RagError::Generation(format!(
                "Ollama ({}) returned an empty response",
                self.model
            )));
        }
        Ok(response)
    }
}
