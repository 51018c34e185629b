//! Deterministic capabilities for unit tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{EmbeddingProvider, LanguageModel};
use crate::{RagError, Result};

/// Bag-of-words embedder: each lowercase alphanumeric token adds one to a
/// hashed bucket, so texts sharing words point in similar directions.
#[derive(Debug)]
pub(crate) struct HashEmbedder {
    dimension: usize,
    pub(crate) calls: AtomicUsize,
}

impl HashEmbedder {
    pub(crate) fn new(dimension: usize) -> Self {
        Self {
            dimension,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn vector(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let hash = token
                .to_lowercase()
                .bytes()
                .fold(2_166_136_261_u32, |h, b| (h ^ u32::from(b)).wrapping_mul(16_777_619));
            vector[hash as usize % self.dimension] += 1.0;
        }
        vector
    }
}

impl EmbeddingProvider for HashEmbedder {
    fn model(&self) -> &str {
        "hash-embedder"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}

/// Returns vectors of a fixed, possibly wrong, length
#[derive(Debug)]
pub(crate) struct FixedEmbedder {
    pub(crate) declared: usize,
    pub(crate) actual: usize,
}

impl EmbeddingProvider for FixedEmbedder {
    fn model(&self) -> &str {
        "fixed-embedder"
    }

    fn dimension(&self) -> usize {
        self.declared
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![1.0; self.actual]).collect())
    }
}

/// Always fails
#[derive(Debug)]
pub(crate) struct FailingEmbedder;

impl EmbeddingProvider for FailingEmbedder {
    fn model(&self) -> &str {
        "failing-embedder"
    }

    fn dimension(&self) -> usize {
        4
    }

    fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(RagError::Embedding("provider unavailable".to_string()))
    }
}

/// Replies with a canned response and records every prompt it sees
#[derive(Debug)]
pub(crate) struct ScriptedModel {
    response: Option<String>,
    pub(crate) prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub(crate) fn replying(response: &str) -> Self {
        Self {
            response: Some(response.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            response: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl LanguageModel for ScriptedModel {
    fn model(&self) -> &str {
        "scripted-model"
    }

    fn generate(&self, prompt: &str) -> Result<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        self.response
            .clone()
            .ok_or_else(|| RagError::Generation("model unavailable".to_string()))
    }
}
