use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Ingestion error: {0}")]
    Ingestion(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Cannot search an empty index")]
    EmptyIndex,

    #[error("Corrupt index at {}: {reason}", path.display())]
    CorruptIndex { path: PathBuf, reason: String },

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl RagError {
    #[inline]
    pub(crate) fn corrupt_index(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CorruptIndex {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub mod chunking;
pub mod commands;
pub mod config;
pub mod index;
pub mod ingestion;
pub mod pipeline;
pub mod providers;
pub mod workflow;
