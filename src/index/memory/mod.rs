
use std::fmt;
use std::sync::Arc;

use tracing::info;

use super::{IndexEntry, ScoredChunk, VectorIndex, embed_chunks, rank_entries};
use crate::chunking::Chunk;
use crate::providers::EmbeddingProvider;
use crate::{RagError, Result};

/// Exhaustive cosine-similarity index held entirely in memory
pub struct MemoryIndex {
    entries: Vec<IndexEntry>,
    dimension: usize,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl fmt::Debug for MemoryIndex {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryIndex")
            .field("entries", &self.entries.len())
            .field("dimension", &self.dimension)
            .field("embedder", &self.embedder.model())
            .finish()
    }
}

impl MemoryIndex {
    /// Embed `chunks` and index them in the given order
    #[inline]
    pub fn build(
        chunks: Vec<Chunk>,
        embedder: Arc<dyn EmbeddingProvider>,
        batch_size: usize,
    ) -> Result<Self> {
        let entries = embed_chunks(chunks, embedder.as_ref(), batch_size)?;
        info!("Built in-memory index with {} entries", entries.len());
        Self::from_entries(entries, embedder)
    }

    /// Wrap already embedded entries, checking they match the provider's dimension
    #[inline]
    pub fn from_entries(
        entries: Vec<IndexEntry>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let dimension = embedder.dimension();
        if let Some(entry) = entries.iter().find(|e| e.embedding.len() != dimension) {
            return Err(RagError::Embedding(format!(
                "Entry {} has dimension {}, expected {}",
                entry.chunk.id,
                entry.embedding.len(),
                dimension
            )));
        }

        Ok(Self {
            entries,
            dimension,
            embedder,
        })
    }

    #[inline]
    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }
}

impl VectorIndex for MemoryIndex {
    #[inline]
    fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    #[inline]
    fn search_scored(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        rank_entries(
            &self.entries,
            self.dimension,
            self.embedder.as_ref(),
            query,
            k,
        )
    }
}
