// Vector indexes over embedded chunks
// The in-memory index is the search engine; the persisted index stores the
// same entries in LanceDB and reloads them without re-embedding


pub mod lance;
pub mod memory;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};

use crate::chunking::Chunk;
use crate::providers::EmbeddingProvider;
use crate::{RagError, Result};

pub use lance::PersistedIndex;
pub use memory::MemoryIndex;

/// A chunk together with its embedding
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// A retrieved chunk with its cosine similarity to the query
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Similarity search over embedded chunks
pub trait VectorIndex: Send + Sync {
    /// Dimension shared by every stored embedding
    fn dimension(&self) -> usize;

    /// Entries in insertion order
    fn entries(&self) -> &[IndexEntry];

    #[inline]
    fn len(&self) -> usize {
        self.entries().len()
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Up to `k` entries ranked by non-increasing similarity to `query`.
    /// Ties keep insertion order.
    fn search_scored(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>>;

    #[inline]
    fn search(&self, query: &str, k: usize) -> Result<Vec<Chunk>> {
        Ok(self
            .search_scored(query, k)?
            .into_iter()
            .map(|scored| scored.chunk)
            .collect())
    }
}

/// Cosine similarity, treating a zero-norm vector as dissimilar to everything
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let (dot, norm_a, norm_b) = a
        .iter()
        .zip(b)
        .fold((0.0_f32, 0.0_f32, 0.0_f32), |(dot, na, nb), (x, y)| {
            (x.mul_add(*y, dot), x.mul_add(*x, na), y.mul_add(*y, nb))
        });

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Embed every chunk in batches of `batch_size`, checking count and dimension
/// of each batch the provider returns.
#[inline]
pub fn embed_chunks(
    chunks: Vec<Chunk>,
    embedder: &dyn EmbeddingProvider,
    batch_size: usize,
) -> Result<Vec<IndexEntry>> {
    let batch_size = batch_size.max(1);
    let dimension = embedder.dimension();
    info!(
        "Embedding {} chunks with {} in batches of {}",
        chunks.len(),
        embedder.model(),
        batch_size
    );

    let bar = if console::user_attended_stderr() {
        ProgressBar::new(chunks.len() as u64).with_style(
            ProgressStyle::with_template("{bar:40} [{pos}/{len}] Embedding chunks")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        )
    } else {
        ProgressBar::hidden()
    };

    let mut entries = Vec::with_capacity(chunks.len());
    let mut remaining = chunks.into_iter().peekable();
    while remaining.peek().is_some() {
        let batch: Vec<Chunk> = remaining.by_ref().take(batch_size).collect();
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let embeddings = embedder.embed_batch(&texts)?;

        if embeddings.len() != batch.len() {
            return Err(RagError::Embedding(format!(
                "Provider returned {} embeddings for {} texts",
                embeddings.len(),
                batch.len()
            )));
        }

        for (chunk, embedding) in batch.into_iter().zip(embeddings) {
            if embedding.len() != dimension {
                return Err(RagError::Embedding(format!(
                    "Embedding for chunk {} has dimension {}, expected {}",
                    chunk.id,
                    embedding.len(),
                    dimension
                )));
            }
            entries.push(IndexEntry { chunk, embedding });
        }
        bar.set_position(entries.len() as u64);
        debug!("Embedded {} chunks so far", entries.len());
    }

    bar.finish_and_clear();
    Ok(entries)
}

/// Embed `query` and rank `entries` against it
pub(crate) fn rank_entries(
    entries: &[IndexEntry],
    dimension: usize,
    embedder: &dyn EmbeddingProvider,
    query: &str,
    k: usize,
) -> Result<Vec<ScoredChunk>> {
    if entries.is_empty() {
        return Err(RagError::EmptyIndex);
    }

    if k == 0 {
        return Ok(Vec::new());
    }

    let query_vector = embedder.embed(query)?;
    if query_vector.len() != dimension {
        return Err(RagError::Embedding(format!(
            "Query embedding has dimension {}, index expects {}",
            query_vector.len(),
            dimension
        )));
    }

    let mut ranked: Vec<(usize, f32)> = entries
        .iter()
        .enumerate()
        .map(|(i, entry)| (i, cosine_similarity(&query_vector, &entry.embedding)))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked.truncate(k);

    let scored: Vec<ScoredChunk> = ranked
        .into_iter()
        .map(|(i, score)| ScoredChunk {
            chunk: entries[i].chunk.clone(),
            score,
        })
        .collect();

    debug!(
        "Retrieved {} of {} entries for query (top score {:?})",
        scored.len(),
        entries.len(),
        scored.first().map(|s| s.score)
    );
    Ok(scored)
}
