// End-to-end question answering service
// Loads documents, chunks them, builds or loads the index and drives the
// workflow for each question

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::Result;
use crate::chunking::{Chunk, ChunkingConfig, split_documents};
use crate::config::{Config, IndexBackend};
use crate::index::{MemoryIndex, PersistedIndex, VectorIndex};
use crate::ingestion::{Document, KnowledgeSource};
use crate::providers::{EmbeddingProvider, LanguageModel};
use crate::workflow::{Workflow, WorkflowState};

/// How the index is obtained at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexMode {
    /// Embed everything into memory on every start
    Ephemeral,
    /// Load from `directory` when present, otherwise build and persist there
    Persisted { directory: PathBuf, rebuild: bool },
}

/// Everything the pipeline needs besides its model capabilities
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    pub source: KnowledgeSource,
    pub chunking: ChunkingConfig,
    pub index: IndexMode,
    pub batch_size: usize,
    pub k: usize,
    pub prompt_template: String,
}

impl PipelineOptions {
    #[inline]
    pub fn from_config(config: &Config, rebuild: bool) -> Self {
        let index = match config.index.backend {
            IndexBackend::Memory => IndexMode::Ephemeral,
            IndexBackend::Persisted => IndexMode::Persisted {
                directory: config.index_dir(),
                rebuild,
            },
        };

        Self {
            source: KnowledgeSource::from_config(config),
            chunking: config.chunking,
            index,
            batch_size: config.embedding.batch_size as usize,
            k: config.retrieval.k,
            prompt_template: config.retrieval.prompt_template.clone(),
        }
    }
}

/// Maps chunk ids back to the document they were cut from
#[derive(Debug, Clone, Default)]
pub struct SourceTable {
    documents: Vec<Document>,
    by_chunk: HashMap<String, usize>,
}

impl SourceTable {
    #[inline]
    pub fn new(documents: Vec<Document>, chunks: &[Chunk]) -> Self {
        let by_document: HashMap<&str, usize> = documents
            .iter()
            .enumerate()
            .map(|(i, document)| (document.id.as_str(), i))
            .collect();
        let by_chunk = chunks
            .iter()
            .filter_map(|chunk| {
                by_document
                    .get(chunk.document_id.as_str())
                    .map(|&i| (chunk.id.clone(), i))
            })
            .collect();

        Self {
            documents,
            by_chunk,
        }
    }

    #[inline]
    pub fn get(&self, chunk_id: &str) -> Option<&Document> {
        self.by_chunk
            .get(chunk_id)
            .and_then(|&i| self.documents.get(i))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.by_chunk.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.by_chunk.is_empty()
    }
}

/// A ready-to-query pipeline
#[derive(Debug)]
pub struct RagPipeline {
    workflow: Workflow,
    sources: SourceTable,
}

impl RagPipeline {
    /// Ingest, chunk and index, then bind the workflow.
    ///
    /// Ingestion happens before any embedding call, so a bad knowledge source
    /// fails without touching the provider.
    #[inline]
    pub fn start(
        options: PipelineOptions,
        embedder: Arc<dyn EmbeddingProvider>,
        model: Arc<dyn LanguageModel>,
    ) -> Result<Self> {
        info!(
            "Loading documents from {}",
            options.source.path().display()
        );
        let documents = options.source.load()?;
        let chunks = split_documents(&documents, &options.chunking)?;
        info!(
            "Split {} documents into {} chunks",
            documents.len(),
            chunks.len()
        );
        let sources = SourceTable::new(documents, &chunks);

        let index: Arc<dyn VectorIndex> = match &options.index {
            IndexMode::Ephemeral => {
                Arc::new(MemoryIndex::build(chunks, embedder, options.batch_size)?)
            }
            IndexMode::Persisted { directory, rebuild } => {
                if !rebuild && PersistedIndex::exists(directory) {
                    info!("Loading persisted index from {}", directory.display());
                    let index = PersistedIndex::load(directory, embedder)?;
                    let unknown = index
                        .entries()
                        .iter()
                        .filter(|entry| sources.get(&entry.chunk.id).is_none())
                        .count();
                    if unknown > 0 {
                        warn!(
                            "{} indexed chunks no longer match the knowledge source; pass --rebuild to re-embed",
                            unknown
                        );
                    }
                    Arc::new(index)
                } else {
                    info!("Building index at {}", directory.display());
                    Arc::new(PersistedIndex::build(
                        chunks,
                        embedder,
                        options.batch_size,
                        directory,
                    )?)
                }
            }
        };

        let workflow = Workflow::new(index, model, options.prompt_template, options.k);
        Ok(Self { workflow, sources })
    }

    /// Answer one question
    #[inline]
    pub fn ask(&self, question: &str) -> Result<String> {
        self.workflow.answer(question)
    }

    /// Answer one question, keeping the retrieved context
    #[inline]
    pub fn run(&self, question: &str) -> Result<WorkflowState> {
        self.workflow.invoke(WorkflowState::new(question))
    }

    /// Indexed chunks in index order with the document each came from
    #[inline]
    pub fn indexed_chunks(&self) -> impl Iterator<Item = (&Chunk, Option<&Document>)> {
        self.workflow
            .index()
            .entries()
            .iter()
            .map(|entry| (&entry.chunk, self.sources.get(&entry.chunk.id)))
    }

    #[inline]
    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    #[inline]
    pub fn sources(&self) -> &SourceTable {
        &self.sources
    }
}
