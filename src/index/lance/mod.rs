
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, anyhow};
use arrow::array::{
    Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt64Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use lancedb::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{IndexEntry, MemoryIndex, ScoredChunk, VectorIndex};
use crate::chunking::Chunk;
use crate::providers::EmbeddingProvider;
use crate::{RagError, Result};

pub const MANIFEST_FILE_NAME: &str = "manifest.json";
const DATABASE_DIR_NAME: &str = "lance";
const TABLE_NAME: &str = "chunks";
const FORMAT_VERSION: u32 = 1;

/// Summary written next to the LanceDB table, read before touching the table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub embedding_model: String,
    pub dimension: usize,
    pub entries: usize,
    pub created_at: DateTime<Utc>,
}

/// An index stored on disk as a manifest plus a LanceDB table.
///
/// Search runs against the entries held in memory; the table only serves to
/// restore them without calling the embedding provider again.
#[derive(Debug)]
pub struct PersistedIndex {
    directory: PathBuf,
    manifest: Manifest,
    index: MemoryIndex,
}

impl PersistedIndex {
    /// Whether `directory` holds a manifest and should be loaded rather than rebuilt
    #[inline]
    pub fn exists(directory: &Path) -> bool {
        directory.join(MANIFEST_FILE_NAME).is_file()
    }

    /// Embed `chunks` and persist the result to `directory`
    #[inline]
    pub fn build(
        chunks: Vec<Chunk>,
        embedder: Arc<dyn EmbeddingProvider>,
        batch_size: usize,
        directory: &Path,
    ) -> Result<Self> {
        let index = MemoryIndex::build(chunks, embedder, batch_size)?;
        Self::persist(index, directory)
    }

    /// Write `index` to `directory`, replacing whatever was there.
    ///
    /// Either the complete new index ends up at `directory` or the directory is
    /// left as it was before the call. A non-empty directory without a manifest
    /// is never replaced.
    #[inline]
    pub fn persist(index: MemoryIndex, directory: &Path) -> Result<Self> {
        let manifest = Manifest {
            format_version: FORMAT_VERSION,
            embedding_model: index.embedder().model().to_string(),
            dimension: index.dimension(),
            entries: index.len(),
            created_at: Utc::now(),
        };

        persist_entries(directory, &manifest, index.entries())?;
        info!(
            "Persisted {} entries to {}",
            manifest.entries,
            directory.display()
        );

        Ok(Self {
            directory: directory.to_path_buf(),
            manifest,
            index,
        })
    }

    /// Restore an index previously written by [`PersistedIndex::persist`]
    #[inline]
    pub fn load(directory: &Path, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let manifest = read_manifest(directory)?;

        if manifest.dimension != embedder.dimension() {
            return Err(RagError::corrupt_index(
                directory,
                format!(
                    "index dimension {} does not match embedding provider dimension {}",
                    manifest.dimension,
                    embedder.dimension()
                ),
            ));
        }
        if manifest.embedding_model != embedder.model() {
            warn!(
                "Index at {} was built with {}, querying with {}",
                directory.display(),
                manifest.embedding_model,
                embedder.model()
            );
        }

        let runtime = runtime()?;
        let entries = runtime
            .block_on(read_table(
                &directory.join(DATABASE_DIR_NAME),
                manifest.dimension,
                manifest.entries,
            ))
            .map_err(|e| RagError::corrupt_index(directory, format!("{:#}", e)))?;

        let index = MemoryIndex::from_entries(entries, embedder)
            .map_err(|e| RagError::corrupt_index(directory, e.to_string()))?;
        info!(
            "Loaded {} entries from {}",
            index.len(),
            directory.display()
        );

        Ok(Self {
            directory: directory.to_path_buf(),
            manifest,
            index,
        })
    }

    #[inline]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    #[inline]
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }
}

impl VectorIndex for PersistedIndex {
    #[inline]
    fn dimension(&self) -> usize {
        self.index.dimension()
    }

    #[inline]
    fn entries(&self) -> &[IndexEntry] {
        self.index.entries()
    }

    #[inline]
    fn search_scored(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        self.index.search_scored(query, k)
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()?)
}

fn read_manifest(directory: &Path) -> Result<Manifest> {
    let path = directory.join(MANIFEST_FILE_NAME);
    let content = fs::read_to_string(&path).map_err(|e| {
        RagError::corrupt_index(directory, format!("cannot read {}: {}", path.display(), e))
    })?;
    let manifest: Manifest = serde_json::from_str(&content).map_err(|e| {
        RagError::corrupt_index(directory, format!("invalid {}: {}", MANIFEST_FILE_NAME, e))
    })?;

    if manifest.format_version != FORMAT_VERSION {
        return Err(RagError::corrupt_index(
            directory,
            format!("unsupported format version {}", manifest.format_version),
        ));
    }
    Ok(manifest)
}

/// Write into a staging directory next to `directory`, then swap it into place
pub(crate) fn persist_entries(
    directory: &Path,
    manifest: &Manifest,
    entries: &[IndexEntry],
) -> Result<()> {
    let parent = directory
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let name = directory
        .file_name()
        .ok_or_else(|| anyhow!("Index directory has no name: {}", directory.display()))?
        .to_string_lossy()
        .into_owned();

    if directory.is_dir()
        && !directory.join(MANIFEST_FILE_NAME).is_file()
        && fs::read_dir(directory)?.next().is_some()
    {
        return Err(RagError::Io(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!(
                "Refusing to replace {}: it is not empty and holds no index manifest",
                directory.display()
            ),
        )));
    }

    fs::create_dir_all(parent)?;
    let staging = parent.join(format!(".{}.staging-{}", name, Uuid::new_v4()));
    debug!("Writing index to staging directory {}", staging.display());

    if let Err(e) = write_staging(&staging, manifest, entries) {
        remove_quietly(&staging);
        return Err(e);
    }

    let backup = if directory.exists() {
        let backup = parent.join(format!(".{}.previous-{}", name, Uuid::new_v4()));
        if let Err(e) = fs::rename(directory, &backup) {
            remove_quietly(&staging);
            return Err(e.into());
        }
        Some(backup)
    } else {
        None
    };

    if let Err(e) = fs::rename(&staging, directory) {
        if let Some(backup) = &backup {
            if let Err(restore) = fs::rename(backup, directory) {
                error!(
                    "Failed to restore previous index from {}: {}",
                    backup.display(),
                    restore
                );
            }
        }
        remove_quietly(&staging);
        return Err(e.into());
    }

    if let Some(backup) = backup {
        remove_quietly(&backup);
    }
    Ok(())
}

fn remove_quietly(path: &Path) {
    if !path.exists() {
        return;
    }
    if let Err(e) = fs::remove_dir_all(path) {
        warn!("Failed to remove {}: {}", path.display(), e);
    }
}

fn write_staging(staging: &Path, manifest: &Manifest, entries: &[IndexEntry]) -> Result<()> {
    fs::create_dir_all(staging)?;

    let runtime = runtime()?;
    runtime
        .block_on(write_table(
            &staging.join(DATABASE_DIR_NAME),
            manifest.dimension,
            entries,
        ))
        .context("Failed to write vector table")?;

    // The manifest goes last so its presence implies a complete table
    let manifest_json =
        serde_json::to_string_pretty(manifest).context("Failed to serialize manifest")?;
    fs::write(staging.join(MANIFEST_FILE_NAME), manifest_json)?;
    Ok(())
}

async fn connect(database: &Path) -> anyhow::Result<Connection> {
    let uri = database.to_string_lossy();
    lancedb::connect(&uri)
        .execute()
        .await
        .with_context(|| format!("Failed to connect to LanceDB at {}", database.display()))
}

fn create_schema(dimension: usize) -> anyhow::Result<Arc<Schema>> {
    let list_size = i32::try_from(dimension)
        .with_context(|| format!("Vector dimension {} is too large", dimension))?;

    Ok(Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("document_id", DataType::Utf8, false),
        Field::new("position", DataType::UInt64, false),
        Field::new("start", DataType::UInt64, false),
        Field::new("ordinal", DataType::UInt64, false),
        Field::new("text", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, false)),
                list_size,
            ),
            false,
        ),
    ])))
}

fn create_record_batch(entries: &[IndexEntry], dimension: usize) -> anyhow::Result<RecordBatch> {
    let schema = create_schema(dimension)?;
    let len = entries.len();

    let mut ids = Vec::with_capacity(len);
    let mut document_ids = Vec::with_capacity(len);
    let mut positions = Vec::with_capacity(len);
    let mut starts = Vec::with_capacity(len);
    let mut texts = Vec::with_capacity(len);
    let mut flat_values = Vec::with_capacity(len * dimension);

    for entry in entries {
        if entry.embedding.len() != dimension {
            return Err(anyhow!(
                "Entry {} has dimension {}, expected {}",
                entry.chunk.id,
                entry.embedding.len(),
                dimension
            ));
        }
        ids.push(entry.chunk.id.as_str());
        document_ids.push(entry.chunk.document_id.as_str());
        positions.push(entry.chunk.position as u64);
        starts.push(entry.chunk.start as u64);
        texts.push(entry.chunk.text.as_str());
        flat_values.extend_from_slice(&entry.embedding);
    }
    let ordinals: Vec<u64> = (0..len as u64).collect();

    let field = Arc::new(Field::new("item", DataType::Float32, false));
    let vector_array = FixedSizeListArray::try_new(
        field,
        i32::try_from(dimension)?,
        Arc::new(Float32Array::from(flat_values)),
        None,
    )
    .context("Failed to create vector array")?;

    let arrays: Vec<Arc<dyn Array>> = vec![
        Arc::new(StringArray::from(ids)),
        Arc::new(StringArray::from(document_ids)),
        Arc::new(UInt64Array::from(positions)),
        Arc::new(UInt64Array::from(starts)),
        Arc::new(UInt64Array::from(ordinals)),
        Arc::new(StringArray::from(texts)),
        Arc::new(vector_array),
    ];

    RecordBatch::try_new(schema, arrays).context("Failed to create record batch")
}

async fn write_table(database: &Path, dimension: usize, entries: &[IndexEntry]) -> anyhow::Result<()> {
    let connection = connect(database).await?;

    if entries.is_empty() {
        connection
            .create_empty_table(TABLE_NAME, create_schema(dimension)?)
            .execute()
            .await
            .context("Failed to create empty table")?;
        return Ok(());
    }

    let batch = create_record_batch(entries, dimension)?;
    let schema = batch.schema();
    let reader = RecordBatchIterator::new(std::iter::once(Ok(batch)), schema);
    connection
        .create_table(TABLE_NAME, reader)
        .execute()
        .await
        .context("Failed to create table")?;

    debug!("Wrote {} rows to {}", entries.len(), database.display());
    Ok(())
}

async fn read_table(
    database: &Path,
    dimension: usize,
    expected_rows: usize,
) -> anyhow::Result<Vec<IndexEntry>> {
    if !database.is_dir() {
        return Err(anyhow!("vector table directory is missing"));
    }
    let connection = connect(database).await?;
    let table = connection
        .open_table(TABLE_NAME)
        .execute()
        .await
        .with_context(|| format!("table {} is missing", TABLE_NAME))?;

    let schema = table.schema().await.context("Failed to read table schema")?;
    let stored_dimension = schema
        .fields()
        .iter()
        .find(|field| field.name() == "vector")
        .and_then(|field| match field.data_type() {
            DataType::FixedSizeList(_, size) => usize::try_from(*size).ok(),
            _ => None,
        })
        .ok_or_else(|| anyhow!("vector column is missing or has the wrong type"))?;
    if stored_dimension != dimension {
        return Err(anyhow!(
            "vector column has dimension {}, manifest says {}",
            stored_dimension,
            dimension
        ));
    }

    let rows = table.count_rows(None).await.context("Failed to count rows")?;
    if rows != expected_rows {
        return Err(anyhow!(
            "table has {} rows, manifest says {}",
            rows,
            expected_rows
        ));
    }
    if rows == 0 {
        return Ok(Vec::new());
    }

    let batches: Vec<RecordBatch> = table
        .query()
        .limit(rows)
        .execute()
        .await
        .context("Failed to query table")?
        .try_collect()
        .await
        .context("Failed to read table rows")?;

    let mut rows_with_ordinal = Vec::with_capacity(rows);
    for batch in &batches {
        rows_with_ordinal.extend(parse_batch(batch, dimension)?);
    }
    rows_with_ordinal.sort_by_key(|(ordinal, _)| *ordinal);

    Ok(rows_with_ordinal
        .into_iter()
        .map(|(_, entry)| entry)
        .collect())
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> anyhow::Result<&'a T> {
    batch
        .column_by_name(name)
        .ok_or_else(|| anyhow!("column {} is missing", name))?
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| anyhow!("column {} has the wrong type", name))
}

fn parse_batch(batch: &RecordBatch, dimension: usize) -> anyhow::Result<Vec<(u64, IndexEntry)>> {
    let ids = column::<StringArray>(batch, "id")?;
    let document_ids = column::<StringArray>(batch, "document_id")?;
    let positions = column::<UInt64Array>(batch, "position")?;
    let starts = column::<UInt64Array>(batch, "start")?;
    let ordinals = column::<UInt64Array>(batch, "ordinal")?;
    let texts = column::<StringArray>(batch, "text")?;
    let vectors = column::<FixedSizeListArray>(batch, "vector")?;

    let mut parsed = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let values = vectors.value(row);
        let embedding = values
            .as_any()
            .downcast_ref::<Float32Array>()
            .ok_or_else(|| anyhow!("vector column does not hold 32-bit floats"))?
            .values()
            .to_vec();
        if embedding.len() != dimension {
            return Err(anyhow!(
                "row {} has a vector of dimension {}",
                ids.value(row),
                embedding.len()
            ));
        }

        let chunk = Chunk {
            id: ids.value(row).to_string(),
            document_id: document_ids.value(row).to_string(),
            position: usize::try_from(positions.value(row))?,
            start: usize::try_from(starts.value(row))?,
            text: texts.value(row).to_string(),
        };
        parsed.push((ordinals.value(row), IndexEntry { chunk, embedding }));
    }
    Ok(parsed)
}
