// Knowledge source loading
// Turns a JSON knowledge base or a directory of PDFs into documents


use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::{Config, SourceKind};
use crate::{RagError, Result};

/// Provenance attached to a document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Where the document came from (file path or knowledge base label)
    pub source: Option<String>,
    /// 1-based page number for paginated sources
    pub page: Option<u32>,
}

/// A unit of source text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
    pub metadata: DocumentMetadata,
}

impl Document {
    #[inline]
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata: DocumentMetadata::default(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_metadata(mut self, metadata: DocumentMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Where the pipeline reads its documents from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KnowledgeSource {
    Json(PathBuf),
    PdfDirectory(PathBuf),
}

impl KnowledgeSource {
    #[inline]
    pub fn from_config(config: &Config) -> Self {
        match config.knowledge.source {
            SourceKind::Json => Self::Json(config.json_path()),
            SourceKind::Pdf => Self::PdfDirectory(config.pdf_dir()),
        }
    }

    #[inline]
    pub fn load(&self) -> Result<Vec<Document>> {
        match self {
            Self::Json(path) => load_json_documents(path),
            Self::PdfDirectory(dir) => load_pdf_documents(dir),
        }
    }

    #[inline]
    pub fn path(&self) -> &Path {
        match self {
            Self::Json(path) | Self::PdfDirectory(path) => path,
        }
    }
}

/// Load a knowledge base file holding a JSON array of `{"text": ...}` objects.
#[inline]
pub fn load_json_documents(path: &Path) -> Result<Vec<Document>> {
    if !path.is_file() {
        return Err(RagError::Ingestion(format!(
            "Knowledge base file not found: {}. Provide a JSON file with a list of objects containing a 'text' field.",
            path.display()
        )));
    }

    let content = fs::read_to_string(path).map_err(|e| {
        RagError::Ingestion(format!(
            "Failed to read knowledge base {}: {}",
            path.display(),
            e
        ))
    })?;

    let documents = parse_json_documents(&content)
        .map_err(|reason| RagError::Ingestion(format!("{}: {}", path.display(), reason)))?;

    info!(
        "Loaded {} documents from knowledge base {}",
        documents.len(),
        path.display()
    );
    Ok(documents)
}

/// Parse knowledge base JSON text into documents.
///
/// Entries are objects with a `text` field and optional `source` and `page`
/// fields. A non-string `text` value is kept as its JSON rendering.
pub(crate) fn parse_json_documents(content: &str) -> std::result::Result<Vec<Document>, String> {
    let value: Value =
        serde_json::from_str(content).map_err(|e| format!("Invalid knowledge base JSON: {}", e))?;

    let Value::Array(items) = value else {
        return Err("Knowledge base JSON must be a list of objects.".to_string());
    };

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            let Value::Object(mut fields) = item else {
                return Err(format!(
                    "Entry {} must be an object with a 'text' field.",
                    i
                ));
            };
            let text = match fields.remove("text") {
                Some(Value::String(text)) => text,
                Some(other) => other.to_string(),
                None => {
                    return Err(format!("Entry {} is missing the 'text' field.", i));
                }
            };
            let metadata = DocumentMetadata {
                source: fields
                    .get("source")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                page: fields
                    .get("page")
                    .and_then(Value::as_u64)
                    .and_then(|p| u32::try_from(p).ok()),
            };
            Ok(Document::new(format!("kb-{}", i), text).with_metadata(metadata))
        })
        .collect()
}

/// Load every PDF under `dir` (recursively), one document per page.
#[inline]
pub fn load_pdf_documents(dir: &Path) -> Result<Vec<Document>> {
    if !dir.is_dir() {
        return Err(RagError::Ingestion(format!(
            "PDF directory not found: {}",
            dir.display()
        )));
    }

    let files = find_pdf_files(dir);
    if files.is_empty() {
        return Err(RagError::Ingestion(format!(
            "No PDF files found under {}",
            dir.display()
        )));
    }

    let mut documents = Vec::new();
    for (file_index, file) in files.iter().enumerate() {
        debug!(
            "Extracting PDF {}/{}: {}",
            file_index + 1,
            files.len(),
            file.display()
        );
        let pages = pdf_extract::extract_text_by_pages(file).map_err(|e| {
            RagError::Ingestion(format!("Failed to extract text from {}: {}", file.display(), e))
        })?;

        let relative = file.strip_prefix(dir).unwrap_or(file).display().to_string();
        if pages.is_empty() {
            warn!("PDF {} has no pages", file.display());
        }
        for (page_index, text) in pages.into_iter().enumerate() {
            let page = u32::try_from(page_index + 1).unwrap_or(u32::MAX);
            documents.push(
                Document::new(format!("{}#page={}", relative, page), text).with_metadata(
                    DocumentMetadata {
                        source: Some(file.display().to_string()),
                        page: Some(page),
                    },
                ),
            );
        }
    }

    info!(
        "Loaded {} pages from {} PDF files under {}",
        documents.len(),
        files.len(),
        dir.display()
    );
    Ok(documents)
}

fn find_pdf_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
        })
        .collect();
    files.sort();
    files
}
