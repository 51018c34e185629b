
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::Result;
use crate::config::ConfigError;
use crate::ingestion::Document;

/// Separator classes tried in order when looking for a place to end a chunk.
/// A chunk always ends right after the separator, so no text is ever dropped.
const SEPARATOR_CLASSES: [&[&str]; 4] = [&["\n\n"], &["\n"], &[". ", "! ", "? "], &[" "]];

/// A contiguous span of a document, the unit of embedding and retrieval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// `<document id>:<position>`
    pub id: String,
    /// ID of the document this chunk was cut from
    pub document_id: String,
    /// Index of this chunk within its document
    pub position: usize,
    /// Character offset of the chunk within the document text
    pub start: usize,
    /// The chunk text, an exact substring of the document
    pub text: String,
}

impl Chunk {
    /// Character offset one past the end of this chunk
    #[inline]
    pub fn end(&self) -> usize {
        self.start + self.text.chars().count()
    }
}

/// Configuration for content chunking, measured in characters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum chunk length
    pub chunk_size: usize,
    /// Maximum number of characters shared by neighbouring chunks
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

impl ChunkingConfig {
    #[inline]
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
        }
    }

    #[inline]
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidChunkSize(self.chunk_size));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::OverlapTooLarge(
                self.chunk_overlap,
                self.chunk_size,
            ));
        }
        Ok(())
    }
}

/// Split documents into overlapping chunks, keeping document and reading order.
///
/// Documents with empty text produce no chunks.
#[inline]
pub fn split_documents(documents: &[Document], config: &ChunkingConfig) -> Result<Vec<Chunk>> {
    config.validate()?;

    let mut chunks = Vec::new();
    for document in documents {
        if document.text.is_empty() {
            debug!("Skipping empty document '{}'", document.id);
            continue;
        }

        let before = chunks.len();
        chunks.extend(
            split_text(&document.text, config)
                .into_iter()
                .enumerate()
                .map(|(position, (start, text))| Chunk {
                    id: format!("{}:{}", document.id, position),
                    document_id: document.id.clone(),
                    position,
                    start,
                    text: text.to_string(),
                }),
        );

        debug!(
            "Chunked document '{}' ({} chars) into {} chunks",
            document.id,
            document.text.chars().count(),
            chunks.len() - before
        );
    }

    Ok(chunks)
}

/// Split a single text into `(char offset, slice)` spans.
///
/// Each span holds at most `chunk_size` characters. Spans end after the
/// strongest natural boundary available in the back half of the window and
/// fall back to a hard cut. The next span starts `chunk_overlap` characters
/// before the previous end, nudged forward to a word start when one is
/// available.
pub(crate) fn split_text<'a>(text: &'a str, config: &ChunkingConfig) -> Vec<(usize, &'a str)> {
    let mut offsets: Vec<usize> = Vec::with_capacity(text.len() + 1);
    let mut chars: Vec<char> = Vec::with_capacity(text.len());
    for (offset, c) in text.char_indices() {
        offsets.push(offset);
        chars.push(c);
    }
    offsets.push(text.len());
    let char_len = chars.len();

    let size = config.chunk_size;
    let overlap = config.chunk_overlap;
    let mut spans = Vec::new();
    let mut start = 0;

    while start < char_len {
        let hard_end = (start + size).min(char_len);
        let end = if hard_end < char_len {
            let min_end = start + overlap.max(size / 2);
            find_break(text, &offsets, start, min_end, hard_end).unwrap_or(hard_end)
        } else {
            hard_end
        };

        spans.push((start, &text[offsets[start]..offsets[end]]));
        if end >= char_len {
            break;
        }

        start = next_start(&chars, start, end, overlap);
    }

    spans
}

/// Find the char index right after the last separator of the strongest class
/// whose break lies in `(min_end, hard_end]`.
fn find_break(
    text: &str,
    offsets: &[usize],
    start: usize,
    min_end: usize,
    hard_end: usize,
) -> Option<usize> {
    let window_start = offsets[start];
    let window = &text[window_start..offsets[hard_end]];

    SEPARATOR_CLASSES.iter().find_map(|class| {
        class
            .iter()
            .filter_map(|separator| {
                window
                    .rfind(separator)
                    .map(|pos| window_start + pos + separator.len())
            })
            .filter_map(|byte_end| offsets.binary_search(&byte_end).ok())
            .filter(|&char_end| char_end > min_end)
            .max()
    })
}

fn next_start(chars: &[char], start: usize, end: usize, overlap: usize) -> usize {
    let candidate = end - overlap;
    debug_assert!(candidate > start, "chunking must always advance");

    let mid_word = candidate > 0
        && candidate < chars.len()
        && !chars[candidate - 1].is_whitespace()
        && !chars[candidate].is_whitespace();
    if !mid_word {
        return candidate;
    }

    (candidate + 1..=end)
        .find(|&i| chars[i - 1].is_whitespace() && !chars[i].is_whitespace())
        .unwrap_or(candidate)
}

/// Rebuild a document's text from its chunks by dropping the overlapping prefix
/// of every chunk after the first.
#[inline]
pub fn reconstruct(chunks: &[Chunk]) -> String {
    let mut text = String::new();
    let mut covered = 0_usize;
    for chunk in chunks {
        let skip = covered.saturating_sub(chunk.start);
        text.extend(chunk.text.chars().skip(skip));
        covered = covered.max(chunk.end());
    }
    text
}
