#[cfg(test)]
mod tests;

use std::io::{self, BufRead, Write};

use console::style;
use itertools::Itertools;
use tracing::{error, info};

use crate::Result;
use crate::chunking::{Chunk, reconstruct};
use crate::config::{Config, IndexBackend};
use crate::ingestion::Document;
use crate::workflow::Workflow;

pub const PROMPT: &str = "Enter your question: ";
const EXIT_WORDS: [&str; 3] = ["exit", "quit", "stop"];
const RULE_WIDTH: usize = 90;

/// Whether `line` asks to leave the question loop
#[inline]
pub fn is_exit_command(line: &str) -> bool {
    let line = line.trim();
    EXIT_WORDS.iter().any(|word| line.eq_ignore_ascii_case(word))
}

/// Read questions from `input` until an exit word or end of input, writing
/// each answer to `output`. A failed question is reported and the loop goes on.
#[inline]
pub fn run_query_loop<R, W, F>(mut input: R, output: &mut W, mut answer: F) -> io::Result<()>
where
    R: BufRead,
    W: Write,
    F: FnMut(&str) -> Result<String>,
{
    writeln!(output, "RAG system is ready. Type 'exit' to quit.")?;

    let mut line = String::new();
    loop {
        write!(output, "{}", PROMPT)?;
        output.flush()?;

        line.clear();
        if input.read_line(&mut line)? == 0 {
            writeln!(output)?;
            info!("Input closed, leaving question loop");
            break;
        }

        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if is_exit_command(question) {
            writeln!(output, "Exiting program. Goodbye!")?;
            break;
        }

        match answer(question) {
            Ok(text) => {
                writeln!(output, "\n{}\n", style("Answer:").bold())?;
                writeln!(output, "{}", text)?;
                writeln!(output, "\n{}\n", "=".repeat(RULE_WIDTH))?;
            }
            Err(e) => {
                error!("Failed to answer question: {}", e);
                writeln!(output, "{} {}", style("Error:").red(), e)?;
            }
        }
    }
    Ok(())
}

/// Totals printed at the end of a chunk dump
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DumpSummary {
    pub chunks: usize,
    pub documents: usize,
    /// Documents whose chunks no longer reconstruct the current text
    pub stale_documents: usize,
    /// Chunks with no matching document in the knowledge source
    pub orphaned_chunks: usize,
}

/// Print every indexed chunk with its source, then check each document is
/// reproduced exactly by its chunks.
#[inline]
pub fn dump_chunks<'a, I, W>(chunks: I, output: &mut W) -> io::Result<DumpSummary>
where
    I: IntoIterator<Item = (&'a Chunk, Option<&'a Document>)>,
    W: Write,
{
    let mut summary = DumpSummary::default();
    let mut by_document: Vec<(&Document, Vec<Chunk>)> = Vec::new();

    for (chunk, document) in chunks {
        summary.chunks += 1;
        writeln!(
            output,
            "{} {} [{}..{}]",
            style(format!("#{}", summary.chunks)).bold(),
            style(&chunk.id).cyan(),
            chunk.start,
            chunk.end()
        )?;

        match document {
            Some(document) => {
                let source = document.metadata.source.as_deref().unwrap_or("-");
                match document.metadata.page {
                    Some(page) => writeln!(output, "  source: {} (page {})", source, page)?,
                    None => writeln!(output, "  source: {}", source)?,
                }
                let continues = by_document
                    .last()
                    .is_some_and(|(last, _)| last.id == document.id);
                if continues {
                    if let Some((_, group)) = by_document.last_mut() {
                        group.push(chunk.clone());
                    }
                } else {
                    by_document.push((document, vec![chunk.clone()]));
                }
            }
            None => {
                summary.orphaned_chunks += 1;
                writeln!(output, "  source: {}", style("unknown").yellow())?;
            }
        }
        writeln!(output, "{}", chunk.text)?;
        writeln!(output, "{}", style("-".repeat(RULE_WIDTH)).dim())?;
    }

    let mut stale = Vec::new();
    for (document, group) in &by_document {
        summary.documents += 1;
        if reconstruct(group) != document.text {
            summary.stale_documents += 1;
            stale.push(document.id.as_str());
        }
    }

    writeln!(
        output,
        "{} chunks from {} documents",
        summary.chunks, summary.documents
    )?;
    if !stale.is_empty() {
        writeln!(
            output,
            "{} {} documents changed since indexing: {}",
            style("Warning:").yellow(),
            stale.len(),
            stale.iter().join(", ")
        )?;
    }
    if summary.orphaned_chunks > 0 {
        writeln!(
            output,
            "{} {} chunks have no source document; rebuild the index",
            style("Warning:").yellow(),
            summary.orphaned_chunks
        )?;
    }
    Ok(summary)
}

/// Write the workflow graph in Graphviz DOT form
#[inline]
pub fn render_workflow<W: Write>(output: &mut W) -> io::Result<()> {
    output.write_all(Workflow::to_dot().as_bytes())
}

/// Print the effective configuration
#[inline]
pub fn show_config<W: Write>(config: &Config, output: &mut W) -> io::Result<()> {
    writeln!(output, "{}", style("Current Configuration").bold().cyan())?;
    writeln!(output)?;

    writeln!(output, "{}", style("Knowledge:").bold().yellow())?;
    writeln!(output, "  Source: {:?}", config.knowledge.source)?;
    writeln!(
        output,
        "  JSON path: {}",
        style(config.json_path().display()).cyan()
    )?;
    writeln!(
        output,
        "  PDF directory: {}",
        style(config.pdf_dir().display()).cyan()
    )?;

    writeln!(output, "{}", style("Chunking:").bold().yellow())?;
    writeln!(output, "  Size: {}", style(config.chunking.chunk_size).cyan())?;
    writeln!(
        output,
        "  Overlap: {}",
        style(config.chunking.chunk_overlap).cyan()
    )?;

    writeln!(output, "{}", style("Retrieval:").bold().yellow())?;
    writeln!(output, "  k: {}", style(config.retrieval.k).cyan())?;

    writeln!(output, "{}", style("Index:").bold().yellow())?;
    match config.index.backend {
        IndexBackend::Memory => writeln!(output, "  Backend: {}", style("memory").cyan())?,
        IndexBackend::Persisted => writeln!(
            output,
            "  Backend: {} at {}",
            style("persisted").cyan(),
            style(config.index_dir().display()).cyan()
        )?,
    }

    writeln!(output, "{}", style("Embedding:").bold().yellow())?;
    writeln!(
        output,
        "  {:?} {} ({} dimensions, batches of {})",
        config.embedding.provider,
        style(&config.embedding.model).cyan(),
        config.embedding.dimension,
        config.embedding.batch_size
    )?;

    writeln!(output, "{}", style("Generation:").bold().yellow())?;
    writeln!(
        output,
        "  {:?} {} (temperature {})",
        config.generation.provider,
        style(&config.generation.model).cyan(),
        config.generation.temperature
    )?;

    writeln!(output, "{}", style("Providers:").bold().yellow())?;
    match config.ollama.ollama_url() {
        Ok(url) => writeln!(output, "  Ollama URL: {}", style(url).cyan())?,
        Err(e) => writeln!(output, "  Ollama URL: {} ({})", style("Invalid").red(), e)?,
    }
    writeln!(
        output,
        "  OpenAI URL: {} (key from ${})",
        style(&config.openai.base_url).cyan(),
        config.openai.api_key_env
    )?;
    writeln!(
        output,
        "  HTTP: {}s timeout, {} attempts",
        config.http.timeout_seconds, config.http.retry_attempts
    )?;

    writeln!(output)?;
    writeln!(
        output,
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    )?;
    Ok(())
}
