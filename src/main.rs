use std::io;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use dotenv::dotenv;
use tracing::info;

use rag_workflow::Result;
use rag_workflow::commands::{dump_chunks, render_workflow, run_query_loop, show_config};
use rag_workflow::config::{Config, IndexBackend, SourceKind};
use rag_workflow::pipeline::{PipelineOptions, RagPipeline};
use rag_workflow::providers::{embedding_provider, language_model};

#[derive(Parser)]
#[command(name = "rag-workflow")]
#[command(about = "Answer questions over a local knowledge base with retrieval-augmented generation")]
#[command(version)]
struct Cli {
    /// Directory containing config.toml; relative paths in the config resolve against it
    #[arg(long, default_value = ".")]
    config_dir: PathBuf,

    /// Kind of knowledge source to load
    #[arg(long, value_enum)]
    source: Option<Source>,

    /// JSON knowledge base file
    #[arg(long)]
    knowledge_base: Option<PathBuf>,

    /// Directory searched recursively for PDF files
    #[arg(long)]
    pdf_dir: Option<PathBuf>,

    /// Persist the vector index in this directory and reuse it on later runs
    #[arg(long)]
    index_dir: Option<PathBuf>,

    /// Re-embed the knowledge source even if a persisted index exists
    #[arg(long)]
    rebuild: bool,

    /// Print the indexed chunks with their source documents and exit
    #[arg(long)]
    dump_chunks: bool,

    /// Print the workflow graph in Graphviz DOT format and exit
    #[arg(long)]
    visualize: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    show_config: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Source {
    Json,
    Pdf,
}

impl From<Source> for SourceKind {
    fn from(source: Source) -> Self {
        match source {
            Source::Json => Self::Json,
            Source::Pdf => Self::Pdf,
        }
    }
}

impl Cli {
    /// Command line flags take precedence over the config file and environment
    fn apply(&self, config: &mut Config) {
        if let Some(source) = self.source {
            config.knowledge.source = source.into();
        }
        if let Some(path) = &self.knowledge_base {
            config.knowledge.json_path.clone_from(path);
        }
        if let Some(dir) = &self.pdf_dir {
            config.knowledge.pdf_dir.clone_from(dir);
        }
        if let Some(dir) = &self.index_dir {
            config.index.backend = IndexBackend::Persisted;
            config.index.directory.clone_from(dir);
        }
    }
}

fn main() -> Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(&cli.config_dir)?;
    config.apply_env_overrides();
    cli.apply(&mut config);
    config.validate()?;

    if cli.visualize {
        render_workflow(&mut io::stdout().lock())?;
        return Ok(());
    }
    if cli.show_config {
        show_config(&config, &mut io::stdout().lock())?;
        return Ok(());
    }

    let embedder = embedding_provider(&config)?;
    let model = language_model(&config)?;
    let pipeline = RagPipeline::start(
        PipelineOptions::from_config(&config, cli.rebuild),
        embedder,
        model,
    )?;

    if cli.dump_chunks {
        dump_chunks(pipeline.indexed_chunks(), &mut io::stdout().lock())?;
        return Ok(());
    }

    info!("Pipeline ready");
    run_query_loop(io::stdin().lock(), &mut io::stdout().lock(), |question| {
        pipeline.ask(question)
    })?;

    Ok(())
}
