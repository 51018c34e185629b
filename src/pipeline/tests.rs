use std::fs;
use std::path::Path;
use std::sync::atomic::Ordering;

use tempfile::TempDir;

use super::*;
use crate::RagError;
use crate::config::DEFAULT_PROMPT_TEMPLATE;
use crate::providers::fake::{HashEmbedder, ScriptedModel};
use crate::workflow::REFINEMENT_MARKER;

fn write_knowledge_base(dir: &Path, content: &str) -> PathBuf {
    let path = dir.join("knowledge_base.json");
    fs::write(&path, content).expect("Failed to write knowledge base");
    path
}

fn options(source: KnowledgeSource, index: IndexMode) -> PipelineOptions {
    PipelineOptions {
        source,
        chunking: ChunkingConfig::default(),
        index,
        batch_size: 16,
        k: 1,
        prompt_template: DEFAULT_PROMPT_TEMPLATE.to_string(),
    }
}

fn start(
    options: PipelineOptions,
    embedder: &Arc<HashEmbedder>,
) -> crate::Result<RagPipeline> {
    RagPipeline::start(
        options,
        Arc::clone(embedder) as Arc<dyn EmbeddingProvider>,
        Arc::new(ScriptedModel::replying("Y")),
    )
}

#[test]
fn options_follow_configuration() {
    let mut config = Config {
        base_dir: PathBuf::from("/srv/rag"),
        ..Config::default()
    };
    let ephemeral = PipelineOptions::from_config(&config, true);
    assert_eq!(ephemeral.index, IndexMode::Ephemeral);
    assert_eq!(
        ephemeral.source,
        KnowledgeSource::Json(PathBuf::from("/srv/rag/knowledge_base.json"))
    );
    assert_eq!(ephemeral.k, 5);
    assert_eq!(ephemeral.batch_size, 64);

    config.index.backend = IndexBackend::Persisted;
    let persisted = PipelineOptions::from_config(&config, true);
    assert_eq!(
        persisted.index,
        IndexMode::Persisted {
            directory: PathBuf::from("/srv/rag/vector_index"),
            rebuild: true,
        }
    );
}

#[test]
fn every_document_becomes_an_indexed_chunk() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let path = write_knowledge_base(temp_dir.path(), r#"[{"text":"a"},{"text":"b"}]"#);
    let embedder = Arc::new(HashEmbedder::new(8));

    let pipeline = start(
        options(KnowledgeSource::Json(path), IndexMode::Ephemeral),
        &embedder,
    )
    .expect("pipeline should start");

    let indexed: Vec<(String, Option<String>)> = pipeline
        .indexed_chunks()
        .map(|(chunk, document)| (chunk.text.clone(), document.map(|d| d.text.clone())))
        .collect();
    assert_eq!(
        indexed,
        vec![
            ("a".to_string(), Some("a".to_string())),
            ("b".to_string(), Some("b".to_string())),
        ]
    );
    assert_eq!(pipeline.sources().len(), 2);
}

#[test]
fn malformed_knowledge_base_fails_before_embedding() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let embedder = Arc::new(HashEmbedder::new(8));

    for content in ["{ not json", r#"{"text":"not a list"}"#, r#"[{"body":"x"}]"#] {
        let path = write_knowledge_base(temp_dir.path(), content);
        let result = start(
            options(KnowledgeSource::Json(path), IndexMode::Ephemeral),
            &embedder,
        );
        assert!(
            matches!(result, Err(RagError::Ingestion(_))),
            "expected ingestion error for {}",
            content
        );
    }
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn missing_sources_are_ingestion_errors() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let embedder = Arc::new(HashEmbedder::new(8));

    let missing_json = start(
        options(
            KnowledgeSource::Json(temp_dir.path().join("absent.json")),
            IndexMode::Ephemeral,
        ),
        &embedder,
    );
    assert!(matches!(missing_json, Err(RagError::Ingestion(_))));

    let empty_pdf_dir = start(
        options(
            KnowledgeSource::PdfDirectory(temp_dir.path().to_path_buf()),
            IndexMode::Ephemeral,
        ),
        &embedder,
    );
    assert!(matches!(empty_pdf_dir, Err(RagError::Ingestion(_))));
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn ask_and_run_use_the_workflow() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let path = write_knowledge_base(
        temp_dir.path(),
        r#"[{"text":"The sky is blue."},{"text":"X is Y."}]"#,
    );
    let embedder = Arc::new(HashEmbedder::new(64));
    let pipeline = start(
        options(KnowledgeSource::Json(path), IndexMode::Ephemeral),
        &embedder,
    )
    .expect("pipeline should start");

    assert_eq!(
        pipeline.ask("What is X?").expect("ask should succeed"),
        format!("Y{}", REFINEMENT_MARKER)
    );

    let state = pipeline.run("What is X?").expect("run should succeed");
    assert_eq!(state.context.len(), 1);
    assert_eq!(state.context[0].text, "X is Y.");
    assert_eq!(
        pipeline
            .sources()
            .get(&state.context[0].id)
            .map(|d| d.id.as_str()),
        Some("kb-1")
    );
}

#[test]
fn persisted_index_is_reused_until_rebuild() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let path = write_knowledge_base(temp_dir.path(), r#"[{"text":"a"},{"text":"b"}]"#);
    let directory = temp_dir.path().join("vector_index");
    let persisted = |rebuild| IndexMode::Persisted {
        directory: directory.clone(),
        rebuild,
    };

    let first = Arc::new(HashEmbedder::new(8));
    start(options(KnowledgeSource::Json(path.clone()), persisted(false)), &first)
        .expect("first start should build");
    assert!(first.calls.load(Ordering::SeqCst) > 0);
    assert!(PersistedIndex::exists(&directory));

    let second = Arc::new(HashEmbedder::new(8));
    let pipeline = start(options(KnowledgeSource::Json(path.clone()), persisted(false)), &second)
        .expect("second start should load");
    assert_eq!(second.calls.load(Ordering::SeqCst), 0);
    assert_eq!(pipeline.indexed_chunks().count(), 2);

    let third = Arc::new(HashEmbedder::new(8));
    start(options(KnowledgeSource::Json(path), persisted(true)), &third)
        .expect("rebuild should succeed");
    assert!(third.calls.load(Ordering::SeqCst) > 0);
}

#[test]
fn corrupt_persisted_index_is_reported() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let path = write_knowledge_base(temp_dir.path(), r#"[{"text":"a"}]"#);
    let directory = temp_dir.path().join("vector_index");
    fs::create_dir_all(&directory).expect("create index dir");
    fs::write(directory.join("manifest.json"), "garbage").expect("write manifest");

    let result = start(
        options(
            KnowledgeSource::Json(path),
            IndexMode::Persisted {
                directory,
                rebuild: false,
            },
        ),
        &Arc::new(HashEmbedder::new(8)),
    );
    assert!(matches!(result, Err(RagError::CorruptIndex { .. })));
}

#[test]
fn source_table_ignores_unknown_documents() {
    let documents = vec![Document::new("kb-0", "alpha")];
    let chunks = vec![
        Chunk {
            id: "kb-0:0".to_string(),
            document_id: "kb-0".to_string(),
            position: 0,
            start: 0,
            text: "alpha".to_string(),
        },
        Chunk {
            id: "kb-9:0".to_string(),
            document_id: "kb-9".to_string(),
            position: 0,
            start: 0,
            text: "stale".to_string(),
        },
    ];

    let table = SourceTable::new(documents, &chunks);
    assert_eq!(table.len(), 1);
    assert_eq!(table.get("kb-0:0").map(|d| d.text.as_str()), Some("alpha"));
    assert!(table.get("kb-9:0").is_none());
}
