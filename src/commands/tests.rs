use std::io::Cursor;

use super::*;
use crate::RagError;
use crate::chunking::{ChunkingConfig, split_documents};

fn run(input: &str, answer: impl FnMut(&str) -> Result<String>) -> String {
    console::set_colors_enabled(false);
    let mut output = Vec::new();
    run_query_loop(Cursor::new(input.to_string()), &mut output, answer)
        .expect("loop should not fail on an in-memory writer");
    String::from_utf8(output).expect("output should be UTF-8")
}

#[test]
fn exit_words_are_case_insensitive() {
    for word in ["exit", "QUIT", " Stop ", "Exit\n"] {
        assert!(is_exit_command(word), "{:?} should exit", word);
    }
    for word in ["exiting", "", "stop now", "q"] {
        assert!(!is_exit_command(word), "{:?} should not exit", word);
    }
}

#[test]
fn answers_until_exit_word() {
    let mut asked = Vec::new();
    let output = run("What is X?\n\n   \nQUIT\nNever asked\n", |question| {
        asked.push(question.to_string());
        Ok(format!("answer to {}", question))
    });

    assert_eq!(asked, vec!["What is X?".to_string()]);
    assert!(output.starts_with("RAG system is ready."));
    assert!(output.contains("\nAnswer:\n\nanswer to What is X?\n"));
    assert!(output.contains(&format!("\n{}\n", "=".repeat(90))));
    assert!(output.contains("Exiting program. Goodbye!"));
    assert_eq!(output.matches(PROMPT).count(), 4);
}

#[test]
fn errors_do_not_end_the_loop() {
    let mut calls = 0;
    let output = run("first\nsecond\nexit\n", |_| {
        calls += 1;
        if calls == 1 {
            Err(RagError::Generation("model unavailable".to_string()))
        } else {
            Ok("recovered".to_string())
        }
    });

    assert_eq!(calls, 2);
    assert!(output.contains("Error: Generation error: model unavailable"));
    assert!(output.contains("recovered"));
}

#[test]
fn end_of_input_ends_the_loop() {
    let mut calls = 0;
    let output = run("only question", |_| {
        calls += 1;
        Ok("done".to_string())
    });

    assert_eq!(calls, 1);
    assert!(!output.contains("Goodbye"));
    assert!(output.ends_with(&format!("{}\n", PROMPT)));
}

#[test]
fn dump_lists_chunks_and_checks_reconstruction() {
    console::set_colors_enabled(false);
    let documents = vec![
        Document::new("kb-0", "First sentence here. Second sentence follows. Third one ends."),
        Document::new("kb-1", "Short."),
    ];
    let chunks = split_documents(&documents, &ChunkingConfig::new(30, 10)).expect("chunking");
    let find = |chunk: &Chunk| documents.iter().find(|d| d.id == chunk.document_id);

    let mut output = Vec::new();
    let summary = dump_chunks(chunks.iter().map(|c| (c, find(c))), &mut output).expect("dump");

    assert_eq!(summary.chunks, chunks.len());
    assert_eq!(summary.documents, 2);
    assert_eq!(summary.stale_documents, 0);
    assert_eq!(summary.orphaned_chunks, 0);

    let text = String::from_utf8(output).expect("UTF-8");
    assert!(text.contains("kb-0:0"));
    assert!(text.contains("Short."));
    assert!(text.contains(&format!("{} chunks from 2 documents", chunks.len())));
}

#[test]
fn dump_reports_changed_and_missing_documents() {
    console::set_colors_enabled(false);
    let original = Document::new("kb-0", "The original text.");
    let chunks = split_documents(std::slice::from_ref(&original), &ChunkingConfig::default())
        .expect("chunking");
    let edited = Document::new("kb-0", "The edited text.");
    let orphan = Chunk {
        id: "kb-7:0".to_string(),
        document_id: "kb-7".to_string(),
        position: 0,
        start: 0,
        text: "gone".to_string(),
    };

    let mut output = Vec::new();
    let entries = chunks
        .iter()
        .map(|c| (c, Some(&edited)))
        .chain(std::iter::once((&orphan, None)));
    let summary = dump_chunks(entries, &mut output).expect("dump");

    assert_eq!(summary.stale_documents, 1);
    assert_eq!(summary.orphaned_chunks, 1);
    let text = String::from_utf8(output).expect("UTF-8");
    assert!(text.contains("documents changed since indexing: kb-0"));
    assert!(text.contains("source: unknown"));
}

#[test]
fn workflow_renders_as_dot() {
    let mut output = Vec::new();
    render_workflow(&mut output).expect("render");
    assert_eq!(String::from_utf8(output).expect("UTF-8"), Workflow::to_dot());
}

#[test]
fn config_summary_names_models_and_paths() {
    console::set_colors_enabled(false);
    let config = Config::default();
    let mut output = Vec::new();
    show_config(&config, &mut output).expect("show config");

    let text = String::from_utf8(output).expect("UTF-8");
    assert!(text.contains("text-embedding-3-large"));
    assert!(text.contains("gpt-4.1"));
    assert!(text.contains("knowledge_base.json"));
    assert!(text.contains("Backend: memory"));
    assert!(text.contains("OPENAI_API_KEY"));
}
