use super::*;
use crate::config::DEFAULT_PROMPT_TEMPLATE;
use crate::index::MemoryIndex;
use crate::providers::fake::{HashEmbedder, ScriptedModel};

fn chunk(position: usize, text: &str) -> Chunk {
    Chunk {
        id: format!("kb-{}:0", position),
        document_id: format!("kb-{}", position),
        position: 0,
        start: 0,
        text: text.to_string(),
    }
}

fn index(texts: &[&str]) -> Arc<dyn VectorIndex> {
    let chunks = texts
        .iter()
        .enumerate()
        .map(|(i, text)| chunk(i, text))
        .collect();
    Arc::new(
        MemoryIndex::build(chunks, Arc::new(HashEmbedder::new(64)), 8)
            .expect("build should succeed"),
    )
}

fn knowledge() -> Arc<dyn VectorIndex> {
    index(&[
        "The sky is blue.",
        "X is Y.",
        "Rust has no garbage collector.",
        "Bananas are rich in potassium.",
    ])
}

#[test]
fn stages_run_in_fixed_order() {
    let names: Vec<&str> = Workflow::STAGES.iter().map(|s| s.name()).collect();
    assert_eq!(names, vec!["classify", "retrieve", "generate", "refine"]);
    assert_eq!(Stage::Generate.to_string(), "generate");
}

#[test]
fn apply_merges_only_present_fields() {
    let mut state = WorkflowState::new("question");
    state.apply(StateUpdate {
        context: Some(vec![chunk(0, "a")]),
        ..StateUpdate::default()
    });
    assert_eq!(state.question, "question");
    assert_eq!(state.context.len(), 1);
    assert!(state.answer.is_none());

    state.apply(StateUpdate {
        answer: Some("done".to_string()),
        ..StateUpdate::default()
    });
    assert_eq!(state.context.len(), 1);
    assert_eq!(state.answer.as_deref(), Some("done"));

    state.apply(StateUpdate::default());
    assert_eq!(state.answer.as_deref(), Some("done"));
}

#[test]
fn answers_from_the_most_similar_chunk() {
    let model = Arc::new(ScriptedModel::replying("X is Y, according to the context."));
    let workflow = Workflow::new(
        knowledge(),
        Arc::clone(&model) as Arc<dyn LanguageModel>,
        DEFAULT_PROMPT_TEMPLATE,
        1,
    );

    let state = workflow
        .invoke(WorkflowState::new("What is X?"))
        .expect("workflow should succeed");

    assert_eq!(state.question, "What is X?");
    assert_eq!(state.context.len(), 1);
    assert_eq!(state.context[0].text, "X is Y.");

    let answer = state.answer.expect("answer should be set");
    assert!(answer.starts_with("X is Y, according to the context."));
    assert!(answer.ends_with(REFINEMENT_MARKER));
    assert_eq!(answer.matches(REFINEMENT_MARKER).count(), 1);

    let prompts = model.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("Question: What is X?"));
    assert!(prompts[0].contains("Context:\nX is Y.\n"));
}

#[test]
fn context_block_joins_chunks_with_blank_lines() {
    let model = Arc::new(ScriptedModel::replying("ok"));
    let workflow = Workflow::new(
        knowledge(),
        Arc::clone(&model) as Arc<dyn LanguageModel>,
        "{context}|{question}",
        2,
    );

    workflow.answer("What is X?").expect("workflow should succeed");

    assert_eq!(model.prompts()[0], "X is Y.\n\nThe sky is blue.|What is X?");
}

#[test]
fn answer_returns_refined_text() {
    let workflow = Workflow::new(
        knowledge(),
        Arc::new(ScriptedModel::replying("Y")),
        DEFAULT_PROMPT_TEMPLATE,
        3,
    );
    assert_eq!(
        workflow.answer("What is X?").expect("workflow should succeed"),
        format!("Y{}", REFINEMENT_MARKER)
    );
}

#[test]
fn empty_index_error_propagates_before_generation() {
    let model = Arc::new(ScriptedModel::replying("unused"));
    let workflow = Workflow::new(
        index(&[]),
        Arc::clone(&model) as Arc<dyn LanguageModel>,
        DEFAULT_PROMPT_TEMPLATE,
        3,
    );

    assert!(matches!(
        workflow.answer("What is X?"),
        Err(RagError::EmptyIndex)
    ));
    assert!(model.prompts().is_empty());
}

#[test]
fn generation_failures_abort_the_run() {
    let failing = Workflow::new(
        knowledge(),
        Arc::new(ScriptedModel::failing()),
        DEFAULT_PROMPT_TEMPLATE,
        1,
    );
    assert!(matches!(
        failing.answer("What is X?"),
        Err(RagError::Generation(_))
    ));

    let blank = Workflow::new(
        knowledge(),
        Arc::new(ScriptedModel::replying("  \n ")),
        DEFAULT_PROMPT_TEMPLATE,
        1,
    );
    assert!(matches!(
        blank.answer("What is X?"),
        Err(RagError::Generation(_))
    ));
}

#[test]
fn classify_leaves_question_unchanged() {
    let state = WorkflowState::new("An ADVANCED question");
    let update = classify(&state);
    assert_eq!(update.question.as_deref(), Some("An ADVANCED question"));
    assert!(update.context.is_none());
    assert!(update.answer.is_none());
}

#[test]
fn refine_appends_marker_once() {
    let mut state = WorkflowState::new("q");
    state.answer = Some("draft".to_string());
    let update = refine(&state);
    assert_eq!(
        update.answer,
        Some(format!("draft{}", REFINEMENT_MARKER))
    );
}

#[test]
fn prompt_substitution_is_single_pass() {
    let filled = fill_prompt(
        "Q: {question}\nC: {context}",
        "what about {context}?",
        "ctx with {question}",
    );
    assert_eq!(filled, "Q: what about {context}?\nC: ctx with {question}");
}

#[test]
fn dot_output_lists_the_linear_topology() {
    let dot = Workflow::to_dot();
    assert!(dot.starts_with("digraph workflow {"));
    for edge in [
        "\"__start__\" -> \"classify\";",
        "\"classify\" -> \"retrieve\";",
        "\"retrieve\" -> \"generate\";",
        "\"generate\" -> \"refine\";",
        "\"refine\" -> \"__end__\";",
    ] {
        assert!(dot.contains(edge), "missing edge {}", edge);
    }
    assert_eq!(dot.matches("->").count(), 5);
}
