// Staged question answering
// A fixed linear graph of stages threaded through a shared state record:
// classify, retrieve, generate, refine

#[cfg(test)]
mod tests;

use std::fmt;
use std::sync::Arc;

use itertools::Itertools;
use tracing::{debug, info};

use crate::chunking::Chunk;
use crate::index::VectorIndex;
use crate::providers::LanguageModel;
use crate::{RagError, Result};

/// Appended to every answer by the refine stage
pub const REFINEMENT_MARKER: &str = "\n\n[Refined for clarity and completeness]";

const START_NODE: &str = "__start__";
const END_NODE: &str = "__end__";

/// A single step of the workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Classify,
    Retrieve,
    Generate,
    Refine,
}

impl Stage {
    #[inline]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Classify => "classify",
            Self::Retrieve => "retrieve",
            Self::Generate => "generate",
            Self::Refine => "refine",
        }
    }
}

impl fmt::Display for Stage {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The record threaded through every stage for one question
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkflowState {
    pub question: String,
    /// Retrieved chunks, most similar first
    pub context: Vec<Chunk>,
    pub answer: Option<String>,
}

/// Partial update returned by a stage; `None` fields leave the state untouched
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateUpdate {
    pub question: Option<String>,
    pub context: Option<Vec<Chunk>>,
    pub answer: Option<String>,
}

impl WorkflowState {
    #[inline]
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Self::default()
        }
    }

    /// Merge `update` field by field
    #[inline]
    pub fn apply(&mut self, update: StateUpdate) {
        if let Some(question) = update.question {
            self.question = question;
        }
        if let Some(context) = update.context {
            self.context = context;
        }
        if let Some(answer) = update.answer {
            self.answer = Some(answer);
        }
    }
}

/// The question answering graph, bound to an index and a language model
pub struct Workflow {
    index: Arc<dyn VectorIndex>,
    model: Arc<dyn LanguageModel>,
    prompt_template: String,
    k: usize,
}

impl fmt::Debug for Workflow {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workflow")
            .field("entries", &self.index.len())
            .field("model", &self.model.model())
            .field("k", &self.k)
            .finish_non_exhaustive()
    }
}

impl Workflow {
    /// Execution order of the stages
    pub const STAGES: [Stage; 4] = [
        Stage::Classify,
        Stage::Retrieve,
        Stage::Generate,
        Stage::Refine,
    ];

    #[inline]
    pub fn new(
        index: Arc<dyn VectorIndex>,
        model: Arc<dyn LanguageModel>,
        prompt_template: impl Into<String>,
        k: usize,
    ) -> Self {
        Self {
            index,
            model,
            prompt_template: prompt_template.into(),
            k,
        }
    }

    #[inline]
    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    /// Run every stage in order, merging each update before the next stage.
    /// The first failing stage aborts the run.
    #[inline]
    pub fn invoke(&self, mut state: WorkflowState) -> Result<WorkflowState> {
        for stage in Self::STAGES {
            debug!("Running stage {}", stage);
            let update = self.run_stage(stage, &state)?;
            state.apply(update);
        }
        Ok(state)
    }

    /// Answer a single question with a fresh state
    #[inline]
    pub fn answer(&self, question: &str) -> Result<String> {
        let state = self.invoke(WorkflowState::new(question))?;
        Ok(state.answer.unwrap_or_default())
    }

    #[inline]
    pub fn run_stage(&self, stage: Stage, state: &WorkflowState) -> Result<StateUpdate> {
        match stage {
            Stage::Classify => Ok(classify(state)),
            Stage::Retrieve => self.retrieve(state),
            Stage::Generate => self.generate(state),
            Stage::Refine => Ok(refine(state)),
        }
    }

    fn retrieve(&self, state: &WorkflowState) -> Result<StateUpdate> {
        let context = self.index.search(&state.question, self.k)?;
        info!("Retrieved {} chunks", context.len());
        Ok(StateUpdate {
            context: Some(context),
            ..StateUpdate::default()
        })
    }

    fn generate(&self, state: &WorkflowState) -> Result<StateUpdate> {
        let context_block = state.context.iter().map(|c| c.text.as_str()).join("\n\n");
        let prompt = fill_prompt(&self.prompt_template, &state.question, &context_block);

        let answer = self.model.generate(&prompt)?;
        if answer.trim().is_empty() {
            return Err(RagError::Generation(format!(
                "{} returned no content",
                self.model.model()
            )));
        }

        Ok(StateUpdate {
            answer: Some(answer),
            ..StateUpdate::default()
        })
    }

    /// Graphviz rendering of the stage graph
    #[inline]
    pub fn to_dot() -> String {
        let nodes = std::iter::once(START_NODE)
            .chain(Self::STAGES.iter().map(|stage| stage.name()))
            .chain(std::iter::once(END_NODE));

        let mut lines = vec!["digraph workflow {".to_string(), "    rankdir=LR;".to_string()];
        lines.push(format!("    \"{}\" [shape=circle];", START_NODE));
        lines.extend(
            Self::STAGES
                .iter()
                .map(|stage| format!("    \"{}\" [shape=box, style=rounded];", stage)),
        );
        lines.push(format!("    \"{}\" [shape=doublecircle];", END_NODE));
        lines.extend(
            nodes
                .tuple_windows()
                .map(|(from, to)| format!("    \"{}\" -> \"{}\";", from, to)),
        );
        lines.push("}".to_string());

        lines.join("\n") + "\n"
    }
}

/// Single route for now; the hint is only logged
fn classify(state: &WorkflowState) -> StateUpdate {
    let advanced = state.question.to_lowercase().contains("advanced");
    debug!("Routing hint: advanced={}", advanced);
    StateUpdate {
        question: Some(state.question.clone()),
        ..StateUpdate::default()
    }
}

fn refine(state: &WorkflowState) -> StateUpdate {
    let answer = state.answer.as_deref().unwrap_or_default();
    StateUpdate {
        answer: Some(format!("{}{}", answer, REFINEMENT_MARKER)),
        ..StateUpdate::default()
    }
}

/// Substitute `{question}` and `{context}` in one pass, so placeholder-like
/// text inside either value is left alone.
pub(crate) fn fill_prompt(template: &str, question: &str, context: &str) -> String {
    template
        .split("{context}")
        .map(|part| part.replace("{question}", question))
        .join(context)
}
