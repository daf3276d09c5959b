//! Walkthrough text for a finished run.
//!
//! A [`NarrativeGenerator`] turns the ordered steps of a run into markdown.
//! Failures here never affect the run's status; the orchestrator only
//! reports them.

pub mod llm;
pub mod template;

pub use llm::{LlmConfig, LlmNarrator};
pub use template::{TemplateNarrator, render_tutorial};

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::model::{Step, TaskRun};

pub type NarrativeResult<T> = Result<T, NarrativeError>;

#[derive(Debug, Error)]
pub enum NarrativeError {
    #[error("Narrative endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("Narrative request failed: {0}")]
    Request(String),

    #[error("Invalid narrative response: {0}")]
    InvalidResponse(String),

    #[error("No response from narrative endpoint for {0:?}")]
    ActivityTimeout(Duration),

    #[error("Narrative I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Produces human-readable walkthrough text from a run's steps
pub trait NarrativeGenerator {
    /// Render markdown for `steps`, which are in `step_index` order and carry
    /// screenshot paths relative to the run directory.
    fn generate(&self, run: &TaskRun, steps: &[Step]) -> NarrativeResult<String>;
}

impl<N: NarrativeGenerator + ?Sized> NarrativeGenerator for Box<N> {
    fn generate(&self, run: &TaskRun, steps: &[Step]) -> NarrativeResult<String> {
        (**self).generate(run, steps)
    }
}

/// Per-step wording that overrides the inferred instruction and context
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepNote {
    pub instruction: String,

    /// What the reader should see after following the instruction
    #[serde(default)]
    pub context: Option<String>,
}
