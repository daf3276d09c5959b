//! UI Trail - record an automation agent's walk through a web UI as a
//! step-by-step dataset.
//!
//! This crate provides:
//! - A task loop that drives any [`AutomationAgent`] until it is done or out of budget
//! - A capture policy that keeps transitions and drops noise
//! - Incremental persistence of steps, screenshots and run metadata
//! - Markdown walkthroughs, written from templates or by an LLM
//!
//! # Example
//!
//! ```rust,no_run
//! use ui_trail::{RunConfig, ScriptFrame, ScriptedAgent, TaskOrchestrator, TemplateNarrator};
//!
//! let agent = ScriptedAgent::new(vec![
//!     ScriptFrame::new("https://example.com/", "Home").done(),
//! ]);
//! let mut orchestrator = TaskOrchestrator::new(agent, TemplateNarrator::new(), RunConfig::new("outputs"));
//! let outcome = orchestrator.run("open the home page").unwrap();
//! println!("{} -> {}", outcome.task_run.status, outcome.artifact_dir.display());
//! ```

pub mod agent;
pub mod arbiter;
pub mod capture;
pub mod config;
pub mod logging;
pub mod model;
pub mod narrative;
pub mod orchestrator;
pub mod store;

// Re-export the agent boundary
pub use agent::{
    AgentSession, AutomationAgent, AutomationError, AutomationResult, DriverAgent, DriverConfig,
    ScriptFrame, ScriptedAgent,
};

// Re-export capture policy
pub use arbiter::{CaptureArbiter, CaptureContext, CaptureDecision, CaptureReason, CaptureSlot};

// Re-export data model
pub use model::{Action, ActionType, ObservedState, RunOutcome, Step, TaskRun, TaskStatus};

// Re-export narrative generation
pub use narrative::{
    LlmConfig, LlmNarrator, NarrativeError, NarrativeGenerator, NarrativeResult, StepNote,
    TemplateNarrator,
};

// Re-export the task loop
pub use orchestrator::{RunConfig, RunError, TaskOrchestrator};

// Re-export persistence
pub use store::{ArtifactStore, PersistenceError, PersistenceResult, cleanup_old_runs, list_runs};
