//! Task orchestrator: drives an agent to completion or budget exhaustion.
//!
//! Each iteration advances the agent once, observes the result and lets the
//! [`CaptureArbiter`] decide whether it becomes a persisted [`Step`]. The
//! loop ends on the agent's done signal (`success`), after `max_steps`
//! iterations (`timeout`) or on the first automation or persistence error
//! (`failure`). The agent session is released before the walkthrough is
//! generated, whatever the outcome.

use chrono::Utc;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn};

use crate::agent::{AgentSession, AutomationAgent, AutomationError};
use crate::arbiter::{CaptureArbiter, CaptureContext, CaptureDecision};
use crate::config;
use crate::model::{Action, ObservedState, RunOutcome, Step, TaskRun, TaskStatus};
use crate::narrative::NarrativeGenerator;
use crate::store::{ArtifactStore, PersistenceError};

/// Errors that prevent a run from producing a finalized `TaskRun`
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Task instruction is empty")]
    EmptyInstruction,

    #[error("max_steps must be at least 1 (got {0})")]
    InvalidBudget(usize),

    #[error("Run already finalized as {0}")]
    AlreadyFinalized(TaskStatus),

    #[error("Cannot finalize a run as {0}")]
    NonTerminalStatus(TaskStatus),
}

/// Anything that ends the loop early
#[derive(Debug, Error)]
enum IterationError {
    #[error(transparent)]
    Automation(#[from] AutomationError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Iteration budget, at least 1
    pub max_steps: usize,

    /// Base directory; each run gets its own timestamped subdirectory
    pub output_dir: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        let cfg = config::get();
        Self {
            max_steps: cfg.run.max_steps,
            output_dir: cfg.run.output_dir.clone(),
        }
    }
}

impl RunConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            ..Default::default()
        }
    }

    pub fn max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }
}

/// How the loop ended
struct LoopOutcome {
    status: TaskStatus,
    steps: Vec<Step>,
    failure: Option<String>,
}

pub struct TaskOrchestrator<A, N> {
    agent: A,
    narrator: N,
    config: RunConfig,
}

impl<A: AutomationAgent, N: NarrativeGenerator> TaskOrchestrator<A, N> {
    pub fn new(agent: A, narrator: N, config: RunConfig) -> Self {
        Self {
            agent,
            narrator,
            config,
        }
    }

    pub fn agent(&self) -> &A {
        &self.agent
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run one task end to end.
    ///
    /// Returns `Err` only for bad arguments. Automation and persistence
    /// failures, including an uncreatable run directory, come back as a
    /// finalized run with status `failure`.
    pub fn run(&mut self, task_instruction: &str) -> Result<RunOutcome, RunError> {
        let task = task_instruction.trim();
        if task.is_empty() {
            return Err(RunError::EmptyInstruction);
        }
        if self.config.max_steps == 0 {
            return Err(RunError::InvalidBudget(self.config.max_steps));
        }

        let mut task_run = TaskRun::start(task, self.agent.name());
        let span = info_span!("run", task_id = %task_run.task_id);
        let _enter = span.enter();

        let store = match ArtifactStore::create(&self.config.output_dir, task_run.start_time) {
            Ok(store) => store,
            Err(e) => {
                // Nothing to write into, so the agent is never started
                error!(error = %e, "cannot create run directory");
                let artifact_dir = ArtifactStore::run_dir(&self.config.output_dir, task_run.start_time);
                task_run.finalize(TaskStatus::Failure, 0)?;
                return Ok(RunOutcome {
                    task_run,
                    artifact_dir,
                    tutorial_path: None,
                    narrative_error: Some("no run directory to write the walkthrough to".to_string()),
                    failure: Some(e.to_string()),
                });
            }
        };

        info!(
            task = %task,
            agent = %task_run.agent,
            max_steps = self.config.max_steps,
            dir = %store.dir().display(),
            "starting run"
        );

        let LoopOutcome {
            status,
            steps,
            mut failure,
        } = self.drive(&store, task);
        let total_steps = steps.len();

        let mut finalized = task_run.clone();
        finalized.finalize(status, total_steps)?;
        match store.write_metadata(&finalized) {
            Ok(_) => task_run = finalized,
            Err(e) => {
                error!(error = %e, "failed to write run metadata");
                failure.get_or_insert_with(|| e.to_string());
                task_run.finalize(TaskStatus::Failure, total_steps)?;
                if let Err(e) = store.write_metadata(&task_run) {
                    error!(error = %e, "retrying metadata write failed");
                }
            }
        }

        info!(
            status = %task_run.status,
            steps = total_steps,
            "run finished"
        );

        let (tutorial_path, narrative_error) = self.narrate(&store, &task_run, &steps);

        Ok(RunOutcome {
            task_run,
            artifact_dir: store.dir().to_path_buf(),
            tutorial_path,
            narrative_error,
            failure,
        })
    }

    /// The capture loop. The agent session lives exactly as long as this call.
    fn drive(&mut self, store: &ArtifactStore, task: &str) -> LoopOutcome {
        let max_steps = self.config.max_steps;
        let mut arbiter = CaptureArbiter::new();
        let mut steps = Vec::new();

        let mut session = match AgentSession::open(&mut self.agent, task) {
            Ok(session) => session,
            Err(e) => {
                error!(error = %e, "agent failed to start");
                return LoopOutcome {
                    status: TaskStatus::Failure,
                    steps,
                    failure: Some(e.to_string()),
                };
            }
        };

        let mut status = TaskStatus::Timeout;
        let mut failure = None;

        for iteration in 1..=max_steps {
            debug!(iteration, max_steps, "advancing agent");
            match iterate(&mut *session, &mut arbiter, store, task, iteration, max_steps) {
                Ok(Iteration { done, step }) => {
                    if let Some(step) = step {
                        steps.push(step);
                    }
                    if done {
                        info!(iteration, "agent reported the task done");
                        status = TaskStatus::Success;
                        break;
                    }
                }
                Err(e) => {
                    error!(iteration, error = %e, "run failed");
                    status = TaskStatus::Failure;
                    failure = Some(e.to_string());
                    break;
                }
            }
        }

        if status == TaskStatus::Timeout {
            warn!(max_steps, "budget exhausted without a done signal");
        }

        drop(session);
        LoopOutcome {
            status,
            steps,
            failure,
        }
    }

    /// Generate and write the walkthrough. Failures are reported, never raised.
    fn narrate(
        &self,
        store: &ArtifactStore,
        task_run: &TaskRun,
        steps: &[Step],
    ) -> (Option<PathBuf>, Option<String>) {
        let written = self
            .narrator
            .generate(task_run, steps)
            .map_err(|e| e.to_string())
            .and_then(|markdown| store.write_tutorial(&markdown).map_err(|e| e.to_string()));

        match written {
            Ok(path) => {
                info!(path = %path.display(), "walkthrough written");
                (Some(path), None)
            }
            Err(e) => {
                warn!(error = %e, "walkthrough not generated");
                (None, Some(e))
            }
        }
    }
}

struct Iteration {
    done: bool,
    step: Option<Step>,
}

fn iterate<A: AutomationAgent + ?Sized>(
    agent: &mut A,
    arbiter: &mut CaptureArbiter,
    store: &ArtifactStore,
    task: &str,
    iteration: usize,
    max_steps: usize,
) -> Result<Iteration, IterationError> {
    agent.advance()?;
    let state = agent.observe_state()?;
    let action = agent.last_action()?;
    let done = agent.is_done();

    let ctx = CaptureContext {
        is_initial: iteration == 1,
        is_final: done || iteration == max_steps,
        url: state.url_or_empty(),
        action: action.as_ref(),
    };

    let CaptureDecision::Capture(reason) = arbiter.decide(&ctx) else {
        debug!(
            iteration,
            action = action.as_ref().map(|a| a.action_type.as_str()).unwrap_or("none"),
            "skipping iteration"
        );
        return Ok(Iteration { done, step: None });
    };

    let slot = arbiter.record(state.url_or_empty());
    let step = Step {
        step_index: slot.step_index,
        screenshot_path: ArtifactStore::screenshot_name(slot.step_index),
        url: state.url_or_empty().to_string(),
        has_unique_url: slot.has_unique_url,
        state_description: describe_state(&state, action.as_ref(), task, slot.step_index, iteration, done),
        // The first step has nothing before it
        action_from_previous: action.filter(|_| slot.step_index > 0),
        timestamp: Utc::now(),
    };
    store.write_step(&step, state.screenshot.as_deref())?;

    info!(
        iteration,
        step = step.step_index,
        reason = reason.as_str(),
        url = %step.url,
        unique = step.has_unique_url,
        "captured step"
    );
    Ok(Iteration {
        done,
        step: Some(step),
    })
}

/// The agent's own description, or one synthesized from what happened
fn describe_state(
    state: &ObservedState,
    action: Option<&Action>,
    task: &str,
    step_index: usize,
    iteration: usize,
    done: bool,
) -> String {
    let own = state.description.trim();
    if !own.is_empty() {
        return own.to_string();
    }
    if step_index == 0 {
        return format!("Initial state: {}", task);
    }
    if done {
        return "Task completed successfully".to_string();
    }
    match action {
        Some(action) => format!("After {}: {}", action.action_type, action.description),
        None => format!("Step {} - {}", iteration, state.url_or_empty()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{ScriptFrame, ScriptedAgent};
    use crate::model::ActionType;
    use crate::narrative::TemplateNarrator;

    fn orchestrator(
        frames: Vec<ScriptFrame>,
        max_steps: usize,
        base: &std::path::Path,
    ) -> TaskOrchestrator<ScriptedAgent, TemplateNarrator> {
        TaskOrchestrator::new(
            ScriptedAgent::new(frames).without_screenshots(),
            TemplateNarrator::new(),
            RunConfig::new(base).max_steps(max_steps),
        )
    }

    #[test]
    fn test_rejects_empty_instruction() {
        let base = tempfile::tempdir().unwrap();
        let mut orch = orchestrator(vec![ScriptFrame::new("https://a.test/", "")], 3, base.path());
        assert!(matches!(orch.run("   "), Err(RunError::EmptyInstruction)));
        assert_eq!(orch.agent().release_count(), 0);
    }

    #[test]
    fn test_rejects_zero_budget() {
        let base = tempfile::tempdir().unwrap();
        let mut orch = orchestrator(vec![ScriptFrame::new("https://a.test/", "")], 0, base.path());
        assert!(matches!(orch.run("task"), Err(RunError::InvalidBudget(0))));
    }

    #[test]
    fn test_initialize_failure_is_finalized_failure() {
        let base = tempfile::tempdir().unwrap();
        let mut orch = orchestrator(Vec::new(), 3, base.path());
        let outcome = orch.run("open settings").unwrap();
        assert_eq!(outcome.task_run.status, TaskStatus::Failure);
        assert_eq!(outcome.task_run.total_steps, 0);
        assert!(outcome.failure.unwrap().contains("no frames"));
        assert!(outcome.artifact_dir.join("task_metadata.json").exists());
        assert_eq!(orch.agent().release_count(), 1);
    }

    #[test]
    fn test_synthesized_descriptions() {
        let state = ObservedState::new("https://a.test/x", "");
        let click = Action::new(ActionType::Click, "Click on 'Save'");

        assert_eq!(describe_state(&state, None, "save it", 0, 1, false), "Initial state: save it");
        assert_eq!(
            describe_state(&state, Some(&click), "save it", 2, 4, false),
            "After click: Click on 'Save'"
        );
        assert_eq!(describe_state(&state, None, "save it", 2, 4, false), "Step 4 - https://a.test/x");
        assert_eq!(
            describe_state(&state, Some(&click), "save it", 3, 5, true),
            "Task completed successfully"
        );

        let described = ObservedState::new("https://a.test/x", "Saved dialog");
        assert_eq!(describe_state(&described, None, "save it", 0, 1, true), "Saved dialog");
    }
}
