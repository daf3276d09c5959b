//! Types for task runs and the steps captured along the way.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::orchestrator::RunError;

/// Status of a task run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Loop still running; never visible after `run()` returns
    #[default]
    InProgress,
    /// Agent signalled done before the budget ran out
    Success,
    /// Budget exhausted without a done signal
    Timeout,
    /// Automation or persistence error ended the run
    Failure,
}

impl TaskStatus {
    /// Returns true if the status can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Timeout | Self::Failure)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Success => "success",
            Self::Timeout => "timeout",
            Self::Failure => "failure",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of interaction the agent performed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Click,
    Type,
    Navigate,
    Scroll,
    Wait,
    Other,
}

impl ActionType {
    /// Whether this kind of action is worth a capture on its own.
    pub fn is_significant(&self) -> bool {
        match self {
            ActionType::Click | ActionType::Type | ActionType::Navigate => true,
            ActionType::Scroll | ActionType::Wait | ActionType::Other => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Click => "click",
            ActionType::Type => "type",
            ActionType::Navigate => "navigate",
            ActionType::Scroll => "scroll",
            ActionType::Wait => "wait",
            ActionType::Other => "other",
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The action that led to an observed state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub action_type: ActionType,

    /// Natural language description of the action
    pub description: String,

    /// Index of the element interacted with, when the agent reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_index: Option<u32>,
}

impl Action {
    pub fn new(action_type: ActionType, description: impl Into<String>) -> Self {
        Self {
            action_type,
            description: description.into(),
            element_index: None,
        }
    }

    pub fn element(mut self, index: u32) -> Self {
        self.element_index = Some(index);
        self
    }
}

/// What the automation agent reports about the current UI
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObservedState {
    /// Location of the page, if the state is addressable
    pub url: Option<String>,

    /// Short summary of the state (may be empty)
    pub description: String,

    /// PNG-encoded screenshot, if the agent captured one
    pub screenshot: Option<Vec<u8>>,
}

impl ObservedState {
    pub fn new(url: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            description: description.into(),
            screenshot: None,
        }
    }

    pub fn with_screenshot(mut self, png: Vec<u8>) -> Self {
        self.screenshot = Some(png);
        self
    }

    /// URL as compared by the capture policy (absent reads as empty)
    pub fn url_or_empty(&self) -> &str {
        self.url.as_deref().unwrap_or("")
    }
}

/// A single persisted UI state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Zero-based, contiguous across the run
    pub step_index: usize,

    /// Screenshot path relative to the run directory
    pub screenshot_path: PathBuf,

    pub url: String,

    /// True if no earlier step of this run had the same URL
    pub has_unique_url: bool,

    /// Action that led here (None for the first step)
    pub action_from_previous: Option<Action>,

    pub state_description: String,

    pub timestamp: DateTime<Utc>,
}

/// Metadata for one end-to-end automation attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRun {
    pub task_id: String,

    pub task_instruction: String,

    pub status: TaskStatus,

    pub start_time: DateTime<Utc>,

    pub end_time: Option<DateTime<Utc>>,

    pub total_steps: usize,

    /// Automation backend that drove the run
    pub agent: String,

    /// Machine the run executed on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl TaskRun {
    /// Start a new run in `IN_PROGRESS`
    pub fn start(task_instruction: impl Into<String>, agent: impl Into<String>) -> Self {
        Self {
            task_id: format!("task_{}", uuid::Uuid::new_v4().simple()),
            task_instruction: task_instruction.into(),
            status: TaskStatus::InProgress,
            start_time: Utc::now(),
            end_time: None,
            total_steps: 0,
            agent: agent.into(),
            host: hostname::get()
                .ok()
                .map(|h| h.to_string_lossy().into_owned()),
        }
    }

    /// Move to a terminal status. Allowed exactly once.
    pub fn finalize(&mut self, status: TaskStatus, total_steps: usize) -> Result<(), RunError> {
        if self.status.is_terminal() {
            return Err(RunError::AlreadyFinalized(self.status));
        }
        if !status.is_terminal() {
            return Err(RunError::NonTerminalStatus(status));
        }
        // Clock skew must not produce end < start
        let now = Utc::now();
        self.end_time = Some(now.max(self.start_time));
        self.total_steps = total_steps;
        self.status = status;
        Ok(())
    }

    pub fn is_finalized(&self) -> bool {
        self.status.is_terminal()
    }
}

/// What the caller gets back from a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub task_run: TaskRun,

    /// Directory holding the step, metadata and tutorial artifacts
    pub artifact_dir: PathBuf,

    /// Path to `tutorial.md`, absent when generation failed
    pub tutorial_path: Option<PathBuf>,

    /// Why the walkthrough is missing, if it is
    pub narrative_error: Option<String>,

    /// Why the run failed, if it did
    pub failure: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&TaskStatus::InProgress).unwrap(), "\"in_progress\"");
        assert_eq!(serde_json::to_string(&TaskStatus::Timeout).unwrap(), "\"timeout\"");
    }

    #[test]
    fn test_action_serializes_type_field() {
        let action = Action::new(ActionType::Click, "Click on 'New page'").element(7);
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["type"], "click");
        assert_eq!(json["element_index"], 7);
    }

    #[test]
    fn test_significant_actions() {
        assert!(ActionType::Click.is_significant());
        assert!(ActionType::Type.is_significant());
        assert!(ActionType::Navigate.is_significant());
        assert!(!ActionType::Scroll.is_significant());
        assert!(!ActionType::Wait.is_significant());
        assert!(!ActionType::Other.is_significant());
    }

    #[test]
    fn test_finalize_once() {
        let mut run = TaskRun::start("open settings", "scripted");
        assert_eq!(run.status, TaskStatus::InProgress);

        run.finalize(TaskStatus::Success, 3).unwrap();
        assert_eq!(run.status, TaskStatus::Success);
        assert_eq!(run.total_steps, 3);
        assert!(run.end_time.unwrap() >= run.start_time);

        let again = run.finalize(TaskStatus::Failure, 0);
        assert!(matches!(again, Err(RunError::AlreadyFinalized(TaskStatus::Success))));
        assert_eq!(run.status, TaskStatus::Success);
        assert_eq!(run.total_steps, 3);
    }

    #[test]
    fn test_finalize_rejects_in_progress() {
        let mut run = TaskRun::start("open settings", "scripted");
        assert!(run.finalize(TaskStatus::InProgress, 0).is_err());
        assert!(run.end_time.is_none());
    }
}
