//! Deterministic agent that walks a fixed list of frames.
//!
//! Each call to `advance()` moves to the next frame. Frames can mark the
//! task done or inject a failure, which makes this the backend for dry
//! runs (`ui-trail run --script plan.json`) and for exercising the loop in
//! tests without a browser.
//!
//! ```json
//! [
//!   {"url": "https://app.test/", "description": "Home", "action": {"type": "navigate", "description": "Navigate to app.test"}},
//!   {"url": "https://app.test/new", "description": "Editor", "action": {"type": "click", "description": "Click on 'New page'"}, "done": true}
//! ]
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{AutomationAgent, AutomationError, AutomationResult};
use crate::capture::render_placeholder;
use crate::model::{Action, ObservedState};

/// One scripted unit of work and the state it leaves behind
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptFrame {
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub action: Option<Action>,

    /// Agent reports the task complete after this frame
    #[serde(default)]
    pub done: bool,

    /// `advance()` into this frame fails with this message
    #[serde(default)]
    pub fail: Option<String>,
}

impl ScriptFrame {
    pub fn new(url: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }

    pub fn done(mut self) -> Self {
        self.done = true;
        self
    }

    pub fn fail(mut self, message: impl Into<String>) -> Self {
        self.fail = Some(message.into());
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedAgent {
    frames: Vec<ScriptFrame>,
    /// Index of the current frame, None before the first advance
    cursor: Option<usize>,
    initialized: bool,
    /// Render a placeholder screenshot for every frame
    render_screenshots: bool,
    release_count: usize,
}

impl ScriptedAgent {
    pub fn new(frames: Vec<ScriptFrame>) -> Self {
        Self {
            frames,
            render_screenshots: true,
            ..Default::default()
        }
    }

    /// Load frames from a JSON array on disk
    pub fn from_file(path: &Path) -> AutomationResult<Self> {
        let data = std::fs::read_to_string(path)?;
        let frames: Vec<ScriptFrame> = serde_json::from_str(&data).map_err(|e| {
            AutomationError::Initialize(format!("Invalid script {}: {}", path.display(), e))
        })?;
        Ok(Self::new(frames))
    }

    /// Skip screenshot rendering (leave it to the artifact store)
    pub fn without_screenshots(mut self) -> Self {
        self.render_screenshots = false;
        self
    }

    /// Number of times `release()` has been called
    pub fn release_count(&self) -> usize {
        self.release_count
    }

    fn current(&self) -> Option<&ScriptFrame> {
        self.cursor.and_then(|i| self.frames.get(i))
    }
}

impl AutomationAgent for ScriptedAgent {
    fn name(&self) -> &str {
        "scripted"
    }

    fn initialize(&mut self, _task_instruction: &str) -> AutomationResult<()> {
        if self.frames.is_empty() {
            return Err(AutomationError::Initialize("script has no frames".to_string()));
        }
        self.cursor = None;
        self.initialized = true;
        Ok(())
    }

    fn advance(&mut self) -> AutomationResult<()> {
        if !self.initialized {
            return Err(AutomationError::Advance("agent not initialized".to_string()));
        }
        let next = self.cursor.map_or(0, |i| i + 1);
        let frame = self.frames.get(next).ok_or_else(|| {
            AutomationError::Advance(format!("script exhausted after {} frames", self.frames.len()))
        })?;
        if let Some(message) = &frame.fail {
            return Err(AutomationError::Advance(message.clone()));
        }
        self.cursor = Some(next);
        Ok(())
    }

    fn observe_state(&mut self) -> AutomationResult<ObservedState> {
        let frame = self
            .current()
            .ok_or_else(|| AutomationError::Observe("no frame has been reached yet".to_string()))?;
        let mut state = ObservedState {
            url: frame.url.clone(),
            description: frame.description.clone(),
            screenshot: None,
        };
        if self.render_screenshots {
            let png = render_placeholder(state.url_or_empty(), &state.description)
                .map_err(|e| AutomationError::Observe(e.to_string()))?;
            state.screenshot = Some(png);
        }
        Ok(state)
    }

    fn last_action(&mut self) -> AutomationResult<Option<Action>> {
        Ok(self.current().and_then(|f| f.action.clone()))
    }

    fn is_done(&self) -> bool {
        self.current().is_some_and(|f| f.done)
    }

    fn release(&mut self) {
        self.initialized = false;
        self.release_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ActionType;

    #[test]
    fn test_walks_frames_in_order() {
        let mut agent = ScriptedAgent::new(vec![
            ScriptFrame::new("https://app.test/", "Home"),
            ScriptFrame::new("https://app.test/new", "Editor")
                .action(Action::new(ActionType::Click, "Click on 'New'"))
                .done(),
        ])
        .without_screenshots();

        agent.initialize("make a page").unwrap();
        agent.advance().unwrap();
        assert_eq!(agent.observe_state().unwrap().url.as_deref(), Some("https://app.test/"));
        assert!(agent.last_action().unwrap().is_none());
        assert!(!agent.is_done());

        agent.advance().unwrap();
        let state = agent.observe_state().unwrap();
        assert_eq!(state.description, "Editor");
        assert!(state.screenshot.is_none());
        assert_eq!(agent.last_action().unwrap().unwrap().action_type, ActionType::Click);
        assert!(agent.is_done());

        assert!(agent.advance().is_err());
    }

    #[test]
    fn test_failure_frame() {
        let mut agent = ScriptedAgent::new(vec![
            ScriptFrame::new("https://app.test/", "Home"),
            ScriptFrame::default().fail("element not found"),
        ]);
        agent.initialize("task").unwrap();
        agent.advance().unwrap();
        let err = agent.advance().unwrap_err();
        assert!(err.to_string().contains("element not found"));
    }

    #[test]
    fn test_renders_screenshots_by_default() {
        let mut agent = ScriptedAgent::new(vec![ScriptFrame::new("https://app.test/", "Home")]);
        agent.initialize("task").unwrap();
        agent.advance().unwrap();
        let png = agent.observe_state().unwrap().screenshot.unwrap();
        assert_eq!(&png[0..4], &[0x89, 0x50, 0x4E, 0x47]);
    }

    #[test]
    fn test_parses_script_json() {
        let frames: Vec<ScriptFrame> = serde_json::from_str(
            r#"[{"url": "https://app.test/", "action": {"type": "scroll", "description": "Scroll down"}, "done": true}]"#,
        )
        .unwrap();
        assert_eq!(frames[0].action.as_ref().unwrap().action_type, ActionType::Scroll);
        assert!(frames[0].done);
        assert!(frames[0].description.is_empty());
    }
}
