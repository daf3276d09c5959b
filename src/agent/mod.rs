//! Automation agent boundary.
//!
//! The orchestrator only ever talks to an [`AutomationAgent`]; the browser,
//! the LLM choosing actions and the element lookup all live behind it.
//! [`AgentSession`] scopes a session so `release()` runs on every exit path.

pub mod driver;
pub mod scripted;

pub use driver::{DriverAgent, DriverConfig};
pub use scripted::{ScriptFrame, ScriptedAgent};

use std::ops::{Deref, DerefMut};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{Action, ObservedState};

pub type AutomationResult<T> = Result<T, AutomationError>;

/// Errors raised by an automation backend. All are fatal to the run.
#[derive(Debug, Error)]
pub enum AutomationError {
    #[error("Agent initialization failed: {0}")]
    Initialize(String),

    #[error("Agent step failed: {0}")]
    Advance(String),

    #[error("Failed to observe state: {0}")]
    Observe(String),

    #[error("Driver protocol error: {0}")]
    Protocol(String),

    #[error("No response from agent for {0:?}")]
    Timeout(Duration),

    #[error("Agent I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One unit of UI automation at a time, plus what it can report.
pub trait AutomationAgent {
    /// Short backend name recorded in task metadata
    fn name(&self) -> &str;

    /// Prepare a session for the given task
    fn initialize(&mut self, task_instruction: &str) -> AutomationResult<()>;

    /// Perform one unit of work (usually one action)
    fn advance(&mut self) -> AutomationResult<()>;

    /// Report the current observable state
    fn observe_state(&mut self) -> AutomationResult<ObservedState>;

    /// The action just taken, if any. Failing to report it is as fatal as
    /// failing to take it.
    fn last_action(&mut self) -> AutomationResult<Option<Action>>;

    fn is_done(&self) -> bool;

    /// Best-effort cleanup. Must be idempotent and must not panic.
    fn release(&mut self);
}

impl<A: AutomationAgent + ?Sized> AutomationAgent for Box<A> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn initialize(&mut self, task_instruction: &str) -> AutomationResult<()> {
        (**self).initialize(task_instruction)
    }

    fn advance(&mut self) -> AutomationResult<()> {
        (**self).advance()
    }

    fn observe_state(&mut self) -> AutomationResult<ObservedState> {
        (**self).observe_state()
    }

    fn last_action(&mut self) -> AutomationResult<Option<Action>> {
        (**self).last_action()
    }

    fn is_done(&self) -> bool {
        (**self).is_done()
    }

    fn release(&mut self) {
        (**self).release()
    }
}

/// An initialized agent session. Dropping it releases the agent.
pub struct AgentSession<'a, A: AutomationAgent + ?Sized> {
    agent: &'a mut A,
}

impl<'a, A: AutomationAgent + ?Sized> AgentSession<'a, A> {
    /// Initialize the agent for a task. The agent is released even when
    /// initialization itself fails.
    pub fn open(agent: &'a mut A, task_instruction: &str) -> AutomationResult<Self> {
        // Guard first so a failed initialize still releases
        let mut session = Self { agent };
        session.agent.initialize(task_instruction)?;
        debug!(agent = session.agent.name(), "agent session opened");
        Ok(session)
    }
}

impl<A: AutomationAgent + ?Sized> Deref for AgentSession<'_, A> {
    type Target = A;

    fn deref(&self) -> &A {
        self.agent
    }
}

impl<A: AutomationAgent + ?Sized> DerefMut for AgentSession<'_, A> {
    fn deref_mut(&mut self) -> &mut A {
        self.agent
    }
}

impl<A: AutomationAgent + ?Sized> Drop for AgentSession<'_, A> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            warn!(agent = self.agent.name(), "releasing agent while unwinding");
        }
        self.agent.release();
        debug!(agent = self.agent.name(), "agent session released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CountingAgent {
        fail_init: bool,
        releases: usize,
    }

    impl AutomationAgent for CountingAgent {
        fn name(&self) -> &str {
            "counting"
        }

        fn initialize(&mut self, _task: &str) -> AutomationResult<()> {
            if self.fail_init {
                return Err(AutomationError::Initialize("no browser".to_string()));
            }
            Ok(())
        }

        fn advance(&mut self) -> AutomationResult<()> {
            Ok(())
        }

        fn observe_state(&mut self) -> AutomationResult<ObservedState> {
            Ok(ObservedState::default())
        }

        fn last_action(&mut self) -> AutomationResult<Option<Action>> {
            Ok(None)
        }

        fn is_done(&self) -> bool {
            false
        }

        fn release(&mut self) {
            self.releases += 1;
        }
    }

    #[test]
    fn test_session_releases_on_drop() {
        let mut agent = CountingAgent::default();
        {
            let mut session = AgentSession::open(&mut agent, "task").unwrap();
            session.advance().unwrap();
        }
        assert_eq!(agent.releases, 1);
    }

    #[test]
    fn test_session_releases_when_initialize_fails() {
        let mut agent = CountingAgent {
            fail_init: true,
            ..Default::default()
        };
        let result = AgentSession::open(&mut agent, "task");
        assert!(matches!(result, Err(AutomationError::Initialize(_))));
        drop(result);
        assert_eq!(agent.releases, 1);
    }

    #[test]
    fn test_session_releases_on_panic() {
        let mut agent = CountingAgent::default();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _session = AgentSession::open(&mut agent, "task").unwrap();
            panic!("loop blew up");
        }));
        assert!(outcome.is_err());
        assert_eq!(agent.releases, 1);
    }
}
