//! Capture policy deciding which observed states become persisted steps.
//!
//! Rules, first match wins:
//! 1. first iteration
//! 2. final iteration (agent done, or budget exhausted)
//! 3. URL differs from the last *persisted* step
//! 4. action is a click, type or navigate
//! 5. otherwise skip
//!
//! The arbiter owns the only cross-iteration capture state (last persisted
//! URL, every URL seen so far, next step index). One instance per run.

use std::collections::HashSet;

use crate::model::{Action, ActionType};

/// Everything the arbiter needs to judge one iteration
#[derive(Debug, Clone, Copy)]
pub struct CaptureContext<'a> {
    pub is_initial: bool,
    pub is_final: bool,
    /// Observed URL (empty for non-addressable states)
    pub url: &'a str,
    pub action: Option<&'a Action>,
}

/// Why a moment was captured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureReason {
    Initial,
    Final,
    UrlChanged,
    SignificantAction(ActionType),
}

impl CaptureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureReason::Initial => "initial",
            CaptureReason::Final => "final",
            CaptureReason::UrlChanged => "url_changed",
            CaptureReason::SignificantAction(_) => "significant_action",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureDecision {
    Capture(CaptureReason),
    Skip,
}

impl CaptureDecision {
    pub fn should_capture(&self) -> bool {
        matches!(self, CaptureDecision::Capture(_))
    }
}

/// Index and URL uniqueness assigned to a step at persistence time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSlot {
    pub step_index: usize,
    pub has_unique_url: bool,
}

#[derive(Debug, Default)]
pub struct CaptureArbiter {
    last_persisted_url: Option<String>,
    seen_urls: HashSet<String>,
    next_index: usize,
}

impl CaptureArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether this iteration should be captured. Does not mutate.
    pub fn decide(&self, ctx: &CaptureContext<'_>) -> CaptureDecision {
        if ctx.is_initial {
            return CaptureDecision::Capture(CaptureReason::Initial);
        }
        if ctx.is_final {
            return CaptureDecision::Capture(CaptureReason::Final);
        }
        if let Some(last) = &self.last_persisted_url {
            if last != ctx.url {
                return CaptureDecision::Capture(CaptureReason::UrlChanged);
            }
        }
        match ctx.action.map(|a| a.action_type) {
            Some(kind @ (ActionType::Click | ActionType::Type | ActionType::Navigate)) => {
                CaptureDecision::Capture(CaptureReason::SignificantAction(kind))
            }
            Some(ActionType::Scroll | ActionType::Wait | ActionType::Other) | None => {
                CaptureDecision::Skip
            }
        }
    }

    /// Claim the next step slot for a state that is about to be persisted.
    ///
    /// Call only once the step is actually going to disk; skipped
    /// iterations must not consume an index.
    pub fn record(&mut self, url: &str) -> CaptureSlot {
        let has_unique_url = self.seen_urls.insert(url.to_string());
        let slot = CaptureSlot {
            step_index: self.next_index,
            has_unique_url,
        };
        self.next_index += 1;
        self.last_persisted_url = Some(url.to_string());
        slot
    }

    /// Number of steps recorded so far
    pub fn recorded(&self) -> usize {
        self.next_index
    }

    pub fn last_persisted_url(&self) -> Option<&str> {
        self.last_persisted_url.as_deref()
    }
}
