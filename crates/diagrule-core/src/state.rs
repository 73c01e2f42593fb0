use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// RuleState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleState {
    Initializing,
    Running,
    ActionExecuting,
    Throttled,
    Finished,
}

impl RuleState {
    pub fn as_str(self) -> &'static str {
        match self {
            RuleState::Initializing => "Initializing",
            RuleState::Running => "Running",
            RuleState::ActionExecuting => "ActionExecuting",
            RuleState::Throttled => "Throttled",
            RuleState::Finished => "Finished",
        }
    }

    pub fn is_terminal(self) -> bool {
        self == RuleState::Finished
    }
}

impl fmt::Display for RuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// FinishReason
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "message")]
pub enum FinishReason {
    /// A startup-triggered rule ran its actions once.
    Startup,
    RuleDuration,
    ActionCount,
    Stopped,
    /// The trigger could not be created or started.
    Failed(String),
}

impl FinishReason {
    pub fn describe(&self) -> String {
        match self {
            FinishReason::Startup => "The rule ran its actions once at startup.".into(),
            FinishReason::RuleDuration => "The rule duration limit was reached.".into(),
            FinishReason::ActionCount => "The action count limit was reached.".into(),
            FinishReason::Stopped => "The rule was stopped.".into(),
            FinishReason::Failed(message) => format!("The rule failed: {message}"),
        }
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinishReason::Startup => f.write_str("startup"),
            FinishReason::RuleDuration => f.write_str("rule_duration"),
            FinishReason::ActionCount => f.write_str("action_count"),
            FinishReason::Stopped => f.write_str("stopped"),
            FinishReason::Failed(_) => f.write_str("failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// PipelineStatus
// ---------------------------------------------------------------------------

/// Current state of a pipeline. Once finished it never changes again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineStatus {
    state: RuleState,
    finish_reason: Option<FinishReason>,
}

impl Default for PipelineStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineStatus {
    pub fn new() -> Self {
        Self {
            state: RuleState::Initializing,
            finish_reason: None,
        }
    }

    pub fn state(&self) -> RuleState {
        self.state
    }

    pub fn finish_reason(&self) -> Option<&FinishReason> {
        self.finish_reason.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }

    /// Move to a non-terminal state. Returns false once finished.
    pub fn transition(&mut self, to: RuleState) -> bool {
        if self.is_finished() || to.is_terminal() {
            return false;
        }
        self.state = to;
        true
    }

    /// Finish with `reason`. The first reason wins.
    pub fn finish(&mut self, reason: FinishReason) -> bool {
        if self.is_finished() {
            return false;
        }
        self.state = RuleState::Finished;
        self.finish_reason = Some(reason);
        true
    }

    pub fn reason_text(&self) -> String {
        match (&self.state, &self.finish_reason) {
            (RuleState::Finished, Some(reason)) => reason.describe(),
            (RuleState::Finished, None) => "The rule has finished.".into(),
            (RuleState::Initializing, _) => "The rule is starting its trigger.".into(),
            (RuleState::Running, _) => "The rule is waiting for its trigger to fire.".into(),
            (RuleState::ActionExecuting, _) => "The rule is executing its actions.".into(),
            (RuleState::Throttled, _) => {
                "The action count limit was reached within the sliding window.".into()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_finish_reason_wins() {
        let mut status = PipelineStatus::new();
        assert!(status.transition(RuleState::Running));
        assert!(status.finish(FinishReason::ActionCount));
        assert!(!status.finish(FinishReason::Stopped));
        assert_eq!(status.finish_reason(), Some(&FinishReason::ActionCount));
        assert!(!status.transition(RuleState::Running));
        assert_eq!(status.state(), RuleState::Finished);
    }

    #[test]
    fn transition_refuses_terminal_state() {
        let mut status = PipelineStatus::new();
        assert!(!status.transition(RuleState::Finished));
        assert_eq!(status.state(), RuleState::Initializing);
        assert!(status.reason_text().contains("starting"));
    }

    #[test]
    fn failed_reason_carries_message() {
        let mut status = PipelineStatus::new();
        status.finish(FinishReason::Failed("no session".into()));
        assert_eq!(status.reason_text(), "The rule failed: no session");
        assert_eq!(status.finish_reason().map(|r| r.to_string()).as_deref(), Some("failed"));
    }
}
