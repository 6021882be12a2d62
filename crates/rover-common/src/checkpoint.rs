//! Durable record of where one thread's execution stands.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Blackboard, StageName, ThreadId};

/// How a thread ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalOutcome {
    /// Documentation was produced.
    Completed,
    /// The router stopped after the execute attempt ceiling was reached.
    RetryExhausted,
    /// Ended by an external actor or by a router decision that is neither of
    /// the above.
    Halted,
}

impl fmt::Display for TerminalOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Completed => "completed",
            Self::RetryExhausted => "retry exhausted",
            Self::Halted => "halted",
        };
        write!(f, "{}", s)
    }
}

/// One line of the per-thread run log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLogEntry {
    pub stage: StageName,
    pub timestamp: DateTime<Utc>,
    pub summary: String,
    /// True when the result was supplied externally rather than produced by
    /// running the stage.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub injected: bool,
}

impl RunLogEntry {
    pub fn new(stage: StageName, summary: impl Into<String>, injected: bool) -> Self {
        Self {
            stage,
            timestamp: Utc::now(),
            summary: summary.into(),
            injected,
        }
    }
}

/// Snapshot of a thread: blackboard plus the stages still to run.
///
/// An empty `pending` list means the thread is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: ThreadId,
    pub blackboard: Blackboard,
    pub pending: Vec<StageName>,
    #[serde(default)]
    pub run_log: Vec<RunLogEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<TerminalOutcome>,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// A fresh checkpoint with `entry` as the only pending stage.
    pub fn new(thread_id: ThreadId, blackboard: Blackboard, entry: StageName) -> Self {
        Self {
            thread_id,
            blackboard,
            pending: vec![entry],
            run_log: Vec::new(),
            outcome: None,
            updated_at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn next_stage(&self) -> Option<StageName> {
        self.pending.first().copied()
    }

    /// Number of execute attempts recorded in the run log, injected or not.
    pub fn execute_attempts(&self) -> usize {
        self.run_log
            .iter()
            .filter(|e| e.stage == StageName::Execute)
            .count()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CodeIssue, ExecutionStatus, Severity, StageUpdate};

    fn paused_checkpoint() -> Checkpoint {
        let bb = Blackboard::new("calc.py", "print(math.pi)", "")
            .merge(&StageUpdate::review(
                "prints pi",
                vec![
                    CodeIssue::new("calc.py", Severity::Warning, "math is not imported")
                        .with_line(1)
                        .with_suggestion("add `import math`"),
                ],
            ))
            .merge(&StageUpdate::refactor("import math\nprint(math.pi)"));
        let mut cp = Checkpoint::new(ThreadId::new("t-1").unwrap(), bb, StageName::Review);
        cp.pending = vec![StageName::Execute];
        cp.run_log.push(RunLogEntry::new(StageName::Review, "review found 1 issue(s)", false));
        cp.run_log.push(RunLogEntry::new(StageName::Refactor, "refactor produced 2 line(s)", false));
        cp
    }

    #[test]
    fn test_checkpoint_json_roundtrip_preserves_pending_and_blackboard() {
        let cp = paused_checkpoint();
        let restored = Checkpoint::from_json(&cp.to_json().unwrap()).unwrap();

        assert_eq!(restored.pending, cp.pending);
        assert_eq!(restored.blackboard, cp.blackboard);
        assert_eq!(restored.run_log, cp.run_log);
    }

    #[test]
    fn test_persisted_layout_uses_plain_strings() {
        let cp = paused_checkpoint();
        let value: serde_json::Value = serde_json::from_str(&cp.to_json().unwrap()).unwrap();

        assert_eq!(value["thread_id"], "t-1");
        assert_eq!(value["pending"], serde_json::json!(["execute"]));
        assert_eq!(value["run_log"][0]["stage"], "review");
        assert_eq!(value["blackboard"]["execution_status"], "PENDING");
    }

    #[test]
    fn test_terminal_when_nothing_pending() {
        let mut cp = paused_checkpoint();
        assert!(!cp.is_terminal());
        assert_eq!(cp.next_stage(), Some(StageName::Execute));

        cp.pending.clear();
        cp.outcome = Some(TerminalOutcome::Completed);
        assert!(cp.is_terminal());
        assert_eq!(cp.next_stage(), None);
    }

    #[test]
    fn test_execute_attempts_counts_injected_results() {
        let mut cp = paused_checkpoint();
        cp.blackboard = cp
            .blackboard
            .merge(&StageUpdate::execution(ExecutionStatus::Failure, "HUMAN REJECTION: no"));
        cp.run_log.push(RunLogEntry::new(StageName::Execute, "execute reported FAILURE", true));
        assert_eq!(cp.execute_attempts(), 1);
    }
}
