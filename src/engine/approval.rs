//! Human-approval entry points for a thread paused at the interrupt.

use serde::Serialize;

use rover_common::{
    Checkpoint, CodeIssue, ExecutionStatus, StageName, StageUpdate, TerminalOutcome, ThreadId,
};

use super::{Engine, RunOptions, RunOutcome, RunReport, ThreadState};
use crate::errors::EngineError;

/// Prefix of the execution log written when a reviewer rejects a candidate.
pub const REJECTION_PREFIX: &str = "HUMAN REJECTION: ";
/// Prefix of the execution log written when a reviewer skips execution.
pub const SKIP_PREFIX: &str = "SKIPPED BY HUMAN: ";

/// What a reviewer decided at the pause point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Approve,
    /// Treat the candidate as a failed execution with this feedback.
    Reject(String),
    /// Go straight to documentation without executing.
    Skip(String),
    /// End the thread.
    Abort(String),
}

/// Everything a reviewer needs to judge a paused thread.
#[derive(Debug, Clone, Serialize)]
pub struct PendingReview {
    pub thread: ThreadId,
    pub file_path: String,
    /// The stage waiting for approval.
    pub before: StageName,
    pub intent_summary: Option<String>,
    pub issues: Vec<CodeIssue>,
    pub original_code: String,
    pub candidate_code: String,
    pub last_status: ExecutionStatus,
    pub last_log: Option<String>,
    /// Failed execute attempts so far.
    pub attempts: u32,
    pub max_retries: u32,
}

impl PendingReview {
    fn from_checkpoint(cp: &Checkpoint, before: StageName, max_retries: u32) -> Self {
        let bb = &cp.blackboard;
        Self {
            thread: cp.thread_id.clone(),
            file_path: bb.file_path.clone(),
            before,
            intent_summary: bb.intent_summary.clone(),
            issues: bb.review_issues.clone(),
            original_code: bb.source_code.clone(),
            candidate_code: bb.candidate_code().to_string(),
            last_status: bb.execution_status,
            last_log: bb.execution_log.clone(),
            attempts: bb.iteration_count,
            max_retries,
        }
    }

    /// Failures still allowed before the router gives up.
    pub fn retries_left(&self) -> u32 {
        self.max_retries.saturating_sub(self.attempts)
    }
}

fn rejection(feedback: &str) -> StageUpdate {
    StageUpdate::execution(
        ExecutionStatus::Failure,
        &format!("{}{}", REJECTION_PREFIX, feedback),
    )
}

fn skip_to_docs(reason: &str) -> StageUpdate {
    StageUpdate::execution(
        ExecutionStatus::SkippedToDocs,
        &format!("{}{}", SKIP_PREFIX, reason),
    )
}

impl Engine {
    fn require_paused(&self, cp: &Checkpoint) -> Result<StageName, EngineError> {
        match (ThreadState::of(Some(cp), &self.graph), cp.next_stage()) {
            (ThreadState::PausedAtInterrupt, Some(before)) => Ok(before),
            (state, _) => Err(EngineError::NotPaused {
                thread: cp.thread_id.clone(),
                state,
            }),
        }
    }

    /// The paused view of `thread`. Fails unless it is paused at the interrupt.
    pub async fn pending_review(&self, thread: &ThreadId) -> Result<PendingReview, EngineError> {
        let cp = self.load(thread).await?;
        let before = self.require_paused(&cp)?;
        Ok(PendingReview::from_checkpoint(
            &cp,
            before,
            self.graph.max_retries(),
        ))
    }

    /// Let the paused stage run. Same as `resume` on a paused thread.
    pub async fn approve(&self, thread: &ThreadId, opts: &RunOptions) -> Result<RunReport, EngineError> {
        let _guard = self.locks.lock(thread).await;
        let cp = self.load(thread).await?;
        self.require_paused(&cp)?;
        self.resume_from(cp, opts).await
    }

    /// Record `feedback` as a failed execution and continue, so the refactor
    /// stage sees it on its next attempt.
    pub async fn reject(
        &self,
        thread: &ThreadId,
        feedback: &str,
        opts: &RunOptions,
    ) -> Result<RunReport, EngineError> {
        self.inject_paused(thread, rejection(feedback), opts).await
    }

    /// Skip execution and continue to documentation.
    pub async fn skip(
        &self,
        thread: &ThreadId,
        reason: &str,
        opts: &RunOptions,
    ) -> Result<RunReport, EngineError> {
        self.inject_paused(thread, skip_to_docs(reason), opts).await
    }

    /// Apply a reviewer's decision.
    pub async fn decide(
        &self,
        thread: &ThreadId,
        decision: Decision,
        opts: &RunOptions,
    ) -> Result<RunReport, EngineError> {
        match decision {
            Decision::Approve => self.approve(thread, opts).await,
            Decision::Reject(feedback) => self.reject(thread, &feedback, opts).await,
            Decision::Skip(reason) => self.skip(thread, &reason, opts).await,
            Decision::Abort(reason) => {
                let _guard = self.locks.lock(thread).await;
                let cp = self.load(thread).await?;
                self.require_paused(&cp)?;
                let cp = self.terminate_checkpoint(cp, &reason).await?;
                Ok(RunReport {
                    outcome: RunOutcome::Finished(TerminalOutcome::Halted),
                    checkpoint: cp,
                    stages_run: Vec::new(),
                })
            }
        }
    }

    async fn inject_paused(
        &self,
        thread: &ThreadId,
        update: StageUpdate,
        opts: &RunOptions,
    ) -> Result<RunReport, EngineError> {
        let _guard = self.locks.lock(thread).await;
        let cp = self.load(thread).await?;
        let before = self.require_paused(&cp)?;
        let cp = self.apply_to(cp, before, &update).await?;
        self.resume_from(cp, opts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Graph, StageRegistry};
    use crate::stages::from_fn;
    use crate::store::MemoryStore;
    use rover_common::Blackboard;
    use std::sync::Arc;

    fn engine() -> Engine {
        let registry = StageRegistry::new()
            .with(from_fn(StageName::Review, |_| async {
                Ok(StageUpdate::review("prints pi", vec![]))
            }))
            .unwrap()
            .with(from_fn(StageName::Refactor, |_| async {
                Ok(StageUpdate::refactor("import math\nprint(math.pi)"))
            }))
            .unwrap()
            .with(from_fn(StageName::Execute, |_| async {
                Ok(StageUpdate::execution(ExecutionStatus::Success, "3.14"))
            }))
            .unwrap()
            .with(from_fn(StageName::Document, |_| async {
                Ok(StageUpdate::document("docs"))
            }))
            .unwrap();
        Engine::new(Graph::default(), registry, Arc::new(MemoryStore::new())).unwrap()
    }

    fn thread() -> ThreadId {
        ThreadId::new("calc").unwrap()
    }

    async fn paused(engine: &Engine) {
        engine
            .start(
                &thread(),
                Blackboard::new("calc.py", "print(math.pi)", ""),
                &RunOptions::default(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_pending_review_shows_candidate() {
        let engine = engine();
        paused(&engine).await;

        let review = engine.pending_review(&thread()).await.unwrap();
        assert_eq!(review.before, StageName::Execute);
        assert_eq!(review.candidate_code, "import math\nprint(math.pi)");
        assert_eq!(review.original_code, "print(math.pi)");
        assert_eq!(review.intent_summary.as_deref(), Some("prints pi"));
        assert_eq!(review.retries_left(), 3);
    }

    #[tokio::test]
    async fn test_approve_requires_pause() {
        let engine = engine();
        let err = engine
            .approve(&thread(), &RunOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));

        paused(&engine).await;
        let report = engine.approve(&thread(), &RunOptions::default()).await.unwrap();
        assert_eq!(report.terminal_outcome(), Some(TerminalOutcome::Completed));

        let err = engine
            .approve(&thread(), &RunOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::NotPaused {
                state: ThreadState::Terminated,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_abort_halts_paused_thread() {
        let engine = engine();
        paused(&engine).await;
        let report = engine
            .decide(&thread(), Decision::Abort("wrong file".into()), &RunOptions::default())
            .await
            .unwrap();
        assert_eq!(report.terminal_outcome(), Some(TerminalOutcome::Halted));
        assert!(report.stages_run.is_empty());
        assert_eq!(
            engine.state(&thread()).await.unwrap(),
            ThreadState::Terminated
        );
    }

    #[tokio::test]
    async fn test_skip_writes_reason_to_log() {
        let engine = engine();
        paused(&engine).await;
        let report = engine
            .skip(&thread(), "manual review", &RunOptions::default())
            .await
            .unwrap();
        assert_eq!(
            report.blackboard().execution_log.as_deref(),
            Some("SKIPPED BY HUMAN: manual review")
        );
        assert_eq!(report.stages_run, vec![StageName::Document]);
    }
}
