//! Thread executor.
//!
//! The [`Engine`] drives one thread's checkpoint through the [`Graph`]: it runs
//! the pending stage, merges the result, works out what comes next, writes the
//! checkpoint and only then reports progress. Everything needed to continue a
//! thread lives in its checkpoint, so a `resume` behaves the same after a
//! second or after a process restart.
//!
//! Per thread the engine is a small state machine:
//!
//! ```text
//! Idle --start--> Running --(next is interrupt)--> PausedAtInterrupt
//!                    |                                  |
//!                    |<------ approve / reject ---------+
//!                    v
//!                Terminated
//! ```

mod approval;
mod events;

pub use approval::{Decision, PendingReview, REJECTION_PREFIX, SKIP_PREFIX};
pub use events::EngineEvent;

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use rover_common::{
    Blackboard, Checkpoint, ContractError, ExecutionStatus, Origin, RunLogEntry, StageName,
    StageUpdate, TerminalOutcome, ThreadId,
};

use crate::errors::{EngineError, StageError};
use crate::graph::{Graph, StageRegistry, Step};
use crate::store::{CheckpointStore, ThreadLocks};

/// Per-call options for the driving loop.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Run through the interrupt point without pausing (auto-approve).
    pub bypass_interrupt: bool,
    /// Cancels the in-flight stage. Its result is discarded and the checkpoint
    /// is left as it was before the stage started.
    pub cancel: CancellationToken,
}

impl RunOptions {
    pub fn auto_approve() -> Self {
        Self {
            bypass_interrupt: true,
            ..Default::default()
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Where a thread stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadState {
    /// No checkpoint exists.
    Idle,
    Running,
    PausedAtInterrupt,
    Terminated,
}

impl ThreadState {
    pub fn of(checkpoint: Option<&Checkpoint>, graph: &Graph) -> Self {
        match checkpoint {
            None => Self::Idle,
            Some(cp) => match cp.next_stage() {
                None => Self::Terminated,
                Some(next) if graph.interrupt_before() == Some(next) => Self::PausedAtInterrupt,
                Some(_) => Self::Running,
            },
        }
    }
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::PausedAtInterrupt => "paused at interrupt",
            Self::Terminated => "terminated",
        };
        write!(f, "{}", s)
    }
}

/// How a call to the driving loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Stopped before `before`, waiting for approval.
    Paused { before: StageName },
    Finished(TerminalOutcome),
}

/// Result of `start`, `resume` and the approval entry points.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// The checkpoint as persisted when the call returned.
    pub checkpoint: Checkpoint,
    /// Stages invoked during this call, in order.
    pub stages_run: Vec<StageName>,
}

impl RunReport {
    pub fn thread_id(&self) -> &ThreadId {
        &self.checkpoint.thread_id
    }

    pub fn blackboard(&self) -> &Blackboard {
        &self.checkpoint.blackboard
    }

    pub fn is_paused(&self) -> bool {
        matches!(self.outcome, RunOutcome::Paused { .. })
    }

    pub fn terminal_outcome(&self) -> Option<TerminalOutcome> {
        match self.outcome {
            RunOutcome::Finished(outcome) => Some(outcome),
            RunOutcome::Paused { .. } => None,
        }
    }
}

/// How a stage result reached the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResultKind {
    Produced,
    Injected,
    /// A declared or infrastructure failure turned into an execution failure.
    Folded,
}

/// Drives threads through the pipeline graph.
pub struct Engine {
    graph: Graph,
    registry: StageRegistry,
    store: Arc<dyn CheckpointStore>,
    locks: ThreadLocks,
    event_tx: Option<mpsc::Sender<EngineEvent>>,
}

impl Engine {
    /// Fails if a stage reachable in `graph` has no registered function.
    pub fn new(
        graph: Graph,
        registry: StageRegistry,
        store: Arc<dyn CheckpointStore>,
    ) -> Result<Self, EngineError> {
        registry.ensure_covers(&graph)?;
        Ok(Self {
            graph,
            registry,
            store,
            locks: ThreadLocks::new(),
            event_tx: None,
        })
    }

    /// Share per-thread locks with other engines over the same store.
    pub fn with_locks(mut self, locks: ThreadLocks) -> Self {
        self.locks = locks;
        self
    }

    /// Set the channel progress events are sent on.
    pub fn with_event_channel(mut self, tx: mpsc::Sender<EngineEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// Create a thread and drive it until it pauses or terminates.
    pub async fn start(
        &self,
        thread: &ThreadId,
        initial: Blackboard,
        opts: &RunOptions,
    ) -> Result<RunReport, EngineError> {
        initial.validate_initial()?;

        let _guard = self.locks.lock(thread).await;
        if self.store.contains(thread).await? {
            return Err(EngineError::ThreadExists(thread.clone()));
        }
        let cp = Checkpoint::new(thread.clone(), initial, self.graph.entry());
        self.store.put(&cp).await?;
        info!(thread = %thread, entry = %self.graph.entry(), "thread started");

        self.drive(cp, opts).await
    }

    /// Continue a thread from its persisted pending stage.
    ///
    /// On a terminated thread this returns the stored terminal snapshot and
    /// invokes nothing.
    pub async fn resume(&self, thread: &ThreadId, opts: &RunOptions) -> Result<RunReport, EngineError> {
        let _guard = self.locks.lock(thread).await;
        let cp = self.load(thread).await?;
        self.resume_from(cp, opts).await
    }

    /// Merge `update` as if `stage` had just produced it and recompute the
    /// pending stage from `stage`'s outgoing edge. Nothing is invoked.
    pub async fn apply_as_if(
        &self,
        thread: &ThreadId,
        stage: StageName,
        update: StageUpdate,
    ) -> Result<Checkpoint, EngineError> {
        let _guard = self.locks.lock(thread).await;
        let cp = self.load(thread).await?;
        self.apply_to(cp, stage, &update).await
    }

    /// [`apply_as_if`](Self::apply_as_if) followed by
    /// [`resume`](Self::resume), without releasing the thread in between.
    pub async fn inject_and_resume(
        &self,
        thread: &ThreadId,
        stage: StageName,
        update: StageUpdate,
        opts: &RunOptions,
    ) -> Result<RunReport, EngineError> {
        let _guard = self.locks.lock(thread).await;
        let cp = self.load(thread).await?;
        let cp = self.apply_to(cp, stage, &update).await?;
        self.resume_from(cp, opts).await
    }

    /// End a thread from outside. Idempotent on terminated threads.
    pub async fn terminate(&self, thread: &ThreadId, reason: &str) -> Result<Checkpoint, EngineError> {
        let _guard = self.locks.lock(thread).await;
        let cp = self.load(thread).await?;
        self.terminate_checkpoint(cp, reason).await
    }

    pub async fn state(&self, thread: &ThreadId) -> Result<ThreadState, EngineError> {
        let cp = self.store.get(thread).await?;
        Ok(ThreadState::of(cp.as_ref(), &self.graph))
    }

    /// Latest persisted checkpoint of `thread`.
    pub async fn snapshot(&self, thread: &ThreadId) -> Result<Checkpoint, EngineError> {
        self.load(thread).await
    }

    /// Delete a thread's checkpoint. Only ever called on explicit request.
    pub async fn archive(&self, thread: &ThreadId) -> Result<(), EngineError> {
        let _guard = self.locks.lock(thread).await;
        self.store
            .delete(thread)
            .await
            .map_err(EngineError::from_store)?;
        info!(thread = %thread, "thread archived");
        drop(_guard);
        self.locks.forget(thread);
        Ok(())
    }

    async fn load(&self, thread: &ThreadId) -> Result<Checkpoint, EngineError> {
        self.store
            .get(thread)
            .await?
            .ok_or_else(|| EngineError::NotFound(thread.clone()))
    }

    async fn resume_from(
        &self,
        cp: Checkpoint,
        opts: &RunOptions,
    ) -> Result<RunReport, EngineError> {
        if cp.is_terminal() {
            debug!(thread = %cp.thread_id, "resume on terminated thread");
            return Ok(RunReport {
                outcome: RunOutcome::Finished(cp.outcome.unwrap_or(TerminalOutcome::Halted)),
                checkpoint: cp,
                stages_run: Vec::new(),
            });
        }
        self.drive(cp, opts).await
    }

    async fn apply_to(
        &self,
        mut cp: Checkpoint,
        stage: StageName,
        update: &StageUpdate,
    ) -> Result<Checkpoint, EngineError> {
        if cp.is_terminal() {
            return Err(EngineError::Terminated(cp.thread_id));
        }
        update
            .check_contract(stage, Origin::Injected)
            .map_err(|source| EngineError::ContractViolation { stage, source })?;

        let step = self.advance(&mut cp, stage, update, ResultKind::Injected);
        self.store.put(&cp).await?;
        info!(thread = %cp.thread_id, stage = %stage, "stage result injected");

        self.emit(EngineEvent::Injected {
            thread: cp.thread_id.clone(),
            stage,
            summary: update.summary(stage),
            status: cp.blackboard.execution_status,
            iteration_count: cp.blackboard.iteration_count,
            version: cp.blackboard.version,
        })
        .await;
        if let Step::Finish(outcome) = step {
            self.emit_terminated(&cp, outcome).await;
        }
        Ok(cp)
    }

    async fn terminate_checkpoint(
        &self,
        mut cp: Checkpoint,
        reason: &str,
    ) -> Result<Checkpoint, EngineError> {
        let Some(stage) = cp.next_stage() else {
            return Ok(cp);
        };
        cp.pending.clear();
        cp.outcome = Some(TerminalOutcome::Halted);
        cp.run_log
            .push(RunLogEntry::new(stage, format!("terminated: {}", reason), true));
        cp.updated_at = chrono::Utc::now();
        self.store.put(&cp).await?;
        info!(thread = %cp.thread_id, reason, "thread terminated");

        self.emit_terminated(&cp, TerminalOutcome::Halted).await;
        Ok(cp)
    }

    /// Run pending stages until the thread pauses or terminates.
    async fn drive(&self, mut cp: Checkpoint, opts: &RunOptions) -> Result<RunReport, EngineError> {
        let mut stages_run = Vec::new();

        while let Some(stage) = cp.next_stage() {
            let runner = self
                .registry
                .get(stage)
                .ok_or(EngineError::UnregisteredStage(stage))?;

            self.emit(EngineEvent::StageStarted {
                thread: cp.thread_id.clone(),
                stage,
            })
            .await;
            debug!(thread = %cp.thread_id, stage = %stage, "invoking stage");

            let result = tokio::select! {
                biased;
                _ = opts.cancel.cancelled() => {
                    warn!(thread = %cp.thread_id, stage = %stage, "stage cancelled");
                    return Err(EngineError::Cancelled { stage });
                }
                result = runner.run(&cp.blackboard) => result,
            };

            let (update, kind) = match result {
                Ok(update) => {
                    update
                        .check_contract(stage, Origin::Invoked)
                        .map_err(|source| EngineError::ContractViolation { stage, source })?;
                    (update, ResultKind::Produced)
                }
                Err(StageError::Malformed(msg)) => {
                    return Err(EngineError::ContractViolation {
                        stage,
                        source: ContractError::Malformed(msg),
                    });
                }
                Err(err) => {
                    warn!(thread = %cp.thread_id, stage = %stage, error = %err, "stage failed");
                    let log = err.log_text(stage);
                    (
                        StageUpdate::execution(ExecutionStatus::Failure, &log),
                        ResultKind::Folded,
                    )
                }
            };

            let step = self.advance(&mut cp, stage, &update, kind);
            stages_run.push(stage);
            self.store.put(&cp).await?;

            let summary = cp
                .run_log
                .last()
                .map(|e| e.summary.clone())
                .unwrap_or_default();
            info!(thread = %cp.thread_id, stage = %stage, %summary, "stage completed");
            self.emit(EngineEvent::StageCompleted {
                thread: cp.thread_id.clone(),
                stage,
                summary,
                status: cp.blackboard.execution_status,
                iteration_count: cp.blackboard.iteration_count,
                version: cp.blackboard.version,
                folded: kind == ResultKind::Folded,
            })
            .await;

            match step {
                Step::Finish(outcome) => {
                    self.emit_terminated(&cp, outcome).await;
                    return Ok(RunReport {
                        outcome: RunOutcome::Finished(outcome),
                        checkpoint: cp,
                        stages_run,
                    });
                }
                Step::Run(next) if self.graph.pauses_before(next, opts.bypass_interrupt) => {
                    info!(thread = %cp.thread_id, before = %next, "paused for approval");
                    self.emit(EngineEvent::Paused {
                        thread: cp.thread_id.clone(),
                        before: next,
                        version: cp.blackboard.version,
                    })
                    .await;
                    return Ok(RunReport {
                        outcome: RunOutcome::Paused { before: next },
                        checkpoint: cp,
                        stages_run,
                    });
                }
                Step::Run(_) => {}
            }
        }

        // Only reachable when the loop was entered with nothing pending.
        Ok(RunReport {
            outcome: RunOutcome::Finished(cp.outcome.unwrap_or(TerminalOutcome::Halted)),
            checkpoint: cp,
            stages_run,
        })
    }

    /// Fold one stage result into `cp`: merge, count failed attempts, log,
    /// and set the pending stage. Pure; the caller persists.
    fn advance(
        &self,
        cp: &mut Checkpoint,
        stage: StageName,
        update: &StageUpdate,
        kind: ResultKind,
    ) -> Step {
        let mut bb = cp.blackboard.clone().merge(update);

        let counts_as_attempt = stage == StageName::Execute || kind == ResultKind::Folded;
        if counts_as_attempt && update.execution_status == Some(ExecutionStatus::Failure) {
            bb.record_failed_attempt();
        }

        // A folded failure is routed as if execute had reported it.
        let step = match kind {
            ResultKind::Folded => self.graph.next_after(StageName::Execute, &bb),
            _ => self.graph.next_after(stage, &bb),
        };

        let summary = match kind {
            ResultKind::Folded => format!(
                "{} failed: {}",
                stage,
                bb.execution_log
                    .as_deref()
                    .and_then(|l| l.lines().next())
                    .unwrap_or_default()
            ),
            _ => update.summary(stage),
        };
        cp.run_log
            .push(RunLogEntry::new(stage, summary, kind == ResultKind::Injected));
        cp.blackboard = bb;

        match step {
            Step::Run(next) => {
                cp.pending = vec![next];
                cp.outcome = None;
            }
            Step::Finish(outcome) => {
                cp.pending.clear();
                cp.outcome = Some(outcome);
            }
        }
        cp.updated_at = chrono::Utc::now();
        step
    }

    async fn emit_terminated(&self, cp: &Checkpoint, outcome: TerminalOutcome) {
        info!(thread = %cp.thread_id, %outcome, "thread terminated");
        self.emit(EngineEvent::Terminated {
            thread: cp.thread_id.clone(),
            outcome,
            version: cp.blackboard.version,
        })
        .await;
    }

    async fn emit(&self, event: EngineEvent) {
        if let Some(ref tx) = self.event_tx {
            tx.send(event).await.ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::from_fn;
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn engine_with(registry: StageRegistry) -> Engine {
        Engine::new(Graph::default(), registry, Arc::new(MemoryStore::new())).unwrap()
    }

    fn happy_registry() -> StageRegistry {
        StageRegistry::new()
            .with(from_fn(StageName::Review, |_| async {
                Ok(StageUpdate::review("adds two numbers", vec![]))
            }))
            .unwrap()
            .with(from_fn(StageName::Refactor, |bb: Blackboard| async move {
                Ok(StageUpdate::refactor(&format!("{}\n", bb.candidate_code())))
            }))
            .unwrap()
            .with(from_fn(StageName::Execute, |_| async {
                Ok(StageUpdate::execution(ExecutionStatus::Success, "3"))
            }))
            .unwrap()
            .with(from_fn(StageName::Document, |_| async {
                Ok(StageUpdate::document("## Changes"))
            }))
            .unwrap()
    }

    fn thread() -> ThreadId {
        ThreadId::new("t-1").unwrap()
    }

    fn initial() -> Blackboard {
        Blackboard::new("add.py", "print(1 + 2)", "")
    }

    #[test]
    fn test_thread_state_classification() {
        let graph = Graph::default();
        assert_eq!(ThreadState::of(None, &graph), ThreadState::Idle);

        let mut cp = Checkpoint::new(thread(), initial(), StageName::Review);
        assert_eq!(ThreadState::of(Some(&cp), &graph), ThreadState::Running);
        cp.pending = vec![StageName::Execute];
        assert_eq!(ThreadState::of(Some(&cp), &graph), ThreadState::PausedAtInterrupt);
        cp.pending.clear();
        assert_eq!(ThreadState::of(Some(&cp), &graph), ThreadState::Terminated);
    }

    #[tokio::test]
    async fn test_start_pauses_before_execute() {
        let engine = engine_with(happy_registry());
        let report = engine
            .start(&thread(), initial(), &RunOptions::default())
            .await
            .unwrap();

        assert_eq!(report.outcome, RunOutcome::Paused { before: StageName::Execute });
        assert_eq!(report.stages_run, vec![StageName::Review, StageName::Refactor]);
        assert_eq!(report.checkpoint.pending, vec![StageName::Execute]);
        assert_eq!(
            engine.state(&thread()).await.unwrap(),
            ThreadState::PausedAtInterrupt
        );
    }

    #[tokio::test]
    async fn test_bypass_runs_to_completion() {
        let engine = engine_with(happy_registry());
        let report = engine
            .start(&thread(), initial(), &RunOptions::auto_approve())
            .await
            .unwrap();
        assert_eq!(report.terminal_outcome(), Some(TerminalOutcome::Completed));
        assert_eq!(report.stages_run.len(), 4);
        assert_eq!(report.blackboard().documentation.as_deref(), Some("## Changes"));
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_input_without_checkpoint() {
        let engine = engine_with(happy_registry());
        let err = engine
            .start(&thread(), Blackboard::new("add.py", "", ""), &RunOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
        assert_eq!(engine.state(&thread()).await.unwrap(), ThreadState::Idle);
    }

    #[tokio::test]
    async fn test_folded_review_failure_routes_to_refactor() {
        let registry = StageRegistry::new()
            .with(from_fn(StageName::Review, |_| async {
                Err(StageError::Unavailable("LLM quota exhausted".into()))
            }))
            .unwrap()
            .with(from_fn(StageName::Refactor, |_| async {
                Ok(StageUpdate::refactor("x = 1"))
            }))
            .unwrap()
            .with(from_fn(StageName::Execute, |_| async {
                Ok(StageUpdate::execution(ExecutionStatus::Success, ""))
            }))
            .unwrap()
            .with(from_fn(StageName::Document, |_| async {
                Ok(StageUpdate::document("d"))
            }))
            .unwrap();
        let engine = engine_with(registry);

        let report = engine
            .start(&thread(), initial(), &RunOptions::default())
            .await
            .unwrap();

        let bb = report.blackboard();
        assert_eq!(bb.execution_status, ExecutionStatus::Failure);
        assert_eq!(bb.iteration_count, 1);
        assert_eq!(
            bb.execution_log.as_deref(),
            Some("review stage failed: Infrastructure Error: LLM quota exhausted")
        );
        assert_eq!(report.stages_run, vec![StageName::Review, StageName::Refactor]);
        assert!(report.is_paused());
    }

    #[tokio::test]
    async fn test_cancel_leaves_checkpoint_untouched() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        let registry = happy_registry();
        let mut registry_slow = StageRegistry::new();
        for name in [StageName::Review, StageName::Refactor, StageName::Document] {
            registry_slow.register(registry.get(name).unwrap()).unwrap();
        }
        registry_slow
            .register(Arc::new(from_fn(StageName::Execute, move |_| {
                let seen = seen.clone();
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_secs(30)).await;
                    Ok(StageUpdate::execution(ExecutionStatus::Success, "late"))
                }
            })))
            .unwrap();
        let engine = engine_with(registry_slow);
        engine
            .start(&thread(), initial(), &RunOptions::default())
            .await
            .unwrap();
        let before = engine.snapshot(&thread()).await.unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let err = engine
            .resume(&thread(), &RunOptions::default().with_cancel(cancel))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Cancelled { stage: StageName::Execute }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(engine.snapshot(&thread()).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_terminate_is_idempotent() {
        let engine = engine_with(happy_registry());
        engine
            .start(&thread(), initial(), &RunOptions::default())
            .await
            .unwrap();

        let cp = engine.terminate(&thread(), "not worth it").await.unwrap();
        assert!(cp.is_terminal());
        assert_eq!(cp.outcome, Some(TerminalOutcome::Halted));
        assert_eq!(cp.run_log.last().unwrap().summary, "terminated: not worth it");

        let again = engine.terminate(&thread(), "twice").await.unwrap();
        assert_eq!(again, cp);
    }

    #[tokio::test]
    async fn test_inject_into_terminated_thread_is_refused() {
        let engine = engine_with(happy_registry());
        engine
            .start(&thread(), initial(), &RunOptions::auto_approve())
            .await
            .unwrap();
        let err = engine
            .apply_as_if(
                &thread(),
                StageName::Execute,
                StageUpdate::execution(ExecutionStatus::Failure, "late rejection"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Terminated(_)));
    }

    #[tokio::test]
    async fn test_archive_removes_thread() {
        let engine = engine_with(happy_registry());
        engine
            .start(&thread(), initial(), &RunOptions::default())
            .await
            .unwrap();
        engine.archive(&thread()).await.unwrap();
        assert_eq!(engine.state(&thread()).await.unwrap(), ThreadState::Idle);
        assert!(matches!(
            engine.archive(&thread()).await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn test_engine_requires_every_stage() {
        let registry = StageRegistry::new()
            .with(from_fn(StageName::Review, |_| async {
                Ok(StageUpdate::review("s", vec![]))
            }))
            .unwrap();
        let err = Engine::new(Graph::default(), registry, Arc::new(MemoryStore::new()))
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::UnregisteredStage(StageName::Refactor)));
    }
}
