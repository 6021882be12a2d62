use serde::{Deserialize, Serialize};

use rover_common::{ExecutionStatus, StageName, TerminalOutcome, ThreadId};

/// Progress events emitted by the [`Engine`](super::Engine).
///
/// Every event except `StageStarted` describes a state change and is sent only
/// after the checkpoint holding that change has been written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A stage function is about to be invoked.
    StageStarted { thread: ThreadId, stage: StageName },
    /// A stage result (or a folded stage failure) was merged and persisted.
    StageCompleted {
        thread: ThreadId,
        stage: StageName,
        summary: String,
        status: ExecutionStatus,
        iteration_count: u32,
        version: u64,
        /// The failure was reported by the stage and folded into the retry loop.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        folded: bool,
    },
    /// An external actor supplied a result in place of `stage`.
    Injected {
        thread: ThreadId,
        stage: StageName,
        summary: String,
        status: ExecutionStatus,
        iteration_count: u32,
        version: u64,
    },
    /// The thread stopped before the interrupt stage and waits for approval.
    Paused {
        thread: ThreadId,
        before: StageName,
        version: u64,
    },
    /// The thread reached a terminal state.
    Terminated {
        thread: ThreadId,
        outcome: TerminalOutcome,
        version: u64,
    },
}

impl EngineEvent {
    pub fn thread(&self) -> &ThreadId {
        match self {
            Self::StageStarted { thread, .. }
            | Self::StageCompleted { thread, .. }
            | Self::Injected { thread, .. }
            | Self::Paused { thread, .. }
            | Self::Terminated { thread, .. } => thread,
        }
    }
}
