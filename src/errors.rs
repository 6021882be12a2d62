//! Typed error hierarchy for the Rover engine.
//!
//! Three enums cover the three seams:
//! - `EngineError` — failures surfaced to callers of the executor
//! - `StageError` — failures reported by a stage function
//! - `StoreError` — checkpoint store failures

use rover_common::{ContractError, InputError, StageName, ThreadId};
use thiserror::Error;

use crate::engine::ThreadState;

/// Errors surfaced to callers of [`crate::engine::Engine`].
///
/// Declared stage failures and infrastructure failures never appear here:
/// they are folded into the blackboard and routed through the retry loop.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid initial blackboard: {0}")]
    InvalidInput(#[from] InputError),

    #[error("Thread {0} already exists; resume it instead")]
    ThreadExists(ThreadId),

    #[error("Thread {0} not found")]
    NotFound(ThreadId),

    #[error("Stage {stage} violated its output contract: {source}")]
    ContractViolation {
        stage: StageName,
        #[source]
        source: ContractError,
    },

    #[error("Thread {0} has already terminated")]
    Terminated(ThreadId),

    #[error("Thread {thread} is {state}, not paused for approval")]
    NotPaused { thread: ThreadId, state: ThreadState },

    #[error("No stage registered under '{0}'")]
    UnregisteredStage(StageName),

    #[error("Stage {stage} was cancelled; checkpoint left unchanged")]
    Cancelled { stage: StageName },

    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failure reported by a stage function.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StageError {
    /// The stage ran and declared failure.
    #[error("{0}")]
    Failed(String),

    /// An external service the stage depends on could not be reached.
    #[error("Infrastructure Error: {0}")]
    Unavailable(String),

    /// The stage could not produce its declared output shape.
    #[error("Malformed stage output: {0}")]
    Malformed(String),
}

impl StageError {
    /// Log text recorded on the blackboard when this failure is folded into
    /// the retry loop.
    pub fn log_text(&self, stage: StageName) -> String {
        match self {
            Self::Failed(msg) if stage == StageName::Execute => msg.clone(),
            Self::Unavailable(_) if stage == StageName::Execute => self.to_string(),
            _ => format!("{} stage failed: {}", stage, self),
        }
    }
}

/// Errors from a [`crate::store::CheckpointStore`] backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Thread {0} not found")]
    NotFound(ThreadId),

    #[error("Checkpoint I/O failed for {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Checkpoint for thread {thread} could not be (de)serialized: {source}")]
    Serialization {
        thread: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Checkpoint file {path} holds thread {found}, expected {expected}")]
    ThreadMismatch {
        path: std::path::PathBuf,
        expected: ThreadId,
        found: ThreadId,
    },

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),

    #[error("Store lock poisoned")]
    LockPoisoned,
}

impl EngineError {
    /// Map a store error, turning a missing checkpoint into `NotFound`.
    pub(crate) fn from_store(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::NotFound(id),
            other => Self::Store(other),
        }
    }
}
