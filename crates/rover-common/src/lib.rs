//! Shared domain types for the Rover pipeline.
//!
//! | Module | Contents |
//! |--------|----------|
//! | `blackboard` | [`Blackboard`], review issues, execution status, merge |
//! | `update` | [`StageUpdate`] and the per-stage output contract |
//! | `stage` | [`StageName`] |
//! | `checkpoint` | [`Checkpoint`], run log, terminal outcomes |
//! | `ids` | [`ThreadId`] |
//!
//! This crate performs no I/O.

pub mod blackboard;
pub mod checkpoint;
pub mod error;
pub mod ids;
pub mod stage;
pub mod update;

pub use blackboard::{Blackboard, CodeIssue, ExecutionStatus, Severity};
pub use checkpoint::{Checkpoint, RunLogEntry, TerminalOutcome};
pub use error::{ContractError, InputError};
pub use ids::ThreadId;
pub use stage::StageName;
pub use update::{Origin, StageUpdate};
