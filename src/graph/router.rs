//! Post-execute routing.

use rover_common::{Blackboard, ExecutionStatus};
use serde::{Deserialize, Serialize};

/// Default ceiling on failed execute attempts.
pub const MAX_RETRIES: u32 = 3;

/// Where the pipeline goes after the execute stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Document,
    Refactor,
    Terminate,
}

/// Pick the next step from the current snapshot alone.
///
/// | status | iteration_count | route |
/// |--------|-----------------|-------|
/// | SUCCESS | any | Document |
/// | SKIPPED_TO_DOCS | any | Document |
/// | FAILURE | `< max_retries` | Refactor |
/// | FAILURE | `>= max_retries` | Terminate |
/// | PENDING | any | Terminate |
pub fn route(bb: &Blackboard, max_retries: u32) -> Route {
    match bb.execution_status {
        ExecutionStatus::Success | ExecutionStatus::SkippedToDocs => Route::Document,
        ExecutionStatus::Failure if bb.iteration_count < max_retries => Route::Refactor,
        ExecutionStatus::Failure | ExecutionStatus::Pending => Route::Terminate,
    }
}
