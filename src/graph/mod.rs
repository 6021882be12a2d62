//! Static pipeline topology.
//!
//! ```text
//! Review -> Refactor -> [INTERRUPT] -> Execute -> Route{Document | Refactor | Terminate}
//! Document -> Terminate
//! ```
//!
//! The edge table is fixed. What can be configured is the entry stage
//! (Review, or Refactor to skip straight to the fix loop), the interrupt point,
//! and the retry ceiling the router enforces.

mod registry;
pub mod router;

pub use registry::StageRegistry;
pub use router::{MAX_RETRIES, Route, route};

use rover_common::{Blackboard, ExecutionStatus, StageName, TerminalOutcome};

use crate::errors::EngineError;

/// Outgoing edge of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// Unconditional edge to another stage.
    To(StageName),
    /// Conditional edge decided by [`route`].
    Route,
    /// The thread ends after this stage.
    End,
}

/// What the executor does after a stage result has been merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Run(StageName),
    Finish(TerminalOutcome),
}

/// The pipeline graph: edge table, entry point, interrupt point, retry ceiling.
#[derive(Debug, Clone)]
pub struct Graph {
    entry: StageName,
    interrupt_before: Option<StageName>,
    max_retries: u32,
}

impl Default for Graph {
    fn default() -> Self {
        Self {
            entry: StageName::Review,
            interrupt_before: Some(StageName::Execute),
            max_retries: MAX_RETRIES,
        }
    }
}

impl Graph {
    pub fn builder() -> GraphBuilder {
        GraphBuilder::default()
    }

    pub fn entry(&self) -> StageName {
        self.entry
    }

    pub fn interrupt_before(&self) -> Option<StageName> {
        self.interrupt_before
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Outgoing edge of `stage`.
    pub fn edge(&self, stage: StageName) -> Edge {
        match stage {
            StageName::Review => Edge::To(StageName::Refactor),
            StageName::Refactor => Edge::To(StageName::Execute),
            StageName::Execute => Edge::Route,
            StageName::Document => Edge::End,
        }
    }

    /// Stages reachable from the entry point, in first-visit order.
    pub fn stages(&self) -> Vec<StageName> {
        let mut seen = vec![self.entry];
        let mut i = 0;
        while i < seen.len() {
            let targets: Vec<StageName> = match self.edge(seen[i]) {
                Edge::To(next) => vec![next],
                Edge::Route => vec![StageName::Document, StageName::Refactor],
                Edge::End => vec![],
            };
            for target in targets {
                if !seen.contains(&target) {
                    seen.push(target);
                }
            }
            i += 1;
        }
        seen
    }

    /// Compute the next step after `completed` has been merged into `bb`.
    pub fn next_after(&self, completed: StageName, bb: &Blackboard) -> Step {
        match self.edge(completed) {
            Edge::To(next) => Step::Run(next),
            Edge::End => Step::Finish(TerminalOutcome::Completed),
            Edge::Route => match route(bb, self.max_retries) {
                Route::Document => Step::Run(StageName::Document),
                Route::Refactor => Step::Run(StageName::Refactor),
                Route::Terminate if bb.execution_status == ExecutionStatus::Failure => {
                    Step::Finish(TerminalOutcome::RetryExhausted)
                }
                Route::Terminate => Step::Finish(TerminalOutcome::Halted),
            },
        }
    }

    /// True when `next` is the interrupt point and the caller has not asked
    /// to bypass it.
    pub fn pauses_before(&self, next: StageName, bypass: bool) -> bool {
        !bypass && self.interrupt_before == Some(next)
    }
}

/// Builder for [`Graph`].
#[derive(Debug, Default)]
pub struct GraphBuilder {
    graph: Graph,
}

impl GraphBuilder {
    /// Start the pipeline at `stage`. Only Review and Refactor are valid entries.
    pub fn entry(mut self, stage: StageName) -> Self {
        self.graph.entry = stage;
        self
    }

    /// Pause before `stage`, or never pause with `None`.
    pub fn interrupt_before(mut self, stage: Option<StageName>) -> Self {
        self.graph.interrupt_before = stage;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.graph.max_retries = max_retries;
        self
    }

    pub fn build(self) -> Result<Graph, EngineError> {
        let graph = self.graph;
        if !matches!(graph.entry, StageName::Review | StageName::Refactor) {
            return Err(EngineError::InvalidGraph(format!(
                "entry stage must be review or refactor, got {}",
                graph.entry
            )));
        }
        if let Some(stage) = graph.interrupt_before
            && (stage == graph.entry || !graph.stages().contains(&stage))
        {
            return Err(EngineError::InvalidGraph(format!(
                "cannot interrupt before {} when the pipeline enters at {}",
                stage, graph.entry
            )));
        }
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rover_common::StageUpdate;

    fn after_execute(status: ExecutionStatus, count: u32) -> Blackboard {
        let mut bb = Blackboard::new("a.py", "x = 1", "")
            .merge(&StageUpdate::execution(status, "log"));
        bb.iteration_count = count;
        bb
    }

    #[test]
    fn test_default_graph_shape() {
        let graph = Graph::default();
        assert_eq!(graph.entry(), StageName::Review);
        assert_eq!(graph.interrupt_before(), Some(StageName::Execute));
        assert_eq!(graph.max_retries(), MAX_RETRIES);
        assert_eq!(
            graph.stages(),
            vec![
                StageName::Review,
                StageName::Refactor,
                StageName::Execute,
                StageName::Document
            ]
        );
    }

    #[test]
    fn test_linear_edges() {
        let graph = Graph::default();
        let bb = Blackboard::new("a.py", "x = 1", "");
        assert_eq!(graph.next_after(StageName::Review, &bb), Step::Run(StageName::Refactor));
        assert_eq!(graph.next_after(StageName::Refactor, &bb), Step::Run(StageName::Execute));
        assert_eq!(
            graph.next_after(StageName::Document, &bb),
            Step::Finish(TerminalOutcome::Completed)
        );
    }

    #[test]
    fn test_execute_routes_through_router() {
        let graph = Graph::default();
        assert_eq!(
            graph.next_after(StageName::Execute, &after_execute(ExecutionStatus::Success, 0)),
            Step::Run(StageName::Document)
        );
        assert_eq!(
            graph.next_after(StageName::Execute, &after_execute(ExecutionStatus::Failure, 1)),
            Step::Run(StageName::Refactor)
        );
        assert_eq!(
            graph.next_after(StageName::Execute, &after_execute(ExecutionStatus::Failure, 3)),
            Step::Finish(TerminalOutcome::RetryExhausted)
        );
        assert_eq!(
            graph.next_after(StageName::Execute, &after_execute(ExecutionStatus::Pending, 0)),
            Step::Finish(TerminalOutcome::Halted)
        );
    }

    #[test]
    fn test_pauses_only_before_interrupt_without_bypass() {
        let graph = Graph::default();
        assert!(graph.pauses_before(StageName::Execute, false));
        assert!(!graph.pauses_before(StageName::Execute, true));
        assert!(!graph.pauses_before(StageName::Refactor, false));

        let unattended = Graph::builder().interrupt_before(None).build().unwrap();
        assert!(!unattended.pauses_before(StageName::Execute, false));
    }

    #[test]
    fn test_refactor_entry_skips_review() {
        let graph = Graph::builder()
            .entry(StageName::Refactor)
            .interrupt_before(None)
            .build()
            .unwrap();
        assert!(!graph.stages().contains(&StageName::Review));
    }

    #[test]
    fn test_builder_rejects_bad_entry_and_interrupt() {
        assert!(matches!(
            Graph::builder().entry(StageName::Document).build(),
            Err(EngineError::InvalidGraph(_))
        ));
        assert!(matches!(
            Graph::builder()
                .entry(StageName::Refactor)
                .interrupt_before(Some(StageName::Review))
                .build(),
            Err(EngineError::InvalidGraph(_))
        ));
    }
}
