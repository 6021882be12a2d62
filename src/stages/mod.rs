//! Stage functions and the services they depend on.
//!
//! A stage reads the blackboard and returns a [`StageUpdate`] holding only the
//! fields it owns. It never touches the store or the thread's control state.

pub mod document;
pub mod execute;
pub mod llm;
pub mod refactor;
pub mod review;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

use rover_common::{Blackboard, StageName, StageUpdate};

use crate::errors::StageError;
use crate::graph::StageRegistry;

pub use document::DocumentStage;
pub use execute::{ExecuteStage, ProcessSandbox, RunOutput, Sandbox};
pub use llm::{GeminiClient, LlmClient};
pub use refactor::RefactorStage;
pub use review::ReviewStage;

/// One unit of work in the pipeline.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> StageName;

    async fn run(&self, bb: &Blackboard) -> Result<StageUpdate, StageError>;
}

type StageFn =
    Box<dyn Fn(Blackboard) -> BoxFuture<'static, Result<StageUpdate, StageError>> + Send + Sync>;

/// A stage backed by a closure. Handy for tests and one-off pipelines.
pub struct FnStage {
    name: StageName,
    f: StageFn,
}

/// Wrap an async closure as a [`Stage`]. The closure gets its own copy of the
/// blackboard.
pub fn from_fn<F, Fut>(name: StageName, f: F) -> FnStage
where
    F: Fn(Blackboard) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<StageUpdate, StageError>> + Send + 'static,
{
    FnStage {
        name,
        f: Box::new(move |bb| f(bb).boxed()),
    }
}

#[async_trait]
impl Stage for FnStage {
    fn name(&self) -> StageName {
        self.name
    }

    async fn run(&self, bb: &Blackboard) -> Result<StageUpdate, StageError> {
        (self.f)(bb.clone()).await
    }
}

/// Registry wired to the real LLM and sandbox services.
pub fn default_registry(
    llm: Arc<dyn LlmClient>,
    sandbox: Arc<dyn Sandbox>,
) -> Result<StageRegistry, crate::errors::EngineError> {
    StageRegistry::new()
        .with(ReviewStage::new(llm.clone()))?
        .with(RefactorStage::new(llm.clone()))?
        .with(ExecuteStage::new(sandbox))?
        .with(DocumentStage::new(llm))
}
