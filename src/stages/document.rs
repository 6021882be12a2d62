use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use rover_common::{Blackboard, ExecutionStatus, StageName, StageUpdate};

use super::Stage;
use super::llm::{LlmClient, LlmRequest, strip_code_fence};
use crate::errors::StageError;

/// Writes Markdown documentation of what changed between the original and
/// the final candidate.
pub struct DocumentStage {
    llm: Arc<dyn LlmClient>,
}

impl DocumentStage {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

fn build_prompt(bb: &Blackboard) -> String {
    let mut prompt = format!(
        "You are a Senior Technical Writer.

File: {path}

Original:
{original}

Refactored:
{refactored}

INSTRUCTIONS:
1. Document the semantic changes.
2. Return ONLY the Markdown documentation.",
        path = bb.file_path,
        original = bb.source_code,
        refactored = bb.candidate_code(),
    );
    if bb.execution_status == ExecutionStatus::SkippedToDocs {
        prompt.push_str("\n3. Note that the refactored code was not executed before documenting.");
    }
    prompt
}

#[async_trait]
impl Stage for DocumentStage {
    fn name(&self) -> StageName {
        StageName::Document
    }

    async fn run(&self, bb: &Blackboard) -> Result<StageUpdate, StageError> {
        let reply = self.llm.generate(&LlmRequest::text(build_prompt(bb))).await?;
        // Models sometimes wrap the whole answer in ```markdown.
        let docs = strip_code_fence(&reply);
        info!(file = %bb.file_path, chars = docs.len(), "documentation written");
        Ok(StageUpdate::document(&docs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::llm::testing::CannedLlm;

    #[tokio::test]
    async fn test_document_compares_original_and_candidate() {
        let llm = Arc::new(CannedLlm::reply("```markdown\n## Changes\n- import math\n```"));
        let bb = Blackboard::new("a.py", "print(math.pi)", "")
            .merge(&StageUpdate::refactor("import math\nprint(math.pi)"));

        let update = DocumentStage::new(llm.clone()).run(&bb).await.unwrap();

        assert_eq!(update.documentation.as_deref(), Some("## Changes\n- import math"));
        let prompt = llm.last_prompt();
        assert!(prompt.contains("Original:\nprint(math.pi)"));
        assert!(prompt.contains("Refactored:\nimport math"));
        assert!(!prompt.contains("not executed"));
    }

    #[tokio::test]
    async fn test_skipped_execution_is_mentioned() {
        let llm = Arc::new(CannedLlm::reply("docs"));
        let bb = Blackboard::new("a.py", "x = 1", "").merge(&StageUpdate::execution(
            ExecutionStatus::SkippedToDocs,
            "SKIPPED BY HUMAN: trivial",
        ));
        DocumentStage::new(llm.clone()).run(&bb).await.unwrap();
        assert!(llm.last_prompt().contains("not executed"));
    }
}
