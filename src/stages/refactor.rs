use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use rover_common::{Blackboard, CodeIssue, StageName, StageUpdate};

use super::Stage;
use super::llm::{LlmClient, LlmRequest, strip_code_fence};
use crate::errors::StageError;

/// Reply that means "keep the current candidate as is".
pub const NO_CHANGES: &str = "NO_CHANGES";

/// Produces a new candidate from the current one, the review findings and the
/// last execution log.
pub struct RefactorStage {
    llm: Arc<dyn LlmClient>,
}

impl RefactorStage {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

fn format_issues(issues: &[CodeIssue]) -> String {
    if issues.is_empty() {
        return "none".to_string();
    }
    issues
        .iter()
        .map(|i| {
            let mut line = format!("- [{}] {}: {}", i.severity, i.location(), i.description);
            if !i.suggestion.is_empty() {
                line.push_str(&format!(" (suggestion: {})", i.suggestion));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn build_prompt(bb: &Blackboard) -> String {
    let runtime = bb.execution_log.as_deref().unwrap_or("none");
    format!(
        "You are a Python Code Refactoring Agent.

Here is the code you need to fix:
```python
{code}
```

CONTEXT:
1. Static Analysis Issues:
{issues}
2. RUNTIME ERRORS (CRITICAL): {runtime}

INSTRUCTIONS:
- If there are Runtime Errors, you MUST fix the code to resolve them.
- Specifically check for missing imports or syntax errors.
- Return ONLY the fixed code. No markdown, no conversational text.
- If the code is perfect and there are no errors, return the string \"{no_changes}\".",
        code = bb.candidate_code(),
        issues = format_issues(&bb.review_issues),
        runtime = runtime,
        no_changes = NO_CHANGES,
    )
}

#[async_trait]
impl Stage for RefactorStage {
    fn name(&self) -> StageName {
        StageName::Refactor
    }

    async fn run(&self, bb: &Blackboard) -> Result<StageUpdate, StageError> {
        let reply = self.llm.generate(&LlmRequest::text(build_prompt(bb))).await?;
        let code = strip_code_fence(&reply);

        if code == NO_CHANGES {
            info!(file = %bb.file_path, "refactor: no changes needed");
            return Ok(StageUpdate::refactor(bb.candidate_code()));
        }
        if code.is_empty() {
            return Err(StageError::Failed("model returned no code".into()));
        }
        info!(file = %bb.file_path, lines = code.lines().count(), "refactor produced candidate");
        Ok(StageUpdate::refactor(&code))
    }
}
