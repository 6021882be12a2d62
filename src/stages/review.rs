use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;

use rover_common::{Blackboard, CodeIssue, Severity, StageName, StageUpdate};

use super::Stage;
use super::llm::{LlmClient, LlmRequest, strip_code_fence};
use crate::errors::StageError;

const SYSTEM_PROMPT: &str = "You are a Principal Software Architect.
Analyze the provided code for logic errors, security vulnerabilities, and code style issues.
Do NOT focus on simple formatting. Focus on bugs and safety.";

/// Static review: summarises intent and lists issues.
pub struct ReviewStage {
    llm: Arc<dyn LlmClient>,
}

impl ReviewStage {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

/// Wire shape the model is asked to produce.
#[derive(Debug, Deserialize)]
struct ReviewOutput {
    summary: String,
    #[serde(default)]
    issues: Vec<RawIssue>,
}

#[derive(Debug, Deserialize)]
struct RawIssue {
    #[serde(default, alias = "filepath")]
    file_path: String,
    #[serde(default)]
    line_number: Option<i64>,
    #[serde(default)]
    severity: String,
    description: String,
    #[serde(default)]
    suggestion: String,
}

fn parse_severity(raw: &str) -> Severity {
    match raw.trim().to_ascii_lowercase().as_str() {
        "critical" | "error" | "high" => Severity::Critical,
        "info" | "low" | "note" => Severity::Info,
        _ => Severity::Warning,
    }
}

fn response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "summary": { "type": "STRING", "description": "High-level summary of the code intent" },
            "issues": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "filepath": { "type": "STRING" },
                        "line_number": { "type": "INTEGER" },
                        "severity": { "type": "STRING", "enum": ["Critical", "Warning", "Info"] },
                        "description": { "type": "STRING" },
                        "suggestion": { "type": "STRING" }
                    },
                    "required": ["filepath", "severity", "description", "suggestion"]
                }
            }
        },
        "required": ["summary", "issues"]
    })
}

fn build_prompt(bb: &Blackboard) -> String {
    let mut prompt = format!("{}\n\n", SYSTEM_PROMPT);
    if !bb.context.trim().is_empty() {
        prompt.push_str(&format!("Context from the author:\n{}\n\n", bb.context.trim()));
    }
    prompt.push_str(&format!(
        "File: {}\n\nCode to Review:\n{}",
        bb.file_path, bb.source_code
    ));
    prompt
}

/// Turn the model's JSON reply into a review update.
fn parse_review(raw: &str, default_path: &str) -> Result<StageUpdate, StageError> {
    let output: ReviewOutput = serde_json::from_str(&strip_code_fence(raw))
        .map_err(|e| StageError::Malformed(format!("review reply is not valid JSON: {}", e)))?;

    let issues = output
        .issues
        .into_iter()
        .map(|raw| {
            let path = if raw.file_path.trim().is_empty() {
                default_path
            } else {
                raw.file_path.as_str()
            };
            let mut issue = CodeIssue::new(path, parse_severity(&raw.severity), &raw.description)
                .with_suggestion(&raw.suggestion);
            if let Some(line) = raw.line_number.and_then(|l| u32::try_from(l).ok()) {
                issue = issue.with_line(line);
            }
            issue
        })
        .collect();
    Ok(StageUpdate::review(&output.summary, issues))
}

#[async_trait]
impl Stage for ReviewStage {
    fn name(&self) -> StageName {
        StageName::Review
    }

    async fn run(&self, bb: &Blackboard) -> Result<StageUpdate, StageError> {
        let request = LlmRequest::json(build_prompt(bb), response_schema());
        let reply = self.llm.generate(&request).await?;
        let update = parse_review(&reply, &bb.file_path)?;
        info!(
            file = %bb.file_path,
            issues = update.review_issues.as_ref().map_or(0, |i| i.len()),
            "review finished"
        );
        Ok(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::llm::testing::CannedLlm;

    const REPLY: &str = r#"{
        "summary": "Prints the circumference of a unit circle",
        "issues": [
            {"filepath": "calc.py", "line_number": 1, "severity": "Critical",
             "description": "math is used but never imported", "suggestion": "import math"},
            {"filepath": "", "line_number": -1, "severity": "Info",
             "description": "no docstring", "suggestion": "add one"}
        ]
    }"#;

    #[tokio::test]
    async fn test_review_parses_structured_reply() {
        let llm = Arc::new(CannedLlm::reply(REPLY));
        let stage = ReviewStage::new(llm.clone());
        let bb = Blackboard::new("calc.py", "print(2 * math.pi)", "");

        let update = stage.run(&bb).await.unwrap();

        assert_eq!(
            update.intent_summary.as_deref(),
            Some("Prints the circumference of a unit circle")
        );
        let issues = update.review_issues.unwrap();
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].severity, Severity::Critical);
        assert_eq!(issues[0].line, Some(1));
        assert_eq!(issues[1].file_path, "calc.py");
        assert_eq!(issues[1].line, None);

        let requests = llm.requests.lock().unwrap();
        assert!(requests[0].response_schema.is_some());
        assert!(requests[0].prompt.contains("print(2 * math.pi)"));
    }

    #[tokio::test]
    async fn test_review_accepts_fenced_json() {
        let llm = Arc::new(CannedLlm::reply(&format!("```json\n{}\n```", REPLY)));
        let update = ReviewStage::new(llm)
            .run(&Blackboard::new("calc.py", "x", ""))
            .await
            .unwrap();
        assert_eq!(update.review_issues.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_review_rejects_non_json_reply() {
        let llm = Arc::new(CannedLlm::reply("Looks fine to me!"));
        let err = ReviewStage::new(llm)
            .run(&Blackboard::new("calc.py", "x", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_review_passes_through_service_errors() {
        let llm = Arc::new(CannedLlm::new(vec![Err(StageError::Unavailable("down".into()))]));
        let err = ReviewStage::new(llm)
            .run(&Blackboard::new("calc.py", "x", ""))
            .await
            .unwrap_err();
        assert_eq!(err, StageError::Unavailable("down".into()));
    }

    #[test]
    fn test_prompt_includes_context_when_present() {
        let bb = Blackboard::new("a.py", "x = 1", "PR: add helper");
        assert!(build_prompt(&bb).contains("PR: add helper"));
        let bb = Blackboard::new("a.py", "x = 1", "");
        assert!(!build_prompt(&bb).contains("Context from the author"));
    }

    #[test]
    fn test_parse_severity_defaults_to_warning() {
        assert_eq!(parse_severity("CRITICAL"), Severity::Critical);
        assert_eq!(parse_severity("info"), Severity::Info);
        assert_eq!(parse_severity("style"), Severity::Warning);
    }
}
