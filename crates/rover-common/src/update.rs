//! Partial blackboard updates returned by stages.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::blackboard::FIELD_NAMES;
use crate::{CodeIssue, ContractError, ExecutionStatus, StageName};

/// Where a stage result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Produced by running the registered stage function.
    Invoked,
    /// Supplied by an external actor as if the stage had produced it.
    Injected,
}

/// A partial blackboard. Every `Some` field overwrites the blackboard field of
/// the same name on merge.
///
/// Unknown keys are rejected on deserialization: this is the ingestion point
/// for externally supplied results, so anything outside the schema (including
/// `iteration_count`, which only the engine writes) is refused here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_issues: Option<Vec<CodeIssue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refactored_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_status: Option<ExecutionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_log: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, Value>,
}

impl StageUpdate {
    pub fn review(summary: &str, issues: Vec<CodeIssue>) -> Self {
        Self {
            intent_summary: Some(summary.to_string()),
            review_issues: Some(issues),
            ..Default::default()
        }
    }

    pub fn refactor(code: &str) -> Self {
        Self {
            refactored_code: Some(code.to_string()),
            ..Default::default()
        }
    }

    pub fn execution(status: ExecutionStatus, log: &str) -> Self {
        Self {
            execution_status: Some(status),
            execution_log: Some(log.to_string()),
            ..Default::default()
        }
    }

    pub fn document(docs: &str) -> Self {
        Self {
            documentation: Some(docs.to_string()),
            ..Default::default()
        }
    }

    /// Parse an externally supplied update from JSON.
    pub fn from_json(json: &str) -> Result<Self, ContractError> {
        serde_json::from_str(json).map_err(|e| ContractError::Malformed(e.to_string()))
    }

    /// Names of the typed fields this update sets.
    pub fn present_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.intent_summary.is_some() {
            fields.push("intent_summary");
        }
        if self.review_issues.is_some() {
            fields.push("review_issues");
        }
        if self.refactored_code.is_some() {
            fields.push("refactored_code");
        }
        if self.execution_status.is_some() {
            fields.push("execution_status");
        }
        if self.execution_log.is_some() {
            fields.push("execution_log");
        }
        if self.documentation.is_some() {
            fields.push("documentation");
        }
        fields
    }

    /// Check this update against `stage`'s output contract.
    pub fn check_contract(&self, stage: StageName, origin: Origin) -> Result<(), ContractError> {
        let owned = stage.owned_fields();
        if let Some(field) = self.present_fields().into_iter().find(|f| !owned.contains(f)) {
            return Err(ContractError::ForeignField {
                stage,
                field: field.to_string(),
            });
        }
        if let Some(key) = self.extensions.keys().find(|k| FIELD_NAMES.contains(&k.as_str())) {
            return Err(ContractError::ShadowedField(key.clone()));
        }

        let missing = |field: &str| ContractError::MissingField {
            stage,
            field: field.to_string(),
        };

        match stage {
            StageName::Review => {
                if self.intent_summary.is_none() {
                    return Err(missing("intent_summary"));
                }
                if self.review_issues.is_none() {
                    return Err(missing("review_issues"));
                }
            }
            StageName::Refactor => match self.refactored_code.as_deref() {
                None => return Err(missing("refactored_code")),
                Some(code) if code.trim().is_empty() => {
                    return Err(ContractError::EmptyField {
                        stage,
                        field: "refactored_code".to_string(),
                    });
                }
                Some(_) => {}
            },
            StageName::Execute => {
                let status = self
                    .execution_status
                    .ok_or_else(|| missing("execution_status"))?;
                if self.execution_log.is_none() {
                    return Err(missing("execution_log"));
                }
                let allowed = match origin {
                    Origin::Invoked => {
                        matches!(status, ExecutionStatus::Success | ExecutionStatus::Failure)
                    }
                    Origin::Injected => status != ExecutionStatus::Pending,
                };
                if !allowed {
                    return Err(ContractError::InvalidStatus {
                        stage,
                        status: status.to_string(),
                    });
                }
            }
            StageName::Document => {
                if self.documentation.is_none() {
                    return Err(missing("documentation"));
                }
            }
        }
        Ok(())
    }

    /// One-line description for the run log.
    pub fn summary(&self, stage: StageName) -> String {
        match stage {
            StageName::Review => {
                let issues = self.review_issues.as_ref().map_or(0, |i| i.len());
                format!("review found {} issue(s)", issues)
            }
            StageName::Refactor => {
                let lines = self
                    .refactored_code
                    .as_deref()
                    .map_or(0, |c| c.lines().count());
                format!("refactor produced {} line(s)", lines)
            }
            StageName::Execute => match self.execution_status {
                Some(status) => format!("execute reported {}", status),
                None => "execute reported no status".to_string(),
            },
            StageName::Document => {
                let chars = self.documentation.as_deref().map_or(0, |d| d.len());
                format!("document wrote {} char(s)", chars)
            }
        }
    }
}
