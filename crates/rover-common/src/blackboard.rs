//! The blackboard: the typed state record threaded through every stage.
//!
//! Stages never mutate the blackboard directly. They receive a read-only view
//! and return a [`StageUpdate`]; [`Blackboard::merge`] folds the update in by
//! plain key overwrite and produces the next version.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::{InputError, StageUpdate};

/// Names of every typed blackboard field, in declaration order.
pub const FIELD_NAMES: &[&str] = &[
    "file_path",
    "source_code",
    "context",
    "intent_summary",
    "review_issues",
    "refactored_code",
    "iteration_count",
    "execution_status",
    "execution_log",
    "documentation",
    "version",
];

/// Severity of a review finding.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Correctness or security bug.
    Critical,
    #[default]
    Warning,
    Info,
}

impl Severity {
    /// Emoji indicator used by the terminal UI.
    pub fn emoji(&self) -> &'static str {
        match self {
            Self::Critical => "🔴",
            Self::Warning => "🟡",
            Self::Info => "🔵",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Critical => "critical",
            Self::Warning => "warning",
            Self::Info => "info",
        };
        write!(f, "{}", s)
    }
}

/// One issue reported by the review stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeIssue {
    pub file_path: String,
    /// Approximate line number, when the reviewer could place it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default)]
    pub severity: Severity,
    pub description: String,
    #[serde(default)]
    pub suggestion: String,
}

impl CodeIssue {
    pub fn new(file_path: &str, severity: Severity, description: &str) -> Self {
        Self {
            file_path: file_path.to_string(),
            line: None,
            severity,
            description: description.to_string(),
            suggestion: String::new(),
        }
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_suggestion(mut self, suggestion: &str) -> Self {
        self.suggestion = suggestion.to_string();
        self
    }

    /// `path:line` when a line is known, otherwise just the path.
    pub fn location(&self) -> String {
        match self.line {
            Some(line) => format!("{}:{}", self.file_path, line),
            None => self.file_path.clone(),
        }
    }
}

/// Outcome of the execute stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    #[default]
    Pending,
    Success,
    Failure,
    /// A human skipped execution and sent the thread straight to documentation.
    SkippedToDocs,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::SkippedToDocs => "SKIPPED_TO_DOCS",
        };
        write!(f, "{}", s)
    }
}

/// Shared state of one pipeline thread.
///
/// Input fields (`file_path`, `source_code`, `context`) are set once at thread
/// creation; no [`StageUpdate`] can address them. `iteration_count` and
/// `version` are owned by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blackboard {
    pub file_path: String,
    pub source_code: String,
    #[serde(default)]
    pub context: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_summary: Option<String>,
    #[serde(default)]
    pub review_issues: Vec<CodeIssue>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refactored_code: Option<String>,
    #[serde(default)]
    pub iteration_count: u32,

    #[serde(default)]
    pub execution_status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_log: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,

    /// Bumped on every merge.
    #[serde(default)]
    pub version: u64,

    /// Keys this build does not know about. Kept so snapshots written by newer
    /// stages survive a round-trip through older binaries.
    #[serde(flatten)]
    pub extensions: BTreeMap<String, Value>,
}

impl Blackboard {
    pub fn new(file_path: &str, source_code: &str, context: &str) -> Self {
        Self {
            file_path: file_path.to_string(),
            source_code: source_code.to_string(),
            context: context.to_string(),
            intent_summary: None,
            review_issues: Vec::new(),
            refactored_code: None,
            iteration_count: 0,
            execution_status: ExecutionStatus::Pending,
            execution_log: None,
            documentation: None,
            version: 0,
            extensions: BTreeMap::new(),
        }
    }

    /// Check that this blackboard can seed a new thread.
    pub fn validate_initial(&self) -> Result<(), InputError> {
        if self.file_path.trim().is_empty() {
            return Err(InputError::MissingFilePath);
        }
        if self.source_code.trim().is_empty() {
            return Err(InputError::EmptySource {
                file_path: self.file_path.clone(),
            });
        }
        let dirty = if self.iteration_count != 0 {
            Some("iteration_count")
        } else if self.execution_status != ExecutionStatus::Pending {
            Some("execution_status")
        } else if self.execution_log.is_some() {
            Some("execution_log")
        } else if self.documentation.is_some() {
            Some("documentation")
        } else {
            None
        };
        match dirty {
            Some(field) => Err(InputError::NotPristine {
                field: field.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// The code the next stage should work on: the latest candidate if one
    /// exists, otherwise the original source.
    pub fn candidate_code(&self) -> &str {
        self.refactored_code.as_deref().unwrap_or(&self.source_code)
    }

    /// Fold `update` into this snapshot and return the next version.
    ///
    /// Every field present in `update` overwrites the current value; every
    /// other field is carried over unchanged. Never fails.
    pub fn merge(mut self, update: &StageUpdate) -> Self {
        if let Some(summary) = &update.intent_summary {
            self.intent_summary = Some(summary.clone());
        }
        if let Some(issues) = &update.review_issues {
            self.review_issues = issues.clone();
        }
        if let Some(code) = &update.refactored_code {
            self.refactored_code = Some(code.clone());
        }
        if let Some(status) = update.execution_status {
            self.execution_status = status;
        }
        if let Some(log) = &update.execution_log {
            self.execution_log = Some(log.clone());
        }
        if let Some(docs) = &update.documentation {
            self.documentation = Some(docs.clone());
        }
        for (key, value) in &update.extensions {
            self.extensions.insert(key.clone(), value.clone());
        }
        self.version += 1;
        self
    }

    /// Record one more failed execute attempt. The counter never decreases.
    pub fn record_failed_attempt(&mut self) {
        self.iteration_count = self.iteration_count.saturating_add(1);
    }

    /// Issues grouped by severity count: (critical, warning, info).
    pub fn issue_counts(&self) -> (usize, usize, usize) {
        self.review_issues
            .iter()
            .fold((0, 0, 0), |(c, w, i), issue| match issue.severity {
                Severity::Critical => (c + 1, w, i),
                Severity::Warning => (c, w + 1, i),
                Severity::Info => (c, w, i + 1),
            })
    }
}
