//! Stage names for the four pipeline stages.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ContractError;

/// One named processing step of the pipeline.
///
/// Serialized as its lowercase name so persisted `pending` lists stay plain
/// strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageName {
    Review,
    Refactor,
    Execute,
    Document,
}

impl StageName {
    /// All stages in pipeline order.
    pub const ALL: [StageName; 4] = [
        StageName::Review,
        StageName::Refactor,
        StageName::Execute,
        StageName::Document,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Review => "review",
            Self::Refactor => "refactor",
            Self::Execute => "execute",
            Self::Document => "document",
        }
    }

    /// Blackboard fields this stage is allowed to write.
    pub fn owned_fields(&self) -> &'static [&'static str] {
        match self {
            Self::Review => &["intent_summary", "review_issues"],
            Self::Refactor => &["refactored_code"],
            Self::Execute => &["execution_status", "execution_log"],
            Self::Document => &["documentation"],
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StageName {
    type Err = ContractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "review" | "reviewer" => Ok(Self::Review),
            "refactor" | "refactorer" => Ok(Self::Refactor),
            "execute" | "executor" => Ok(Self::Execute),
            "document" | "documenter" => Ok(Self::Document),
            other => Err(ContractError::UnknownStage(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_name_parses_aliases() {
        assert_eq!("Execute".parse::<StageName>().unwrap(), StageName::Execute);
        assert_eq!("reviewer".parse::<StageName>().unwrap(), StageName::Review);
        assert!("deploy".parse::<StageName>().is_err());
    }

    #[test]
    fn test_stage_name_serializes_lowercase() {
        let json = serde_json::to_string(&vec![StageName::Refactor, StageName::Execute]).unwrap();
        assert_eq!(json, r#"["refactor","execute"]"#);
    }

    #[test]
    fn test_owned_fields_do_not_overlap() {
        for a in StageName::ALL {
            for b in StageName::ALL {
                if a == b {
                    continue;
                }
                for field in a.owned_fields() {
                    assert!(!b.owned_fields().contains(field), "{field} owned twice");
                }
            }
        }
    }
}
