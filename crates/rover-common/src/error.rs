//! Validation errors raised at the blackboard boundary.
//!
//! - `InputError` — the initial blackboard handed to a new thread is malformed
//! - `ContractError` — a stage result does not match the declared output shape

use thiserror::Error;

use crate::StageName;

/// A malformed initial blackboard. Raised before any checkpoint exists.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("file path is empty")]
    MissingFilePath,

    #[error("source code for {file_path} is empty")]
    EmptySource { file_path: String },

    #[error("initial blackboard already carries stage output: {field}")]
    NotPristine { field: String },
}

/// A stage update that violates the stage's output contract.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContractError {
    #[error("unknown stage '{0}'. Valid stages: review, refactor, execute, document")]
    UnknownStage(String),

    #[error("{stage} may not write '{field}'")]
    ForeignField { stage: StageName, field: String },

    #[error("{stage} did not produce required field '{field}'")]
    MissingField { stage: StageName, field: String },

    #[error("{stage} produced an empty '{field}'")]
    EmptyField { stage: StageName, field: String },

    #[error("{stage} reported status {status}, which it may not report here")]
    InvalidStatus { stage: StageName, status: String },

    #[error("extension key '{0}' shadows a blackboard field")]
    ShadowedField(String),

    #[error("malformed stage update: {0}")]
    Malformed(String),
}
