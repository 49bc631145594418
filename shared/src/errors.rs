//! Shared error types for the lookbook generation pipeline

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SharedError {
    #[error("Scene is missing required field: {field}")]
    MissingSceneField { field: &'static str },

    #[error("Unknown step kind: {input}")]
    InvalidStepKind { input: String },

    #[error("Invalid item: {message}")]
    InvalidItem { message: String },
}

pub type SharedResult<T> = Result<T, SharedError>;
