//! Pipeline error types

use thiserror::Error;
use shared::SharedError;

use crate::types::{BatchEntry, BatchReport};

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Pipeline error types
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Daily request budget exhausted: {used}/{limit} requests today")]
    DailyBudgetExhausted { used: u32, limit: u32 },

    #[error("Reference input unavailable for item {item_id}: {reason}")]
    ReferenceUnavailable { item_id: String, reason: String },

    #[error("Artifact storage error: {message}")]
    StorageError { message: String },

    #[error("Publish error: {message}")]
    PublishError { message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Data model error: {0}")]
    SharedError(#[from] SharedError),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl PipelineError {
    pub fn config(message: impl Into<String>) -> Self {
        PipelineError::ConfigError { message: message.into() }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        PipelineError::StorageError { message: message.into() }
    }

    pub fn publish(message: impl Into<String>) -> Self {
        PipelineError::PublishError { message: message.into() }
    }

    pub fn reference(item_id: impl Into<String>, reason: impl Into<String>) -> Self {
        PipelineError::ReferenceUnavailable {
            item_id: item_id.into(),
            reason: reason.into(),
        }
    }

    /// Fatal errors abort the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::DailyBudgetExhausted { .. })
    }
}

/// A run terminated by a fatal error, carrying everything completed before it
#[derive(Error, Debug)]
#[error("Run aborted with {} item(s) reported: {source}", .report.entries.len())]
pub struct BatchAbort {
    pub report: BatchReport,
    #[source]
    pub source: PipelineError,
}

/// An item interrupted by a fatal error, with the entry recording its finished steps
#[derive(Error, Debug)]
#[error("Item {} aborted: {source}", .entry.item_id())]
pub struct ItemAbort {
    pub entry: BatchEntry,
    #[source]
    pub source: PipelineError,
}
