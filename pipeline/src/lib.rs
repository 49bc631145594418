//! Lookbook generation pipeline
//!
//! For every garment record the pipeline derives a Scene, requests a fixed set
//! of derivative images against a shared request budget, stores the artifacts
//! locally and publishes them to a remote asset store. Partial failure is
//! recorded per step; only an exhausted daily budget stops a run.

pub mod config;
pub mod core;
pub mod error;
pub mod items;
pub mod services;
pub mod traits;
pub mod types;

pub use config::PipelineConfig;
pub use crate::core::{BatchRunner, ItemPipeline, PipelineServices, RateBudget, RetryExecutor, RetryPolicy};
pub use error::{BatchAbort, ItemAbort, PipelineError, PipelineResult};
pub use traits::*;
pub use types::*;
