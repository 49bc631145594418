//! Request orchestration core

pub mod batch;
pub mod budget;
pub mod item;
pub mod retry;
pub mod scene;

pub use batch::BatchRunner;
pub use budget::{BudgetLimits, BudgetSnapshot, Lease, RateBudget};
pub use item::{ItemPipeline, PipelineServices};
pub use retry::{BackoffPolicy, RetryExecutor, RetryOutcome, RetryPolicy, RetryableCall};
pub use scene::{ResolvedScene, SceneResolver, fallback_scene};
