//! Pipeline service implementations

pub mod artifact_store;
pub mod gemini_client;
pub mod performance_tracker;
pub mod prompts;
pub mod publisher;
pub mod reference_loader;

#[cfg(test)]
pub mod tests;

pub use artifact_store::LocalArtifactStore;
pub use gemini_client::GeminiClient;
pub use performance_tracker::CallTracker;
pub use publisher::{HttpPublisher, LocalOnlyPublisher};
pub use reference_loader::RealReferenceLoader;
