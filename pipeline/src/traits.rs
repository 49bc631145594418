//! Collaborator trait definitions for dependency injection

use async_trait::async_trait;

use shared::{ApiFailure, GeneratedImage, Item, ReferenceImage, Scene, StepKind};
use crate::error::PipelineResult;
use crate::types::{GenerationRequest, PromptDetail, SceneRequest};

/// Remote generation service: one structured call and one image call
#[mockall::automock]
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Produce a structured Scene for the item's reference image
    async fn generate_scene(&self, request: &SceneRequest) -> Result<Scene, ApiFailure>;

    /// Produce one derivative image
    async fn generate_image(&self, request: &GenerationRequest) -> Result<GeneratedImage, ApiFailure>;
}

/// Remote asset store
#[mockall::automock]
#[async_trait]
pub trait PublishAdapter: Send + Sync {
    /// Upload an artifact; `Ok(None)` means the store accepted nothing usable
    async fn upload(&self, image: &GeneratedImage, display_name: &str, group_key: &str) -> PipelineResult<Option<String>>;
}

/// Obtains the reference image for an item
#[mockall::automock]
#[async_trait]
pub trait ReferenceLoader: Send + Sync {
    async fn load(&self, item: &Item) -> PipelineResult<ReferenceImage>;
}

/// Local persistence for generated artifacts
#[mockall::automock]
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persist an artifact and return its local location
    ///
    /// `index` is the 1-based declaration position of the step.
    async fn save(&self, item_id: &str, index: usize, kind: StepKind, image: &GeneratedImage) -> PipelineResult<String>;
}

/// Prompt builder attached to a GenerationStep
pub trait StepPrompt: Send + Sync {
    fn build(&self, item: &Item, scene: Option<&Scene>, detail: PromptDetail) -> String;
}
