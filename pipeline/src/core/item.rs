//! Per-item state machine: scene resolution, ordered generation steps, publishing

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use shared::{
    ApiFailure, CallKind, GeneratedImage, Item, ReferenceImage, StepKind, item_error, item_info, item_warn,
};
use tokio::time::Instant;

use crate::core::retry::{RetryExecutor, RetryableCall};
use crate::core::scene::{ResolvedScene, SceneResolver};
use crate::error::{ItemAbort, PipelineError, PipelineResult};
use crate::services::CallTracker;
use crate::traits::{ArtifactStore, GenerationClient, PublishAdapter, ReferenceLoader};
use crate::types::{
    BatchEntry, GenerationRequest, GenerationStep, ItemResult, PromptDetail, PublishedSlot, PublishedUrl,
    StepOutcome, StepStatus,
};

/// External collaborators used by the pipeline
#[derive(Clone)]
pub struct PipelineServices {
    pub client: Arc<dyn GenerationClient>,
    pub publisher: Arc<dyn PublishAdapter>,
    pub references: Arc<dyn ReferenceLoader>,
    pub artifacts: Arc<dyn ArtifactStore>,
}

/// Lifecycle of one declared step
#[derive(Debug)]
enum StepState {
    Pending,
    Attempting { attempt: u32 },
    Succeeded { image: GeneratedImage, attempts: u32 },
    Exhausted { failure: ApiFailure, attempts: u32 },
}

impl StepState {
    fn is_terminal(&self) -> bool {
        matches!(self, StepState::Succeeded { .. } | StepState::Exhausted { .. })
    }
}

/// The item's current Scene plus its bounded regeneration counter
#[derive(Debug)]
struct SceneSlot {
    current: ResolvedScene,
    regenerations: u32,
    cap: u32,
}

impl SceneSlot {
    fn can_regenerate(&self) -> bool {
        self.regenerations < self.cap
    }

    fn replace(&mut self, resolved: ResolvedScene) {
        self.current = resolved;
        self.regenerations += 1;
    }
}

/// Generated artifact kept in memory until the publish phase
struct StoredArtifact {
    location: String,
    image: GeneratedImage,
}

/// Runs every declared step for one item
pub struct ItemPipeline {
    services: PipelineServices,
    executor: RetryExecutor,
    resolver: SceneResolver,
    tracker: CallTracker,
    steps: Vec<GenerationStep>,
    regeneration_cap: u32,
}

impl ItemPipeline {
    pub fn new(
        services: PipelineServices,
        executor: RetryExecutor,
        tracker: CallTracker,
        steps: Vec<GenerationStep>,
        regeneration_cap: u32,
    ) -> PipelineResult<Self> {
        if steps.is_empty() {
            return Err(PipelineError::config("at least one generation step must be declared"));
        }

        let mut seen = HashSet::new();
        for step in &steps {
            if !seen.insert(step.kind) {
                return Err(PipelineError::config(format!("step {} is declared twice", step.kind)));
            }
        }

        let resolver = SceneResolver::new(services.client.clone(), executor.clone());

        Ok(Self {
            services,
            executor,
            resolver,
            tracker,
            steps,
            regeneration_cap,
        })
    }

    /// Process one item
    ///
    /// A missing reference input skips the item. Step and publish failures are
    /// recorded in the result. A fatal budget error interrupts the item and is
    /// returned together with an entry holding the steps finished before it.
    pub async fn run(&self, item: &Item) -> Result<BatchEntry, ItemAbort> {
        let reference = match self.load_reference(item).await {
            Ok(reference) => reference,
            Err(e) => {
                item_error!(item.id, "Skipping item: {}", e);
                return Ok(BatchEntry::Skipped {
                    item_id: item.id.clone(),
                    reason: e.to_string(),
                });
            }
        };

        let mut outcomes = Vec::with_capacity(self.steps.len());
        let mut artifacts = Vec::with_capacity(self.steps.len());

        let initial = match self.resolver.resolve(item, &reference, 0).await {
            Ok(resolved) => resolved,
            Err(source) => return Err(interrupted(item, outcomes, source)),
        };
        let mut scene = SceneSlot {
            current: initial,
            regenerations: 0,
            cap: self.regeneration_cap,
        };

        for (index, step) in self.steps.iter().enumerate() {
            match self.run_step(item, &reference, index + 1, step, &mut scene).await {
                Ok((outcome, artifact)) => {
                    outcomes.push(outcome);
                    artifacts.push(artifact);
                }
                Err(source) => return Err(interrupted(item, outcomes, source)),
            }
        }

        let published = self.publish(item, &outcomes, artifacts).await;

        let result = ItemResult {
            item_id: item.id.clone(),
            scene_used: scene.current.scene,
            scene_source: scene.current.source,
            scene_regenerations: scene.regenerations,
            outcomes,
            published,
        };

        item_info!(
            item.id,
            "Finished item: {}/{} steps succeeded, {} uploaded",
            result.succeeded_steps(),
            result.outcomes.len(),
            result.successful_uploads()
        );

        Ok(BatchEntry::Processed(result))
    }

    async fn load_reference(&self, item: &Item) -> PipelineResult<ReferenceImage> {
        item.validate()?;
        let reference = self.services.references.load(item).await?;
        if reference.is_empty() {
            return Err(PipelineError::reference(&item.id, "reference image is empty"));
        }
        Ok(reference)
    }

    async fn run_step(
        &self,
        item: &Item,
        reference: &ReferenceImage,
        index: usize,
        step: &GenerationStep,
        scene: &mut SceneSlot,
    ) -> PipelineResult<(StepOutcome, Option<StoredArtifact>)> {
        let mut call = StepCall {
            client: self.services.client.as_ref(),
            resolver: &self.resolver,
            item,
            reference,
            step,
            scene,
            detail: PromptDetail::Full,
            state: StepState::Pending,
            regenerations_used: 0,
        };

        let outcome = self.executor.execute(&mut call).await?;
        call.state = match outcome.result {
            Ok(image) => StepState::Succeeded {
                image,
                attempts: outcome.attempts,
            },
            Err(failure) => StepState::Exhausted {
                failure,
                attempts: outcome.attempts,
            },
        };
        debug_assert!(call.state.is_terminal());

        let degraded = call.detail == PromptDetail::Simplified;
        let regenerations_used = call.regenerations_used;

        match call.state {
            StepState::Succeeded { image, attempts } => {
                match self.services.artifacts.save(&item.id, index, step.kind, &image).await {
                    Ok(location) => {
                        item_info!(
                            item.id,
                            "Step {} succeeded after {} attempt(s) -> {}",
                            step.kind,
                            attempts,
                            location
                        );
                        let outcome = StepOutcome {
                            step_kind: step.kind,
                            status: StepStatus::Success,
                            artifact_location: Some(location.clone()),
                            error_detail: None,
                            attempts_used: attempts,
                            scene_regenerations_used: regenerations_used,
                            degraded_prompt: degraded,
                        };
                        Ok((outcome, Some(StoredArtifact { location, image })))
                    }
                    Err(e) => {
                        item_error!(item.id, "Step {} generated but could not be stored: {}", step.kind, e);
                        Ok((
                            failed_outcome(step.kind, e.to_string(), attempts, regenerations_used, degraded),
                            None,
                        ))
                    }
                }
            }
            StepState::Exhausted { failure, attempts } => {
                item_error!(item.id, "Step {} failed after {} attempt(s): {}", step.kind, attempts, failure);
                Ok((
                    failed_outcome(step.kind, failure.to_string(), attempts, regenerations_used, degraded),
                    None,
                ))
            }
            StepState::Pending | StepState::Attempting { .. } => unreachable!("step state is terminal"),
        }
    }

    /// Upload every stored artifact; failures degrade the slot to a placeholder
    async fn publish(
        &self,
        item: &Item,
        outcomes: &[StepOutcome],
        artifacts: Vec<Option<StoredArtifact>>,
    ) -> Vec<PublishedSlot> {
        let timeout = self.executor.policy().call_timeout;
        let mut published = Vec::with_capacity(outcomes.len());

        for (index, (outcome, artifact)) in outcomes.iter().zip(artifacts).enumerate() {
            let Some(artifact) = artifact else {
                published.push(PublishedSlot {
                    step_kind: outcome.step_kind,
                    url: None,
                });
                continue;
            };

            let display_name = format!("{}_{:02}_{}", item.id, index + 1, outcome.step_kind);
            let started = Instant::now();
            let upload = tokio::time::timeout(
                timeout,
                self.services
                    .publisher
                    .upload(&artifact.image, &display_name, &item.id),
            )
            .await;
            let elapsed = started.elapsed();

            let url = match upload {
                Ok(Ok(Some(url))) => {
                    self.tracker.record_outcome(CallKind::Publish, true, elapsed).await;
                    PublishedUrl::Remote(url)
                }
                Ok(Ok(None)) => {
                    self.tracker.record_outcome(CallKind::Publish, false, elapsed).await;
                    item_warn!(item.id, "Upload of {} returned no URL, keeping local copy", display_name);
                    PublishedUrl::placeholder(&artifact.location)
                }
                Ok(Err(e)) => {
                    self.tracker.record_outcome(CallKind::Publish, false, elapsed).await;
                    item_warn!(item.id, "Upload of {} failed: {}, keeping local copy", display_name, e);
                    PublishedUrl::placeholder(&artifact.location)
                }
                Err(_) => {
                    self.tracker.record_outcome(CallKind::Publish, false, elapsed).await;
                    item_warn!(item.id, "Upload of {} timed out, keeping local copy", display_name);
                    PublishedUrl::placeholder(&artifact.location)
                }
            };

            published.push(PublishedSlot {
                step_kind: outcome.step_kind,
                url: Some(url),
            });
        }

        published
    }
}

fn interrupted(item: &Item, completed: Vec<StepOutcome>, source: PipelineError) -> ItemAbort {
    item_error!(item.id, "Interrupted after {} step(s): {}", completed.len(), source);
    ItemAbort {
        entry: BatchEntry::Aborted {
            item_id: item.id.clone(),
            completed,
            reason: source.to_string(),
        },
        source,
    }
}

fn failed_outcome(kind: StepKind, detail: String, attempts: u32, regenerations: u32, degraded: bool) -> StepOutcome {
    StepOutcome {
        step_kind: kind,
        status: StepStatus::Failed,
        artifact_location: None,
        error_detail: Some(detail),
        attempts_used: attempts,
        scene_regenerations_used: regenerations,
        degraded_prompt: degraded,
    }
}

/// One step's image call, with scene regeneration as its escalation hook
struct StepCall<'a> {
    client: &'a dyn GenerationClient,
    resolver: &'a SceneResolver,
    item: &'a Item,
    reference: &'a ReferenceImage,
    step: &'a GenerationStep,
    scene: &'a mut SceneSlot,
    detail: PromptDetail,
    state: StepState,
    regenerations_used: u32,
}

impl<'a> StepCall<'a> {
    fn request(&self) -> GenerationRequest {
        let scene = self.step.uses_scene.then(|| &self.scene.current.scene);
        GenerationRequest {
            item_id: self.item.id.clone(),
            step_kind: self.step.kind,
            prompt: self.step.prompt.build(self.item, scene, self.detail),
            detail: self.detail,
            reference: self.reference.clone(),
        }
    }
}

#[async_trait]
impl<'a> RetryableCall for StepCall<'a> {
    type Output = GeneratedImage;

    fn kind(&self) -> CallKind {
        CallKind::Image
    }

    fn item_id(&self) -> &str {
        &self.item.id
    }

    fn description(&self) -> String {
        format!("step {}", self.step.kind)
    }

    async fn attempt(&mut self, attempt: u32) -> Result<GeneratedImage, ApiFailure> {
        self.state = StepState::Attempting { attempt };
        let request = self.request();

        let image = self.client.generate_image(&request).await?;
        if image.bytes.is_empty() {
            return Err(ApiFailure::EmptyResponse);
        }
        Ok(image)
    }

    async fn on_attempt_failed(&mut self, attempt: u32, _failure: &ApiFailure) -> PipelineResult<()> {
        debug_assert!(matches!(self.state, StepState::Attempting { attempt: current } if current == attempt));
        if attempt != 1 || !self.step.uses_scene || !self.scene.can_regenerate() {
            return Ok(());
        }

        let generation = self.scene.regenerations + 1;
        item_warn!(
            self.item.id,
            "Step {} failed with scene '{}', regenerating scene ({}/{})",
            self.step.kind,
            self.scene.current.scene.aesthetic_label,
            generation,
            self.scene.cap
        );

        let resolved = self.resolver.resolve(self.item, self.reference, generation).await?;
        self.scene.replace(resolved);
        self.regenerations_used += 1;
        Ok(())
    }

    fn degrade(&mut self) {
        self.detail = PromptDetail::Simplified;
    }
}
