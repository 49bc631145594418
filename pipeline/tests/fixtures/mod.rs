//! Scripted collaborators for end-to-end pipeline tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pipeline::core::budget::{BudgetLimits, RateBudget};
use pipeline::core::retry::{RetryExecutor, RetryPolicy};
use pipeline::services::CallTracker;
use pipeline::services::prompts::steps_for;
use pipeline::{
    ArtifactStore, BatchRunner, GenerationClient, GenerationRequest, ItemPipeline, PipelineError, PipelineResult,
    PipelineServices, PromptDetail, PublishAdapter, ReferenceLoader, SceneRequest,
};
use shared::{ApiFailure, GeneratedImage, Item, ReferenceImage, Scene, StepKind};

pub fn scene(label: &str) -> Scene {
    Scene {
        aesthetic_label: label.to_string(),
        setting: format!("{label} setting"),
        mood: "assured".to_string(),
        lighting: "soft daylight".to_string(),
        styling: "tonal".to_string(),
        model_description: "model standing".to_string(),
        composition: "centered".to_string(),
        props: vec!["chair".to_string()],
    }
}

pub fn item(id: &str) -> Item {
    Item::new(id, format!("images/{id}.jpg")).with_field("category", "shirt")
}

/// Four declared steps; the second and fourth depend on the Scene
pub fn four_steps() -> Vec<StepKind> {
    vec![
        StepKind::FullView,
        StepKind::SceneVariant(1),
        StepKind::CloseUp,
        StepKind::SceneVariant(2),
    ]
}

#[derive(Debug, Clone)]
pub enum Recorded {
    Scene { item_id: String },
    Image {
        item_id: String,
        kind: StepKind,
        prompt: String,
        detail: PromptDetail,
    },
}

/// Generation client answering from per-item scripts
///
/// Unscripted scene calls return a fresh valid scene; unscripted image calls
/// succeed unless the item or step is marked as always failing.
#[derive(Default)]
pub struct ScriptedClient {
    scenes: Mutex<HashMap<String, VecDeque<Result<Scene, ApiFailure>>>>,
    images: Mutex<HashMap<(String, StepKind), VecDeque<Result<GeneratedImage, ApiFailure>>>>,
    failing_items: HashSet<String>,
    failing_scenes: HashSet<String>,
    calls: Mutex<Vec<Recorded>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scene_results(self, item_id: &str, results: Vec<Result<Scene, ApiFailure>>) -> Self {
        self.scenes.lock().unwrap().insert(item_id.to_string(), results.into());
        self
    }

    pub fn image_results(self, item_id: &str, kind: StepKind, results: Vec<Result<GeneratedImage, ApiFailure>>) -> Self {
        self.images
            .lock()
            .unwrap()
            .insert((item_id.to_string(), kind), results.into());
        self
    }

    pub fn failing_item(mut self, item_id: &str) -> Self {
        self.failing_items.insert(item_id.to_string());
        self
    }

    pub fn failing_scenes(mut self, item_id: &str) -> Self {
        self.failing_scenes.insert(item_id.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Recorded> {
        self.calls.lock().unwrap().clone()
    }

    pub fn image_calls(&self, item_id: &str, kind: StepKind) -> Vec<(String, PromptDetail)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Recorded::Image {
                    item_id: id,
                    kind: k,
                    prompt,
                    detail,
                } if id == item_id && k == kind => Some((prompt, detail)),
                _ => None,
            })
            .collect()
    }

    pub fn scene_calls(&self, item_id: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Recorded::Scene { item_id: id } if id == item_id))
            .count()
    }

    pub fn calls_for(&self, item_id: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| match call {
                Recorded::Scene { item_id: id } | Recorded::Image { item_id: id, .. } => id == item_id,
            })
            .count()
    }
}

pub fn png(content: &str) -> GeneratedImage {
    GeneratedImage {
        bytes: content.as_bytes().to_vec(),
        mime_type: "image/png".to_string(),
    }
}

#[async_trait]
impl GenerationClient for ScriptedClient {
    async fn generate_scene(&self, request: &SceneRequest) -> Result<Scene, ApiFailure> {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Recorded::Scene {
                item_id: request.item_id.clone(),
            });
            calls
                .iter()
                .filter(|c| matches!(c, Recorded::Scene { item_id } if *item_id == request.item_id))
                .count()
        };

        if self.failing_scenes.contains(&request.item_id) {
            return Err(ApiFailure::ServiceUnavailable);
        }

        let scripted = self
            .scenes
            .lock()
            .unwrap()
            .get_mut(&request.item_id)
            .and_then(VecDeque::pop_front);

        scripted.unwrap_or_else(|| Ok(scene(&format!("{} scene {n}", request.item_id))))
    }

    async fn generate_image(&self, request: &GenerationRequest) -> Result<GeneratedImage, ApiFailure> {
        self.calls.lock().unwrap().push(Recorded::Image {
            item_id: request.item_id.clone(),
            kind: request.step_kind,
            prompt: request.prompt.clone(),
            detail: request.detail,
        });

        if self.failing_items.contains(&request.item_id) {
            return Err(ApiFailure::ServerError("HTTP 500: internal".to_string()));
        }

        let scripted = self
            .images
            .lock()
            .unwrap()
            .get_mut(&(request.item_id.clone(), request.step_kind))
            .and_then(VecDeque::pop_front);

        scripted.unwrap_or_else(|| Ok(png(&format!("{}:{}", request.item_id, request.step_kind))))
    }
}

/// Artifact store keeping everything in memory
#[derive(Default)]
pub struct MemoryStore {
    saved: Mutex<Vec<(String, usize, StepKind, Vec<u8>)>>,
    broken_kinds: HashSet<StepKind>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn broken_for(mut self, kind: StepKind) -> Self {
        self.broken_kinds.insert(kind);
        self
    }

    pub fn saved(&self) -> Vec<(String, usize, StepKind, Vec<u8>)> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn save(&self, item_id: &str, index: usize, kind: StepKind, image: &GeneratedImage) -> PipelineResult<String> {
        if self.broken_kinds.contains(&kind) {
            return Err(PipelineError::storage("disk full"));
        }
        self.saved
            .lock()
            .unwrap()
            .push((item_id.to_string(), index, kind, image.bytes.clone()));
        Ok(format!("mem://{item_id}/{index:02}_{kind}.png"))
    }
}

/// Reference loader that knows every item except the listed ones
#[derive(Default)]
pub struct MemoryLoader {
    missing: HashSet<String>,
    loaded: Mutex<Vec<String>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn missing(mut self, item_id: &str) -> Self {
        self.missing.insert(item_id.to_string());
        self
    }

    pub fn loaded(&self) -> Vec<String> {
        self.loaded.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReferenceLoader for MemoryLoader {
    async fn load(&self, item: &Item) -> PipelineResult<ReferenceImage> {
        self.loaded.lock().unwrap().push(item.reference_image.clone());
        if self.missing.contains(&item.id) {
            return Err(PipelineError::reference(&item.id, "404 not found"));
        }
        Ok(ReferenceImage::new(item.reference_image.as_bytes().to_vec(), "image/jpeg"))
    }
}

/// Publisher returning a CDN URL, except for configured step kinds
#[derive(Default)]
pub struct RecordingPublisher {
    null_for: HashSet<StepKind>,
    error_for: HashSet<StepKind>,
    uploads: Mutex<Vec<(String, String, String)>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn null_for(mut self, kind: StepKind) -> Self {
        self.null_for.insert(kind);
        self
    }

    pub fn error_for(mut self, kind: StepKind) -> Self {
        self.error_for.insert(kind);
        self
    }

    /// (display name, group key, mime type) per upload
    pub fn uploads(&self) -> Vec<(String, String, String)> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl PublishAdapter for RecordingPublisher {
    async fn upload(&self, image: &GeneratedImage, display_name: &str, group_key: &str) -> PipelineResult<Option<String>> {
        self.uploads.lock().unwrap().push((
            display_name.to_string(),
            group_key.to_string(),
            image.mime_type.clone(),
        ));

        if self.error_for.iter().any(|k| display_name.ends_with(&k.to_string())) {
            return Err(PipelineError::publish("503 from asset store"));
        }
        if self.null_for.iter().any(|k| display_name.ends_with(&k.to_string())) {
            return Ok(None);
        }
        Ok(Some(format!("https://cdn.example/{group_key}/{display_name}.png")))
    }
}

pub struct Harness {
    pub client: Arc<ScriptedClient>,
    pub store: Arc<MemoryStore>,
    pub loader: Arc<MemoryLoader>,
    pub publisher: Arc<RecordingPublisher>,
    pub budget: Arc<RateBudget>,
    pub runner: BatchRunner,
}

pub struct HarnessBuilder {
    client: ScriptedClient,
    store: MemoryStore,
    loader: MemoryLoader,
    publisher: RecordingPublisher,
    limits: BudgetLimits,
    steps: Vec<StepKind>,
    regeneration_cap: u32,
}

impl HarnessBuilder {
    pub fn new(client: ScriptedClient) -> Self {
        Self {
            client,
            store: MemoryStore::new(),
            loader: MemoryLoader::new(),
            publisher: RecordingPublisher::new(),
            limits: BudgetLimits {
                per_minute: 100,
                per_day: 10_000,
                inter_request_delay: std::time::Duration::ZERO,
            },
            steps: four_steps(),
            regeneration_cap: 2,
        }
    }

    pub fn store(mut self, store: MemoryStore) -> Self {
        self.store = store;
        self
    }

    pub fn loader(mut self, loader: MemoryLoader) -> Self {
        self.loader = loader;
        self
    }

    pub fn publisher(mut self, publisher: RecordingPublisher) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn limits(mut self, limits: BudgetLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn steps(mut self, steps: Vec<StepKind>) -> Self {
        self.steps = steps;
        self
    }

    pub fn build(self) -> Harness {
        let client = Arc::new(self.client);
        let store = Arc::new(self.store);
        let loader = Arc::new(self.loader);
        let publisher = Arc::new(self.publisher);

        let services = PipelineServices {
            client: client.clone(),
            publisher: publisher.clone(),
            references: loader.clone(),
            artifacts: store.clone(),
        };

        let tracker = CallTracker::new();
        let budget = Arc::new(RateBudget::new(self.limits));
        let executor = RetryExecutor::new(budget.clone(), tracker.clone(), RetryPolicy::default());
        let pipeline = ItemPipeline::new(
            services,
            executor,
            tracker.clone(),
            steps_for(&self.steps),
            self.regeneration_cap,
        )
        .expect("valid step set");

        Harness {
            client,
            store,
            loader,
            publisher,
            budget,
            runner: BatchRunner::new(pipeline, tracker),
        }
    }
}
