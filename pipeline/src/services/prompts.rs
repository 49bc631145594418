//! Prompt builders for the scene call and each declared step

use std::sync::Arc;

use shared::{Item, Scene, StepKind};

use crate::traits::StepPrompt;
use crate::types::{GenerationStep, PromptDetail};

/// Prompt for the structured scene call
pub fn scene_prompt(item: &Item, detail: PromptDetail) -> String {
    let descriptor = item.descriptor();
    match detail {
        PromptDetail::Full => {
            let mut prompt = format!(
                "You are an art director planning a lifestyle photo shoot for a {descriptor}. \
                 Study the reference image and return a JSON object with the keys \
                 aestheticLabel, setting, mood, lighting, styling, modelDescription, \
                 composition and propsList (an array of strings). Every key must be present \
                 and non-empty."
            );
            if let Some(notes) = item.field("notes") {
                prompt.push_str(&format!(" Brand notes: {notes}."));
            }
            prompt
        }
        PromptDetail::Simplified => format!(
            "Return JSON with aestheticLabel, setting, mood, lighting, styling, \
             modelDescription, composition and propsList for a photo of this {descriptor}."
        ),
    }
}

/// Product shot from a fixed viewpoint; ignores the Scene
#[derive(Debug, Clone, Copy)]
pub struct ViewPrompt {
    kind: StepKind,
}

impl ViewPrompt {
    pub fn new(kind: StepKind) -> Self {
        Self { kind }
    }

    fn viewpoint(&self) -> &'static str {
        match self.kind {
            StepKind::FullView => "a full-length front view of the garment worn by a model",
            StepKind::CloseUp => "a close-up detail shot of the fabric, stitching and trims",
            StepKind::Angular => "a three-quarter angled view showing the garment's silhouette",
            StepKind::SceneVariant(_) => "an on-model lifestyle shot",
        }
    }
}

impl StepPrompt for ViewPrompt {
    fn build(&self, item: &Item, _scene: Option<&Scene>, detail: PromptDetail) -> String {
        let descriptor = item.descriptor();
        match detail {
            PromptDetail::Full => format!(
                "Create {} of this {descriptor}. Keep the garment identical to the reference \
                 image in color, pattern and construction. Plain light-grey studio background, \
                 even softbox lighting, photorealistic.",
                self.viewpoint()
            ),
            PromptDetail::Simplified => format!("Photo of this {descriptor}: {}.", self.viewpoint()),
        }
    }
}

/// Lifestyle shot parametrized by the item's Scene
#[derive(Debug, Clone, Copy)]
pub struct SceneVariantPrompt {
    variant: u8,
}

impl SceneVariantPrompt {
    pub fn new(variant: u8) -> Self {
        Self { variant }
    }
}

impl StepPrompt for SceneVariantPrompt {
    fn build(&self, item: &Item, scene: Option<&Scene>, detail: PromptDetail) -> String {
        let descriptor = item.descriptor();
        let Some(scene) = scene else {
            return format!("Lifestyle photo of a model wearing this {descriptor}.");
        };

        let framing = if self.variant % 2 == 1 {
            "full-length, model facing the camera"
        } else {
            "waist-up, model in natural motion"
        };

        match detail {
            PromptDetail::Full => format!(
                "Create a photorealistic {} lifestyle photo of a model wearing this {descriptor}, \
                 framed {framing}. Setting: {}. Mood: {}. Lighting: {}. Styling: {}. Model: {}. \
                 Composition: {}. Props: {}. The garment must match the reference exactly.",
                scene.aesthetic_label,
                scene.setting,
                scene.mood,
                scene.lighting,
                scene.styling,
                scene.model_description,
                scene.composition,
                scene.props.join(", ")
            ),
            PromptDetail::Simplified => format!(
                "Photo of a model wearing this {descriptor} in {}, {} light.",
                scene.setting, scene.lighting
            ),
        }
    }
}

/// Build the step set for an explicit list of kinds
pub fn steps_for(kinds: &[StepKind]) -> Vec<GenerationStep> {
    kinds
        .iter()
        .map(|kind| match kind {
            StepKind::SceneVariant(n) => GenerationStep::new(*kind, true, Arc::new(SceneVariantPrompt::new(*n))),
            other => GenerationStep::new(*other, false, Arc::new(ViewPrompt::new(*other))),
        })
        .collect()
}
