//! Scene resolution with a deterministic fallback pool

use std::sync::Arc;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{ApiFailure, CallKind, Item, ReferenceImage, Scene, item_info, item_warn};

use crate::core::retry::{RetryExecutor, RetryableCall};
use crate::error::PipelineResult;
use crate::services::prompts::scene_prompt;
use crate::traits::GenerationClient;
use crate::types::{PromptDetail, SceneRequest, SceneSource};

/// A Scene together with where it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedScene {
    pub scene: Scene,
    pub source: SceneSource,
}

/// Produces one Scene per resolve call
#[derive(Clone)]
pub struct SceneResolver {
    client: Arc<dyn GenerationClient>,
    executor: RetryExecutor,
}

impl SceneResolver {
    pub fn new(client: Arc<dyn GenerationClient>, executor: RetryExecutor) -> Self {
        Self { client, executor }
    }

    /// Resolve a fresh Scene for `item`
    ///
    /// `generation` is 0 for the initial scene and counts up for every
    /// regeneration; it keys the fallback pool so a regenerated fallback
    /// differs from the previous one. Exhausted retries degrade to the pool;
    /// only a fatal budget error is returned.
    pub async fn resolve(&self, item: &Item, reference: &ReferenceImage, generation: u32) -> PipelineResult<ResolvedScene> {
        let mut call = SceneCall {
            client: self.client.as_ref(),
            item,
            reference,
            detail: PromptDetail::Full,
        };

        let outcome = self.executor.execute(&mut call).await?;

        match outcome.result {
            Ok(scene) => {
                item_info!(
                    item.id,
                    "Resolved scene '{}' (generation {}, {} attempt(s))",
                    scene.aesthetic_label,
                    generation,
                    outcome.attempts
                );
                Ok(ResolvedScene {
                    scene,
                    source: SceneSource::Generated,
                })
            }
            Err(failure) => {
                let scene = fallback_scene(&item.id, generation);
                item_warn!(
                    item.id,
                    "Scene generation failed ({}), using fallback scene '{}'",
                    failure,
                    scene.aesthetic_label
                );
                Ok(ResolvedScene {
                    scene,
                    source: SceneSource::Fallback,
                })
            }
        }
    }
}

struct SceneCall<'a> {
    client: &'a dyn GenerationClient,
    item: &'a Item,
    reference: &'a ReferenceImage,
    detail: PromptDetail,
}

#[async_trait]
impl<'a> RetryableCall for SceneCall<'a> {
    type Output = Scene;

    fn kind(&self) -> CallKind {
        CallKind::Scene
    }

    fn item_id(&self) -> &str {
        &self.item.id
    }

    fn description(&self) -> String {
        "scene generation".to_string()
    }

    async fn attempt(&mut self, _attempt: u32) -> Result<Scene, ApiFailure> {
        let request = SceneRequest {
            item_id: self.item.id.clone(),
            prompt: scene_prompt(self.item, self.detail),
            reference: self.reference.clone(),
        };

        let scene = self.client.generate_scene(&request).await?;
        scene
            .validate()
            .map_err(|e| ApiFailure::MalformedResponse(e.to_string()))?;
        Ok(scene)
    }

    fn degrade(&mut self) {
        self.detail = PromptDetail::Simplified;
    }
}

struct FallbackScene {
    aesthetic_label: &'static str,
    setting: &'static str,
    mood: &'static str,
    lighting: &'static str,
    styling: &'static str,
    model_description: &'static str,
    composition: &'static str,
    props: &'static [&'static str],
}

const FALLBACK_SCENES: [FallbackScene; 5] = [
    FallbackScene {
        aesthetic_label: "Minimal studio",
        setting: "seamless off-white studio backdrop",
        mood: "calm and focused",
        lighting: "soft diffused key light with gentle fill",
        styling: "clean tonal styling that keeps attention on the garment",
        model_description: "model with a relaxed, natural stance",
        composition: "centered full-length frame with generous negative space",
        props: &["low wooden stool"],
    },
    FallbackScene {
        aesthetic_label: "Urban morning",
        setting: "quiet city street with stone facades",
        mood: "fresh and confident",
        lighting: "early morning daylight with long soft shadows",
        styling: "understated accessories and neutral footwear",
        model_description: "model mid-stride, looking past the camera",
        composition: "three-quarter frame with leading lines from the pavement",
        props: &["takeaway coffee cup", "leather tote"],
    },
    FallbackScene {
        aesthetic_label: "Coastal ease",
        setting: "sunlit boardwalk above a pale sand beach",
        mood: "light and unhurried",
        lighting: "warm late-afternoon sun with ocean bounce",
        styling: "breezy layers and minimal jewelry",
        model_description: "model leaning on a wooden railing",
        composition: "rule-of-thirds frame with the horizon low",
        props: &["woven basket", "straw hat"],
    },
    FallbackScene {
        aesthetic_label: "Gallery modern",
        setting: "white-walled gallery with concrete floor",
        mood: "poised and editorial",
        lighting: "cool overhead gallery light with crisp edges",
        styling: "sharp monochrome pairing",
        model_description: "model standing still beside a sculpture",
        composition: "symmetrical frame with strong verticals",
        props: &["abstract plinth sculpture"],
    },
    FallbackScene {
        aesthetic_label: "Autumn park",
        setting: "tree-lined park path with fallen leaves",
        mood: "warm and nostalgic",
        lighting: "golden hour backlight filtering through branches",
        styling: "textured knits and earthy tones",
        model_description: "model walking toward the camera with a slight smile",
        composition: "full-length frame with shallow depth of field",
        props: &["wooden park bench", "scarf"],
    },
];

/// Deterministic pick from the fallback pool keyed by item and generation
pub fn fallback_scene(item_id: &str, generation: u32) -> Scene {
    let seed = fnv1a(item_id.as_bytes()) ^ u64::from(generation).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    let mut rng = StdRng::seed_from_u64(seed);
    let picked = &FALLBACK_SCENES[rng.gen_range(0..FALLBACK_SCENES.len())];

    Scene {
        aesthetic_label: picked.aesthetic_label.to_string(),
        setting: picked.setting.to_string(),
        mood: picked.mood.to_string(),
        lighting: picked.lighting.to_string(),
        styling: picked.styling.to_string(),
        model_description: picked.model_description.to_string(),
        composition: picked.composition.to_string(),
        props: picked.props.iter().map(|p| p.to_string()).collect(),
    }
}

pub fn fallback_pool_size() -> usize {
    FALLBACK_SCENES.len()
}

pub(crate) fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::budget::{BudgetLimits, RateBudget};
    use crate::core::retry::RetryPolicy;
    use crate::error::PipelineError;
    use crate::services::CallTracker;
    use crate::traits::MockGenerationClient;
    use std::time::Duration;

    fn generated_scene(label: &str) -> Scene {
        Scene {
            aesthetic_label: label.to_string(),
            setting: "rooftop garden".to_string(),
            mood: "bright".to_string(),
            lighting: "midday sun".to_string(),
            styling: "monochrome".to_string(),
            model_description: "model seated".to_string(),
            composition: "wide frame".to_string(),
            props: vec!["planter".to_string()],
        }
    }

    fn resolver_with(client: MockGenerationClient, per_day: u32) -> SceneResolver {
        let budget = Arc::new(RateBudget::new(BudgetLimits {
            per_minute: 100,
            per_day,
            inter_request_delay: Duration::ZERO,
        }));
        let executor = RetryExecutor::new(budget, CallTracker::new(), RetryPolicy::default());
        SceneResolver::new(Arc::new(client), executor)
    }

    fn item() -> Item {
        Item::new("SKU-42", "images/sku-42.jpg").with_field("category", "trench coat")
    }

    fn reference() -> ReferenceImage {
        ReferenceImage::new(vec![0xFF, 0xD8, 0xFF], "image/jpeg")
    }

    #[tokio::test(start_paused = true)]
    async fn test_valid_scene_is_returned() {
        let mut client = MockGenerationClient::new();
        client
            .expect_generate_scene()
            .withf(|request| request.item_id == "SKU-42" && request.prompt.contains("trench coat"))
            .times(1)
            .returning(|_| Ok(generated_scene("Rooftop")));

        let resolved = resolver_with(client, 100).resolve(&item(), &reference(), 0).await.unwrap();

        assert_eq!(resolved.source, SceneSource::Generated);
        assert_eq!(resolved.scene.aesthetic_label, "Rooftop");
    }

    #[tokio::test(start_paused = true)]
    async fn test_incomplete_scenes_are_retried_then_fall_back() {
        let mut client = MockGenerationClient::new();
        client.expect_generate_scene().times(3).returning(|_| {
            let mut scene = generated_scene("Broken");
            scene.mood.clear();
            Ok(scene)
        });

        let resolved = resolver_with(client, 100).resolve(&item(), &reference(), 0).await.unwrap();

        assert_eq!(resolved.source, SceneSource::Fallback);
        assert_eq!(resolved.scene, fallback_scene("SKU-42", 0));
        assert!(resolved.scene.validate().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_on_later_attempt() {
        let mut client = MockGenerationClient::new();
        let mut seq = mockall::Sequence::new();
        client
            .expect_generate_scene()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(ApiFailure::ServiceUnavailable));
        client
            .expect_generate_scene()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(generated_scene("Second try")));

        let resolved = resolver_with(client, 100).resolve(&item(), &reference(), 1).await.unwrap();
        assert_eq!(resolved.source, SceneSource::Generated);
        assert_eq!(resolved.scene.aesthetic_label, "Second try");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_budget_error_is_not_swallowed() {
        let mut client = MockGenerationClient::new();
        client.expect_generate_scene().never();

        let resolver = resolver_with(client, 1);
        let held = resolver.executor.budget().reserve().await.unwrap();

        let err = resolver.resolve(&item(), &reference(), 0).await.unwrap_err();
        assert!(matches!(err, PipelineError::DailyBudgetExhausted { .. }));

        resolver.executor.budget().release(held, true).await;
    }

    #[test]
    fn test_fallback_is_deterministic_and_valid() {
        for id in ["SKU-1", "SKU-2", "a-much-longer-identifier", ""] {
            for generation in 0..4 {
                let first = fallback_scene(id, generation);
                assert_eq!(first, fallback_scene(id, generation));
                assert!(first.validate().is_ok());
            }
        }
        assert_eq!(fallback_pool_size(), 5);
    }

    #[test]
    fn test_fallback_spreads_across_pool() {
        let labels: std::collections::HashSet<String> = (0..50)
            .map(|n| fallback_scene(&format!("SKU-{n}"), 0).aesthetic_label)
            .collect();
        assert!(labels.len() > 1);
    }
}
