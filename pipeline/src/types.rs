//! Pipeline-specific data types

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{CallKind, ReferenceImage, Scene, StepKind};
use uuid::Uuid;

use crate::traits::StepPrompt;

/// How much detail a prompt carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromptDetail {
    Full,
    /// Degraded prompt used for the final attempt after repeated failures
    Simplified,
}

/// One declared output slot, fixed at pipeline construction
#[derive(Clone)]
pub struct GenerationStep {
    pub kind: StepKind,
    pub uses_scene: bool,
    pub prompt: Arc<dyn StepPrompt>,
}

impl GenerationStep {
    pub fn new(kind: StepKind, uses_scene: bool, prompt: Arc<dyn StepPrompt>) -> Self {
        Self { kind, uses_scene, prompt }
    }
}

impl fmt::Debug for GenerationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationStep")
            .field("kind", &self.kind)
            .field("uses_scene", &self.uses_scene)
            .finish()
    }
}

/// Payload for a structured scene call
#[derive(Debug, Clone)]
pub struct SceneRequest {
    pub item_id: String,
    pub prompt: String,
    pub reference: ReferenceImage,
}

/// Payload for an image generation call
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub item_id: String,
    pub step_kind: StepKind,
    pub prompt: String,
    pub detail: PromptDetail,
    pub reference: ReferenceImage,
}

/// Terminal status of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Success,
    Failed,
}

/// Outcome of one declared step for one item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutcome {
    pub step_kind: StepKind,
    pub status: StepStatus,
    pub artifact_location: Option<String>,
    pub error_detail: Option<String>,
    pub attempts_used: u32,
    pub scene_regenerations_used: u32,
    pub degraded_prompt: bool,
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Success
    }
}

/// Where the final Scene for an item came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SceneSource {
    Generated,
    Fallback,
}

/// A published artifact reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "url", rename_all = "camelCase")]
pub enum PublishedUrl {
    Remote(String),
    /// Publishing failed; the artifact is only available locally
    LocalPlaceholder(String),
}

impl PublishedUrl {
    pub fn placeholder(location: &str) -> Self {
        PublishedUrl::LocalPlaceholder(format!("local:{location}"))
    }

    pub fn as_str(&self) -> &str {
        match self {
            PublishedUrl::Remote(url) | PublishedUrl::LocalPlaceholder(url) => url,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, PublishedUrl::Remote(_))
    }
}

/// Published reference for one declared step; `None` when the step failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedSlot {
    pub step_kind: StepKind,
    pub url: Option<PublishedUrl>,
}

/// Overall disposition of a processed item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemDisposition {
    Succeeded,
    PartiallySucceeded,
    Failed,
}

/// Result of running the pipeline for one item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemResult {
    pub item_id: String,
    pub scene_used: Scene,
    pub scene_source: SceneSource,
    pub scene_regenerations: u32,
    pub outcomes: Vec<StepOutcome>,
    pub published: Vec<PublishedSlot>,
}

impl ItemResult {
    pub fn succeeded_steps(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn successful_uploads(&self) -> usize {
        self.published
            .iter()
            .filter(|slot| slot.url.as_ref().is_some_and(PublishedUrl::is_remote))
            .count()
    }

    pub fn disposition(&self) -> ItemDisposition {
        match self.succeeded_steps() {
            0 => ItemDisposition::Failed,
            n if n == self.outcomes.len() => ItemDisposition::Succeeded,
            _ => ItemDisposition::PartiallySucceeded,
        }
    }

    /// Stable-ordered (step, url-or-null) pairs for the report sink
    pub fn published_urls(&self) -> Vec<(StepKind, Option<String>)> {
        self.published
            .iter()
            .map(|slot| (slot.step_kind, slot.url.as_ref().map(|u| u.as_str().to_string())))
            .collect()
    }
}

/// One entry of the batch report, in processing order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum BatchEntry {
    Processed(ItemResult),
    Skipped { item_id: String, reason: String },
    /// Interrupted by a fatal error; `completed` holds the steps that finished first
    Aborted {
        item_id: String,
        completed: Vec<StepOutcome>,
        reason: String,
    },
}

impl BatchEntry {
    pub fn item_id(&self) -> &str {
        match self {
            BatchEntry::Processed(result) => &result.item_id,
            BatchEntry::Skipped { item_id, .. } | BatchEntry::Aborted { item_id, .. } => item_id,
        }
    }
}

/// Summary counts across the batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub succeeded_items: usize,
    pub partial_items: usize,
    pub failed_items: usize,
    pub skipped_items: usize,
    pub aborted_items: usize,
    pub succeeded_steps: usize,
    pub failed_steps: usize,
    pub successful_uploads: usize,
}

/// Per call-kind statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallStats {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub quota_hits: u64,
    pub total_response_time_ms: u64,
}

impl CallStats {
    pub fn average_response_time_ms(&self) -> u64 {
        if self.total_calls == 0 {
            0
        } else {
            self.total_response_time_ms / self.total_calls
        }
    }
}

/// Final aggregated outcome of a batch run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub entries: Vec<BatchEntry>,
    pub summary: BatchSummary,
    pub call_stats: BTreeMap<CallKind, CallStats>,
}

impl BatchReport {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            finished_at: None,
            entries: Vec::new(),
            summary: BatchSummary::default(),
            call_stats: BTreeMap::new(),
        }
    }

    /// Append an entry and fold it into the summary
    pub fn push(&mut self, entry: BatchEntry) {
        match &entry {
            BatchEntry::Processed(result) => {
                match result.disposition() {
                    ItemDisposition::Succeeded => self.summary.succeeded_items += 1,
                    ItemDisposition::PartiallySucceeded => self.summary.partial_items += 1,
                    ItemDisposition::Failed => self.summary.failed_items += 1,
                }
                let succeeded = result.succeeded_steps();
                self.summary.succeeded_steps += succeeded;
                self.summary.failed_steps += result.outcomes.len() - succeeded;
                self.summary.successful_uploads += result.successful_uploads();
            }
            BatchEntry::Skipped { .. } => self.summary.skipped_items += 1,
            BatchEntry::Aborted { completed, .. } => {
                self.summary.aborted_items += 1;
                let succeeded = completed.iter().filter(|o| o.is_success()).count();
                self.summary.succeeded_steps += succeeded;
                self.summary.failed_steps += completed.len() - succeeded;
            }
        }
        self.entries.push(entry);
    }

    pub fn finish(&mut self, call_stats: BTreeMap<CallKind, CallStats>) {
        self.call_stats = call_stats;
        self.finished_at = Some(Utc::now());
    }

    pub fn item_results(&self) -> impl Iterator<Item = &ItemResult> {
        self.entries.iter().filter_map(|entry| match entry {
            BatchEntry::Processed(result) => Some(result),
            BatchEntry::Skipped { .. } | BatchEntry::Aborted { .. } => None,
        })
    }

    pub fn find(&self, item_id: &str) -> Option<&BatchEntry> {
        self.entries.iter().find(|entry| entry.item_id() == item_id)
    }

    /// Per processed item, the ordered (step, url-or-null) pairs
    pub fn published_rows(&self) -> Vec<(String, Vec<(StepKind, Option<String>)>)> {
        self.item_results()
            .map(|result| (result.item_id.clone(), result.published_urls()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(kind: StepKind, success: bool) -> StepOutcome {
        StepOutcome {
            step_kind: kind,
            status: if success { StepStatus::Success } else { StepStatus::Failed },
            artifact_location: success.then(|| format!("out/{kind}.png")),
            error_detail: (!success).then(|| "quota exceeded".to_string()),
            attempts_used: 1,
            scene_regenerations_used: 0,
            degraded_prompt: false,
        }
    }

    fn result(id: &str, successes: &[bool], remote: &[bool]) -> ItemResult {
        let kinds = [StepKind::FullView, StepKind::CloseUp, StepKind::Angular, StepKind::SceneVariant(1)];
        let outcomes: Vec<StepOutcome> = kinds
            .iter()
            .zip(successes)
            .map(|(kind, ok)| outcome(*kind, *ok))
            .collect();
        let published = outcomes
            .iter()
            .zip(remote)
            .map(|(o, is_remote)| PublishedSlot {
                step_kind: o.step_kind,
                url: o.artifact_location.as_ref().map(|loc| {
                    if *is_remote {
                        PublishedUrl::Remote(format!("https://cdn.example/{loc}"))
                    } else {
                        PublishedUrl::placeholder(loc)
                    }
                }),
            })
            .collect();
        ItemResult {
            item_id: id.to_string(),
            scene_used: Scene::default(),
            scene_source: SceneSource::Generated,
            scene_regenerations: 0,
            outcomes,
            published,
        }
    }

    #[test]
    fn test_item_disposition() {
        assert_eq!(
            result("a", &[true, true, true, true], &[true; 4]).disposition(),
            ItemDisposition::Succeeded
        );
        assert_eq!(
            result("b", &[true, false, true, true], &[true; 4]).disposition(),
            ItemDisposition::PartiallySucceeded
        );
        assert_eq!(
            result("c", &[false; 4], &[true; 4]).disposition(),
            ItemDisposition::Failed
        );
    }

    #[test]
    fn test_uploads_exclude_placeholders() {
        let item = result("a", &[true, true, false, true], &[true, false, true, true]);
        assert_eq!(item.succeeded_steps(), 3);
        assert_eq!(item.successful_uploads(), 2);

        let urls = item.published_urls();
        assert_eq!(urls.len(), 4);
        assert_eq!(urls[1].1.as_deref(), Some("local:out/close-up.png"));
        assert_eq!(urls[2], (StepKind::Angular, None));
    }

    #[test]
    fn test_report_summary_counts() {
        let mut report = BatchReport::new(Uuid::new_v4());
        report.push(BatchEntry::Processed(result("a", &[true; 4], &[true; 4])));
        report.push(BatchEntry::Processed(result("b", &[true, false, false, false], &[false; 4])));
        report.push(BatchEntry::Processed(result("c", &[false; 4], &[false; 4])));
        report.push(BatchEntry::Skipped {
            item_id: "d".to_string(),
            reason: "missing image".to_string(),
        });

        assert_eq!(report.summary.succeeded_items, 1);
        assert_eq!(report.summary.partial_items, 1);
        assert_eq!(report.summary.failed_items, 1);
        assert_eq!(report.summary.skipped_items, 1);
        assert_eq!(report.summary.succeeded_steps, 5);
        assert_eq!(report.summary.failed_steps, 7);
        assert_eq!(report.summary.successful_uploads, 4);
        assert_eq!(report.published_rows().len(), 3);
        assert!(matches!(report.find("d"), Some(BatchEntry::Skipped { .. })));
    }

    #[test]
    fn test_aborted_entry_counts_completed_steps() {
        let mut report = BatchReport::new(Uuid::new_v4());
        report.push(BatchEntry::Aborted {
            item_id: "e".to_string(),
            completed: vec![outcome(StepKind::FullView, true), outcome(StepKind::CloseUp, false)],
            reason: "budget exhausted".to_string(),
        });

        assert_eq!(report.summary.aborted_items, 1);
        assert_eq!(report.summary.succeeded_steps, 1);
        assert_eq!(report.summary.failed_steps, 1);
        assert!(report.published_rows().is_empty());
        assert_eq!(report.entries[0].item_id(), "e");

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["entries"][0]["status"], "aborted");
        assert_eq!(json["entries"][0]["completed"][0]["status"], "Success");
    }

    #[test]
    fn test_report_serializes_to_json() {
        let mut report = BatchReport::new(Uuid::new_v4());
        report.push(BatchEntry::Processed(result("a", &[true, false, true, true], &[true; 4])));
        report.finish(BTreeMap::new());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["entries"][0]["status"], "processed");
        assert_eq!(json["entries"][0]["outcomes"][0]["stepKind"], "full-view");
        assert_eq!(json["entries"][0]["published"][0]["url"]["kind"], "remote");
    }
}
