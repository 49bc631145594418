//! Sequential batch runner and report aggregation

use std::collections::HashSet;
use std::sync::Arc;

use shared::Item;
use shared::logging::{log_error, log_progress};
use tracing::info;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::core::budget::RateBudget;
use crate::core::item::{ItemPipeline, PipelineServices};
use crate::core::retry::RetryExecutor;
use crate::error::{BatchAbort, PipelineResult};
use crate::services::CallTracker;
use crate::services::prompts::steps_for;
use crate::types::BatchReport;

/// Drops repeated identifiers; the first occurrence wins
pub fn dedupe_items(items: &[Item]) -> Vec<&Item> {
    let mut seen = HashSet::new();
    items.iter().filter(|item| seen.insert(item.id.as_str())).collect()
}

/// Half-open `[start, start + limit)` clamped to the collection
pub fn slice_bounds(len: usize, start: usize, limit: Option<usize>) -> (usize, usize) {
    let begin = start.min(len);
    let end = match limit {
        Some(limit) => begin.saturating_add(limit).min(len),
        None => len,
    };
    (begin, end)
}

pub struct BatchRunner {
    pipeline: ItemPipeline,
    tracker: CallTracker,
    run_id: Uuid,
}

impl BatchRunner {
    pub fn new(pipeline: ItemPipeline, tracker: CallTracker) -> Self {
        Self {
            pipeline,
            tracker,
            run_id: Uuid::new_v4(),
        }
    }

    /// Wire budget, executor and pipeline from a validated config
    pub fn from_config(config: &PipelineConfig, services: PipelineServices) -> PipelineResult<Self> {
        config.validate()?;

        let tracker = CallTracker::new();
        let budget = Arc::new(RateBudget::new(config.budget));
        let executor = RetryExecutor::new(budget, tracker.clone(), config.retry);
        let pipeline = ItemPipeline::new(
            services,
            executor,
            tracker.clone(),
            steps_for(&config.steps),
            config.scene_regeneration_cap,
        )?;

        Ok(Self::new(pipeline, tracker))
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Process the de-duplicated, sliced items strictly in order
    ///
    /// A fatal error stops the run and hands back the report built so far.
    pub async fn run(&self, items: &[Item], start: usize, limit: Option<usize>) -> Result<BatchReport, BatchAbort> {
        let run_id = self.run_id.to_string();
        let unique = dedupe_items(items);
        let (begin, end) = slice_bounds(unique.len(), start, limit);
        let selected = &unique[begin..end];

        info!(
            run = %run_id,
            "Processing {} item(s) [{}, {}) of {} unique ({} in input)",
            selected.len(),
            begin,
            end,
            unique.len(),
            items.len()
        );

        let mut report = BatchReport::new(self.run_id);

        for (position, item) in selected.iter().enumerate() {
            log_progress(
                &run_id,
                &format!("Item {}/{}", position + 1, selected.len()),
                &item.id,
            );

            match self.pipeline.run(item).await {
                Ok(entry) => report.push(entry),
                Err(interrupted) => {
                    log_error(&run_id, &format!("Aborting run at item {}", item.id), &interrupted.source);
                    report.push(interrupted.entry);
                    report.finish(self.tracker.snapshot().await);
                    return Err(BatchAbort {
                        report,
                        source: interrupted.source,
                    });
                }
            }
        }

        report.finish(self.tracker.snapshot().await);

        let summary = &report.summary;
        info!(
            run = %run_id,
            "Run complete: {} succeeded, {} partial, {} failed, {} skipped, {} upload(s)",
            summary.succeeded_items,
            summary.partial_items,
            summary.failed_items,
            summary.skipped_items,
            summary.successful_uploads
        );

        Ok(report)
    }
}
