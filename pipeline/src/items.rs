//! Item source and report sink

use std::path::Path;

use shared::Item;

use crate::error::{PipelineError, PipelineResult};
use crate::types::BatchReport;

/// Read a JSON array of items
pub async fn load_items(path: impl AsRef<Path>) -> PipelineResult<Vec<Item>> {
    let path = path.as_ref();
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| PipelineError::config(format!("Cannot read items file {}: {e}", path.display())))?;
    parse_items(&raw)
}

pub fn parse_items(raw: &str) -> PipelineResult<Vec<Item>> {
    let items: Vec<Item> = serde_json::from_str(raw)?;
    Ok(items)
}

/// Write the report as pretty JSON, creating parent directories
pub async fn write_report(path: impl AsRef<Path>, report: &BatchReport) -> PipelineResult<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(report)?;
    tokio::fs::write(path, json).await?;
    Ok(())
}
