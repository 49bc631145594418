//! Local filesystem persistence for generated artifacts

use std::path::PathBuf;

use async_trait::async_trait;
use shared::{GeneratedImage, StepKind};

use crate::core::scene::fnv1a;
use crate::error::{PipelineError, PipelineResult};
use crate::traits::ArtifactStore;

/// Writes `<root>/<item-dir>/<nn>_<step-kind>.<ext>`
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, item_id: &str, index: usize, kind: StepKind, extension: &str) -> PathBuf {
        self.root
            .join(item_dir(item_id))
            .join(format!("{:02}_{}.{}", index, kind.slug(), extension))
    }
}

/// One path component per exact item id
///
/// Ids that are already safe are used as-is. Any other id is cleaned and
/// suffixed with `~` plus a hash of the raw id; `~` never survives cleaning,
/// so the two forms cannot meet.
fn item_dir(item_id: &str) -> String {
    let cleaned: String = item_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
        .collect();

    let cleaned = match cleaned.trim_matches('.') {
        "" => "_".to_string(),
        _ => cleaned,
    };

    if cleaned == item_id {
        cleaned
    } else {
        format!("{cleaned}~{:016x}", fnv1a(item_id.as_bytes()))
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn save(&self, item_id: &str, index: usize, kind: StepKind, image: &GeneratedImage) -> PipelineResult<String> {
        let path = self.path_for(item_id, index, kind, image.extension());

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::storage(format!("{}: {e}", parent.display())))?;
        }

        tokio::fs::write(&path, &image.bytes)
            .await
            .map_err(|e| PipelineError::storage(format!("{}: {e}", path.display())))?;

        Ok(path.to_string_lossy().into_owned())
    }
}
