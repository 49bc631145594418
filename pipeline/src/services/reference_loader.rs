//! Loads reference images from http(s) URLs or the local filesystem

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use shared::{Item, ReferenceImage};

use crate::error::{PipelineError, PipelineResult};
use crate::traits::ReferenceLoader;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

pub struct RealReferenceLoader {
    http: reqwest::Client,
    base_dir: Option<std::path::PathBuf>,
}

impl RealReferenceLoader {
    pub fn new() -> PipelineResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| PipelineError::config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { http, base_dir: None })
    }

    /// Resolve relative file locators against `dir`
    pub fn with_base_dir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    async fn fetch(&self, item: &Item, url: &str) -> PipelineResult<ReferenceImage> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| PipelineError::reference(&item.id, format!("fetch failed: {e}")))?;

        if !response.status().is_success() {
            return Err(PipelineError::reference(
                &item.id,
                format!("fetch returned HTTP {}", response.status().as_u16()),
            ));
        }

        let header_mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|v| v.starts_with("image/"))
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());

        let bytes = response
            .bytes()
            .await
            .map_err(|e| PipelineError::reference(&item.id, format!("reading body failed: {e}")))?;

        let mime_type = header_mime.unwrap_or_else(|| mime_from_locator(url).to_string());
        Ok(ReferenceImage::new(bytes.to_vec(), mime_type))
    }

    async fn read_file(&self, item: &Item, locator: &str) -> PipelineResult<ReferenceImage> {
        let path = match &self.base_dir {
            Some(dir) if Path::new(locator).is_relative() => dir.join(locator),
            _ => Path::new(locator).to_path_buf(),
        };

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| PipelineError::reference(&item.id, format!("{}: {e}", path.display())))?;

        Ok(ReferenceImage::new(bytes, mime_from_locator(locator)))
    }
}

#[async_trait]
impl ReferenceLoader for RealReferenceLoader {
    async fn load(&self, item: &Item) -> PipelineResult<ReferenceImage> {
        let locator = item.reference_image.trim();
        let image = if is_remote(locator) {
            self.fetch(item, locator).await?
        } else {
            self.read_file(item, locator).await?
        };

        if image.is_empty() {
            return Err(PipelineError::reference(&item.id, "reference image is empty"));
        }
        Ok(image)
    }
}

pub fn is_remote(locator: &str) -> bool {
    let lower = locator.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Mime type inferred from the locator's extension, ignoring any query string
pub fn mime_from_locator(locator: &str) -> &'static str {
    let path = locator.split(['?', '#']).next().unwrap_or(locator);
    let extension = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("heic") => "image/heic",
        _ => "image/jpeg",
    }
}
