//! Core types used throughout the generation pipeline

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::errors::{SharedError, SharedResult};

/// One unit of work: a garment with a reference image and descriptive fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: String,
    /// Path or http(s) URL of the reference image
    pub reference_image: String,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl Item {
    pub fn new(id: impl Into<String>, reference_image: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            reference_image: reference_image.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Look up a descriptive field, treating blank values as absent
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Short human-readable description built from the common garment fields
    pub fn descriptor(&self) -> String {
        let parts: Vec<&str> = ["color", "material", "category", "name"]
            .iter()
            .filter_map(|key| self.field(key))
            .collect();

        if parts.is_empty() {
            format!("garment {}", self.id)
        } else {
            parts.join(" ")
        }
    }

    pub fn validate(&self) -> SharedResult<()> {
        if self.id.trim().is_empty() {
            return Err(SharedError::InvalidItem {
                message: "item id is empty".to_string(),
            });
        }
        if self.reference_image.trim().is_empty() {
            return Err(SharedError::InvalidItem {
                message: format!("item {} has no reference image", self.id),
            });
        }
        Ok(())
    }
}

/// Reference image bytes loaded for one item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceImage {
    pub bytes: Arc<[u8]>,
    pub mime_type: String,
}

impl ReferenceImage {
    pub fn new(bytes: impl Into<Arc<[u8]>>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            mime_type: mime_type.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Image bytes returned by an image generation call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl GeneratedImage {
    /// File extension matching the mime type; `bin` when it is not a known image type
    pub fn extension(&self) -> &'static str {
        let essence = self.mime_type.split(';').next().unwrap_or_default().trim();
        match essence.to_ascii_lowercase().as_str() {
            "image/png" => "png",
            "image/jpeg" | "image/jpg" => "jpg",
            "image/webp" => "webp",
            "image/gif" => "gif",
            _ => "bin",
        }
    }
}

/// Structured creative direction guiding the scene-dependent steps
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Scene {
    pub aesthetic_label: String,
    pub setting: String,
    pub mood: String,
    pub lighting: String,
    pub styling: String,
    pub model_description: String,
    pub composition: String,
    #[serde(alias = "propsList")]
    pub props: Vec<String>,
}

impl Scene {
    /// Every field must be present and non-blank
    pub fn validate(&self) -> SharedResult<()> {
        let text_fields = [
            ("aestheticLabel", &self.aesthetic_label),
            ("setting", &self.setting),
            ("mood", &self.mood),
            ("lighting", &self.lighting),
            ("styling", &self.styling),
            ("modelDescription", &self.model_description),
            ("composition", &self.composition),
        ];

        for (field, value) in text_fields {
            if value.trim().is_empty() {
                return Err(SharedError::MissingSceneField { field });
            }
        }

        if self.props.is_empty() || self.props.iter().any(|p| p.trim().is_empty()) {
            return Err(SharedError::MissingSceneField { field: "props" });
        }

        Ok(())
    }
}

/// Output slot produced for every item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum StepKind {
    FullView,
    CloseUp,
    Angular,
    SceneVariant(u8),
}

impl StepKind {
    pub fn slug(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepKind::FullView => write!(f, "full-view"),
            StepKind::CloseUp => write!(f, "close-up"),
            StepKind::Angular => write!(f, "angular"),
            StepKind::SceneVariant(n) => write!(f, "scene-variant-{n}"),
        }
    }
}

impl std::str::FromStr for StepKind {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        match normalized.as_str() {
            "full-view" => Ok(StepKind::FullView),
            "close-up" => Ok(StepKind::CloseUp),
            "angular" => Ok(StepKind::Angular),
            other => other
                .strip_prefix("scene-variant-")
                .and_then(|n| n.parse::<u8>().ok())
                .map(StepKind::SceneVariant)
                .ok_or_else(|| SharedError::InvalidStepKind { input: s.to_string() }),
        }
    }
}

impl From<StepKind> for String {
    fn from(kind: StepKind) -> Self {
        kind.to_string()
    }
}

impl TryFrom<String> for StepKind {
    type Error = SharedError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Category of outbound call, used for statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    Scene,
    Image,
    Publish,
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallKind::Scene => write!(f, "scene"),
            CallKind::Image => write!(f, "image"),
            CallKind::Publish => write!(f, "publish"),
        }
    }
}

/// API failure types for remote generation calls
///
/// Every remote failure, including a response that carried no usable payload,
/// is reported through this one type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiFailure {
    QuotaExceeded,
    Timeout,
    NetworkError(String),
    ServiceUnavailable,
    ServerError(String),
    AuthenticationFailed,
    InvalidRequest(String),
    EmptyResponse,
    MalformedResponse(String),
}

impl ApiFailure {
    /// Quota/rate responses get the long cooldown instead of the backoff ladder
    pub fn is_quota(&self) -> bool {
        matches!(self, ApiFailure::QuotaExceeded)
    }

    /// Map an HTTP status and body to a failure
    pub fn from_status(status: u16, body: &str) -> Self {
        if status == 429 || body.contains("RESOURCE_EXHAUSTED") {
            return ApiFailure::QuotaExceeded;
        }
        match status {
            401 | 403 => ApiFailure::AuthenticationFailed,
            400 | 404 | 422 => ApiFailure::InvalidRequest(truncate(body, 200)),
            503 => ApiFailure::ServiceUnavailable,
            _ => ApiFailure::ServerError(format!("HTTP {status}: {}", truncate(body, 200))),
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

impl fmt::Display for ApiFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiFailure::QuotaExceeded => write!(f, "quota exceeded"),
            ApiFailure::Timeout => write!(f, "request timed out"),
            ApiFailure::NetworkError(e) => write!(f, "network error: {e}"),
            ApiFailure::ServiceUnavailable => write!(f, "service unavailable"),
            ApiFailure::ServerError(e) => write!(f, "server error: {e}"),
            ApiFailure::AuthenticationFailed => write!(f, "authentication failed"),
            ApiFailure::InvalidRequest(e) => write!(f, "invalid request: {e}"),
            ApiFailure::EmptyResponse => write!(f, "response contained no payload"),
            ApiFailure::MalformedResponse(e) => write!(f, "malformed response: {e}"),
        }
    }
}

impl std::error::Error for ApiFailure {}
