//! Gemini `generateContent` client for scene and image calls

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};
use shared::{ApiFailure, GeneratedImage, ReferenceImage, Scene};

use crate::traits::GenerationClient;
use crate::types::{GenerationRequest, SceneRequest};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_SCENE_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image-preview";

/// Real generation client backed by the Gemini REST API
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    scene_model: String,
    image_model: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            scene_model: DEFAULT_SCENE_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
        }
    }

    pub fn with_models(mut self, scene_model: impl Into<String>, image_model: impl Into<String>) -> Self {
        self.scene_model = scene_model.into();
        self.image_model = image_model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.base_url, model)
    }

    async fn post(&self, model: &str, body: &Value) -> Result<Value, ApiFailure> {
        let response = self
            .http
            .post(self.endpoint(model))
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ApiFailure::Timeout
                } else {
                    ApiFailure::NetworkError(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiFailure::from_status(status.as_u16(), &body));
        }

        response
            .json()
            .await
            .map_err(|e| ApiFailure::MalformedResponse(format!("Failed to parse response: {e}")))
    }
}

#[async_trait]
impl GenerationClient for GeminiClient {
    async fn generate_scene(&self, request: &SceneRequest) -> Result<Scene, ApiFailure> {
        let body = scene_body(&request.prompt, &request.reference);
        let response = self.post(&self.scene_model, &body).await?;
        parse_scene_response(&response)
    }

    async fn generate_image(&self, request: &GenerationRequest) -> Result<GeneratedImage, ApiFailure> {
        let body = image_body(&request.prompt, &request.reference);
        let response = self.post(&self.image_model, &body).await?;
        parse_image_response(&response)
    }
}

fn inline_reference(reference: &ReferenceImage) -> Value {
    json!({
        "inlineData": {
            "mimeType": reference.mime_type,
            "data": STANDARD.encode(&reference.bytes[..]),
        }
    })
}

/// Request body for the structured scene call
pub fn scene_body(prompt: &str, reference: &ReferenceImage) -> Value {
    json!({
        "contents": [{
            "parts": [inline_reference(reference), { "text": prompt }]
        }],
        "generationConfig": {
            "responseMimeType": "application/json",
            "temperature": 0.9
        }
    })
}

/// Request body for an image call
pub fn image_body(prompt: &str, reference: &ReferenceImage) -> Value {
    json!({
        "contents": [{
            "parts": [inline_reference(reference), { "text": prompt }]
        }],
        "generationConfig": {
            "responseModalities": ["TEXT", "IMAGE"]
        }
    })
}

fn response_parts(response: &Value) -> Result<&Vec<Value>, ApiFailure> {
    if let Some(reason) = response
        .get("promptFeedback")
        .and_then(|f| f.get("blockReason"))
        .and_then(Value::as_str)
    {
        return Err(ApiFailure::InvalidRequest(format!("prompt blocked: {reason}")));
    }

    response
        .get("candidates")
        .and_then(|candidates| candidates.get(0))
        .and_then(|candidate| candidate.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .ok_or(ApiFailure::EmptyResponse)
}

/// Extract and decode the Scene JSON from a text part
pub fn parse_scene_response(response: &Value) -> Result<Scene, ApiFailure> {
    let text: String = response_parts(response)?
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();

    if text.trim().is_empty() {
        return Err(ApiFailure::EmptyResponse);
    }

    serde_json::from_str(strip_code_fence(&text))
        .map_err(|e| ApiFailure::MalformedResponse(format!("scene JSON: {e}")))
}

/// Extract and decode the first inline image part
pub fn parse_image_response(response: &Value) -> Result<GeneratedImage, ApiFailure> {
    let inline = response_parts(response)?
        .iter()
        .find_map(|part| part.get("inlineData").or_else(|| part.get("inline_data")))
        .ok_or(ApiFailure::EmptyResponse)?;

    let data = inline.get("data").and_then(Value::as_str).ok_or(ApiFailure::EmptyResponse)?;
    let mime_type = inline
        .get("mimeType")
        .or_else(|| inline.get("mime_type"))
        .and_then(Value::as_str)
        .unwrap_or("image/png");

    let bytes = STANDARD
        .decode(data)
        .map_err(|e| ApiFailure::MalformedResponse(format!("image data: {e}")))?;
    if bytes.is_empty() {
        return Err(ApiFailure::EmptyResponse);
    }

    Ok(GeneratedImage {
        bytes,
        mime_type: mime_type.to_string(),
    })
}

/// Models sometimes wrap JSON in a markdown fence
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}
