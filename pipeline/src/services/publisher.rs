//! HTTP upload to the remote asset store

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use shared::GeneratedImage;

use crate::error::{PipelineError, PipelineResult};
use crate::traits::PublishAdapter;

/// Upload payload accepted by the asset store
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadBody<'a> {
    pub display_name: &'a str,
    pub group_key: &'a str,
    pub mime_type: &'a str,
    pub data: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    url: Option<String>,
}

pub struct HttpPublisher {
    http: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpPublisher {
    pub fn new(endpoint: impl Into<String>, token: Option<String>, timeout: Duration) -> PipelineResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint: endpoint.into(),
            token,
        })
    }
}

/// Build the JSON upload body for one artifact
pub fn upload_body<'a>(image: &'a GeneratedImage, display_name: &'a str, group_key: &'a str) -> UploadBody<'a> {
    UploadBody {
        display_name,
        group_key,
        mime_type: &image.mime_type,
        data: STANDARD.encode(&image.bytes),
    }
}

/// The store answers `{"url": "..."}`; anything else means no usable URL
pub fn parse_upload_response(body: &str) -> Option<String> {
    serde_json::from_str::<UploadResponse>(body)
        .ok()
        .and_then(|response| response.url)
        .filter(|url| !url.trim().is_empty())
}

#[async_trait]
impl PublishAdapter for HttpPublisher {
    async fn upload(&self, image: &GeneratedImage, display_name: &str, group_key: &str) -> PipelineResult<Option<String>> {
        let mut request = self
            .http
            .post(&self.endpoint)
            .json(&upload_body(image, display_name, group_key));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PipelineError::publish(format!("upload of {display_name} failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PipelineError::publish(format!("reading upload response failed: {e}")))?;

        if !status.is_success() {
            return Err(PipelineError::publish(format!(
                "upload of {display_name} rejected with HTTP {}",
                status.as_u16()
            )));
        }

        Ok(parse_upload_response(&body))
    }
}

/// Publisher used when no asset store is configured: every artifact stays local
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalOnlyPublisher;

#[async_trait]
impl PublishAdapter for LocalOnlyPublisher {
    async fn upload(&self, _image: &GeneratedImage, _display_name: &str, _group_key: &str) -> PipelineResult<Option<String>> {
        Ok(None)
    }
}
