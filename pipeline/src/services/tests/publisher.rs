//! Tests for the HTTP publisher

use std::time::Duration;

use shared::GeneratedImage;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::error::PipelineError;
use crate::services::publisher::{HttpPublisher, LocalOnlyPublisher, parse_upload_response, upload_body};
use crate::traits::PublishAdapter;

fn image(bytes: &[u8], mime_type: &str) -> GeneratedImage {
    GeneratedImage {
        bytes: bytes.to_vec(),
        mime_type: mime_type.to_string(),
    }
}

#[test]
fn test_upload_body_encodes_bytes_and_mime_type() {
    let artifact = image(b"abc", "image/webp");
    let body = upload_body(&artifact, "SKU-1_01_full-view", "SKU-1");
    let json = serde_json::to_value(&body).unwrap();

    assert_eq!(json["displayName"], "SKU-1_01_full-view");
    assert_eq!(json["groupKey"], "SKU-1");
    assert_eq!(json["mimeType"], "image/webp");
    assert_eq!(json["data"], "YWJj");
}

#[test]
fn test_parse_upload_response() {
    assert_eq!(
        parse_upload_response(r#"{"url": "https://cdn.example/a.png"}"#).as_deref(),
        Some("https://cdn.example/a.png")
    );
    assert_eq!(parse_upload_response(r#"{"url": ""}"#), None);
    assert_eq!(parse_upload_response(r#"{"status": "ok"}"#), None);
    assert_eq!(parse_upload_response("<html>"), None);
}

#[tokio::test]
async fn test_local_only_publisher_returns_none() {
    let url = LocalOnlyPublisher
        .upload(&image(b"x", "image/png"), "name", "group")
        .await
        .unwrap();
    assert!(url.is_none());
}

#[tokio::test]
async fn test_upload_sends_token_and_image_mime_type() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .and(header("authorization", "Bearer tok-123"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"url": "https://cdn.example/sku-1.jpg"}"#))
        .expect(1)
        .mount(&server)
        .await;

    let publisher = HttpPublisher::new(
        format!("{}/upload", server.uri()),
        Some("tok-123".to_string()),
        Duration::from_secs(5),
    )
    .unwrap();
    let url = publisher
        .upload(&image(b"jpeg-bytes", "image/jpeg"), "SKU-1_02_close-up", "SKU-1")
        .await
        .unwrap();

    assert_eq!(url.as_deref(), Some("https://cdn.example/sku-1.jpg"));

    let requests = server.received_requests().await.unwrap();
    let sent: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(sent["mimeType"], "image/jpeg");
    assert_eq!(sent["groupKey"], "SKU-1");
}

#[tokio::test]
async fn test_rejected_upload_is_publish_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let publisher = HttpPublisher::new(server.uri(), None, Duration::from_secs(5)).unwrap();
    let err = publisher
        .upload(&image(b"x", "image/png"), "name", "group")
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::PublishError { .. }));
}

#[tokio::test]
async fn test_unreachable_store_is_publish_error() {
    let publisher = HttpPublisher::new("http://127.0.0.1:9/upload", None, Duration::from_secs(2)).unwrap();
    let err = publisher
        .upload(&image(b"x", "image/png"), "name", "group")
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::PublishError { .. }));
}
