//! HTTP inference server client

use super::{BoundingBox, FrameDetector, TargetClass};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;

/// Inference response body
#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    detections: Vec<BoundingBox>,
}

/// Detector backed by an HTTP inference server
///
/// POST `{base_url}/v1/detect` with multipart part `image` and text field
/// `classes`; the server answers `{ "detections": [...] }`.
pub struct HttpDetector {
    client: reqwest::Client,
    base_url: String,
    target: TargetClass,
}

impl HttpDetector {
    /// Create new detector client
    pub fn new(base_url: impl Into<String>, target: TargetClass, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            target,
        })
    }

    /// Get base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Guess the upload mime type from magic bytes
fn sniff_mime(image: &[u8]) -> (&'static str, &'static str) {
    if image.starts_with(&[0x89, b'P', b'N', b'G']) {
        ("image/png", "frame.png")
    } else {
        ("image/jpeg", "frame.jpg")
    }
}

#[async_trait]
impl FrameDetector for HttpDetector {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn detect(&self, image: &[u8]) -> Result<Vec<BoundingBox>> {
        let url = format!("{}/v1/detect", self.base_url);
        let (mime, file_name) = sniff_mime(image);

        let form = Form::new()
            .part(
                "image",
                Part::bytes(image.to_vec())
                    .file_name(file_name)
                    .mime_str(mime)?,
            )
            .text("classes", self.target.label.clone());

        let resp = self.client.post(&url).multipart(form).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Detector(format!(
                "inference failed: {} - {}",
                status, body
            )));
        }

        let result: DetectResponse = resp.json().await?;
        let boxes = self.target.retain(result.detections);

        tracing::trace!(count = boxes.len(), "Detection complete");
        Ok(boxes)
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/healthz", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}
