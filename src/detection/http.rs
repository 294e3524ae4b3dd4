//! HTTP detection service client.
//!
//! `POST {base}/predict` with a multipart `file` part and an `x-user-id`
//! header. The JSON body carries `labels` plus either `predicted_s3_url`
//! or a `prediction_uid` whose annotated image lives at
//! `GET {base}/prediction/{uid}/image`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use super::{DetectionReply, DetectionRequest, DetectionResult, Detector, ResultImage};
use crate::error::DetectionError;

/// How results come back from the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectionMode {
    /// The `/predict` response holds the result.
    Sync,
    /// The service answers `202 Accepted` and later POSTs to `callback_url`.
    Async { callback_url: String },
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default, alias = "uid")]
    prediction_uid: Option<String>,
    #[serde(default)]
    predicted_s3_url: Option<String>,
    #[serde(default)]
    job_id: Option<String>,
}

/// Detector backed by an HTTP service.
pub struct HttpDetector {
    base_url: String,
    mode: DetectionMode,
    client: reqwest::Client,
}

impl HttpDetector {
    pub fn new(base_url: impl Into<String>, mode: DetectionMode, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            mode,
            client,
        }
    }

    fn predict_url(&self) -> String {
        format!("{}/predict", self.base_url)
    }

    fn prediction_image_url(&self, uid: &str) -> String {
        format!("{}/prediction/{uid}/image", self.base_url)
    }

    /// Fetch the annotated image. Failures are logged and yield `None`;
    /// the labels are still worth replying with.
    async fn fetch_prediction_image(&self, uid: &str) -> Option<Vec<u8>> {
        let url = self.prediction_image_url(uid);
        let resp = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(uid = %uid, "Prediction image fetch failed: {e}");
                return None;
            }
        };
        if !resp.status().is_success() {
            tracing::warn!(uid = %uid, status = %resp.status(), "Prediction image unavailable");
            return None;
        }
        match resp.bytes().await {
            Ok(bytes) => Some(bytes.to_vec()),
            Err(e) => {
                tracing::warn!(uid = %uid, "Prediction image read failed: {e}");
                None
            }
        }
    }
}

#[async_trait]
impl Detector for HttpDetector {
    async fn detect(&self, request: DetectionRequest) -> Result<DetectionReply, DetectionError> {
        let part = Part::bytes(request.image)
            .file_name(request.file_name)
            .mime_str("image/jpeg")
            .map_err(|e| DetectionError::Unavailable {
                reason: e.to_string(),
            })?;

        let mut form = Form::new().part("file", part);
        if let DetectionMode::Async { callback_url } = &self.mode {
            form = form
                .text("callback_url", callback_url.clone())
                .text("chat_id", request.chat_id.clone());
        }

        let resp = self
            .client
            .post(self.predict_url())
            .header("x-user-id", &request.user_id)
            .multipart(form)
            .send()
            .await
            .map_err(|e| DetectionError::Unavailable {
                reason: e.to_string(),
            })?;

        let status = resp.status();
        tracing::info!(status = %status, chat_id = %request.chat_id, "Detection service responded");

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DetectionError::Unavailable {
                reason: format!("predict returned {status}: {body}"),
            });
        }

        let body: PredictResponse =
            resp.json()
                .await
                .map_err(|e| DetectionError::InvalidResponse {
                    reason: e.to_string(),
                })?;

        if status == StatusCode::ACCEPTED && matches!(self.mode, DetectionMode::Async { .. }) {
            return Ok(DetectionReply::Submitted {
                job_id: body.job_id.or(body.prediction_uid),
            });
        }

        let image = match (body.predicted_s3_url, body.prediction_uid) {
            (Some(url), _) => Some(ResultImage::Url(url)),
            (None, Some(uid)) => self
                .fetch_prediction_image(&uid)
                .await
                .map(ResultImage::Bytes),
            (None, None) => None,
        };

        Ok(DetectionReply::Completed(DetectionResult {
            labels: body.labels,
            image,
        }))
    }
}
