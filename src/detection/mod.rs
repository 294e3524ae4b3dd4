//! Object-detection adapter.
//!
//! The relay never runs inference itself; it forwards the photo to an
//! external service. A service may answer right away
//! ([`DetectionReply::Completed`]) or acknowledge and call back later
//! ([`DetectionReply::Submitted`]).

pub mod http;

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DetectionError;

pub use http::{DetectionMode, HttpDetector};

/// Photo handed to the detector.
#[derive(Debug, Clone)]
pub struct DetectionRequest {
    pub image: Vec<u8>,
    pub file_name: String,
    /// Identifies the requesting user to the service.
    pub user_id: String,
    /// Conversation the result belongs to (echoed back on callbacks).
    pub chat_id: String,
}

/// Annotated image returned by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultImage {
    Bytes(Vec<u8>),
    Url(String),
}

/// Detected labels plus an optional annotated image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionResult {
    pub labels: Vec<String>,
    pub image: Option<ResultImage>,
}

impl DetectionResult {
    /// Reply text listing each distinct label once, sorted.
    pub fn summary(&self) -> String {
        let labels: BTreeSet<&str> = self
            .labels
            .iter()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .collect();
        if labels.is_empty() {
            "No objects detected.".to_string()
        } else {
            let list: Vec<&str> = labels.into_iter().collect();
            format!("Objects detected:\n{}", list.join("\n"))
        }
    }
}

/// Outcome of a detection call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectionReply {
    /// Result available now.
    Completed(DetectionResult),
    /// Accepted; the result will arrive as a [`DetectionCallback`].
    Submitted { job_id: Option<String> },
}

/// Result pushed back by an asynchronous detection service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionCallback {
    pub chat_id: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default, alias = "predicted_s3_url")]
    pub image_url: Option<String>,
}

impl DetectionCallback {
    pub fn into_result(self) -> (String, DetectionResult) {
        let result = DetectionResult {
            labels: self.labels,
            image: self.image_url.map(ResultImage::Url),
        };
        (self.chat_id, result)
    }
}

/// An object-detection backend.
#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, request: DetectionRequest) -> Result<DetectionReply, DetectionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_sorts_and_dedups_labels() {
        let result = DetectionResult {
            labels: vec!["dog".into(), "cat".into(), "dog".into(), " ".into()],
            image: None,
        };
        assert_eq!(result.summary(), "Objects detected:\ncat\ndog");
    }

    #[test]
    fn summary_without_labels() {
        let result = DetectionResult {
            labels: vec![],
            image: None,
        };
        assert_eq!(result.summary(), "No objects detected.");
    }

    #[test]
    fn callback_accepts_s3_url_alias() {
        let cb: DetectionCallback = serde_json::from_value(serde_json::json!({
            "chat_id": "42",
            "labels": ["person"],
            "predicted_s3_url": "https://bucket/p.jpg"
        }))
        .unwrap();
        let (chat, result) = cb.into_result();
        assert_eq!(chat, "42");
        assert_eq!(
            result.image,
            Some(ResultImage::Url("https://bucket/p.jpg".into()))
        );
    }
}
