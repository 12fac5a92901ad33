//! Detector - Frame Detector Adapter
//!
//! ## Responsibilities
//!
//! - Boundary to the person-detection model
//! - Filter raw detections down to the counted target class
//!
//! The model itself runs out of process; `HttpDetector` talks to it.

mod http_detector;

pub use http_detector::HttpDetector;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Bounding box in pixel coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub label: String,
    pub conf: f32,
}

/// Detection filter: which label counts, and how confident it must be
#[derive(Debug, Clone)]
pub struct TargetClass {
    pub label: String,
    pub min_confidence: f32,
}

impl TargetClass {
    pub fn new(label: impl Into<String>, min_confidence: f32) -> Self {
        Self {
            label: label.into(),
            min_confidence,
        }
    }

    /// Keep only boxes of the target label at or above the confidence floor
    pub fn retain(&self, boxes: Vec<BoundingBox>) -> Vec<BoundingBox> {
        boxes
            .into_iter()
            .filter(|b| b.label.eq_ignore_ascii_case(&self.label) && b.conf >= self.min_confidence)
            .collect()
    }
}

impl Default for TargetClass {
    fn default() -> Self {
        Self::new("person", 0.25)
    }
}

/// Person detector
///
/// `image` is an encoded frame (JPEG or PNG). An empty result means nobody
/// was detected and is not an error.
#[async_trait]
pub trait FrameDetector: Send + Sync {
    /// Backend identifier
    fn name(&self) -> &'static str;

    /// Detect target-class instances in one frame
    async fn detect(&self, image: &[u8]) -> Result<Vec<BoundingBox>>;

    /// Whether the backend is reachable
    async fn health_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(label: &str, conf: f32) -> BoundingBox {
        BoundingBox {
            x1: 0.0,
            y1: 0.0,
            x2: 10.0,
            y2: 10.0,
            label: label.to_string(),
            conf,
        }
    }

    #[test]
    fn test_retain_target_class() {
        let target = TargetClass::new("person", 0.5);
        let kept = target.retain(vec![
            bbox("person", 0.9),
            bbox("car", 0.9),
            bbox("Person", 0.6),
            bbox("person", 0.2),
        ]);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_retain_empty() {
        let target = TargetClass::default();
        assert!(target.retain(Vec::new()).is_empty());
    }
}
