use anyhow::{anyhow, Result};

use crate::detect::engine::{finalize_detections, DetectParams, DetectionEngine};
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

/// Stub engine for demos and tests. No model is executed.
///
/// Reports one centered box whose score is the frame's mean brightness, so
/// brighter synthetic scenes produce more confident detections.
pub struct StubBackend {
    label_id: u32,
}

impl StubBackend {
    pub fn new() -> Self {
        Self { label_id: 0 }
    }

    /// Class id attached to every reported box.
    pub fn with_label(mut self, label_id: u32) -> Self {
        self.label_id = label_id;
        self
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectionEngine for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, image: &Frame, params: &DetectParams) -> Result<Vec<Detection>> {
        if image.width == 0 || image.height == 0 {
            return Err(anyhow!("stub engine received an empty frame"));
        }
        let score = (image.mean_intensity() / 255.0).clamp(0.0, 1.0);
        let detection = Detection::new(
            self.label_id,
            score,
            BoundingBox::new(0.25, 0.25, 0.75, 0.75),
        );
        Ok(finalize_detections(
            vec![detection],
            params,
            image.width,
            image.height,
        ))
    }
}
