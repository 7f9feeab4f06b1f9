use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Knobs passed to every engine call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectParams {
    /// Minimum score a detection must reach to be returned.
    pub threshold: f32,
    /// Letterbox the image into the model input instead of stretching it.
    pub keep_aspect_ratio: bool,
    /// Return boxes as fractions of the frame instead of pixels.
    pub relative_coord: bool,
    /// Maximum number of detections, highest scores first.
    pub top_k: usize,
}

/// Object detection engine.
///
/// Engines are opaque to the pipeline: an image goes in, scored boxes come
/// out. Errors are returned as-is and are never retried by callers.
pub trait DetectionEngine: Send {
    /// Engine identifier.
    fn name(&self) -> &'static str;

    /// Run detection on one frame.
    fn detect(&mut self, image: &Frame, params: &DetectParams) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Shared post-processing: drop low scores, sort by score, keep the best
/// `top_k`, and convert to pixel space when relative boxes were not asked for.
pub fn finalize_detections(
    mut detections: Vec<Detection>,
    params: &DetectParams,
    frame_width: u32,
    frame_height: u32,
) -> Vec<Detection> {
    detections.retain(|d| d.score >= params.threshold);
    detections.sort_by(|a, b| b.score.total_cmp(&a.score));
    detections.truncate(params.top_k);
    if !params.relative_coord {
        for d in &mut detections {
            d.bounding_box = d
                .bounding_box
                .scale(frame_width as f32, frame_height as f32);
        }
    }
    detections
}
