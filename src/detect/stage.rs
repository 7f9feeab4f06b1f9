use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::clock::{Clock, MonotonicClock};
use crate::detect::engine::{DetectParams, DetectionEngine};
use crate::detect::labels::LabelMap;
use crate::detect::result::Detection;
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::pipeline::{Next, PipeElement, Sample};

const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.6;
const DEFAULT_TOP_K: usize = 3;
const DEFAULT_ENGINE: &str = "tract";
const DEFAULT_INPUT_SIZE: u32 = 300;

/// Options of a `detect_objects` element.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct DetectConfig {
    pub model: PathBuf,
    pub labels: PathBuf,
    pub confidence_threshold: f32,
    pub top_k: usize,
    /// Registered engine name.
    pub engine: String,
    pub input_width: u32,
    pub input_height: u32,
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            model: PathBuf::new(),
            labels: PathBuf::new(),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            top_k: DEFAULT_TOP_K,
            engine: DEFAULT_ENGINE.to_string(),
            input_width: DEFAULT_INPUT_SIZE,
            input_height: DEFAULT_INPUT_SIZE,
        }
    }
}

impl DetectConfig {
    pub fn new(model: impl Into<PathBuf>, labels: impl Into<PathBuf>) -> Self {
        Self {
            model: model.into(),
            labels: labels.into(),
            ..Self::default()
        }
    }

    /// Anchor relative model and label paths under `models_dir`.
    pub fn resolve_paths(&mut self, models_dir: &Path) {
        if !self.model.as_os_str().is_empty() && self.model.is_relative() {
            self.model = models_dir.join(&self.model);
        }
        if !self.labels.as_os_str().is_empty() && self.labels.is_relative() {
            self.labels = models_dir.join(&self.labels);
        }
    }

    /// Fail fast on anything that would make the stage unusable.
    pub fn validate(&self) -> Result<()> {
        if self.model.as_os_str().is_empty() {
            return Err(Error::Configuration(
                "detect_objects requires a model path".to_string(),
            ));
        }
        if !self.model.is_file() {
            return Err(Error::MissingFile {
                kind: "AI model",
                path: self.model.clone(),
            });
        }
        if self.labels.as_os_str().is_empty() {
            return Err(Error::Configuration(
                "detect_objects requires a labels path".to_string(),
            ));
        }
        if !self.labels.is_file() {
            return Err(Error::MissingFile {
                kind: "AI model labels",
                path: self.labels.clone(),
            });
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(Error::Configuration(format!(
                "confidence_threshold must be within 0..=1, got {}",
                self.confidence_threshold
            )));
        }
        if self.top_k == 0 {
            return Err(Error::Configuration("top_k must be at least 1".to_string()));
        }
        if self.input_width == 0 || self.input_height == 0 {
            return Err(Error::Configuration(
                "engine input size must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    fn params(&self) -> DetectParams {
        DetectParams {
            threshold: self.confidence_threshold,
            keep_aspect_ratio: true,
            relative_coord: true,
            top_k: self.top_k,
        }
    }
}

/// What the detection stage forwards downstream.
#[derive(Debug)]
pub struct DetectionSample {
    pub detections: Vec<Detection>,
    pub labels: Arc<LabelMap>,
    /// Human-readable timing line, e.g. `Inference: 12.34 ms  FPS: 27.81 fps`.
    pub info: String,
    /// Width and height of the frame the detections were computed on.
    pub frame_size: (u32, u32),
}

/// Pipe element running object detection on each image sample.
///
/// A stage instance carries timing state between calls and must only be
/// driven from one thread at a time.
pub struct ObjectDetect {
    engine: Box<dyn DetectionEngine>,
    labels: Arc<LabelMap>,
    params: DetectParams,
    clock: Arc<dyn Clock>,
    last_end: Duration,
}

impl ObjectDetect {
    /// Validate the config, load labels and take ownership of the engine.
    pub fn new(config: &DetectConfig, engine: Box<dyn DetectionEngine>) -> Result<Self> {
        Self::with_clock(config, engine, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(
        config: &DetectConfig,
        engine: Box<dyn DetectionEngine>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        log::info!(
            "loading AI model {} with labels {}",
            config.model.display(),
            config.labels.display()
        );
        let labels = LabelMap::load(&config.labels)?;
        log::info!(
            "AI model confidence threshold: {:.0}%",
            config.confidence_threshold * 100.0
        );
        let last_end = clock.now();
        Ok(Self {
            engine,
            labels: Arc::new(labels),
            params: config.params(),
            clock,
            last_end,
        })
    }

    pub fn labels(&self) -> &LabelMap {
        &self.labels
    }

    pub fn params(&self) -> &DetectParams {
        &self.params
    }

    /// Run the engine on one frame and build the downstream sample.
    ///
    /// On engine failure the error is returned and timing state is left as is.
    pub fn detect(&mut self, image: &Frame) -> Result<DetectionSample> {
        let start = self.clock.now();
        let detections = self
            .engine
            .detect(image, &self.params)
            .map_err(Error::EngineInvocation)?;
        let end = self.clock.now();

        let inference_ms = end.saturating_sub(start).as_secs_f64() * 1000.0;
        let fps = 1.0 / end.saturating_sub(self.last_end).as_secs_f64();
        self.last_end = end;

        let info = format_timing(inference_ms, fps);
        log::info!("{}", info);

        Ok(DetectionSample {
            detections,
            labels: Arc::clone(&self.labels),
            info,
            frame_size: image.size(),
        })
    }
}

/// `Inference: <ms> ms  FPS: <fps> fps`, two decimals each.
pub fn format_timing(inference_ms: f64, fps: f64) -> String {
    format!("Inference: {:.2} ms  FPS: {:.2} fps", inference_ms, fps)
}

impl PipeElement for ObjectDetect {
    fn name(&self) -> &str {
        "detect_objects"
    }

    fn receive_next_sample(&mut self, sample: Sample, next: Next<'_>) -> Result<()> {
        let image = match sample {
            Sample::Image(frame) => frame,
            other => {
                return Err(Error::UnexpectedSample {
                    element: self.name().to_string(),
                    expected: "image",
                    found: other.kind(),
                })
            }
        };
        log::debug!("AI inference received frame #{}", image.sequence);
        let output = self.detect(&image)?;
        next.forward(Sample::Detections(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::detect::result::BoundingBox;
    use std::io::Write;
    use tempfile::NamedTempFile;

    struct FixedEngine {
        clock: Arc<ManualClock>,
        took: Duration,
    }

    impl DetectionEngine for FixedEngine {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn detect(&mut self, _image: &Frame, _params: &DetectParams) -> anyhow::Result<Vec<Detection>> {
            self.clock.advance(self.took);
            Ok(vec![Detection::new(
                0,
                0.87,
                BoundingBox::new(0.1, 0.1, 0.5, 0.5),
            )])
        }
    }

    fn fixture(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("temp file");
        file.write_all(contents.as_bytes()).expect("write temp file");
        file
    }

    #[test]
    fn first_call_measures_fps_from_construction() -> Result<()> {
        let model = fixture("model");
        let labels = fixture("0 person\n");
        let clock = Arc::new(ManualClock::new(Duration::from_secs(100)));
        let engine = FixedEngine {
            clock: Arc::clone(&clock),
            took: Duration::from_millis(20),
        };
        let cfg = DetectConfig::new(model.path(), labels.path());
        let mut stage = ObjectDetect::with_clock(&cfg, Box::new(engine), clock.clone())?;

        clock.advance(Duration::from_millis(480));
        let frame = Frame::from_rgb(vec![0u8; 12], 2, 2, 1)?;
        let out = stage.detect(&frame)?;
        // 500ms since construction
        assert_eq!(out.info, "Inference: 20.00 ms  FPS: 2.00 fps");
        assert_eq!(out.frame_size, (2, 2));
        Ok(())
    }

    #[test]
    fn params_follow_config() -> Result<()> {
        let model = fixture("model");
        let labels = fixture("0 person\n");
        let mut cfg = DetectConfig::new(model.path(), labels.path());
        cfg.confidence_threshold = 0.25;
        cfg.top_k = 7;
        let clock = Arc::new(ManualClock::default());
        let engine = FixedEngine {
            clock: Arc::clone(&clock),
            took: Duration::ZERO,
        };
        let stage = ObjectDetect::with_clock(&cfg, Box::new(engine), clock)?;
        let params = stage.params();
        assert_eq!(params.threshold, 0.25);
        assert_eq!(params.top_k, 7);
        assert!(params.keep_aspect_ratio);
        assert!(params.relative_coord);
        Ok(())
    }

    #[test]
    fn validate_rejects_out_of_range_options() {
        let model = fixture("model");
        let labels = fixture("0 person\n");
        let mut cfg = DetectConfig::new(model.path(), labels.path());
        cfg.confidence_threshold = 1.5;
        assert!(matches!(cfg.validate(), Err(Error::Configuration(_))));
        cfg.confidence_threshold = 0.5;
        cfg.top_k = 0;
        assert!(matches!(cfg.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn relative_paths_resolve_under_models_dir() {
        let mut cfg = DetectConfig::new("ssd.onnx", "/abs/coco_labels.txt");
        cfg.resolve_paths(Path::new("/opt/models"));
        assert_eq!(cfg.model, PathBuf::from("/opt/models/ssd.onnx"));
        assert_eq!(cfg.labels, PathBuf::from("/abs/coco_labels.txt"));
    }

    #[test]
    fn timing_line_format() {
        assert_eq!(
            format_timing(12.3449, 27.8149),
            "Inference: 12.34 ms  FPS: 27.81 fps"
        );
    }
}
