//! Edge object-detection pipeline
//!
//! Frames from a camera or file source flow through a chain of pipe
//! elements. The detection stage wraps an opaque inference engine, keeps
//! the top-k scoring objects above a confidence threshold and reports
//! per-frame inference time and frame rate. Downstream elements turn
//! detections into an SVG overlay.
//!
//! # Module Structure
//!
//! - `frame`: decoded RGB image samples
//! - `ingest`: frame sources (synthetic, RTSP, V4L2, local files)
//! - `detect`: labels, engines and the object-detection stage
//! - `overlay`: SVG overlay rendering
//! - `pipeline`: element chain, assembly from config, health and supervision
//! - `config`: service configuration
//! - `clock`: injectable time source

pub mod clock;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod overlay;
pub mod pipeline;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{ElementSpec, HealthSettings, PipelineConfig, ServiceConfig};
pub use detect::{
    BoundingBox, DetectConfig, Detection, DetectionEngine, DetectionSample, EngineRegistry,
    LabelMap, ObjectDetect,
};
pub use error::{Error, Result};
pub use frame::Frame;
pub use ingest::{open_source, FrameSource, SourceConfig, SourceStats, SyntheticSource};
pub use overlay::{OverlayConfig, OverlaySample, SvgOverlay};
pub use pipeline::{
    build_pipeline, Chain, ElementId, Next, PipeElement, Pipeline, PipelineServer, Sample,
};
