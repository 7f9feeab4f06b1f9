//! Object detection.
//!
//! `ObjectDetect` is the pipeline stage; the network itself sits behind the
//! `DetectionEngine` trait so the stage never depends on a particular runtime.

pub mod backends;
mod engine;
mod labels;
mod registry;
mod result;
mod stage;

pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use engine::{finalize_detections, DetectParams, DetectionEngine};
pub use labels::LabelMap;
pub use registry::{EngineFactory, EngineRegistry};
pub use result::{BoundingBox, Detection};
pub use stage::{format_timing, DetectConfig, DetectionSample, ObjectDetect};
