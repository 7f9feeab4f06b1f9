//! Frame sources.
//!
//! A source produces the image samples that enter a pipeline:
//! - `stub://<name>` synthetic frames (always available, used by tests/demos)
//! - `rtsp://...`, `v4l2:///dev/videoN`, local file paths through GStreamer
//!   (feature: source-gstreamer)
//!
//! Sources only capture and decode. They never store or forward frames
//! anywhere but the pipeline that owns them.

#[cfg(feature = "source-gstreamer")]
mod camera;
mod synthetic;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::frame::Frame;

#[cfg(feature = "source-gstreamer")]
pub use camera::GstreamerSource;
pub use synthetic::SyntheticSource;

const DEFAULT_TARGET_FPS: u32 = 10;
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;

/// Where frames come from.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SourceConfig {
    pub uri: String,
    /// Expected frame rate; drives stall timeouts.
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
    /// End the stream after this many frames (synthetic sources only).
    pub max_frames: Option<u64>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            uri: String::new(),
            target_fps: DEFAULT_TARGET_FPS,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            max_frames: None,
        }
    }
}

impl SourceConfig {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.uri.trim().is_empty() {
            return Err(Error::Configuration("source requires a uri".to_string()));
        }
        if self.width == 0 || self.height == 0 {
            return Err(Error::Configuration(
                "source frame size must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Statistics for a frame source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub reconnects: u64,
    pub uri: String,
}

pub trait FrameSource: Send {
    /// Open the underlying stream.
    fn connect(&mut self) -> anyhow::Result<()>;

    /// Next decoded frame, or `None` once the stream has ended.
    fn next_frame(&mut self) -> anyhow::Result<Option<Frame>>;

    /// Tear down and reopen the stream.
    fn reconnect(&mut self) -> anyhow::Result<()> {
        self.connect()
    }

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

/// Pick a source implementation for `config.uri`.
pub fn open_source(config: SourceConfig) -> Result<Box<dyn FrameSource>> {
    config.validate()?;
    if config.uri.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(config)));
    }
    #[cfg(feature = "source-gstreamer")]
    {
        let source = GstreamerSource::new(config).map_err(Error::Source)?;
        Ok(Box::new(source))
    }
    #[cfg(not(feature = "source-gstreamer"))]
    {
        Err(Error::Configuration(format!(
            "source {} requires the source-gstreamer feature",
            config.uri
        )))
    }
}
