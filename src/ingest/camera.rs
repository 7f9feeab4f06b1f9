//! GStreamer-backed camera source.
//!
//! Front ends by URI:
//! - `rtsp://...` → `rtspsrc`
//! - `v4l2:///dev/videoN` → `v4l2src`
//! - anything else is treated as a local media file → `filesrc`
//!
//! Every front end is decoded to packed RGB and pulled from an `appsink` that
//! keeps only the newest buffer.

use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use gstreamer::prelude::*;

use super::{FrameSource, SourceConfig, SourceStats};
use crate::frame::{Frame, RGB_CHANNELS};

pub struct GstreamerSource {
    config: SourceConfig,
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    frame_count: u64,
    reconnects: u64,
    last_frame_at: Option<Instant>,
    connected_at: Option<Instant>,
    last_error: Option<String>,
    ended: bool,
}

impl GstreamerSource {
    pub fn new(config: SourceConfig) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;
        let (pipeline, appsink) = build_pipeline(&config)?;
        Ok(Self {
            config,
            pipeline,
            appsink,
            frame_count: 0,
            reconnects: 0,
            last_frame_at: None,
            connected_at: None,
            last_error: None,
            ended: false,
        })
    }

    fn frame_timeout(&self) -> Duration {
        let base_ms = if self.config.target_fps == 0 {
            500
        } else {
            (1000 / self.config.target_fps).saturating_mul(4)
        };
        Duration::from_millis(base_ms.max(500) as u64)
    }

    fn health_grace(&self) -> Duration {
        let base_ms = if self.config.target_fps == 0 {
            2_000
        } else {
            (1000 / self.config.target_fps).saturating_mul(6)
        };
        Duration::from_millis(base_ms.max(2_000) as u64)
    }

    fn poll_bus(&mut self) {
        let Some(bus) = self.pipeline.bus() else {
            return;
        };
        while let Some(message) = bus.timed_pop(gstreamer::ClockTime::ZERO) {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    let text = format!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    );
                    log::error!("{}: {}", self.config.uri, text);
                    self.last_error = Some(text);
                }
                MessageView::Eos(..) => {
                    log::info!("{}: end of stream", self.config.uri);
                    self.ended = true;
                }
                _ => {}
            }
        }
    }
}

impl FrameSource for GstreamerSource {
    fn connect(&mut self) -> Result<()> {
        self.pipeline
            .set_state(gstreamer::State::Playing)
            .with_context(|| format!("set {} pipeline to Playing", self.config.uri))?;
        self.connected_at = Some(Instant::now());
        self.last_error = None;
        self.ended = false;
        log::info!("source connected to {}", self.config.uri);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        self.poll_bus();
        if let Some(err) = &self.last_error {
            return Err(anyhow!("{}", err));
        }
        if self.ended || self.appsink.is_eos() {
            return Ok(None);
        }

        let timeout = gstreamer::ClockTime::from_mseconds(self.frame_timeout().as_millis() as u64);
        let Some(sample) = self.appsink.try_pull_sample(timeout) else {
            if self.appsink.is_eos() {
                return Ok(None);
            }
            return Err(anyhow!("{}: stream stalled", self.config.uri));
        };

        let (pixels, width, height) = sample_to_pixels(&sample)?;
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        let frame = Frame::from_rgb(pixels, width, height, self.frame_count)?;
        Ok(Some(frame))
    }

    fn reconnect(&mut self) -> Result<()> {
        log::warn!("reconnecting source {}", self.config.uri);
        let _ = self.pipeline.set_state(gstreamer::State::Null);
        let (pipeline, appsink) = build_pipeline(&self.config)?;
        self.pipeline = pipeline;
        self.appsink = appsink;
        self.reconnects += 1;
        self.last_frame_at = None;
        self.connect()
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(connected_at) = self.connected_at else {
            return false;
        };
        let Some(last_frame_at) = self.last_frame_at else {
            return connected_at.elapsed() <= Duration::from_secs(5);
        };
        last_frame_at.elapsed() <= self.health_grace()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            reconnects: self.reconnects,
            uri: self.config.uri.clone(),
        }
    }
}

impl Drop for GstreamerSource {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gstreamer::State::Null);
    }
}

fn front_end(uri: &str) -> String {
    if uri.starts_with("rtsp://") || uri.starts_with("rtsps://") {
        format!("rtspsrc location={} latency=0 ! decodebin", uri)
    } else if let Some(device) = uri.strip_prefix("v4l2://") {
        format!("v4l2src device={} ! decodebin", device)
    } else {
        let path = uri.strip_prefix("file://").unwrap_or(uri);
        format!("filesrc location=\"{}\" ! decodebin", path)
    }
}

fn build_pipeline(config: &SourceConfig) -> Result<(gstreamer::Pipeline, gstreamer_app::AppSink)> {
    let description = format!(
        "{} ! videoconvert ! videoscale ! video/x-raw,format=RGB,width={},height={} ! \
         appsink name=appsink sync=false max-buffers=1 drop=true",
        front_end(&config.uri),
        config.width,
        config.height
    );
    log::debug!("gstreamer pipeline: {}", description);

    let pipeline = gstreamer::parse::launch(&description)
        .with_context(|| format!("build pipeline for {}", config.uri))?
        .downcast::<gstreamer::Pipeline>()
        .map_err(|_| anyhow!("{} pipeline is not a Pipeline", config.uri))?;

    let appsink = pipeline
        .by_name("appsink")
        .context("appsink element missing from pipeline")?
        .downcast::<gstreamer_app::AppSink>()
        .map_err(|_| anyhow!("appsink element has unexpected type"))?;

    let caps = gstreamer::Caps::builder("video/x-raw")
        .field("format", "RGB")
        .build();
    appsink.set_caps(Some(&caps));
    appsink.set_max_buffers(1);
    appsink.set_drop(true);
    appsink.set_sync(false);

    Ok((pipeline, appsink))
}

fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32)> {
    let buffer = sample.buffer().context("sample missing buffer")?;
    let caps = sample.caps().context("sample missing caps")?;
    let info = gstreamer_video::VideoInfo::from_caps(caps).context("parse caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * RGB_CHANNELS;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map buffer")?;
    let data = map.as_slice();

    if stride == row_bytes {
        let frame_bytes = row_bytes * height as usize;
        let pixels = data
            .get(..frame_bytes)
            .context("buffer shorter than frame")?
            .to_vec();
        return Ok((pixels, width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(data.get(start..end).context("buffer row is out of bounds")?);
    }

    Ok((pixels, width, height))
}
