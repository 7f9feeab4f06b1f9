use anyhow::Result;

use super::{FrameSource, SourceConfig, SourceStats};
use crate::frame::{Frame, RGB_CHANNELS};

/// Synthetic source for `stub://` URIs.
///
/// Produces a moving gradient whose overall brightness swings slowly, so the
/// stub engine sees scenes both above and below typical thresholds.
pub struct SyntheticSource {
    config: SourceConfig,
    frame_count: u64,
    reconnects: u64,
    connected: bool,
}

impl SyntheticSource {
    pub fn new(config: SourceConfig) -> Self {
        Self {
            config,
            frame_count: 0,
            reconnects: 0,
            connected: false,
        }
    }

    fn generate_pixels(&self) -> Vec<u8> {
        let pixel_count = self.config.width as usize * self.config.height as usize * RGB_CHANNELS;
        // Brightness ramps over a 100-frame cycle.
        let phase = self.frame_count % 100;
        let base = if phase < 50 { phase * 5 } else { (100 - phase) * 5 };
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((base + (i as u64 % 16)) % 256) as u8;
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!("source connected to {} (synthetic)", self.config.uri);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if let Some(max) = self.config.max_frames {
            if self.frame_count >= max {
                return Ok(None);
            }
        }
        self.frame_count += 1;
        let pixels = self.generate_pixels();
        let frame = Frame::from_rgb(
            pixels,
            self.config.width,
            self.config.height,
            self.frame_count,
        )?;
        Ok(Some(frame))
    }

    fn reconnect(&mut self) -> Result<()> {
        self.reconnects += 1;
        self.connect()
    }

    fn is_healthy(&self) -> bool {
        self.connected
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            reconnects: self.reconnects,
            uri: self.config.uri.clone(),
        }
    }
}
