//! Image samples handed from a frame source into a chain.
//!
//! `Frame` owns its pixels and is deliberately not `Clone`: a frame moves
//! from the source into the first stage and is never duplicated on the way.

use crate::error::{Error, Result};

/// Packed RGB, 3 bytes per pixel, rows without padding.
pub const RGB_CHANNELS: usize = 3;

/// Decoded RGB24 image.
///
/// Pixel storage is only reachable through `pixels()`, so the buffer length
/// always matches the dimensions:
///
/// ```compile_fail,E0616
/// use edge_pipeline::Frame;
///
/// let mut frame = Frame::from_rgb(vec![0u8; 3], 1, 1, 0).unwrap();
/// frame.pixels = Vec::new();
/// ```
pub struct Frame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Per-source capture counter, starting at 1.
    pub sequence: u64,
}

// No Clone: ownership transfers stage to stage.

impl Frame {
    /// Wrap an RGB24 buffer. The buffer length must match the dimensions.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(RGB_CHANNELS))
            .ok_or_else(|| Error::Configuration("frame dimensions overflow".to_string()))?;
        if pixels.len() != expected {
            return Err(Error::Configuration(format!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            )));
        }
        Ok(Self {
            pixels,
            width,
            height,
            sequence,
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// RGB triple at `(x, y)`, or `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * RGB_CHANNELS;
        let px = self.pixels.get(idx..idx + RGB_CHANNELS)?;
        Some([px[0], px[1], px[2]])
    }

    /// Mean intensity over all channels, 0.0..=255.0.
    pub fn mean_intensity(&self) -> f32 {
        if self.pixels.is_empty() {
            return 0.0;
        }
        let sum: u64 = self.pixels.iter().map(|&p| p as u64).sum();
        sum as f32 / self.pixels.len() as f32
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}
