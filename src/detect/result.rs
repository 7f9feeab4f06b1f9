/// Axis-aligned box as `(x0, y0)` top-left and `(x1, y1)` bottom-right.
///
/// Coordinates are relative (0..1) when the engine was asked for relative
/// coordinates, otherwise they are pixels of the input frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BoundingBox {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    /// Scale a relative box to pixel space.
    pub fn scale(&self, width: f32, height: f32) -> Self {
        Self {
            x0: self.x0 * width,
            y0: self.y0 * height,
            x1: self.x1 * width,
            y1: self.y1 * height,
        }
    }
}

/// One scored box from a detection engine.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub bounding_box: BoundingBox,
    pub label_id: u32,
    /// Confidence in 0..=1.
    pub score: f32,
}

impl Detection {
    pub fn new(label_id: u32, score: f32, bounding_box: BoundingBox) -> Self {
        Self {
            bounding_box,
            label_id,
            score,
        }
    }

    /// Score as a whole percentage, truncated toward zero.
    pub fn percent(&self) -> i64 {
        (f64::from(self.score) * 100.0) as i64
    }
}
