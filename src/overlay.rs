//! SVG annotation of detection results.
//!
//! Drawing goes through the `DrawingSurface` trait so the same layout code can
//! target any canvas. `SvgCanvas` is the in-crate implementation and renders a
//! standalone SVG document.

use serde::Deserialize;

use crate::detect::{Detection, DetectionSample, LabelMap};
use crate::error::{Error, Result};
use crate::pipeline::{Next, PipeElement, Sample};

const TEXT_FONT_SIZE: u32 = 20;
const TEXT_LINE_HEIGHT: i32 = 20;
const TEXT_MARGIN_X: i32 = 10;

pub trait DrawingSurface {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn add_text(&mut self, x: i32, y: i32, text: &str, fill: &str, font_size: u32);
    #[allow(clippy::too_many_arguments)]
    fn add_rect(
        &mut self,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        fill: &str,
        fill_opacity: f32,
        stroke: &str,
    );
}

/// Minimal SVG document builder.
#[derive(Clone, Debug)]
pub struct SvgCanvas {
    width: u32,
    height: u32,
    body: String,
}

impl SvgCanvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            body: String::new(),
        }
    }

    /// Render the full document.
    pub fn finish(self) -> String {
        format!(
            "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{w}\" height=\"{h}\" viewBox=\"0 0 {w} {h}\">{body}</svg>",
            w = self.width,
            h = self.height,
            body = self.body
        )
    }
}

impl DrawingSurface for SvgCanvas {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn add_text(&mut self, x: i32, y: i32, text: &str, fill: &str, font_size: u32) {
        self.body.push_str(&format!(
            "<text x=\"{}\" y=\"{}\" fill=\"{}\" font-size=\"{}\">{}</text>",
            x,
            y,
            escape(fill),
            font_size,
            escape(text)
        ));
    }

    fn add_rect(
        &mut self,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        fill: &str,
        fill_opacity: f32,
        stroke: &str,
    ) {
        self.body.push_str(&format!(
            "<rect x=\"{}\" y=\"{}\" width=\"{}\" height=\"{}\" fill=\"{}\" fill-opacity=\"{}\" stroke=\"{}\"/>",
            x,
            y,
            width,
            height,
            escape(fill),
            fill_opacity,
            escape(stroke)
        ));
    }
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// White text with a black drop shadow.
pub fn shadow_text<S: DrawingSurface + ?Sized>(surface: &mut S, x: i32, y: i32, text: &str) {
    surface.add_text(x + 1, y + 1, text, "black", TEXT_FONT_SIZE);
    surface.add_text(x, y, text, "white", TEXT_FONT_SIZE);
}

/// Caption drawn above a detection box, e.g. `87% person`.
pub fn caption(detection: &Detection, labels: &LabelMap) -> Result<String> {
    let label = labels.lookup(detection.label_id)?;
    Ok(format!("{}% {}", detection.percent(), label))
}

/// Draw the text lines and every detection onto `surface`.
///
/// Boxes are expected in relative coordinates. A detection whose class id is
/// missing from `labels` aborts drawing with `UnknownLabel`.
pub fn generate_svg<S: DrawingSurface + ?Sized>(
    surface: &mut S,
    detections: &[Detection],
    labels: &LabelMap,
    text_lines: &[&str],
) -> Result<()> {
    let width = surface.width() as f32;
    let height = surface.height() as f32;
    for (i, line) in text_lines.iter().enumerate() {
        shadow_text(surface, TEXT_MARGIN_X, i as i32 * TEXT_LINE_HEIGHT, line);
    }
    for detection in detections {
        let b = detection.bounding_box;
        let x = (b.x0 * width) as i32;
        let y = (b.y0 * height) as i32;
        let w = (b.width() * width) as i32;
        let h = (b.height() * height) as i32;
        let text = caption(detection, labels)?;
        shadow_text(surface, x, y - 5, &text);
        surface.add_rect(x, y, w, h, "red", 0.3, "white");
    }
    Ok(())
}

/// Options of an `svg_overlay` element.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct OverlayConfig {
    /// Canvas width; the detected frame's width when unset.
    pub width: Option<u32>,
    /// Canvas height; the detected frame's height when unset.
    pub height: Option<u32>,
}

/// Rendered annotation for one frame.
#[derive(Debug)]
pub struct OverlaySample {
    pub svg: String,
    pub objects: usize,
}

/// Pipe element turning detection samples into SVG overlays.
pub struct SvgOverlay {
    config: OverlayConfig,
}

impl SvgOverlay {
    pub fn new(config: OverlayConfig) -> Result<Self> {
        if config.width == Some(0) || config.height == Some(0) {
            return Err(Error::Configuration(
                "svg_overlay canvas size must be non-zero".to_string(),
            ));
        }
        Ok(Self { config })
    }

    pub fn render(&self, sample: &DetectionSample) -> Result<OverlaySample> {
        let (frame_w, frame_h) = sample.frame_size;
        let mut canvas = SvgCanvas::new(
            self.config.width.unwrap_or(frame_w),
            self.config.height.unwrap_or(frame_h),
        );
        generate_svg(
            &mut canvas,
            &sample.detections,
            &sample.labels,
            &[sample.info.as_str()],
        )?;
        Ok(OverlaySample {
            svg: canvas.finish(),
            objects: sample.detections.len(),
        })
    }
}

impl PipeElement for SvgOverlay {
    fn name(&self) -> &str {
        "svg_overlay"
    }

    fn receive_next_sample(&mut self, sample: Sample, next: Next<'_>) -> Result<()> {
        let detections = match sample {
            Sample::Detections(detections) => detections,
            other => {
                return Err(Error::UnexpectedSample {
                    element: self.name().to_string(),
                    expected: "detections",
                    found: other.kind(),
                })
            }
        };
        let overlay = self.render(&detections)?;
        next.forward(Sample::Overlay(overlay))
    }
}
