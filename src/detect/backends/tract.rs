#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::engine::{finalize_detections, DetectParams, DetectionEngine};
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::{Frame, RGB_CHANNELS};

/// Tract-based engine for SSD-style ONNX detectors.
///
/// Expects a `uint8` NHWC input of fixed size and the usual post-processed
/// outputs: boxes `[1, N, 4]` as `(ymin, xmin, ymax, xmax)` relative to the
/// model input, classes `[1, N]`, scores `[1, N]` and a count `[1]`.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_width: u32,
    input_height: u32,
}

/// Where the source frame landed inside the model input.
struct Placement {
    scale_x: f32,
    scale_y: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_width: u32, input_height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    u8::datum_type(),
                    tvec!(1, input_height as usize, input_width as usize, RGB_CHANNELS),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_width,
            input_height,
        })
    }

    /// Nearest-neighbour resize into the model input.
    ///
    /// With `keep_aspect_ratio` the frame is scaled uniformly and placed at
    /// the top-left corner; the remainder stays black.
    fn build_input(&self, image: &Frame, keep_aspect_ratio: bool) -> Result<(Tensor, Placement)> {
        if image.width == 0 || image.height == 0 {
            return Err(anyhow!("cannot run inference on an empty frame"));
        }
        let in_w = self.input_width as usize;
        let in_h = self.input_height as usize;
        let mut scale_x = self.input_width as f32 / image.width as f32;
        let mut scale_y = self.input_height as f32 / image.height as f32;
        if keep_aspect_ratio {
            let scale = scale_x.min(scale_y);
            scale_x = scale;
            scale_y = scale;
        }
        let used_w = ((image.width as f32 * scale_x).round() as usize).min(in_w);
        let used_h = ((image.height as f32 * scale_y).round() as usize).min(in_h);

        let mut buf = vec![0u8; in_w * in_h * RGB_CHANNELS];
        for y in 0..used_h {
            let src_y = ((y as f32 / scale_y) as u32).min(image.height - 1);
            for x in 0..used_w {
                let src_x = ((x as f32 / scale_x) as u32).min(image.width - 1);
                let px = image
                    .pixel(src_x, src_y)
                    .ok_or_else(|| anyhow!("pixel ({}, {}) out of bounds", src_x, src_y))?;
                let offset = (y * in_w + x) * RGB_CHANNELS;
                buf[offset..offset + RGB_CHANNELS].copy_from_slice(&px);
            }
        }

        let input = tract_ndarray::Array4::from_shape_vec((1, in_h, in_w, RGB_CHANNELS), buf)
            .context("failed to shape model input")?;
        Ok((input.into_tensor(), Placement { scale_x, scale_y }))
    }

    fn decode_outputs(
        &self,
        outputs: &TVec<TValue>,
        placement: &Placement,
        image: &Frame,
    ) -> Result<Vec<Detection>> {
        if outputs.len() < 4 {
            return Err(anyhow!(
                "expected 4 model outputs (boxes, classes, scores, count), got {}",
                outputs.len()
            ));
        }
        let boxes = outputs[0]
            .to_array_view::<f32>()
            .context("boxes tensor was not f32")?;
        let classes = outputs[1]
            .to_array_view::<f32>()
            .context("classes tensor was not f32")?;
        let scores = outputs[2]
            .to_array_view::<f32>()
            .context("scores tensor was not f32")?;
        let count = outputs[3]
            .to_array_view::<f32>()
            .context("count tensor was not f32")?
            .iter()
            .next()
            .copied()
            .unwrap_or(0.0) as usize;

        let boxes: Vec<f32> = boxes.iter().copied().collect();
        let classes: Vec<f32> = classes.iter().copied().collect();
        let scores: Vec<f32> = scores.iter().copied().collect();
        let count = count.min(scores.len()).min(classes.len()).min(boxes.len() / 4);

        // Model-relative → frame-relative.
        let fx = self.input_width as f32 / (image.width as f32 * placement.scale_x);
        let fy = self.input_height as f32 / (image.height as f32 * placement.scale_y);

        let detections = (0..count)
            .map(|i| {
                let b = &boxes[i * 4..i * 4 + 4];
                let bbox = BoundingBox::new(
                    (b[1] * fx).clamp(0.0, 1.0),
                    (b[0] * fy).clamp(0.0, 1.0),
                    (b[3] * fx).clamp(0.0, 1.0),
                    (b[2] * fy).clamp(0.0, 1.0),
                );
                Detection::new(classes[i].max(0.0) as u32, scores[i], bbox)
            })
            .collect();
        Ok(detections)
    }
}

impl DetectionEngine for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, image: &Frame, params: &DetectParams) -> Result<Vec<Detection>> {
        let (input, placement) = self.build_input(image, params.keep_aspect_ratio)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let detections = self.decode_outputs(&outputs, &placement, image)?;
        Ok(finalize_detections(
            detections,
            params,
            image.width,
            image.height,
        ))
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = Frame::from_rgb(
            vec![0u8; self.input_width as usize * self.input_height as usize * RGB_CHANNELS],
            self.input_width,
            self.input_height,
            0,
        )?;
        let params = DetectParams {
            threshold: 1.0,
            keep_aspect_ratio: false,
            relative_coord: true,
            top_k: 1,
        };
        self.detect(&blank, &params).map(|_| ())
    }
}
