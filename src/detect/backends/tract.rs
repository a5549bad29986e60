#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::labels::LabelMap;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

/// Output tensor order of an SSD export: scores, boxes, count, classes.
const SCORES_OUTPUT: usize = 0;
const BOXES_OUTPUT: usize = 1;
const CLASSES_OUTPUT: usize = 3;

/// Tract-based backend for SSD-style ONNX detection models.
///
/// The model takes a `[1, H, W, 3]` u8 RGB tensor and returns normalised
/// `(ymin, xmin, ymax, xmax)` boxes, class indices and scores. Boxes are
/// scaled back to frame pixels and clamped to the frame.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    labels: LabelMap,
    input_width: u32,
    input_height: u32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        labels: LabelMap,
        input_width: u32,
        input_height: u32,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    u8::datum_type(),
                    tvec!(1, input_height as usize, input_width as usize, 3),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            labels,
            input_width,
            input_height,
        })
    }

    /// Nearest-neighbour resize of the RGB frame into the model input.
    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        let expected_len = (frame.width as usize)
            .checked_mul(frame.height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        let pixels = frame.pixels();
        if pixels.len() != expected_len || expected_len == 0 {
            return Err(anyhow!(
                "expected {} RGB bytes, received {}",
                expected_len,
                pixels.len()
            ));
        }

        let src_w = frame.width as usize;
        let src_h = frame.height as usize;
        let dst_w = self.input_width as usize;
        let dst_h = self.input_height as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, dst_h, dst_w, 3), |(_, y, x, c)| {
            let sy = (y * src_h / dst_h).min(src_h - 1);
            let sx = (x * src_w / dst_w).min(src_w - 1);
            pixels[(sy * src_w + sx) * 3 + c]
        });

        Ok(input.into_tensor())
    }

    fn extract_detections(&self, outputs: TVec<TValue>, frame: &Frame) -> Result<Vec<Detection>> {
        let output = |index: usize| {
            outputs
                .get(index)
                .ok_or_else(|| anyhow!("model produced no output #{}", index))
        };
        let scores = output(SCORES_OUTPUT)?
            .to_array_view::<f32>()
            .context("scores tensor was not f32")?;
        let boxes = output(BOXES_OUTPUT)?
            .to_array_view::<f32>()
            .context("boxes tensor was not f32")?;
        let classes = output(CLASSES_OUTPUT)?
            .to_array_view::<f32>()
            .context("classes tensor was not f32")?;

        let count = scores.len().min(classes.len()).min(boxes.len() / 4);
        let im_w = frame.width as f64;
        let im_h = frame.height as f64;
        let boxes: Vec<f32> = boxes.iter().copied().collect();
        let mut detections = Vec::new();
        for (i, (&score, &class)) in scores.iter().zip(classes.iter()).take(count).enumerate() {
            if !(score > 0.0 && score <= 1.0) {
                continue;
            }
            let b = &boxes[i * 4..i * 4 + 4];
            let ymin = (b[0] as f64 * im_h).max(1.0).floor();
            let xmin = (b[1] as f64 * im_w).max(1.0).floor();
            let ymax = (b[2] as f64 * im_h).min(im_h).floor();
            let xmax = (b[3] as f64 * im_w).min(im_w).floor();

            let index = class.max(0.0) as usize;
            let label = self
                .labels
                .label(index)
                .map(str::to_string)
                .unwrap_or_else(|| format!("class_{}", index));
            detections.push(Detection::new(
                label,
                BoundingBox::new(xmin, ymin, xmax, ymax),
                score,
            ));
        }
        Ok(detections)
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.extract_detections(outputs, frame)
    }
}
