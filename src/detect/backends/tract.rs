#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::detect::yolo::{self, HeadShape};
use crate::frame::{Frame, Resolution};

/// Tract-based backend for YOLOv8 ONNX detection models.
///
/// Frames are letterboxed into the model input, the raw detection head is
/// decoded and class-aware NMS is applied. Model loading is the only file I/O.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input: Resolution,
    min_score: f32,
    iou_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input: Resolution) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, input.height as usize, input.width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input,
            min_score: 0.25,
            iou_threshold: 0.45,
        })
    }

    /// Override the pre-NMS score floor and the NMS overlap threshold.
    pub fn with_thresholds(mut self, min_score: f32, iou_threshold: f32) -> Self {
        self.min_score = min_score;
        self.iou_threshold = iou_threshold;
        self
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let (buffer, geometry) = yolo::letterbox_input(frame.image(), self.input);
        let input = tract_ndarray::Array4::from_shape_vec(
            (1, 3, self.input.height as usize, self.input.width as usize),
            buffer,
        )
        .context("letterboxed input has unexpected length")?
        .into_tensor();

        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = HeadShape::from_dims(view.shape())
            .ok_or_else(|| anyhow!("unexpected detection head shape {:?}", view.shape()))?;
        let values: Vec<f32> = view.iter().copied().collect();

        let mut detections = yolo::decode_head(&values, shape, &geometry, self.min_score);
        yolo::non_max_suppression(&mut detections, self.iou_threshold);
        Ok(detections)
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = Frame::new(
            image::RgbImage::new(self.input.width, self.input.height),
            0,
        );
        self.detect(&blank).map(|_| ())
    }
}
