#![cfg(feature = "backend-tract")]

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::config::DetectorSettings;
use crate::detect::backend::DetectorBackend;
use crate::detect::labels::Labels;
use crate::detect::nms::non_max_suppression;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

/// Letterbox padding value, matching the YOLO training pipeline.
const PAD_VALUE: f32 = 114.0 / 255.0;

/// Number of box attributes (cx, cy, w, h) ahead of the class scores.
const BOX_ATTRIBUTES: usize = 4;

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, TypedModel>;

/// Tract-based backend for YOLOv8-style ONNX exports.
///
/// Expects a `[1, 3, S, S]` float input and a `[1, 4 + C, N]` output where
/// each column is `(cx, cy, w, h, score_0 .. score_C)` in input pixels.
/// Transposed `[1, N, 4 + C]` outputs are accepted too.
///
/// Loads the model once; inference holds no mutable state so one instance is
/// shared across connections.
pub struct TractBackend {
    model: Plan,
    decoder: YoloDecoder,
}

/// Turns a raw YOLO output tensor into source-frame detections.
struct YoloDecoder {
    labels: Labels,
    input_size: u32,
    confidence_floor: f32,
    iou_threshold: f32,
    max_detections: usize,
}

/// Mapping between source-frame pixels and the square model input.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: u32, height: u32, size: u32) -> Self {
        let size = size as f32;
        let scale = (size / width as f32).min(size / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: ((size - new_w) / 2.0).floor(),
            pad_y: ((size - new_h) / 2.0).floor(),
        }
    }

    /// Input pixel to source pixel, or `None` when it falls in the padding.
    fn source_pixel(&self, x: usize, y: usize, width: u32, height: u32) -> Option<(usize, usize)> {
        let sx = (x as f32 + 0.5 - self.pad_x) / self.scale;
        let sy = (y as f32 + 0.5 - self.pad_y) / self.scale;
        if sx < 0.0 || sy < 0.0 || sx >= width as f32 || sy >= height as f32 {
            return None;
        }
        Some((sx as usize, sy as usize))
    }

    fn to_source(&self, bbox: BoundingBox) -> BoundingBox {
        BoundingBox::new(
            (bbox.x1 - self.pad_x) / self.scale,
            (bbox.y1 - self.pad_y) / self.scale,
            (bbox.x2 - self.pad_x) / self.scale,
            (bbox.y2 - self.pad_y) / self.scale,
        )
    }
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new(settings: &DetectorSettings, labels: Labels) -> Result<Self> {
        let model_path = &settings.model_path;
        let size = settings.input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            decoder: YoloDecoder {
                labels,
                input_size: settings.input_size,
                confidence_floor: settings.model_confidence,
                iou_threshold: settings.iou_threshold,
                max_detections: settings.max_detections,
            },
        })
    }

    fn build_input(&self, frame: &Frame, letterbox: &Letterbox) -> Tensor {
        let size = self.decoder.input_size as usize;
        let pixels = frame.pixels();
        let width = frame.width as usize;
        tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, channel, y, x)| {
            match letterbox.source_pixel(x, y, frame.width, frame.height) {
                Some((sx, sy)) => pixels[(sy * width + sx) * 3 + channel] as f32 / 255.0,
                None => PAD_VALUE,
            }
        })
        .into_tensor()
    }
}

impl YoloDecoder {
    fn decode(
        &self,
        outputs: TVec<TValue>,
        letterbox: &Letterbox,
        frame_size: (u32, u32),
    ) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output was not rank 3")?;

        let (rows, cols) = (view.shape()[1], view.shape()[2]);
        let expected = self.labels.len() + BOX_ATTRIBUTES;
        let transposed = if rows == expected {
            false
        } else if cols == expected {
            true
        } else {
            // Label table does not match the model; the attribute axis is
            // the short one for stock exports (84 vs 8400).
            rows > cols
        };
        let (features, candidates) = if transposed { (cols, rows) } else { (rows, cols) };
        if features <= BOX_ATTRIBUTES {
            return Err(anyhow!(
                "model output has {} attributes per candidate, expected at least {}",
                features,
                BOX_ATTRIBUTES + 1
            ));
        }
        let at = |feature: usize, candidate: usize| {
            if transposed {
                view[[0, candidate, feature]]
            } else {
                view[[0, feature, candidate]]
            }
        };

        let (frame_w, frame_h) = (frame_size.0 as f32, frame_size.1 as f32);
        let mut found = Vec::new();
        for i in 0..candidates {
            let (class_id, score) = (BOX_ATTRIBUTES..features)
                .map(|f| (f - BOX_ATTRIBUTES, at(f, i)))
                .fold((0, f32::NEG_INFINITY), |best, cur| {
                    if cur.1 > best.1 {
                        cur
                    } else {
                        best
                    }
                });
            if !score.is_finite() || score < self.confidence_floor {
                continue;
            }
            let input_box = BoundingBox::from_center(at(0, i), at(1, i), at(2, i), at(3, i));
            found.push(Detection {
                class_id,
                label: self.labels.name(class_id),
                confidence: score.min(1.0),
                bbox: letterbox.to_source(input_box).clamp_to(frame_w, frame_h),
            });
        }

        Ok(non_max_suppression(
            found,
            self.iou_threshold,
            self.max_detections,
        ))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>> {
        let letterbox = Letterbox::fit(frame.width, frame.height, self.decoder.input_size);
        let input = self.build_input(frame, &letterbox);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decoder
            .decode(outputs, &letterbox, (frame.width, frame.height))
    }

    fn warm_up(&self) -> Result<()> {
        let size = self.decoder.input_size as usize;
        let blank = Tensor::zero::<f32>(&[1, 3, size, size]).context("allocate warm-up input")?;
        self.model
            .run(tvec!(blank.into()))
            .context("ONNX warm-up inference failed")?;
        Ok(())
    }
}
