use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::labels::Labels;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

/// Object reported by the stub backend, with its box in normalized `0..1`
/// frame coordinates.
#[derive(Clone, Debug)]
pub struct StubObject {
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl StubObject {
    pub fn new(label: &str, confidence: f32, x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            label: label.to_string(),
            confidence,
            bbox: BoundingBox::new(x1, y1, x2, y2),
        }
    }
}

/// Stub backend for testing and model-less runs.
///
/// Replays a script of per-call object lists, cycling when exhausted. The
/// default script reports nothing.
pub struct StubBackend {
    script: Vec<Vec<StubObject>>,
    labels: Labels,
    calls: AtomicUsize,
}

impl StubBackend {
    pub fn new() -> Self {
        Self {
            script: vec![Vec::new()],
            labels: Labels::coco(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Report the same objects on every call.
    pub fn with_objects(objects: Vec<StubObject>) -> Self {
        Self::scripted(vec![objects])
    }

    /// Report `script[n % len]` on the n-th call.
    pub fn scripted(script: Vec<Vec<StubObject>>) -> Self {
        let script = if script.is_empty() {
            vec![Vec::new()]
        } else {
            script
        };
        Self {
            script,
            ..Self::new()
        }
    }

    pub fn with_labels(mut self, labels: Labels) -> Self {
        self.labels = labels;
        self
    }

    /// Number of `detect` calls served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let objects = &self.script[call % self.script.len()];
        let (w, h) = (frame.width as f32, frame.height as f32);

        Ok(objects
            .iter()
            .map(|object| Detection {
                class_id: self.labels.id_of(&object.label).unwrap_or(usize::MAX),
                label: object.label.clone(),
                confidence: object.confidence,
                bbox: BoundingBox::new(
                    object.bbox.x1 * w,
                    object.bbox.y1 * h,
                    object.bbox.x2 * w,
                    object.bbox.y2 * h,
                ),
            })
            .collect())
    }
}
