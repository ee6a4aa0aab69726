//! Per-frame detection-and-relay pipeline.
//!
//! `FramePipeline` is shared by all connections; `ConnectionContext` is owned
//! by exactly one connection and dropped with it.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};

use crate::config::PipelineSettings;
use crate::detect::{Detection, DetectorBackend};
use crate::frame::{decode_data_url, decode_image_bytes, Frame};
use crate::hazard::HazardTracker;
use crate::mapper::DisplaySpace;
use crate::response::{DisplayBox, FrameResponse};

pub struct FramePipeline {
    detector: Arc<dyn DetectorBackend>,
    settings: PipelineSettings,
    display: DisplaySpace,
}

/// Mutable state of one client connection.
#[derive(Debug)]
pub struct ConnectionContext {
    tracker: HazardTracker,
    frames_decoded: u64,
}

impl ConnectionContext {
    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    pub fn last_alert(&self) -> Option<&str> {
        self.tracker.last_alert()
    }
}

impl FramePipeline {
    pub fn new(detector: Arc<dyn DetectorBackend>, settings: PipelineSettings) -> Self {
        let display = DisplaySpace::new(
            settings.display_width,
            settings.display_height,
            settings.mirror,
        );
        Self {
            detector,
            settings,
            display,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn detector_name(&self) -> &'static str {
        self.detector.name()
    }

    /// Fresh state for a new connection.
    pub fn new_context(&self) -> ConnectionContext {
        ConnectionContext {
            tracker: HazardTracker::new(self.settings.hazard_classes.iter().cloned()),
            frames_decoded: 0,
        }
    }

    /// Process a data-URL text message.
    ///
    /// `Ok(None)` means there is nothing to send for this frame.
    pub fn process_text(
        &self,
        ctx: &mut ConnectionContext,
        message: &str,
    ) -> Result<Option<FrameResponse>> {
        let frame = decode_data_url(message)?;
        self.process_frame(ctx, &frame)
    }

    /// Process a binary message holding encoded image bytes.
    pub fn process_bytes(
        &self,
        ctx: &mut ConnectionContext,
        bytes: &[u8],
    ) -> Result<Option<FrameResponse>> {
        let frame = decode_image_bytes(bytes)?;
        self.process_frame(ctx, &frame)
    }

    /// Run detection on a decoded frame and build the response.
    pub fn process_frame(
        &self,
        ctx: &mut ConnectionContext,
        frame: &Frame,
    ) -> Result<Option<FrameResponse>> {
        ctx.frames_decoded += 1;
        if ctx.frames_decoded % u64::from(self.settings.infer_every) != 0 {
            return Ok(None);
        }

        let started = Instant::now();
        let detections = self
            .detector
            .detect(frame)
            .with_context(|| format!("{} detector failed", self.detector.name()))?;
        log::debug!(
            "frame {} ({}x{}): {} raw detections in {:?}",
            ctx.frames_decoded,
            frame.width,
            frame.height,
            detections.len(),
            started.elapsed()
        );

        let response = self.build_response(ctx, &detections, frame.width, frame.height);
        if response.is_empty() && !self.settings.send_empty {
            return Ok(None);
        }
        Ok(Some(response))
    }

    /// Threshold, map and hazard-track detections in model output order.
    pub fn build_response(
        &self,
        ctx: &mut ConnectionContext,
        detections: &[Detection],
        orig_w: u32,
        orig_h: u32,
    ) -> FrameResponse {
        let mut response = FrameResponse::default();
        for detection in detections {
            if detection.confidence < self.settings.confidence_threshold {
                continue;
            }
            if self.settings.hazards_only && !ctx.tracker.is_hazard(&detection.label) {
                continue;
            }
            let rect = self.display.map(&detection.bbox, orig_w, orig_h);
            response
                .boxes
                .push(DisplayBox::new(&detection.label, detection.confidence, rect));
            if let Some(alert) = ctx.tracker.observe(&detection.label) {
                response.alerts.push(alert);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, StubBackend, StubObject};

    fn detection(label: &str, confidence: f32) -> Detection {
        Detection {
            class_id: 0,
            label: label.to_string(),
            confidence,
            bbox: BoundingBox::new(100.0, 100.0, 200.0, 200.0),
        }
    }

    fn pipeline(settings: PipelineSettings) -> FramePipeline {
        FramePipeline::new(Arc::new(StubBackend::new()), settings)
    }

    fn blank_frame(width: u32, height: u32) -> Frame {
        Frame::from_rgb(vec![0u8; (width * height * 3) as usize], width, height).unwrap()
    }

    #[test]
    fn below_threshold_never_reported() {
        let p = pipeline(PipelineSettings::default());
        let mut ctx = p.new_context();
        let response = p.build_response(
            &mut ctx,
            &[detection("person", 0.74), detection("car", 0.9)],
            640,
            480,
        );
        assert_eq!(response.boxes.len(), 1);
        assert_eq!(response.boxes[0].class_name, "car");
        assert_eq!(response.alerts, vec!["Hazard: car detected!"]);
    }

    #[test]
    fn threshold_is_inclusive() {
        let p = pipeline(PipelineSettings::default());
        let mut ctx = p.new_context();
        let response = p.build_response(&mut ctx, &[detection("cup", 0.75)], 640, 480);
        assert_eq!(response.boxes.len(), 1);
        assert!(response.alerts.is_empty());
    }

    #[test]
    fn boxes_are_mapped_to_display_space() {
        let p = pipeline(PipelineSettings::default());
        let mut ctx = p.new_context();
        let response = p.build_response(&mut ctx, &[detection("person", 0.9)], 640, 480);
        let b = &response.boxes[0];
        assert_eq!((b.x1, b.y1, b.x2, b.y2), (220, 50, 270, 100));
    }

    #[test]
    fn hazard_alerts_follow_transitions_across_frames() {
        let p = pipeline(PipelineSettings::default());
        let mut ctx = p.new_context();
        let alerts: Vec<usize> = ["person", "person", "car", "car", "person"]
            .iter()
            .map(|class| {
                p.build_response(&mut ctx, &[detection(class, 0.9)], 640, 480)
                    .alerts
                    .len()
            })
            .collect();
        assert_eq!(alerts, vec![1, 0, 1, 0, 1]);
        assert_eq!(ctx.last_alert(), Some("person"));
    }

    #[test]
    fn contexts_are_independent() {
        let p = pipeline(PipelineSettings::default());
        let mut a = p.new_context();
        let mut b = p.new_context();
        let car = [detection("car", 0.9)];
        assert_eq!(p.build_response(&mut a, &car, 640, 480).alerts.len(), 1);
        assert_eq!(p.build_response(&mut b, &car, 640, 480).alerts.len(), 1);
    }

    #[test]
    fn hazards_only_drops_other_boxes() {
        let settings = PipelineSettings {
            hazards_only: true,
            ..PipelineSettings::default()
        };
        let p = pipeline(settings);
        let mut ctx = p.new_context();
        let response = p.build_response(
            &mut ctx,
            &[detection("cup", 0.9), detection("bus", 0.9)],
            640,
            480,
        );
        assert_eq!(response.boxes.len(), 1);
        assert_eq!(response.boxes[0].class_name, "bus");
    }

    #[test]
    fn empty_frames_suppressed_when_configured() {
        let settings = PipelineSettings {
            send_empty: false,
            ..PipelineSettings::default()
        };
        let p = pipeline(settings);
        let mut ctx = p.new_context();
        assert!(p.process_frame(&mut ctx, &blank_frame(8, 8)).unwrap().is_none());

        let p = pipeline(PipelineSettings::default());
        let mut ctx = p.new_context();
        let response = p.process_frame(&mut ctx, &blank_frame(8, 8)).unwrap();
        assert_eq!(response, Some(FrameResponse::default()));
    }

    #[test]
    fn infer_every_samples_frames() {
        let stub = Arc::new(StubBackend::with_objects(vec![StubObject::new(
            "dog", 0.95, 0.0, 0.0, 0.5, 0.5,
        )]));
        let settings = PipelineSettings {
            infer_every: 3,
            ..PipelineSettings::default()
        };
        let p = FramePipeline::new(stub.clone(), settings);
        let mut ctx = p.new_context();
        let frame = blank_frame(8, 8);
        let sent: Vec<bool> = (0..6)
            .map(|_| p.process_frame(&mut ctx, &frame).unwrap().is_some())
            .collect();
        assert_eq!(sent, vec![false, false, true, false, false, true]);
        assert_eq!(stub.calls(), 2);
        assert_eq!(ctx.frames_decoded(), 6);
    }

    #[test]
    fn malformed_text_is_an_error() {
        let p = pipeline(PipelineSettings::default());
        let mut ctx = p.new_context();
        assert!(p.process_text(&mut ctx, "no separator here").is_err());
        assert_eq!(ctx.frames_decoded(), 0);
    }

    #[test]
    fn exposes_detector_and_settings() {
        let mut settings = PipelineSettings::default();
        settings.display_width = 640;
        let p = pipeline(settings);
        assert_eq!(p.detector_name(), "stub");
        assert_eq!(p.settings().display_width, 640);
    }
}
