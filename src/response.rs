//! Wire format of outbound messages.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::mapper::DisplayRect;

/// One box in display coordinates, as drawn by the front-end.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DisplayBox {
    #[serde(rename = "class")]
    pub class_name: String,
    pub conf: f32,
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl DisplayBox {
    /// Confidence is rounded to two decimals on the wire.
    pub fn new(class_name: &str, confidence: f32, rect: DisplayRect) -> Self {
        Self {
            class_name: class_name.to_string(),
            conf: round2(confidence),
            x1: rect.x1,
            y1: rect.y1,
            x2: rect.x2,
            y2: rect.y2,
        }
    }
}

/// Result of one processed frame.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameResponse {
    pub boxes: Vec<DisplayBox>,
    pub alerts: Vec<String>,
}

impl FrameResponse {
    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty() && self.alerts.is_empty()
    }

    /// Serialize as a single JSON text message.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

fn round2(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}
