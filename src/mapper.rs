//! Source-frame to display-space box mapping.

use crate::detect::BoundingBox;

/// Box in display coordinates. Always satisfies
/// `0 <= x1 <= x2 <= width` and `0 <= y1 <= y2 <= height`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DisplayRect {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

/// Fixed target coordinate space the front-end draws in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DisplaySpace {
    pub width: u32,
    pub height: u32,
    pub mirror: bool,
}

impl DisplaySpace {
    pub fn new(width: u32, height: u32, mirror: bool) -> Self {
        Self {
            width,
            height,
            mirror,
        }
    }

    /// Map a box from an `orig_w x orig_h` source frame into this space.
    ///
    /// Coordinates are truncated to whole source pixels, clamped into the
    /// source frame, scaled with truncation, then mirrored (`x' = W - x`,
    /// swapping the x edges) when enabled. Thin boxes may collapse to zero
    /// width or height.
    pub fn map(&self, bbox: &BoundingBox, orig_w: u32, orig_h: u32) -> DisplayRect {
        let sx = |x: f32| scale(x, orig_w, self.width);
        let sy = |y: f32| scale(y, orig_h, self.height);

        let (x1, x2) = order(sx(bbox.x1), sx(bbox.x2));
        let (y1, y2) = order(sy(bbox.y1), sy(bbox.y2));

        let (x1, x2) = if self.mirror {
            (self.width - x2, self.width - x1)
        } else {
            (x1, x2)
        };
        DisplayRect { x1, y1, x2, y2 }
    }
}

fn scale(value: f32, source: u32, target: u32) -> u32 {
    if source == 0 {
        return 0;
    }
    // NaN saturates to 0 in the cast.
    let pixel = (value.max(0.0) as u64).min(source as u64);
    (pixel * target as u64 / source as u64) as u32
}

fn order(a: u32, b: u32) -> (u32, u32) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}
