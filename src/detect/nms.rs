use std::cmp::Ordering;

use crate::detect::result::Detection;

/// Class-wise greedy non-maximum suppression.
///
/// Keeps the highest-scoring box of every overlapping cluster (IoU above
/// `iou_threshold`) within the same class. Output is sorted by descending
/// confidence and truncated to `max_detections`.
pub fn non_max_suppression(
    mut candidates: Vec<Detection>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<Detection> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });

    let mut keep: Vec<Detection> = Vec::new();
    for candidate in candidates {
        if keep.len() >= max_detections {
            break;
        }
        let suppressed = keep.iter().any(|kept| {
            kept.class_id == candidate.class_id && kept.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !suppressed {
            keep.push(candidate);
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::BoundingBox;

    fn det(class_id: usize, confidence: f32, x1: f32) -> Detection {
        Detection {
            class_id,
            label: format!("c{}", class_id),
            confidence,
            bbox: BoundingBox::new(x1, 0.0, x1 + 10.0, 10.0),
        }
    }

    #[test]
    fn overlapping_same_class_keeps_best() {
        let out = non_max_suppression(vec![det(0, 0.6, 1.0), det(0, 0.9, 0.0)], 0.5, 10);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].confidence, 0.9);
    }

    #[test]
    fn overlapping_different_classes_survive() {
        let out = non_max_suppression(vec![det(0, 0.6, 0.0), det(2, 0.9, 0.0)], 0.5, 10);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].class_id, 2);
    }

    #[test]
    fn truncates_to_max_detections() {
        let dets = (0..5).map(|i| det(0, 0.5, i as f32 * 100.0)).collect();
        assert_eq!(non_max_suppression(dets, 0.5, 3).len(), 3);
    }
}
