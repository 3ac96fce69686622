use std::cmp::Reverse;

use ordered_float::OrderedFloat;

use crate::detection::{Corners, Detection};

/// Default overlap above which a lower-confidence box is dropped.
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.3;

/// Compute the Intersection over Union (IoU) of two boxes in corner-format.
///
/// Disjoint boxes overlap by zero, and a degenerate (zero-area) box always
/// yields 0 instead of NaN.
pub fn compute_iou(b1: &Corners, b2: &Corners) -> f32 {
    let area1 = b1.area();
    let area2 = b2.area();
    if area1 <= 0.0 || area2 <= 0.0 {
        return 0.0;
    }

    let inter_x0 = b1.x0.max(b2.x0);
    let inter_y0 = b1.y0.max(b2.y0);
    let inter_x1 = b1.x1.min(b2.x1);
    let inter_y1 = b1.y1.min(b2.y1);

    let inter_area = (inter_x1 - inter_x0).max(0.0) * (inter_y1 - inter_y0).max(0.0);
    let union_area = area1 + area2 - inter_area;
    if union_area <= 0.0 { 0.0 } else { inter_area / union_area }
}

/// Greedy non-maximum suppression across all classes.
///
/// Boxes are visited by descending confidence (ties keep input order); each
/// kept box removes every remaining box overlapping it by `iou_threshold` or
/// more, whatever its label. The result is in selection order.
pub fn non_maximum_suppression(detections: &[Detection], iou_threshold: f32) -> Vec<Detection> {
    let corners: Vec<Corners> = detections.iter().map(|d| d.bbox.corners()).collect();

    // Stable sort, so equal confidences stay in input order.
    let mut order: Vec<usize> = (0..detections.len()).collect();
    order.sort_by_key(|&i| Reverse(OrderedFloat(detections[i].confidence)));

    let mut suppressed = vec![false; order.len()];
    let mut keep = Vec::new();
    for i in 0..order.len() {
        if suppressed[i] {
            continue;
        }
        let chosen = order[i];
        keep.push(detections[chosen].clone());
        for j in (i + 1)..order.len() {
            if suppressed[j] {
                continue;
            }
            if compute_iou(&corners[chosen], &corners[order[j]]) >= iou_threshold {
                suppressed[j] = true;
            }
        }
    }
    keep
}
