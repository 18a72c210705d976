use std::cmp::Ordering;

use super::decode::Candidate;
use super::BoundingBox;

/// Overlap of two boxes using the inclusive pixel convention, where a box
/// spanning x1..=x2 is `x2 - x1 + 1` wide.
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let area_a = (a.x2 - a.x1 + 1.0) * (a.y2 - a.y1 + 1.0);
    let area_b = (b.x2 - b.x1 + 1.0) * (b.y2 - b.y1 + 1.0);

    let xx1 = a.x1.max(b.x1);
    let yy1 = a.y1.max(b.y1);
    let xx2 = a.x2.min(b.x2);
    let yy2 = a.y2.min(b.y2);

    let w = (xx2 - xx1 + 1.0).max(0.0);
    let h = (yy2 - yy1 + 1.0).max(0.0);
    let inter = w * h;

    inter / (area_a + area_b - inter)
}

/// Greedy non-max suppression.
///
/// Returns the indices of the kept boxes, highest score first. Equal scores
/// keep their input order. A box is dropped when its IoU with an already kept
/// box is strictly greater than `iou_threshold`.
pub fn non_max_suppression(boxes: &[BoundingBox], scores: &[f32], iou_threshold: f32) -> Vec<usize> {
    let mut order: Vec<usize> = (0..boxes.len().min(scores.len())).collect();
    order.sort_by(|&a, &b| scores[b].partial_cmp(&scores[a]).unwrap_or(Ordering::Equal));

    let mut keep = Vec::new();
    let mut suppressed = vec![false; boxes.len()];

    for (pos, &i) in order.iter().enumerate() {
        if suppressed[i] {
            continue;
        }
        keep.push(i);

        for &j in order[pos + 1..].iter() {
            if !suppressed[j] && iou(&boxes[i], &boxes[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// Apply [`non_max_suppression`] to decoded candidates, keeping boxes, scores
/// and keypoints together.
pub fn suppress(candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    let boxes: Vec<BoundingBox> = candidates.iter().map(|c| c.bbox).collect();
    let scores: Vec<f32> = candidates.iter().map(|c| c.score).collect();
    let keep = non_max_suppression(&boxes, &scores, iou_threshold);

    let mut slots: Vec<Option<Candidate>> = candidates.into_iter().map(Some).collect();
    keep.into_iter().filter_map(|i| slots[i].take()).collect()
}
