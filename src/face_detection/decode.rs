use nalgebra::Point2;
use tracing::debug;

use super::anchors::AnchorGrid;
use super::BoundingBox;
use crate::error::{Error, Result};

/// Raw, flattened detector outputs of a single stride.
#[derive(Debug, Clone, Copy)]
pub struct ScaleOutputs<'a> {
    pub stride: usize,
    pub scores: &'a [f32],
    /// (left, top, right, bottom) distances per anchor, in stride units.
    pub boxes: &'a [f32],
    /// (dx, dy) per keypoint per anchor, in stride units.
    pub keypoints: &'a [f32],
}

/// A decoded face before suppression, in original-image pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub bbox: BoundingBox,
    pub score: f32,
    pub keypoints: Vec<Point2<f32>>,
}

/// Turns multi-scale anchor-relative predictions into candidate faces.
#[derive(Debug, Clone, Copy)]
pub struct DetectionDecoder {
    pub input_height: usize,
    pub input_width: usize,
    pub anchors_per_location: usize,
    pub keypoint_count: usize,
}

impl DetectionDecoder {
    pub fn new(input_height: usize, input_width: usize, anchors_per_location: usize) -> Self {
        Self {
            input_height,
            input_width,
            anchors_per_location,
            keypoint_count: super::KEYPOINT_COUNT,
        }
    }

    /// Decode every scale, keep rows with `score >= threshold` and map them
    /// back to the original image by dividing by `detection_scale` (the
    /// letterbox resize ratio).
    ///
    /// Returns `Ok(None)` when nothing passes the threshold.
    pub fn decode(
        &self,
        scales: &[ScaleOutputs<'_>],
        threshold: f32,
        detection_scale: f32,
    ) -> Result<Option<Vec<Candidate>>> {
        if !(detection_scale.is_finite() && detection_scale > 0.0) {
            return Err(Error::input(format!(
                "detection scale must be positive, got {}",
                detection_scale
            )));
        }

        let mut candidates = Vec::new();
        for scale in scales {
            self.decode_scale(scale, threshold, &mut candidates)?;
        }

        if candidates.is_empty() {
            return Ok(None);
        }

        let inv = 1.0 / detection_scale;
        for candidate in candidates.iter_mut() {
            candidate.bbox = candidate.bbox.scaled(inv);
            for p in candidate.keypoints.iter_mut() {
                *p = Point2::new(p.x * inv, p.y * inv);
            }
        }

        debug!(count = candidates.len(), "decoded detection candidates");
        Ok(Some(candidates))
    }

    fn decode_scale(
        &self,
        scale: &ScaleOutputs<'_>,
        threshold: f32,
        out: &mut Vec<Candidate>,
    ) -> Result<()> {
        let grid = AnchorGrid::for_input(
            self.input_height,
            self.input_width,
            scale.stride,
            self.anchors_per_location,
        );
        let n = grid.len();
        let kps_per_anchor = self.keypoint_count * 2;

        if scale.scores.len() != n
            || scale.boxes.len() != n * 4
            || scale.keypoints.len() != n * kps_per_anchor
        {
            return Err(Error::model(format!(
                "stride {}: expected {} anchors ({} box, {} keypoint values), got {} scores, {} box, {} keypoint values",
                scale.stride,
                n,
                n * 4,
                n * kps_per_anchor,
                scale.scores.len(),
                scale.boxes.len(),
                scale.keypoints.len()
            )));
        }

        let stride = scale.stride as f32;
        for (i, anchor) in grid.centers().into_iter().enumerate() {
            let score = scale.scores[i];
            if score < threshold {
                continue;
            }

            let d = &scale.boxes[i * 4..i * 4 + 4];
            let bbox = BoundingBox::new(
                anchor.x - d[0] * stride,
                anchor.y - d[1] * stride,
                anchor.x + d[2] * stride,
                anchor.y + d[3] * stride,
            );

            let k = &scale.keypoints[i * kps_per_anchor..(i + 1) * kps_per_anchor];
            let keypoints = k
                .chunks_exact(2)
                .map(|xy| Point2::new(anchor.x + xy[0] * stride, anchor.y + xy[1] * stride))
                .collect();

            out.push(Candidate {
                bbox,
                score,
                keypoints,
            });
        }

        Ok(())
    }
}
