pub mod anchors;
pub mod decode;
pub mod model_retinaface;
pub mod nms;

use core::fmt::Debug;

use image::RgbImage;
use nalgebra::Point2;

use crate::error::{Error, Result};

pub const KEYPOINT_COUNT: usize = 5;

pub trait FaceDetectionModel {
    /// Detect faces in `image`, ordered left to right. An empty list means
    /// nothing passed the score threshold; that is not an error.
    fn detect(
        &self,
        image: &RgbImage,
        score_threshold: f32,
        iou_threshold: f32,
    ) -> Result<Vec<DetectedFace>>;
}

/// Axis-aligned box in image pixels, (x1, y1) top-left, (x2, y2) bottom-right.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center(&self) -> Point2<f32> {
        Point2::new((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn scaled(&self, factor: f32) -> Self {
        Self::new(
            self.x1 * factor,
            self.y1 * factor,
            self.x2 * factor,
            self.y2 * factor,
        )
    }

    /// Clamp to the pixel grid of a `width` x `height` image.
    pub fn clamped(&self, width: u32, height: u32) -> Self {
        let (w, h) = (width as f32, height as f32);
        Self::new(
            self.x1.clamp(0.0, w),
            self.y1.clamp(0.0, h),
            self.x2.clamp(0.0, w),
            self.y2.clamp(0.0, h),
        )
    }

    /// Box grown by `padding` of the image dimensions (split evenly on both
    /// sides) and clipped to the image.
    pub fn padded(&self, padding: f32, image_width: u32, image_height: u32) -> Self {
        let (w, h) = (image_width as f32, image_height as f32);
        let expand_w = (padding * w).min(w);
        let expand_h = (padding * h).min(h);

        let x = (self.x1 - expand_w / 2.0).max(0.0);
        let y = (self.y1 - expand_h / 2.0).max(0.0);
        let width = (self.width() + expand_w).min(w - x);
        let height = (self.height() + expand_h).min(h - y);

        Self::new(x, y, x + width, y + height)
    }

    pub fn to_array(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

/// The five detector keypoints, in the detector's order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyPoints(pub [Point2<f32>; KEYPOINT_COUNT]);

impl KeyPoints {
    pub fn from_slice(points: &[Point2<f32>]) -> Result<Self> {
        let points: [Point2<f32>; KEYPOINT_COUNT] = points.try_into().map_err(|_| {
            Error::input(format!(
                "expected {} keypoints, got {}",
                KEYPOINT_COUNT,
                points.len()
            ))
        })?;
        Ok(KeyPoints(points))
    }

    pub fn left_eye(&self) -> Point2<f32> {
        self.0[0]
    }

    pub fn right_eye(&self) -> Point2<f32> {
        self.0[1]
    }

    pub fn nose(&self) -> Point2<f32> {
        self.0[2]
    }

    pub fn left_mouth_corner(&self) -> Point2<f32> {
        self.0[3]
    }

    pub fn right_mouth_corner(&self) -> Point2<f32> {
        self.0[4]
    }

    pub fn as_slice(&self) -> &[Point2<f32>] {
        &self.0
    }
}

/// A face found by the detector.
#[derive(Clone, PartialEq)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub score: f32,
    pub keypoints: KeyPoints,
    /// (width, height) of the image the face was detected in.
    pub image_size: (u32, u32),
    /// Rank of the box's left edge among the faces of the same image.
    pub order_left_to_right: usize,
}

impl DetectedFace {
    /// Share of the image covered by the face box.
    pub fn size_fraction(&self) -> f32 {
        let image_area = self.image_size.0 as f32 * self.image_size.1 as f32;
        if image_area <= 0.0 {
            return 0.0;
        }
        self.bbox.area() / image_area
    }
}

impl Debug for DetectedFace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectedFace")
            .field("bbox", &self.bbox.to_array())
            .field("score", &self.score)
            .field("image_size", &self.image_size)
            .field("order_left_to_right", &self.order_left_to_right)
            .finish()
    }
}

/// Order faces of one image by the left edge of their box and number them
/// accordingly. Faces with the same left edge keep their relative order.
pub fn sort_left_to_right(faces: &mut [DetectedFace]) {
    faces.sort_by(|a, b| {
        a.bbox
            .x1
            .partial_cmp(&b.bbox.x1)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    for (rank, face) in faces.iter_mut().enumerate() {
        face.order_left_to_right = rank;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padded_box_stays_inside_image() {
        let bbox = BoundingBox::new(10.0, 10.0, 60.0, 60.0);
        let padded = bbox.padded(0.33, 100, 100);
        assert!(padded.x1 >= 0.0 && padded.y1 >= 0.0);
        assert!(padded.x2 <= 100.0 && padded.y2 <= 100.0);
        assert!(padded.width() > bbox.width());
    }

    fn face_at(x1: f32, score: f32) -> DetectedFace {
        DetectedFace {
            bbox: BoundingBox::new(x1, 10.0, x1 + 40.0, 50.0),
            score,
            keypoints: KeyPoints([Point2::new(x1 + 20.0, 30.0); KEYPOINT_COUNT]),
            image_size: (200, 100),
            order_left_to_right: 0,
        }
    }

    #[test]
    fn faces_are_sorted_by_left_edge_not_score() {
        let mut faces = vec![face_at(120.0, 0.9), face_at(20.0, 0.6), face_at(70.0, 0.8)];
        sort_left_to_right(&mut faces);

        let lefts: Vec<f32> = faces.iter().map(|f| f.bbox.x1).collect();
        assert_eq!(lefts, vec![20.0, 70.0, 120.0]);
        let ranks: Vec<usize> = faces.iter().map(|f| f.order_left_to_right).collect();
        assert_eq!(ranks, vec![0, 1, 2]);
    }

    #[test]
    fn equal_left_edges_keep_score_order() {
        let mut faces = vec![face_at(30.0, 0.9), face_at(30.0, 0.5)];
        sort_left_to_right(&mut faces);
        assert_eq!(faces[0].score, 0.9);
        assert_eq!(faces[1].order_left_to_right, 1);
    }

    #[test]
    fn keypoints_require_five_points() {
        let points = vec![Point2::new(0.0, 0.0); 4];
        assert!(matches!(KeyPoints::from_slice(&points), Err(Error::Input(_))));
    }
}
