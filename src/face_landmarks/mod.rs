pub mod model_insightface;

use image::RgbImage;
use nalgebra::{Point2, Point3};

use crate::error::Result;
use crate::face_detection::DetectedFace;
use crate::inference::ModelKind;
use crate::pose::FacePose;

/// Shape of a dense landmark network's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LandmarkModelConfig {
    pub model: ModelKind,
    /// Coordinates per point, 2 or 3.
    pub dimensions: usize,
    pub point_count: usize,
    /// Estimate head pose from the points (3D models only).
    pub require_pose: bool,
}

impl LandmarkModelConfig {
    pub fn landmark_2d_106() -> Self {
        LandmarkModelConfig {
            model: ModelKind::Landmark2d,
            dimensions: 2,
            point_count: 106,
            require_pose: false,
        }
    }

    pub fn landmark_3d_68() -> Self {
        LandmarkModelConfig {
            model: ModelKind::Landmark3d,
            dimensions: 3,
            point_count: 68,
            require_pose: true,
        }
    }
}

/// Dense landmarks in source-image pixels. 2D models leave `z` at zero.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceLandmarks {
    pub points: Vec<Point3<f32>>,
    pub dimensions: usize,
    pub pose: Option<FacePose>,
}

impl FaceLandmarks {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points_2d(&self) -> Vec<Point2<f32>> {
        self.points.iter().map(|p| Point2::new(p.x, p.y)).collect()
    }
}

pub trait FaceLandmarksModel: Send + Sync {
    fn config(&self) -> &LandmarkModelConfig;

    fn run(&self, image: &RgbImage, face: &DetectedFace) -> Result<FaceLandmarks>;
}
