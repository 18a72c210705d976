use std::sync::Arc;

use image::RgbImage;
use nalgebra::{Point2, Point3};
use ndarray::Array2;
use tracing::debug;

use crate::alignment::FaceAligner;
use crate::error::{Error, Result};
use crate::face_detection::DetectedFace;
use crate::face_landmarks::{FaceLandmarks, FaceLandmarksModel, LandmarkModelConfig};
use crate::geometry::{transform_points_2d, transform_points_3d};
use crate::inference::InferenceEngine;
use crate::pose::{estimate_pose, FacePose};
use crate::tensor::{blob_from_image, NamedTensors};

/// Padding around the detection box when cropping for box-centred models.
pub const BOX_CROP_FACTOR: f32 = 1.5;

/// Landmark network fed with a box-centred crop.
pub struct InsightfaceLandmarkModel {
    engine: Arc<dyn InferenceEngine>,
    aligner: FaceAligner,
    config: LandmarkModelConfig,
    input_size: u32,
    mean_shape: Option<Arc<Array2<f32>>>,
}

impl InsightfaceLandmarkModel {
    pub fn new(
        engine: Arc<dyn InferenceEngine>,
        config: LandmarkModelConfig,
        input_size: u32,
        mean_shape: Option<Arc<Array2<f32>>>,
    ) -> Self {
        InsightfaceLandmarkModel {
            engine,
            aligner: FaceAligner::default(),
            config,
            input_size,
            mean_shape,
        }
    }
}

/// Scale that fits the padded detection box into a `input_size` crop.
pub fn box_crop_scale(face: &DetectedFace, input_size: u32) -> Result<f32> {
    let extent = face.bbox.width().max(face.bbox.height());
    if !(extent.is_finite() && extent > 0.0) {
        return Err(Error::input(format!("face box has no extent: {:?}", face.bbox)));
    }
    Ok(input_size as f32 / (extent * BOX_CROP_FACTOR))
}

/// Turn the network's flat output into crop-space points.
///
/// The output is read row-major as `(-1, dimensions)` and the last
/// `point_count` rows are kept. Normalised x/y in [-1, 1] are mapped onto the
/// crop using the floored half size; z is scaled by the exact half size.
pub fn decode_landmarks(
    raw: &[f32],
    config: &LandmarkModelConfig,
    input_size: u32,
) -> Result<Vec<Point3<f32>>> {
    let dims = config.dimensions;
    if !(dims == 2 || dims == 3) {
        return Err(Error::input(format!("landmarks must be 2D or 3D, got {}", dims)));
    }
    if raw.len() % dims != 0 || raw.len() / dims < config.point_count {
        return Err(Error::model(format!(
            "landmark output of length {} can't hold {} points of {} dimensions",
            raw.len(),
            config.point_count,
            dims
        )));
    }

    let half_xy = (input_size as f32 / 2.0).floor();
    let half_z = input_size as f32 / 2.0;
    let rows = raw.len() / dims;
    let points = raw
        .chunks_exact(dims)
        .skip(rows - config.point_count)
        .map(|p| {
            let z = if dims == 3 { p[2] * half_z } else { 0.0 };
            Point3::new((p[0] + 1.0) * half_xy, (p[1] + 1.0) * half_xy, z)
        })
        .collect();
    Ok(points)
}

impl FaceLandmarksModel for InsightfaceLandmarkModel {
    fn config(&self) -> &LandmarkModelConfig {
        &self.config
    }

    fn run(&self, image: &RgbImage, face: &DetectedFace) -> Result<FaceLandmarks> {
        let scale = box_crop_scale(face, self.input_size)?;
        let aligned = self
            .aligner
            .crop_around(image, face.bbox.center(), self.input_size, scale, 0.0)?;
        let blob = blob_from_image(&aligned.crop, 0.0, 1.0, false);

        let model = self.config.model;
        let input_name = self
            .engine
            .input_names(model)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::model(format!("{:?} declares no inputs", model)))?;
        let outputs = self
            .engine
            .infer(model, NamedTensors::new().with(input_name, blob.into_dyn()))?;
        let raw: Vec<f32> = outputs.first()?.iter().copied().collect();

        let crop_points = decode_landmarks(&raw, &self.config, self.input_size)?;
        let points = if self.config.dimensions == 3 {
            transform_points_3d(&crop_points, &aligned.inverse)
        } else {
            let flat: Vec<Point2<f32>> = crop_points.iter().map(|p| Point2::new(p.x, p.y)).collect();
            transform_points_2d(&flat, &aligned.inverse)
                .into_iter()
                .map(|p| Point3::new(p.x, p.y, 0.0))
                .collect()
        };

        let pose = if self.config.require_pose {
            let mean_shape = self
                .mean_shape
                .as_deref()
                .ok_or_else(|| Error::input("pose estimation needs the mean shape resource"))?;
            Some(FacePose::from(estimate_pose(&points, mean_shape)?))
        } else {
            None
        };

        debug!(?model, points = points.len(), ?pose, "landmarks");
        Ok(FaceLandmarks {
            points,
            dimensions: self.config.dimensions,
            pose,
        })
    }
}
