use std::sync::Arc;

use image::RgbImage;
use serde::Serialize;

use crate::alignment::FaceAligner;
use crate::error::{Error, Result};
use crate::face_detection::DetectedFace;
use crate::face_landmarks::model_insightface::box_crop_scale;
use crate::inference::{InferenceEngine, ModelKind};
use crate::tensor::{blob_from_image, NamedTensors};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Gender {
    Feminine,
    Masculine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FaceAttributes {
    pub gender: Gender,
    pub age: u32,
}

/// Read `[p_feminine, p_masculine, age / 100]`.
pub fn decode_attributes(pred: &[f32]) -> Result<FaceAttributes> {
    if pred.len() != 3 {
        return Err(Error::model(format!(
            "gender/age output must have 3 values, got {}",
            pred.len()
        )));
    }
    let gender = if pred[0] > pred[1] {
        Gender::Feminine
    } else {
        Gender::Masculine
    };
    let age = (pred[2] * 100.0).round().max(0.0) as u32;
    Ok(FaceAttributes { gender, age })
}

pub struct GenderAgeModel {
    engine: Arc<dyn InferenceEngine>,
    aligner: FaceAligner,
    input_size: u32,
}

impl GenderAgeModel {
    pub fn new(engine: Arc<dyn InferenceEngine>, input_size: u32) -> Self {
        GenderAgeModel {
            engine,
            aligner: FaceAligner::default(),
            input_size,
        }
    }

    pub fn run(&self, image: &RgbImage, face: &DetectedFace) -> Result<FaceAttributes> {
        let scale = box_crop_scale(face, self.input_size)?;
        let aligned = self
            .aligner
            .crop_around(image, face.bbox.center(), self.input_size, scale, 0.0)?;
        let blob = blob_from_image(&aligned.crop, 0.0, 1.0, false);

        let input_name = self
            .engine
            .input_names(ModelKind::GenderAge)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::model("gender/age model declares no inputs"))?;
        let outputs = self.engine.infer(
            ModelKind::GenderAge,
            NamedTensors::new().with(input_name, blob.into_dyn()),
        )?;
        let pred: Vec<f32> = outputs.first()?.iter().copied().collect();
        decode_attributes(&pred)
    }
}
