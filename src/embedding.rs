use std::sync::Arc;

use image::RgbImage;
use nalgebra::Point2;
use ndarray::{Array1, Array2};
use tracing::debug;

use crate::alignment::FaceAligner;
use crate::error::{Error, Result};
use crate::inference::{InferenceEngine, ModelKind};
use crate::tensor::{blob_from_image, NamedTensors};

pub fn l2_norm(v: &Array1<f32>) -> f32 {
    v.dot(v).sqrt()
}

/// Unit-length copy of `v`; a zero or non-finite vector can't be normalised.
pub fn l2_normalize(v: &Array1<f32>) -> Result<Array1<f32>> {
    let norm = l2_norm(v);
    if !(norm.is_finite() && norm > 0.0) {
        return Err(Error::input(format!(
            "cannot normalise an embedding with norm {}",
            norm
        )));
    }
    Ok(v / norm)
}

/// Latent vector for the swap model: the normalised embedding, optionally
/// right-multiplied by `basis` and normalised again.
pub fn project_embedding(raw: &Array1<f32>, basis: Option<&Array2<f32>>) -> Result<Array1<f32>> {
    let normed = l2_normalize(raw)?;
    let Some(basis) = basis else {
        return Ok(normed);
    };

    if basis.nrows() != normed.len() {
        return Err(Error::input(format!(
            "embedding of length {} doesn't match a {}x{} basis",
            normed.len(),
            basis.nrows(),
            basis.ncols()
        )));
    }
    l2_normalize(&normed.dot(basis))
}

/// Identity similarity mapped into [0, 1]: `0.5 + 0.5 * cos(a, b)`.
pub fn similarity_score(a: &Array1<f32>, b: &Array1<f32>) -> Result<f32> {
    if a.len() != b.len() {
        return Err(Error::input(format!(
            "embeddings differ in length: {} vs {}",
            a.len(),
            b.len()
        )));
    }
    let (na, nb) = (l2_norm(a), l2_norm(b));
    if na == 0.0 || nb == 0.0 {
        return Ok(0.0);
    }
    Ok(0.5 + 0.5 * a.dot(b) / (na * nb))
}

/// ArcFace recognition network.
pub struct ArcFaceModel {
    engine: Arc<dyn InferenceEngine>,
    aligner: FaceAligner,
    input_size: u32,
}

impl ArcFaceModel {
    pub fn new(engine: Arc<dyn InferenceEngine>, aligner: FaceAligner, input_size: u32) -> Self {
        ArcFaceModel {
            engine,
            aligner,
            input_size,
        }
    }

    /// Raw identity embedding of the face at `keypoints`.
    pub fn embed(&self, image: &RgbImage, keypoints: &[Point2<f32>]) -> Result<Array1<f32>> {
        let aligned = self.aligner.align(image, keypoints, self.input_size)?;
        let blob = blob_from_image(&aligned.crop, 127.5, 127.5, false);

        let input_name = self
            .engine
            .input_names(ModelKind::ArcFace)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::model("recognition model declares no inputs"))?;
        let outputs = self.engine.infer(
            ModelKind::ArcFace,
            NamedTensors::new().with(input_name, blob.into_dyn()),
        )?;

        let embedding: Array1<f32> = outputs.first()?.iter().copied().collect();
        if embedding.is_empty() {
            return Err(Error::model("recognition model returned an empty embedding"));
        }
        debug!(len = embedding.len(), "computed embedding");
        Ok(embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn projection_without_basis_is_normalisation() {
        let v = array![3.0f32, 4.0];
        let p = project_embedding(&v, None).unwrap();
        assert!((p[0] - 0.6).abs() < 1e-6 && (p[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn projection_through_basis_is_renormalised() {
        let v = array![1.0f32, 0.0];
        let basis = array![[0.0f32, 2.0, 0.0], [1.0, 0.0, 0.0]];
        let p = project_embedding(&v, Some(&basis)).unwrap();
        assert_eq!(p.len(), 3);
        assert!((p[1] - 1.0).abs() < 1e-6);
        assert!((l2_norm(&p) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn basis_shape_mismatch() {
        let v = array![1.0f32, 0.0, 0.0];
        let basis = Array2::<f32>::eye(2);
        assert!(matches!(
            project_embedding(&v, Some(&basis)),
            Err(Error::Input(_))
        ));
    }

    #[test]
    fn zero_embedding_is_rejected() {
        assert!(project_embedding(&Array1::zeros(4), None).is_err());
    }

    #[test]
    fn similarity_bounds() {
        let a = array![1.0f32, 0.0];
        assert!((similarity_score(&a, &a).unwrap() - 1.0).abs() < 1e-6);
        assert!(similarity_score(&a, &array![-2.0f32, 0.0]).unwrap().abs() < 1e-6);
        assert!((similarity_score(&a, &array![0.0f32, 5.0]).unwrap() - 0.5).abs() < 1e-6);
        assert_eq!(similarity_score(&a, &Array1::zeros(2)).unwrap(), 0.0);
        assert!(similarity_score(&a, &Array1::zeros(3)).is_err());
    }
}
