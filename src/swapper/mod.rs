pub mod model_inswapper;

use std::sync::Arc;

use image::RgbImage;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::alignment::FaceAligner;
use crate::attributes::{FaceAttributes, GenderAgeModel};
use crate::config::SwapperOptions;
use crate::embedding::{l2_normalize, ArcFaceModel};
use crate::error::{Error, Result};
use crate::face_detection::model_retinaface::RetinaFaceModel;
use crate::face_detection::{DetectedFace, FaceDetectionModel};
use crate::face_landmarks::model_insightface::InsightfaceLandmarkModel;
use crate::face_landmarks::{FaceLandmarks, FaceLandmarksModel, LandmarkModelConfig};
use crate::inference::{InferenceEngine, ModelKind, OnnxEngine};
use crate::pose::FacePose;
use crate::resources::FaceResources;

pub use model_inswapper::InSwapper;

/// Which per-face models run after detection.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnalysisPackage {
    Full,
    #[default]
    Essential,
    SwapOnly,
}

impl AnalysisPackage {
    pub fn models(&self) -> &'static [ModelKind] {
        match self {
            AnalysisPackage::Full => &[
                ModelKind::RetinaFace,
                ModelKind::Landmark2d,
                ModelKind::Landmark3d,
                ModelKind::GenderAge,
                ModelKind::ArcFace,
                ModelKind::InSwapper,
            ],
            AnalysisPackage::Essential => &[
                ModelKind::RetinaFace,
                ModelKind::Landmark3d,
                ModelKind::GenderAge,
                ModelKind::ArcFace,
                ModelKind::InSwapper,
            ],
            AnalysisPackage::SwapOnly => &[
                ModelKind::RetinaFace,
                ModelKind::ArcFace,
                ModelKind::InSwapper,
            ],
        }
    }

    pub fn runs(&self, model: ModelKind) -> bool {
        self.models().contains(&model)
    }
}

/// How source faces are assigned to target faces.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MultiFacePolicy {
    FirstSourceToAllTargets,
    LastSourceToAllTargets,
    AlternateSourcesToTargets,
    #[default]
    FitMaxSourcesToTargets,
}

impl MultiFacePolicy {
    /// `(source index, target index)` pairs, in the order they are applied.
    pub fn pairs(&self, sources: usize, targets: usize) -> Vec<(usize, usize)> {
        if sources == 0 || targets == 0 {
            return Vec::new();
        }
        match self {
            MultiFacePolicy::FirstSourceToAllTargets => (0..targets).map(|t| (0, t)).collect(),
            MultiFacePolicy::LastSourceToAllTargets => {
                (0..targets).map(|t| (sources - 1, t)).collect()
            }
            MultiFacePolicy::AlternateSourcesToTargets => {
                (0..targets).map(|t| (t % sources, t)).collect()
            }
            MultiFacePolicy::FitMaxSourcesToTargets => {
                (0..sources.min(targets)).map(|i| (i, i)).collect()
            }
        }
    }
}

/// Progress of one face through the pipeline.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub enum FaceStage {
    Detected,
    Aligned,
    Embedded,
    SwapTargetReady,
    Composited,
    Failed(String),
}

impl FaceStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FaceStage::Composited | FaceStage::Failed(_))
    }
}

/// A detected face and whatever the analysis models found out about it.
#[derive(Debug, Clone)]
pub struct Face {
    pub detection: DetectedFace,
    pub landmarks_2d: Option<FaceLandmarks>,
    pub landmarks_3d: Option<FaceLandmarks>,
    pub attributes: Option<FaceAttributes>,
    /// Raw identity embedding.
    pub embedding: Option<Array1<f32>>,
    pub stage: FaceStage,
    /// Failures of individual analysis models, in the order they ran.
    pub errors: Vec<String>,
}

impl Face {
    pub fn new(detection: DetectedFace) -> Self {
        Face {
            detection,
            landmarks_2d: None,
            landmarks_3d: None,
            attributes: None,
            embedding: None,
            stage: FaceStage::Detected,
            errors: Vec::new(),
        }
    }

    pub fn normed_embedding(&self) -> Result<Array1<f32>> {
        let embedding = self
            .embedding
            .as_ref()
            .ok_or_else(|| Error::input("face has no embedding"))?;
        l2_normalize(embedding)
    }

    pub fn pose(&self) -> Option<FacePose> {
        self.landmarks_3d.as_ref().and_then(|l| l.pose)
    }

    pub fn size_fraction(&self) -> f32 {
        self.detection.size_fraction()
    }
}

/// Outcome of one source/target pairing.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SwapOutcome {
    pub source_index: usize,
    pub target_index: usize,
    /// `Composited` or `Failed`.
    pub stage: FaceStage,
    /// Last stage the target got to before the outcome was decided.
    pub reached: FaceStage,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct SwapReport {
    pub outcomes: Vec<SwapOutcome>,
}

impl SwapReport {
    pub fn swapped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.stage == FaceStage::Composited)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.stage, FaceStage::Failed(_)))
            .count()
    }
}

/// Detection, per-face analysis and swapping over one shared engine.
pub struct FaceSwapper {
    options: SwapperOptions,
    resources: Arc<FaceResources>,
    detector: RetinaFaceModel,
    landmark_2d: InsightfaceLandmarkModel,
    landmark_3d: InsightfaceLandmarkModel,
    gender_age: GenderAgeModel,
    arcface: ArcFaceModel,
    inswapper: InSwapper,
}

impl FaceSwapper {
    pub fn new(
        engine: Arc<dyn InferenceEngine>,
        resources: Arc<FaceResources>,
        options: SwapperOptions,
    ) -> Self {
        let sizes = &options.input_sizes;
        let aligner = FaceAligner::new(resources.template.clone());
        let mean_shape = resources.mean_shape.clone().map(Arc::new);
        let emap = resources.emap.clone().map(Arc::new);

        FaceSwapper {
            detector: RetinaFaceModel::new(engine.clone(), options.detection.input_size),
            landmark_2d: InsightfaceLandmarkModel::new(
                engine.clone(),
                LandmarkModelConfig::landmark_2d_106(),
                sizes.landmark,
                None,
            ),
            landmark_3d: InsightfaceLandmarkModel::new(
                engine.clone(),
                LandmarkModelConfig::landmark_3d_68(),
                sizes.landmark,
                mean_shape,
            ),
            gender_age: GenderAgeModel::new(engine.clone(), sizes.genderage),
            arcface: ArcFaceModel::new(engine.clone(), aligner.clone(), sizes.arcface),
            inswapper: InSwapper::new(engine, aligner, sizes.inswapper, emap),
            options,
            resources,
        }
    }

    /// Load the configured ONNX models and constant resources.
    pub fn from_options(options: SwapperOptions) -> Result<Self> {
        let engine: Arc<dyn InferenceEngine> = Arc::new(OnnxEngine::new(&options)?);
        let resources = Arc::new(FaceResources::load(&options)?);
        info!(
            gpu = options.use_gpu,
            package = ?options.analysis_package,
            policy = ?options.multi_face_policy,
            "face swapper ready"
        );
        Ok(Self::new(engine, resources, options))
    }

    pub fn options(&self) -> &SwapperOptions {
        &self.options
    }

    pub fn resources(&self) -> &FaceResources {
        &self.resources
    }

    pub fn detect(&self, image: &RgbImage) -> Result<Vec<DetectedFace>> {
        let detection = &self.options.detection;
        self.detector
            .detect(image, detection.score_threshold, detection.iou_threshold)
    }

    /// Detect faces and run the models of `package` on each of them.
    ///
    /// Detection failures are returned; failures of the per-face models are
    /// recorded on the face and do not affect the other faces.
    pub fn analyze_faces(&self, image: &RgbImage, package: AnalysisPackage) -> Result<Vec<Face>> {
        let detections = self.detect(image)?;
        let mut faces: Vec<Face> = detections.into_iter().map(Face::new).collect();

        for (i, face) in faces.iter_mut().enumerate() {
            if package.runs(ModelKind::Landmark3d) {
                match self.landmark_3d.run(image, &face.detection) {
                    Ok(l) => face.landmarks_3d = Some(l),
                    Err(e) => record_failure(face, i, ModelKind::Landmark3d, e),
                }
            }
            if package.runs(ModelKind::Landmark2d) {
                match self.landmark_2d.run(image, &face.detection) {
                    Ok(l) => face.landmarks_2d = Some(l),
                    Err(e) => record_failure(face, i, ModelKind::Landmark2d, e),
                }
            }
            if package.runs(ModelKind::GenderAge) {
                match self.gender_age.run(image, &face.detection) {
                    Ok(a) => face.attributes = Some(a),
                    Err(e) => record_failure(face, i, ModelKind::GenderAge, e),
                }
            }
            if package.runs(ModelKind::ArcFace) {
                match self.arcface.embed(image, face.detection.keypoints.as_slice()) {
                    Ok(embedding) => {
                        face.embedding = Some(embedding);
                        face.stage = FaceStage::Embedded;
                    }
                    Err(e) => {
                        face.stage = FaceStage::Failed(e.to_string());
                        record_failure(face, i, ModelKind::ArcFace, e);
                    }
                }
            }
        }

        debug!(faces = faces.len(), ?package, "analysed faces");
        Ok(faces)
    }

    /// Swap `sources` onto `targets` in `target_image`.
    ///
    /// Pairs come from `policy` (or the configured default) and are applied
    /// one after another onto the accumulating result. A failed pair leaves
    /// the image as it was and is reported, the remaining pairs still run.
    pub fn swap_faces(
        &self,
        sources: &[Face],
        targets: &[Face],
        target_image: &RgbImage,
        policy: Option<MultiFacePolicy>,
    ) -> Result<(RgbImage, SwapReport)> {
        if sources.is_empty() || targets.is_empty() {
            return Err(Error::input(
                "at least one source and one target face are required",
            ));
        }
        let policy = policy.unwrap_or(self.options.multi_face_policy);

        let mut latents: Vec<Option<std::result::Result<Array1<f32>, String>>> =
            vec![None; sources.len()];
        let mut result = target_image.clone();
        let mut report = SwapReport::default();

        for (si, ti) in policy.pairs(sources.len(), targets.len()) {
            let latent = latents[si]
                .get_or_insert_with(|| self.inswapper.latent(&sources[si]).map_err(|e| e.to_string()))
                .clone();

            let mut stage = targets[ti].stage.clone();
            let outcome = latent.map_err(Error::Input).and_then(|latent| {
                self.inswapper
                    .swap(&result, &targets[ti], &latent, &mut stage)
            });

            let reached = stage;
            let stage = match outcome {
                Ok(composite) => {
                    result = composite.merged;
                    FaceStage::Composited
                }
                Err(e) => {
                    warn!(source = si, target = ti, ?reached, error = %e, "face swap failed");
                    FaceStage::Failed(e.to_string())
                }
            };
            report.outcomes.push(SwapOutcome {
                source_index: si,
                target_index: ti,
                stage,
                reached,
            });
        }

        info!(
            swapped = report.swapped(),
            failed = report.failed(),
            ?policy,
            "swap finished"
        );
        Ok((result, report))
    }

    /// Analyse both images and swap the source faces into the target.
    pub fn swap_images(
        &self,
        source_image: &RgbImage,
        target_image: &RgbImage,
        policy: Option<MultiFacePolicy>,
    ) -> Result<(RgbImage, SwapReport)> {
        let sources = self.analyze_faces(source_image, AnalysisPackage::SwapOnly)?;
        let targets = self.analyze_faces(target_image, AnalysisPackage::SwapOnly)?;
        self.swap_faces(&sources, &targets, target_image, policy)
    }
}

fn record_failure(face: &mut Face, index: usize, model: ModelKind, error: Error) {
    warn!(face = index, ?model, %error, "face analysis step failed");
    face.errors.push(format!("{:?}: {}", model, error));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_max_pairs_index_wise() {
        let pairs = MultiFacePolicy::FitMaxSourcesToTargets.pairs(2, 3);
        assert_eq!(pairs, vec![(0, 0), (1, 1)]);
    }

    #[test]
    fn first_and_last_source_to_all() {
        assert_eq!(
            MultiFacePolicy::FirstSourceToAllTargets.pairs(3, 2),
            vec![(0, 0), (0, 1)]
        );
        assert_eq!(
            MultiFacePolicy::LastSourceToAllTargets.pairs(3, 2),
            vec![(2, 0), (2, 1)]
        );
    }

    #[test]
    fn alternate_sources_cycle() {
        assert_eq!(
            MultiFacePolicy::AlternateSourcesToTargets.pairs(2, 5),
            vec![(0, 0), (1, 1), (0, 2), (1, 3), (0, 4)]
        );
    }

    #[test]
    fn no_pairs_without_faces() {
        assert!(MultiFacePolicy::FitMaxSourcesToTargets.pairs(0, 4).is_empty());
        assert!(MultiFacePolicy::FirstSourceToAllTargets.pairs(2, 0).is_empty());
    }

    #[test]
    fn packages_select_models() {
        assert!(AnalysisPackage::Full.runs(ModelKind::Landmark2d));
        assert!(!AnalysisPackage::Essential.runs(ModelKind::Landmark2d));
        assert!(AnalysisPackage::Essential.runs(ModelKind::Landmark3d));
        assert!(!AnalysisPackage::SwapOnly.runs(ModelKind::GenderAge));
        assert!(AnalysisPackage::SwapOnly.runs(ModelKind::ArcFace));
    }

    #[test]
    fn terminal_stages() {
        assert!(FaceStage::Composited.is_terminal());
        assert!(FaceStage::Failed("x".into()).is_terminal());
        assert!(!FaceStage::Embedded.is_terminal());
    }
}
