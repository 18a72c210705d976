use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::inference::ModelKind;
use crate::swapper::{AnalysisPackage, MultiFacePolicy};

/// Paths to the ONNX files, one per network. Models without a path are not
/// loaded; the stages that need them report a model error instead.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct ModelPaths {
    pub retinaface: Option<PathBuf>,
    pub landmark_2d: Option<PathBuf>,
    pub landmark_3d: Option<PathBuf>,
    pub genderage: Option<PathBuf>,
    pub arcface: Option<PathBuf>,
    pub inswapper: Option<PathBuf>,
}

impl ModelPaths {
    pub fn path(&self, model: ModelKind) -> Option<&Path> {
        match model {
            ModelKind::RetinaFace => self.retinaface.as_deref(),
            ModelKind::Landmark2d => self.landmark_2d.as_deref(),
            ModelKind::Landmark3d => self.landmark_3d.as_deref(),
            ModelKind::GenderAge => self.genderage.as_deref(),
            ModelKind::ArcFace => self.arcface.as_deref(),
            ModelKind::InSwapper => self.inswapper.as_deref(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct DetectionOptions {
    pub score_threshold: f32,
    pub iou_threshold: f32,
    pub input_size: u32,
}

impl Default for DetectionOptions {
    fn default() -> Self {
        Self {
            score_threshold: 0.5,
            iou_threshold: 0.4,
            input_size: 640,
        }
    }
}

/// Fixed square input sizes of the per-face networks.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct InputSizes {
    pub arcface: u32,
    pub inswapper: u32,
    pub landmark: u32,
    pub genderage: u32,
}

impl Default for InputSizes {
    fn default() -> Self {
        Self {
            arcface: 112,
            inswapper: 128,
            landmark: 192,
            genderage: 96,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct SwapperOptions {
    pub models: ModelPaths,
    pub use_gpu: bool,
    pub intra_threads: i16,
    pub warmup_at_startup: bool,
    pub detection: DetectionOptions,
    pub input_sizes: InputSizes,
    pub emap_path: Option<PathBuf>,
    pub mean_shape_path: Option<PathBuf>,
    pub parallelism: usize,
    pub multi_face_policy: MultiFacePolicy,
    pub analysis_package: AnalysisPackage,
}

impl Default for SwapperOptions {
    fn default() -> Self {
        Self {
            models: ModelPaths::default(),
            use_gpu: false,
            intra_threads: 4,
            warmup_at_startup: false,
            detection: DetectionOptions::default(),
            input_sizes: InputSizes::default(),
            emap_path: None,
            mean_shape_path: None,
            parallelism: 6,
            multi_face_policy: MultiFacePolicy::default(),
            analysis_package: AnalysisPackage::default(),
        }
    }
}

impl SwapperOptions {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let options = SwapperOptions::from_json(
            r#"{
                "use_gpu": true,
                "detection": { "score_threshold": 0.6 },
                "models": { "retinaface": "models/det_10g.onnx" },
                "multi_face_policy": "FirstSourceToAllTargets"
            }"#,
        )
        .unwrap();

        assert!(options.use_gpu);
        assert_eq!(options.detection.score_threshold, 0.6);
        assert_eq!(options.detection.iou_threshold, 0.4);
        assert_eq!(options.detection.input_size, 640);
        assert_eq!(options.input_sizes.inswapper, 128);
        assert_eq!(options.parallelism, 6);
        assert_eq!(options.multi_face_policy, MultiFacePolicy::FirstSourceToAllTargets);
        assert_eq!(
            options.models.path(ModelKind::RetinaFace),
            Some(Path::new("models/det_10g.onnx"))
        );
        assert!(options.models.path(ModelKind::InSwapper).is_none());
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = SwapperOptions::from_json("{ not json").unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }
}
