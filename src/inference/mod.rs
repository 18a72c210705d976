pub mod onnx;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::tensor::NamedTensors;

pub use onnx::OnnxEngine;

/// The networks the pipeline talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelKind {
    RetinaFace,
    Landmark2d,
    Landmark3d,
    GenderAge,
    ArcFace,
    InSwapper,
}

impl ModelKind {
    pub const ALL: [ModelKind; 6] = [
        ModelKind::RetinaFace,
        ModelKind::Landmark2d,
        ModelKind::Landmark3d,
        ModelKind::GenderAge,
        ModelKind::ArcFace,
        ModelKind::InSwapper,
    ];
}

/// Opaque inference call: named tensors in, named tensors out.
///
/// Implementations must be safe to call from several workers at once; one
/// handle per model is shared rather than duplicated.
pub trait InferenceEngine: Send + Sync {
    /// Input names of `model`, in the order the network declares them.
    fn input_names(&self, model: ModelKind) -> Result<Vec<String>>;

    fn infer(&self, model: ModelKind, inputs: NamedTensors) -> Result<NamedTensors>;
}
