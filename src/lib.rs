pub mod alignment;
pub mod annotate;
pub mod attributes;
pub mod batch;
pub mod compositor;
pub mod config;
pub mod embedding;
pub mod error;
pub mod face_detection;
pub mod face_landmarks;
pub mod geometry;
pub mod inference;
pub mod pose;
pub mod resources;
pub mod swapper;
pub mod tensor;

pub use config::SwapperOptions;
pub use error::{Error, GeometryError, Result};
pub use swapper::{AnalysisPackage, Face, FaceSwapper, MultiFacePolicy};
