use thiserror::Error;

/// Failures of the geometric core. A transform that hits any of these is never
/// handed downstream.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("at least {required} points are required, got {found}")]
    TooFewPoints { required: usize, found: usize },

    #[error("point sets differ in shape: {src_rows}x{src_cols} vs {dst_rows}x{dst_cols}")]
    MismatchedPoints {
        src_rows: usize,
        src_cols: usize,
        dst_rows: usize,
        dst_cols: usize,
    },

    #[error("degenerate point correspondence: {0}")]
    Degenerate(&'static str),

    #[error("transform contains NaN or infinite entries")]
    NonFinite,

    #[error("transform is not invertible (det = {0})")]
    NotInvertible(f32),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    Input(String),

    #[error("geometry error: {0}")]
    Geometry(#[from] GeometryError),

    #[error("model error: {0}")]
    Model(String),

    #[error("onnx runtime error: {0}")]
    Ort(#[from] ort::OrtError),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("npy read error: {0}")]
    Npy(#[from] ndarray_npy::ReadNpyError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("worker pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl Error {
    pub fn input(msg: impl Into<String>) -> Self {
        Error::Input(msg.into())
    }

    pub fn model(msg: impl Into<String>) -> Self {
        Error::Model(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
