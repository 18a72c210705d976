use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use nalgebra::Point2;
use ndarray::Array2;
use ndarray_npy::ReadNpyExt;
use tracing::info;

use crate::config::SwapperOptions;
use crate::error::{Error, Result};

/// Canonical five-point face layout of a 112x112 crop: eyes, nose tip and
/// mouth corners.
pub const ARCFACE_TEMPLATE: [[f32; 2]; 5] = [
    [38.2946, 51.6963],
    [73.5318, 51.5014],
    [56.0252, 71.7366],
    [41.5493, 92.3655],
    [70.7299, 92.2041],
];

#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalTemplate {
    points: [Point2<f32>; 5],
}

impl Default for CanonicalTemplate {
    fn default() -> Self {
        CanonicalTemplate {
            points: ARCFACE_TEMPLATE.map(|[x, y]| Point2::new(x, y)),
        }
    }
}

impl CanonicalTemplate {
    pub fn points(&self) -> &[Point2<f32>; 5] {
        &self.points
    }

    /// Template for an output crop of side `size`.
    ///
    /// Sizes in the 112 family scale the template by `size / 112`; the 128
    /// family scales by `size / 128` and shifts right by `8 * ratio`.
    pub fn scaled(&self, size: u32) -> Result<[Point2<f32>; 5]> {
        let (ratio, diff_x) = if size % 112 == 0 && size > 0 {
            (size as f32 / 112.0, 0.0)
        } else if size % 128 == 0 && size > 0 {
            let ratio = size as f32 / 128.0;
            (ratio, 8.0 * ratio)
        } else {
            return Err(Error::input(format!(
                "canonical size must be a multiple of 112 or 128, got {}",
                size
            )));
        };

        Ok(self
            .points
            .map(|p| Point2::new(p.x * ratio + diff_x, p.y * ratio)))
    }
}

/// Read-only constants shared by every face pipeline.
#[derive(Debug, Clone, Default)]
pub struct FaceResources {
    pub template: CanonicalTemplate,
    /// Mean 3D face shape, one `(x, y, z)` row per landmark.
    pub mean_shape: Option<Array2<f32>>,
    /// Basis that maps identity embeddings into the swap model's latent space.
    pub emap: Option<Array2<f32>>,
}

impl FaceResources {
    pub fn load(options: &SwapperOptions) -> Result<Self> {
        let mean_shape = options
            .mean_shape_path
            .as_deref()
            .map(load_matrix)
            .transpose()?;
        let emap = options.emap_path.as_deref().map(load_matrix).transpose()?;

        if let Some(m) = &mean_shape {
            info!(shape = ?m.dim(), "loaded mean shape");
        }
        if let Some(m) = &emap {
            info!(shape = ?m.dim(), "loaded embedding map");
        }

        Ok(FaceResources {
            template: CanonicalTemplate::default(),
            mean_shape,
            emap,
        })
    }
}

/// Load a 2D matrix from `.npy` (f32 or f64) or from the raw `.bin` layout.
pub fn load_matrix(path: &Path) -> Result<Array2<f32>> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("npy") => {
            let reader = BufReader::new(File::open(path)?);
            match Array2::<f32>::read_npy(reader) {
                Ok(m) => Ok(m),
                Err(_) => {
                    let reader = BufReader::new(File::open(path)?);
                    let m: Array2<f64> = Array2::<f64>::read_npy(reader)?;
                    Ok(m.mapv(|v| v as f32))
                }
            }
        }
        _ => read_bin_matrix(BufReader::new(File::open(path)?)),
    }
}

/// `i32` rows, `i32` columns, then `rows * cols` row-major `f64`, all little
/// endian.
pub fn read_bin_matrix<R: Read>(mut reader: R) -> Result<Array2<f32>> {
    let mut word = [0u8; 4];
    reader.read_exact(&mut word)?;
    let rows = i32::from_le_bytes(word);
    reader.read_exact(&mut word)?;
    let cols = i32::from_le_bytes(word);

    if rows <= 0 || cols <= 0 {
        return Err(Error::input(format!(
            "matrix header has invalid shape {}x{}",
            rows, cols
        )));
    }
    let (rows, cols) = (rows as usize, cols as usize);

    let mut data = Vec::with_capacity(rows * cols);
    let mut value = [0u8; 8];
    for _ in 0..rows * cols {
        reader.read_exact(&mut value)?;
        data.push(f64::from_le_bytes(value) as f32);
    }

    Array2::from_shape_vec((rows, cols), data).map_err(|e| Error::input(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn template_for_112_family() {
        let t = CanonicalTemplate::default();
        let scaled = t.scaled(224).unwrap();
        assert!((scaled[0].x - 38.2946 * 2.0).abs() < 1e-4);
        assert!((scaled[0].y - 51.6963 * 2.0).abs() < 1e-4);
    }

    #[test]
    fn template_for_128_family_is_shifted() {
        let t = CanonicalTemplate::default();
        let scaled = t.scaled(128).unwrap();
        assert!((scaled[2].x - (56.0252 + 8.0)).abs() < 1e-4);
        assert!((scaled[2].y - 71.7366).abs() < 1e-4);

        let scaled = t.scaled(256).unwrap();
        assert!((scaled[2].x - (56.0252 * 2.0 + 16.0)).abs() < 1e-4);
    }

    #[test]
    fn template_rejects_other_sizes() {
        assert!(CanonicalTemplate::default().scaled(100).is_err());
        assert!(CanonicalTemplate::default().scaled(0).is_err());
    }

    #[test]
    fn reads_bin_matrix() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&2i32.to_le_bytes());
        bytes.extend_from_slice(&3i32.to_le_bytes());
        for v in [1.0f64, 2.0, 3.0, 4.0, 5.0, 6.5] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }

        let m = read_bin_matrix(Cursor::new(bytes)).unwrap();
        assert_eq!(m.dim(), (2, 3));
        assert_eq!(m[[1, 2]], 6.5);
        assert_eq!(m[[0, 1]], 2.0);
    }

    #[test]
    fn truncated_bin_matrix_is_an_io_error() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&2i32.to_le_bytes());
        bytes.extend_from_slice(&2i32.to_le_bytes());
        bytes.extend_from_slice(&1.0f64.to_le_bytes());
        assert!(matches!(read_bin_matrix(Cursor::new(bytes)), Err(Error::Io(_))));
    }

    #[test]
    fn loads_bin_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("emap.bin");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.extend_from_slice(&2i32.to_le_bytes());
        bytes.extend_from_slice(&0.25f64.to_le_bytes());
        bytes.extend_from_slice(&0.75f64.to_le_bytes());
        std::fs::write(&path, bytes).unwrap();

        let m = load_matrix(&path).unwrap();
        assert_eq!(m.dim(), (1, 2));
        assert_eq!(m[[0, 1]], 0.75);
    }
}
