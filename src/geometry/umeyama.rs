use nalgebra::{DMatrix, DVector, Matrix3, Point2, RowDVector};

use super::AffineTransform;
use crate::error::GeometryError;

pub trait SimilarityEstimator {
    /// Least-squares similarity transform taking the rows of `source` onto
    /// the rows of `destination`, returned as a `(d + 1) x (d + 1)`
    /// homogeneous matrix.
    fn estimate(
        &self,
        source: &DMatrix<f32>,
        destination: &DMatrix<f32>,
        estimate_scale: bool,
    ) -> Result<DMatrix<f32>, GeometryError>;
}

/// Closed-form estimator of Umeyama (1991), computed in double precision.
#[derive(Debug, Default, Clone, Copy)]
pub struct Umeyama;

impl Umeyama {
    pub fn new() -> Self {
        Umeyama
    }

    fn validate_input_points(
        source: &DMatrix<f32>,
        destination: &DMatrix<f32>,
    ) -> Result<(), GeometryError> {
        if source.shape() != destination.shape() {
            return Err(GeometryError::MismatchedPoints {
                src_rows: source.nrows(),
                src_cols: source.ncols(),
                dst_rows: destination.nrows(),
                dst_cols: destination.ncols(),
            });
        }
        if source.nrows() < 2 {
            return Err(GeometryError::TooFewPoints {
                required: 2,
                found: source.nrows(),
            });
        }
        if source.ncols() == 0 {
            return Err(GeometryError::Degenerate("points have no coordinates"));
        }
        if source.iter().chain(destination.iter()).any(|v| !v.is_finite()) {
            return Err(GeometryError::NonFinite);
        }
        Ok(())
    }

    fn demean(points: &DMatrix<f64>) -> (RowDVector<f64>, DMatrix<f64>) {
        let mean = points.row_mean();
        let mut centered = points.clone();
        for mut row in centered.row_iter_mut() {
            row -= &mean;
        }
        (mean, centered)
    }

    /// SVD of `a` with singular values in descending order and the factors
    /// permuted to match.
    fn sorted_svd(
        a: DMatrix<f64>,
    ) -> Result<(DMatrix<f64>, DVector<f64>, DMatrix<f64>), GeometryError> {
        let svd = a.svd(true, true);
        let u = svd
            .u
            .ok_or(GeometryError::Degenerate("SVD did not produce U"))?;
        let v_t = svd
            .v_t
            .ok_or(GeometryError::Degenerate("SVD did not produce V^T"))?;
        let s = svd.singular_values;

        let mut order: Vec<usize> = (0..s.len()).collect();
        order.sort_by(|&i, &j| s[j].total_cmp(&s[i]));

        let u = DMatrix::from_fn(u.nrows(), order.len(), |r, c| u[(r, order[c])]);
        let v_t = DMatrix::from_fn(order.len(), v_t.ncols(), |r, c| v_t[(order[r], c)]);
        let s = DVector::from_fn(order.len(), |i, _| s[order[i]]);

        Ok((u, s, v_t))
    }

    fn rank(s: &DVector<f64>, rows: usize, cols: usize) -> usize {
        let max = s.iter().cloned().fold(0.0f64, f64::max);
        let tol = max * rows.max(cols) as f64 * f64::EPSILON;
        s.iter().filter(|&&v| v > tol).count()
    }
}

impl SimilarityEstimator for Umeyama {
    fn estimate(
        &self,
        source: &DMatrix<f32>,
        destination: &DMatrix<f32>,
        estimate_scale: bool,
    ) -> Result<DMatrix<f32>, GeometryError> {
        Self::validate_input_points(source, destination)?;

        let n = source.nrows() as f64;
        let dim = source.ncols();
        let src = source.map(|v| v as f64);
        let dst = destination.map(|v| v as f64);

        let (src_mean, src_demean) = Self::demean(&src);
        let (dst_mean, dst_demean) = Self::demean(&dst);

        let a = dst_demean.transpose() * &src_demean / n;

        let mut d = DVector::<f64>::from_element(dim, 1.0);
        if a.determinant() < 0.0 {
            d[dim - 1] = -1.0;
        }

        let (u, s, v_t) = Self::sorted_svd(a)?;
        let rank = Self::rank(&s, dim, dim);

        let rotation = if rank == 0 {
            return Err(GeometryError::Degenerate("rank-zero covariance"));
        } else if rank == dim - 1 {
            if u.determinant() * v_t.determinant() > 0.0 {
                &u * &v_t
            } else {
                let mut flipped = d.clone();
                flipped[dim - 1] = -1.0;
                &u * DMatrix::from_diagonal(&flipped) * &v_t
            }
        } else {
            &u * DMatrix::from_diagonal(&d) * &v_t
        };

        let scale = if estimate_scale {
            let src_var = src_demean.iter().map(|v| v * v).sum::<f64>() / n;
            if src_var <= f64::EPSILON {
                return Err(GeometryError::Degenerate("source points coincide"));
            }
            s.dot(&d) / src_var
        } else {
            1.0
        };

        let translation = dst_mean.transpose() - (&rotation * src_mean.transpose()) * scale;

        let mut t = DMatrix::<f64>::identity(dim + 1, dim + 1);
        t.view_mut((0, 0), (dim, dim)).copy_from(&(rotation * scale));
        t.view_mut((0, dim), (dim, 1)).copy_from(&translation);

        let t = t.map(|v| v as f32);
        if t.iter().any(|v| !v.is_finite()) {
            return Err(GeometryError::NonFinite);
        }
        Ok(t)
    }
}

pub fn points_to_matrix(points: &[Point2<f32>]) -> DMatrix<f32> {
    DMatrix::from_fn(points.len(), 2, |r, c| points[r][c])
}

/// 2D similarity transform taking `source` onto `destination`.
pub fn estimate_similarity_2d(
    source: &[Point2<f32>],
    destination: &[Point2<f32>],
) -> Result<AffineTransform, GeometryError> {
    let t = Umeyama::new().estimate(
        &points_to_matrix(source),
        &points_to_matrix(destination),
        true,
    )?;
    let m = Matrix3::from_fn(|r, c| t[(r, c)]);
    AffineTransform::from_homogeneous(&m)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_points() -> Vec<Point2<f32>> {
        vec![
            Point2::new(30.0, 50.0),
            Point2::new(70.0, 48.0),
            Point2::new(52.0, 72.0),
            Point2::new(36.0, 92.0),
            Point2::new(68.0, 91.0),
        ]
    }

    fn assert_matrix_close(actual: &DMatrix<f32>, expected: &[[f32; 3]; 3]) {
        for r in 0..3 {
            for c in 0..3 {
                assert!(
                    (actual[(r, c)] - expected[r][c]).abs() < 1e-3,
                    "entry ({}, {}): {} vs {}",
                    r,
                    c,
                    actual[(r, c)],
                    expected[r][c]
                );
            }
        }
    }

    #[test]
    fn recovers_scale_and_translation() {
        let src = source_points();
        let dst: Vec<Point2<f32>> = src
            .iter()
            .map(|p| Point2::new(2.0 * p.x + 10.0, 2.0 * p.y + 10.0))
            .collect();

        let t = Umeyama::new()
            .estimate(&points_to_matrix(&src), &points_to_matrix(&dst), true)
            .unwrap();

        assert_matrix_close(&t, &[[2.0, 0.0, 10.0], [0.0, 2.0, 10.0], [0.0, 0.0, 1.0]]);
    }

    #[test]
    fn recovers_rotation() {
        let (sin, cos) = 30f32.to_radians().sin_cos();
        let s = 0.5;
        let src = source_points();
        let dst: Vec<Point2<f32>> = src
            .iter()
            .map(|p| {
                Point2::new(
                    s * (cos * p.x - sin * p.y) - 3.0,
                    s * (sin * p.x + cos * p.y) + 7.0,
                )
            })
            .collect();

        let t = estimate_similarity_2d(&src, &dst).unwrap();
        for (p, q) in src.iter().zip(dst.iter()) {
            assert!((t.apply(*p) - *q).norm() < 1e-3);
        }
        assert!((t.scale() - s).abs() < 1e-4);
    }

    #[test]
    fn without_scale_estimation_keeps_unit_scale() {
        let src = source_points();
        let dst: Vec<Point2<f32>> = src.iter().map(|p| Point2::new(3.0 * p.x, 3.0 * p.y)).collect();

        let t = Umeyama::new()
            .estimate(&points_to_matrix(&src), &points_to_matrix(&dst), false)
            .unwrap();
        assert!((t[(0, 0)] - 1.0).abs() < 1e-4);
        assert!((t[(1, 1)] - 1.0).abs() < 1e-4);
    }

    #[test]
    fn reflected_points_still_give_a_rotation() {
        let src = source_points();
        let dst: Vec<Point2<f32>> = src.iter().map(|p| Point2::new(-p.x, p.y)).collect();

        let t = estimate_similarity_2d(&src, &dst).unwrap();
        assert!(t.determinant() > 0.0);
    }

    #[test]
    fn too_few_points() {
        let one = [Point2::new(1.0, 1.0)];
        assert_eq!(
            estimate_similarity_2d(&one, &one),
            Err(GeometryError::TooFewPoints {
                required: 2,
                found: 1
            })
        );
    }

    #[test]
    fn mismatched_point_counts() {
        let src = source_points();
        assert!(matches!(
            estimate_similarity_2d(&src, &src[..4]),
            Err(GeometryError::MismatchedPoints { .. })
        ));
    }

    #[test]
    fn coincident_points_are_degenerate() {
        let src = vec![Point2::new(4.0, 4.0); 5];
        let dst = source_points();
        assert!(matches!(
            estimate_similarity_2d(&src, &dst),
            Err(GeometryError::Degenerate(_))
        ));
    }

    #[test]
    fn distinct_collinear_points_resolve_without_nan() {
        let src: Vec<Point2<f32>> = (0..5).map(|i| Point2::new(i as f32, i as f32)).collect();
        let dst: Vec<Point2<f32>> = src
            .iter()
            .map(|p| Point2::new(2.0 * p.x + 10.0, 2.0 * p.y + 10.0))
            .collect();

        let t = estimate_similarity_2d(&src, &dst).unwrap();
        for (p, q) in src.iter().zip(dst.iter()) {
            assert!((t.apply(*p) - *q).norm() < 1e-3);
        }
    }

    #[test]
    fn nan_input_is_rejected() {
        let mut src = source_points();
        src[2] = Point2::new(f32::NAN, 1.0);
        assert_eq!(
            estimate_similarity_2d(&src, &source_points()),
            Err(GeometryError::NonFinite)
        );
    }
}
