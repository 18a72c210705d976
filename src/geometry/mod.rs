pub mod umeyama;
pub mod warp;

use imageproc::geometric_transformations::Projection;
use nalgebra::{Matrix2x3, Matrix3, Point2, Point3};

use crate::error::GeometryError;

const MIN_DETERMINANT: f32 = 1e-10;

/// 2x3 affine matrix `[a b tx; c d ty]` mapping `(x, y)` to
/// `(a x + b y + tx, c x + d y + ty)`.
///
/// Construction through [`AffineTransform::new`] guarantees a finite,
/// invertible matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform {
    matrix: Matrix2x3<f32>,
}

impl AffineTransform {
    pub fn new(matrix: Matrix2x3<f32>) -> Result<Self, GeometryError> {
        if matrix.iter().any(|v| !v.is_finite()) {
            return Err(GeometryError::NonFinite);
        }
        let transform = AffineTransform { matrix };
        let det = transform.determinant();
        if det.abs() < MIN_DETERMINANT {
            return Err(GeometryError::NotInvertible(det));
        }
        Ok(transform)
    }

    pub fn from_rows(rows: [[f32; 3]; 2]) -> Result<Self, GeometryError> {
        Self::new(Matrix2x3::new(
            rows[0][0], rows[0][1], rows[0][2], rows[1][0], rows[1][1], rows[1][2],
        ))
    }

    /// Top two rows of a 3x3 homogeneous matrix.
    pub fn from_homogeneous(m: &Matrix3<f32>) -> Result<Self, GeometryError> {
        Self::new(m.fixed_view::<2, 3>(0, 0).into_owned())
    }

    pub fn identity() -> Self {
        AffineTransform {
            matrix: Matrix2x3::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0),
        }
    }

    pub fn matrix(&self) -> &Matrix2x3<f32> {
        &self.matrix
    }

    pub fn to_homogeneous(&self) -> Matrix3<f32> {
        let mut m = Matrix3::identity();
        m.fixed_view_mut::<2, 3>(0, 0).copy_from(&self.matrix);
        m
    }

    pub fn determinant(&self) -> f32 {
        let m = &self.matrix;
        m[(0, 0)] * m[(1, 1)] - m[(0, 1)] * m[(1, 0)]
    }

    pub fn inverse(&self) -> Result<Self, GeometryError> {
        let det = self.determinant();
        if det.abs() < MIN_DETERMINANT {
            return Err(GeometryError::NotInvertible(det));
        }
        let m = &self.matrix;
        let (a, b, tx) = (m[(0, 0)], m[(0, 1)], m[(0, 2)]);
        let (c, d, ty) = (m[(1, 0)], m[(1, 1)], m[(1, 2)]);

        let ia = d / det;
        let ib = -b / det;
        let ic = -c / det;
        let id = a / det;
        Self::new(Matrix2x3::new(
            ia,
            ib,
            -(ia * tx + ib * ty),
            ic,
            id,
            -(ic * tx + id * ty),
        ))
    }

    /// `self` applied after `first`.
    pub fn after(&self, first: &AffineTransform) -> Result<Self, GeometryError> {
        Self::from_homogeneous(&(self.to_homogeneous() * first.to_homogeneous()))
    }

    pub fn apply(&self, p: Point2<f32>) -> Point2<f32> {
        let m = &self.matrix;
        Point2::new(
            m[(0, 0)] * p.x + m[(0, 1)] * p.y + m[(0, 2)],
            m[(1, 0)] * p.x + m[(1, 1)] * p.y + m[(1, 2)],
        )
    }

    /// Isotropic scale of the linear part, the norm of the first row.
    pub fn scale(&self) -> f32 {
        let m = &self.matrix;
        (m[(0, 0)] * m[(0, 0)] + m[(0, 1)] * m[(0, 1)]).sqrt()
    }

    pub fn to_projection(&self) -> Result<Projection, GeometryError> {
        let m = &self.matrix;
        Projection::from_matrix([
            m[(0, 0)],
            m[(0, 1)],
            m[(0, 2)],
            m[(1, 0)],
            m[(1, 1)],
            m[(1, 2)],
            0.0,
            0.0,
            1.0,
        ])
        .ok_or_else(|| GeometryError::NotInvertible(self.determinant()))
    }
}

/// Transform that crops a square of side `output_size` centred on `center`,
/// scaled by `scale` and rotated by `rotate_deg` degrees.
pub fn crop_transform(
    center: Point2<f32>,
    output_size: u32,
    scale: f32,
    rotate_deg: f32,
) -> Result<AffineTransform, GeometryError> {
    let half = output_size as f32 / 2.0;
    let rot = rotate_deg.to_radians();
    let (sin, cos) = rot.sin_cos();

    let scaling = Matrix3::new(scale, 0.0, 0.0, 0.0, scale, 0.0, 0.0, 0.0, 1.0);
    let to_origin = Matrix3::new(
        1.0,
        0.0,
        -center.x * scale,
        0.0,
        1.0,
        -center.y * scale,
        0.0,
        0.0,
        1.0,
    );
    let rotation = Matrix3::new(cos, -sin, 0.0, sin, cos, 0.0, 0.0, 0.0, 1.0);
    let to_output = Matrix3::new(1.0, 0.0, half, 0.0, 1.0, half, 0.0, 0.0, 1.0);

    AffineTransform::from_homogeneous(&(to_output * rotation * to_origin * scaling))
}

pub fn transform_points_2d(points: &[Point2<f32>], transform: &AffineTransform) -> Vec<Point2<f32>> {
    points.iter().map(|p| transform.apply(*p)).collect()
}

/// Like [`transform_points_2d`] on x/y; depth is multiplied by the
/// transform's scale.
pub fn transform_points_3d(points: &[Point3<f32>], transform: &AffineTransform) -> Vec<Point3<f32>> {
    let scale = transform.scale();
    points
        .iter()
        .map(|p| {
            let xy = transform.apply(Point2::new(p.x, p.y));
            Point3::new(xy.x, xy.y, p.z * scale)
        })
        .collect()
}
