use nalgebra::{DMatrix, Matrix3, Point3, RowVector3, Vector3};
use ndarray::Array2;
use serde::Serialize;

use crate::error::{Error, GeometryError, Result};

const SINGULAR_EPS: f64 = 1e-6;

/// Head orientation in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HeadPose {
    pub pitch: f32,
    pub yaw: f32,
    pub roll: f32,
}

/// Weak-perspective camera recovered from the landmarks.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraPose {
    pub scale: f64,
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
}

/// Least-squares affine camera `P` (3x4) with `P * [x y z 1]^T ~= landmark`
/// for each row of `mean_shape`.
pub fn estimate_affine_camera(
    mean_shape: &Array2<f32>,
    landmarks: &[Point3<f32>],
) -> Result<DMatrix<f64>> {
    let n = landmarks.len();
    if mean_shape.dim() != (n, 3) {
        return Err(Error::input(format!(
            "mean shape is {:?}, expected ({}, 3) to match the landmarks",
            mean_shape.dim(),
            n
        )));
    }
    if n < 4 {
        return Err(GeometryError::TooFewPoints { required: 4, found: n }.into());
    }

    let x_homo = DMatrix::from_fn(n, 4, |r, c| {
        if c == 3 {
            1.0
        } else {
            mean_shape[[r, c]] as f64
        }
    });
    let y = DMatrix::from_fn(n, 3, |r, c| landmarks[r][c] as f64);

    let p_t = x_homo
        .svd(true, true)
        .solve(&y, f64::EPSILON)
        .map_err(|_| GeometryError::Degenerate("least-squares camera solve failed"))?;
    Ok(p_t.transpose())
}

/// Split an affine camera into scale, orthonormal rotation and translation.
pub fn decompose_camera(p: &DMatrix<f64>) -> Result<CameraPose> {
    if p.shape() != (3, 4) {
        return Err(Error::input(format!("camera must be 3x4, got {:?}", p.shape())));
    }
    let translation = Vector3::new(p[(0, 3)], p[(1, 3)], p[(2, 3)]);
    let r1 = RowVector3::new(p[(0, 0)], p[(0, 1)], p[(0, 2)]);
    let r2 = RowVector3::new(p[(1, 0)], p[(1, 1)], p[(1, 2)]);
    let (n1, n2) = (r1.norm(), r2.norm());
    if n1 <= f64::EPSILON || n2 <= f64::EPSILON {
        return Err(GeometryError::Degenerate("camera has a zero row").into());
    }

    let scale = (n1 + n2) / 2.0;
    let r1 = r1 / n1;
    let r2 = r2 / n2;
    let r3 = r1.cross(&r2);
    let rotation = Matrix3::from_rows(&[r1, r2, r3]);

    if rotation.iter().any(|v| !v.is_finite()) {
        return Err(GeometryError::NonFinite.into());
    }
    Ok(CameraPose {
        scale,
        rotation,
        translation,
    })
}

/// Euler angles (x, y, z) in radians of `r = Rz * Ry * Rx`.
pub fn rotation_to_euler(r: &Matrix3<f64>) -> (f64, f64, f64) {
    let sy = (r[(0, 0)] * r[(0, 0)] + r[(1, 0)] * r[(1, 0)]).sqrt();
    if sy >= SINGULAR_EPS {
        (
            r[(2, 1)].atan2(r[(2, 2)]),
            (-r[(2, 0)]).atan2(sy),
            r[(1, 0)].atan2(r[(0, 0)]),
        )
    } else {
        // gimbal lock
        ((-r[(1, 2)]).atan2(r[(1, 1)]), (-r[(2, 0)]).atan2(sy), 0.0)
    }
}

/// Pitch, yaw and roll of a face from its dense 3D landmarks.
pub fn estimate_pose(landmarks: &[Point3<f32>], mean_shape: &Array2<f32>) -> Result<HeadPose> {
    let p = estimate_affine_camera(mean_shape, landmarks)?;
    let camera = decompose_camera(&p)?;
    let (x, y, z) = rotation_to_euler(&camera.rotation);
    Ok(HeadPose {
        pitch: x.to_degrees() as f32,
        yaw: y.to_degrees() as f32,
        roll: z.to_degrees() as f32,
    })
}

/// Pose plus a quality score: how far the face is from looking straight at
/// the camera.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FacePose {
    pub pitch: f32,
    pub yaw: f32,
    pub roll: f32,
    pub deviation_from_ideal: f32,
    pub meets_ideal_threshold: bool,
}

impl From<HeadPose> for FacePose {
    fn from(pose: HeadPose) -> Self {
        let (p, y, r) = (pose.pitch.abs(), pose.yaw.abs(), pose.roll.abs());
        let deviation = (0.45 * p / 180.0 + 0.30 * y / 180.0 + 0.30 * r / 180.0).min(1.0);
        FacePose {
            pitch: pose.pitch,
            yaw: pose.yaw,
            roll: pose.roll,
            deviation_from_ideal: deviation,
            meets_ideal_threshold: deviation < 0.2 && p < 30.0 && y < 35.0 && r < 40.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mean_shape() -> Array2<f32> {
        Array2::from_shape_fn((68, 3), |(i, c)| {
            let i = i as f32;
            match c {
                0 => (i * 0.37).sin() * 40.0,
                1 => (i * 0.23).cos() * 50.0 + i * 0.1,
                _ => ((i * 7.0) % 13.0) - 6.0,
            }
        })
    }

    fn rotation(pitch: f64, yaw: f64, roll: f64) -> Matrix3<f64> {
        let (sx, cx) = pitch.to_radians().sin_cos();
        let (sy, cy) = yaw.to_radians().sin_cos();
        let (sz, cz) = roll.to_radians().sin_cos();
        let rx = Matrix3::new(1.0, 0.0, 0.0, 0.0, cx, -sx, 0.0, sx, cx);
        let ry = Matrix3::new(cy, 0.0, sy, 0.0, 1.0, 0.0, -sy, 0.0, cy);
        let rz = Matrix3::new(cz, -sz, 0.0, sz, cz, 0.0, 0.0, 0.0, 1.0);
        rz * ry * rx
    }

    fn project(shape: &Array2<f32>, r: &Matrix3<f64>, s: f64, t: Vector3<f64>) -> Vec<Point3<f32>> {
        shape
            .rows()
            .into_iter()
            .map(|row| {
                let v = Vector3::new(row[0] as f64, row[1] as f64, row[2] as f64);
                let p = r * v * s + t;
                Point3::new(p.x as f32, p.y as f32, p.z as f32)
            })
            .collect()
    }

    #[test]
    fn recovers_known_angles() {
        let shape = mean_shape();
        let landmarks = project(&shape, &rotation(12.0, -25.0, 8.0), 1.7, Vector3::new(96.0, 90.0, 3.0));

        let pose = estimate_pose(&landmarks, &shape).unwrap();
        assert!((pose.pitch - 12.0).abs() < 0.05, "{:?}", pose);
        assert!((pose.yaw + 25.0).abs() < 0.05, "{:?}", pose);
        assert!((pose.roll - 8.0).abs() < 0.05, "{:?}", pose);
    }

    #[test]
    fn camera_scale_and_translation() {
        let shape = mean_shape();
        let landmarks = project(&shape, &Matrix3::identity(), 2.5, Vector3::new(-4.0, 11.0, 0.0));
        let camera = decompose_camera(&estimate_affine_camera(&shape, &landmarks).unwrap()).unwrap();
        assert!((camera.scale - 2.5).abs() < 1e-3);
        assert!((camera.translation.x + 4.0).abs() < 1e-2);
        assert!((camera.translation.y - 11.0).abs() < 1e-2);
    }

    #[test]
    fn gimbal_lock_sets_roll_to_zero() {
        let r = rotation(20.0, 90.0, 0.0);
        let (_, y, z) = rotation_to_euler(&r);
        assert_eq!(z, 0.0);
        assert!((y.to_degrees() - 90.0).abs() < 1e-3);
    }

    #[test]
    fn mismatched_mean_shape() {
        let landmarks = vec![Point3::new(0.0, 0.0, 0.0); 10];
        assert!(matches!(
            estimate_pose(&landmarks, &mean_shape()),
            Err(Error::Input(_))
        ));
    }

    #[test]
    fn frontal_face_is_ideal() {
        let pose = FacePose::from(HeadPose {
            pitch: 5.0,
            yaw: -10.0,
            roll: 2.0,
        });
        assert!(pose.meets_ideal_threshold);
        assert!((pose.deviation_from_ideal - (0.45 * 5.0 + 0.30 * 10.0 + 0.30 * 2.0) / 180.0).abs() < 1e-6);

        let turned = FacePose::from(HeadPose {
            pitch: 0.0,
            yaw: 50.0,
            roll: 0.0,
        });
        assert!(!turned.meets_ideal_threshold);

        let extreme = FacePose::from(HeadPose {
            pitch: 180.0,
            yaw: 180.0,
            roll: 180.0,
        });
        assert_eq!(extreme.deviation_from_ideal, 1.0);
    }
}
