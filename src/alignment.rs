use image::RgbImage;
use nalgebra::Point2;
use tracing::debug;

use crate::error::{Error, Result};
use crate::geometry::umeyama::estimate_similarity_2d;
use crate::geometry::warp::warp_image;
use crate::geometry::{crop_transform, AffineTransform};
use crate::resources::CanonicalTemplate;

/// A square crop together with the transform that produced it.
#[derive(Debug, Clone)]
pub struct AlignedFace {
    pub crop: RgbImage,
    /// Source image -> crop coordinates.
    pub transform: AffineTransform,
    /// Crop -> source image coordinates.
    pub inverse: AffineTransform,
}

impl AlignedFace {
    pub fn size(&self) -> u32 {
        self.crop.width()
    }

    /// Map crop-space points back into the source image.
    pub fn to_source(&self, points: &[Point2<f32>]) -> Vec<Point2<f32>> {
        points.iter().map(|p| self.inverse.apply(*p)).collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct FaceAligner {
    template: CanonicalTemplate,
}

impl FaceAligner {
    pub fn new(template: CanonicalTemplate) -> Self {
        FaceAligner { template }
    }

    /// Similarity transform taking the five detected landmarks onto the
    /// canonical template of an `output_size` crop.
    pub fn estimate_norm(&self, landmarks: &[Point2<f32>], output_size: u32) -> Result<AffineTransform> {
        if landmarks.len() != 5 {
            return Err(Error::input(format!(
                "alignment needs 5 landmarks, got {}",
                landmarks.len()
            )));
        }
        let destination = self.template.scaled(output_size)?;
        Ok(estimate_similarity_2d(landmarks, &destination)?)
    }

    /// Canonical crop of side `output_size`.
    pub fn align(
        &self,
        image: &RgbImage,
        landmarks: &[Point2<f32>],
        output_size: u32,
    ) -> Result<AlignedFace> {
        check_image(image)?;
        let transform = self.estimate_norm(landmarks, output_size)?;
        let aligned = warp(image, transform, output_size)?;
        debug!(output_size, scale = transform.scale(), "aligned face");
        Ok(aligned)
    }

    /// Crop of side `output_size` centred on `center`, for models that take a
    /// box-centred rather than landmark-aligned input.
    pub fn crop_around(
        &self,
        image: &RgbImage,
        center: Point2<f32>,
        output_size: u32,
        scale: f32,
        rotate_deg: f32,
    ) -> Result<AlignedFace> {
        check_image(image)?;
        let transform = crop_transform(center, output_size, scale, rotate_deg)?;
        warp(image, transform, output_size)
    }
}

fn check_image(image: &RgbImage) -> Result<()> {
    if image.width() == 0 || image.height() == 0 {
        return Err(Error::input("cannot align a face in an empty image"));
    }
    Ok(())
}

fn warp(image: &RgbImage, transform: AffineTransform, size: u32) -> Result<AlignedFace> {
    let inverse = transform.inverse()?;
    let crop = warp_image(image, &transform, size, size)?;
    Ok(AlignedFace {
        crop,
        transform,
        inverse,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GeometryError;
    use crate::resources::ARCFACE_TEMPLATE;

    fn landmarks_in_image() -> Vec<Point2<f32>> {
        // template scaled by 1.5 and rotated slightly inside a 300x300 frame
        let (sin, cos) = 10f32.to_radians().sin_cos();
        ARCFACE_TEMPLATE
            .iter()
            .map(|[x, y]| {
                let (x, y) = (x * 1.5, y * 1.5);
                Point2::new(cos * x - sin * y + 90.0, sin * x + cos * y + 60.0)
            })
            .collect()
    }

    #[test]
    fn round_trip_reproduces_landmarks() {
        let image = RgbImage::from_pixel(300, 300, image::Rgb([128, 64, 32]));
        let landmarks = landmarks_in_image();
        let aligner = FaceAligner::default();

        let aligned = aligner.align(&image, &landmarks, 112).unwrap();
        assert_eq!(aligned.crop.dimensions(), (112, 112));

        let canonical: Vec<Point2<f32>> = landmarks.iter().map(|p| aligned.transform.apply(*p)).collect();
        let back = aligned.to_source(&canonical);
        for (a, b) in back.iter().zip(landmarks.iter()) {
            assert!((*a - *b).norm() < 1e-2, "{:?} vs {:?}", a, b);
        }

        // the landmarks land on the template
        for (p, [x, y]) in canonical.iter().zip(ARCFACE_TEMPLATE.iter()) {
            assert!((p.x - x).abs() < 1e-2 && (p.y - y).abs() < 1e-2);
        }
    }

    #[test]
    fn wrong_landmark_count_is_an_input_error() {
        let image = RgbImage::new(10, 10);
        let landmarks = vec![Point2::new(1.0, 1.0); 4];
        assert!(matches!(
            FaceAligner::default().align(&image, &landmarks, 112),
            Err(Error::Input(_))
        ));
    }

    #[test]
    fn coincident_landmarks_are_a_geometry_error() {
        let image = RgbImage::new(10, 10);
        let landmarks = vec![Point2::new(5.0, 5.0); 5];
        assert!(matches!(
            FaceAligner::default().align(&image, &landmarks, 112),
            Err(Error::Geometry(GeometryError::Degenerate(_)))
        ));
    }

    #[test]
    fn box_crop_keeps_center_in_the_middle() {
        let mut image = RgbImage::new(100, 100);
        image.put_pixel(40, 30, image::Rgb([255, 255, 255]));
        let aligned = FaceAligner::default()
            .crop_around(&image, Point2::new(40.0, 30.0), 64, 1.0, 0.0)
            .unwrap();
        assert_eq!(aligned.crop.get_pixel(32, 32).0, [255, 255, 255]);
    }
}
