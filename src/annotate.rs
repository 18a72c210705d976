use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_circle_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::face_detection::DetectedFace;

const BOX_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
// left eye, right eye, nose, left and right mouth corner
const KEYPOINT_COLORS: [Rgb<u8>; 5] = [
    Rgb([0, 0, 255]),
    Rgb([255, 0, 0]),
    Rgb([0, 0, 0]),
    Rgb([238, 130, 238]),
    Rgb([255, 165, 0]),
];
const KEYPOINT_RADIUS: i32 = 2;

/// Copy of `image` with each face's box and keypoints drawn on top.
pub fn annotate_faces(image: &RgbImage, faces: &[DetectedFace]) -> RgbImage {
    let mut canvas = image.clone();
    for face in faces {
        let bbox = face.bbox;
        let width = bbox.width().round().max(1.0) as u32;
        let height = bbox.height().round().max(1.0) as u32;
        let rect = Rect::at(bbox.x1.round() as i32, bbox.y1.round() as i32).of_size(width, height);
        draw_hollow_rect_mut(&mut canvas, rect, BOX_COLOR);

        for (point, color) in face.keypoints.as_slice().iter().zip(KEYPOINT_COLORS) {
            draw_hollow_circle_mut(
                &mut canvas,
                (point.x.round() as i32, point.y.round() as i32),
                KEYPOINT_RADIUS,
                color,
            );
        }
    }
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face_detection::{BoundingBox, KeyPoints};
    use nalgebra::Point2;

    #[test]
    fn draws_box_outline_and_keypoints() {
        let image = RgbImage::new(50, 50);
        let face = DetectedFace {
            bbox: BoundingBox::new(10.0, 10.0, 40.0, 40.0),
            score: 0.9,
            keypoints: KeyPoints([
                Point2::new(18.0, 20.0),
                Point2::new(32.0, 20.0),
                Point2::new(25.0, 27.0),
                Point2::new(19.0, 33.0),
                Point2::new(31.0, 33.0),
            ]),
            image_size: (50, 50),
            order_left_to_right: 0,
        };

        let annotated = annotate_faces(&image, &[face]);
        assert_eq!(annotated.get_pixel(10, 25).0, [255, 255, 255]);
        assert_eq!(annotated.get_pixel(25, 10).0, [255, 255, 255]);
        // inside the box, away from keypoints
        assert_eq!(annotated.get_pixel(25, 15).0, [0, 0, 0]);
        // right eye circle passes two pixels to the right of its centre
        assert_eq!(annotated.get_pixel(34, 20).0, [255, 0, 0]);
    }
}
