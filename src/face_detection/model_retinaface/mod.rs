use std::sync::Arc;

use image::imageops::{self, FilterType};
use image::RgbImage;
use tracing::debug;

use super::decode::{DetectionDecoder, ScaleOutputs};
use super::nms::suppress;
use super::{sort_left_to_right, DetectedFace, FaceDetectionModel, KeyPoints};
use crate::error::{Error, Result};
use crate::inference::{InferenceEngine, ModelKind};
use crate::tensor::{blob_from_image, NamedTensors};

const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_LOCATION: usize = 2;
const INPUT_MEAN: f32 = 127.5;
const INPUT_STD: f32 = 128.0;

/// SCRFD / RetinaFace style detector with three output strides.
pub struct RetinaFaceModel {
    engine: Arc<dyn InferenceEngine>,
    input_size: u32,
}

impl RetinaFaceModel {
    pub fn new(engine: Arc<dyn InferenceEngine>, input_size: u32) -> Self {
        RetinaFaceModel { engine, input_size }
    }

    pub fn input_size(&self) -> u32 {
        self.input_size
    }
}

/// Resize `image` to fit a square `input_size` canvas keeping its aspect
/// ratio, placed top-left on black. Returns the canvas and the resize ratio.
pub fn letterbox(image: &RgbImage, input_size: u32) -> Result<(RgbImage, f32)> {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return Err(Error::input("cannot detect faces in an empty image"));
    }

    let aspect = h as f32 / w as f32;
    let (new_w, new_h) = if aspect > 1.0 {
        let new_h = input_size;
        ((new_h as f32 / aspect) as u32, new_h)
    } else {
        let new_w = input_size;
        (new_w, (new_w as f32 * aspect) as u32)
    };
    let (new_w, new_h) = (new_w.max(1), new_h.max(1));
    let scale = new_h as f32 / h as f32;

    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);
    let mut canvas = RgbImage::new(input_size, input_size);
    imageops::replace(&mut canvas, &resized, 0, 0);

    Ok((canvas, scale))
}

impl FaceDetectionModel for RetinaFaceModel {
    fn detect(
        &self,
        image: &RgbImage,
        score_threshold: f32,
        iou_threshold: f32,
    ) -> Result<Vec<DetectedFace>> {
        let (canvas, det_scale) = letterbox(image, self.input_size)?;
        let blob = blob_from_image(&canvas, INPUT_MEAN, INPUT_STD, false);

        let input_name = self
            .engine
            .input_names(ModelKind::RetinaFace)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::model("detector declares no inputs"))?;
        let outputs = self.engine.infer(
            ModelKind::RetinaFace,
            NamedTensors::new().with(input_name, blob.into_dyn()),
        )?;

        let n = STRIDES.len();
        if outputs.len() < n * 3 {
            return Err(Error::model(format!(
                "detector produced {} outputs, expected {}",
                outputs.len(),
                n * 3
            )));
        }

        // outputs are grouped by kind: scores, then boxes, then keypoints
        let flatten = |i: usize| -> Result<Vec<f32>> {
            Ok(outputs.by_index(i)?.iter().copied().collect())
        };
        let mut raw = Vec::with_capacity(n);
        for i in 0..n {
            raw.push((flatten(i)?, flatten(i + n)?, flatten(i + 2 * n)?));
        }
        let scales: Vec<ScaleOutputs<'_>> = STRIDES
            .iter()
            .zip(raw.iter())
            .map(|(&stride, (scores, boxes, keypoints))| ScaleOutputs {
                stride,
                scores,
                boxes,
                keypoints,
            })
            .collect();

        let size = self.input_size as usize;
        let decoder = DetectionDecoder::new(size, size, ANCHORS_PER_LOCATION);
        let candidates = match decoder.decode(&scales, score_threshold, det_scale)? {
            Some(candidates) => candidates,
            None => {
                debug!("no faces above threshold");
                return Ok(Vec::new());
            }
        };

        let kept = suppress(candidates, iou_threshold);

        let mut faces = kept
            .into_iter()
            .map(|c| {
                Ok(DetectedFace {
                    bbox: c.bbox,
                    score: c.score,
                    keypoints: KeyPoints::from_slice(&c.keypoints)?,
                    image_size: image.dimensions(),
                    order_left_to_right: 0,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        sort_left_to_right(&mut faces);

        debug!(faces = faces.len(), det_scale, "detection finished");
        Ok(faces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letterbox_keeps_aspect_ratio_for_wide_images() {
        let image = RgbImage::from_pixel(400, 200, image::Rgb([200, 200, 200]));
        let (canvas, scale) = letterbox(&image, 640).unwrap();

        assert_eq!(canvas.dimensions(), (640, 640));
        assert!((scale - 1.6).abs() < 1e-6);
        assert_eq!(canvas.get_pixel(10, 10).0, [200, 200, 200]);
        // padding below the resized content
        assert_eq!(canvas.get_pixel(10, 400).0, [0, 0, 0]);
    }

    #[test]
    fn letterbox_keeps_aspect_ratio_for_tall_images() {
        let image = RgbImage::from_pixel(100, 400, image::Rgb([50, 50, 50]));
        let (canvas, scale) = letterbox(&image, 640).unwrap();

        assert!((scale - 1.6).abs() < 1e-6);
        assert_eq!(canvas.get_pixel(100, 600).0, [50, 50, 50]);
        assert_eq!(canvas.get_pixel(300, 10).0, [0, 0, 0]);
    }

    #[test]
    fn letterbox_rejects_empty_images() {
        let image = RgbImage::new(0, 10);
        assert!(matches!(letterbox(&image, 640), Err(Error::Input(_))));
    }
}
