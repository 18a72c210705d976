pub mod morphology;

use image::{Rgb, RgbImage};
use ndarray::prelude::*;
use tracing::debug;

use crate::error::{Error, Result};
use crate::geometry::warp::{warp_plane, warp_planes};
use crate::geometry::AffineTransform;
use crate::tensor::{saturate_u8, tensor_to_image, ChannelOrder, Tensor};

use morphology::{dilate, erode, gaussian_blur};

const DIFF_BORDER: usize = 2;
const VALID_THRESHOLD: f32 = 20.0;
const DIFF_THRESHOLD: f32 = 10.0;
const MIN_ERODE_KERNEL: usize = 10;
const DIFF_DILATE_KERNEL: usize = 2;
const MIN_DIFF_BLUR_HALF: usize = 5;
const MASK_BLUR_KERNEL: usize = 11;

/// Output of [`SwapCompositor::composite`].
#[derive(Debug, Clone)]
pub struct Composite {
    pub merged: RgbImage,
    /// Per-pixel weight of the swapped face, in [0, 1].
    pub blend_mask: Array2<f32>,
    /// Softened map of where the swap changed the crop, in [0, 1].
    pub diff_mask: Array2<f32>,
}

/// Pastes swap-model output back into the target frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct SwapCompositor {
    /// Channel convention of the target frame.
    pub order: ChannelOrder,
}

impl SwapCompositor {
    pub fn new(order: ChannelOrder) -> Self {
        SwapCompositor { order }
    }

    /// Blend the swapped crop into `target`.
    ///
    /// `transform` maps target-frame coordinates to crop coordinates (the
    /// alignment transform that produced `aligned_crop`).
    pub fn composite(
        &self,
        target: &RgbImage,
        transform: &AffineTransform,
        swapped: &Tensor,
        aligned_crop: &RgbImage,
    ) -> Result<Composite> {
        let (w, h) = target.dimensions();
        if w == 0 || h == 0 {
            return Err(Error::input("target frame is empty"));
        }

        let fake = tensor_to_image(swapped, self.order)?;
        if fake.dimensions() != aligned_crop.dimensions() {
            return Err(Error::input(format!(
                "swapped crop is {:?} but the aligned crop is {:?}",
                fake.dimensions(),
                aligned_crop.dimensions()
            )));
        }
        let (crop_w, crop_h) = fake.dimensions();
        let (w, h) = (w as usize, h as usize);

        let fake_diff = crop_difference(&fake, aligned_crop);
        let inverse = transform.inverse()?;

        let fake_planes = image_to_planes(&fake);
        let warped_fake = warp_planes(fake_planes.view(), &inverse, w, h)?;
        let white = Array2::from_elem((crop_h as usize, crop_w as usize), 255.0f32);
        let mut valid = warp_plane(white.view(), &inverse, w, h)?;
        let mut diff = warp_plane(fake_diff.view(), &inverse, w, h)?;

        valid.mapv_inplace(|v| if v > VALID_THRESHOLD { 255.0 } else { v });
        diff.mapv_inplace(|v| if v > DIFF_THRESHOLD { 255.0 } else { 0.0 });

        let mask_size = mask_extent(&valid);
        let erode_k = (mask_size / 10).max(MIN_ERODE_KERNEL);
        let valid = erode(valid.view(), erode_k);

        let diff = dilate(diff.view(), DIFF_DILATE_KERNEL);
        let diff_blur = 2 * (mask_size / 20).max(MIN_DIFF_BLUR_HALF) + 1;
        let diff = gaussian_blur(diff.view(), diff_blur, 0.0);

        let valid = gaussian_blur(valid.view(), MASK_BLUR_KERNEL, 0.0);

        let blend_mask = valid.mapv(|v| v / 255.0);
        let diff_mask = diff.mapv(|v| v / 255.0);

        debug!(mask_size, erode_k, diff_blur, "composited swap");

        let merged = blend(target, &warped_fake, &blend_mask);
        Ok(Composite {
            merged,
            blend_mask,
            diff_mask,
        })
    }
}

/// Channel-mean absolute difference of two equally sized crops, with a
/// `DIFF_BORDER` frame forced to zero.
fn crop_difference(fake: &RgbImage, aligned: &RgbImage) -> Array2<f32> {
    let (w, h) = fake.dimensions();
    let (w, h) = (w as usize, h as usize);
    let mut diff = Array2::from_shape_fn((h, w), |(y, x)| {
        let a = fake.get_pixel(x as u32, y as u32).0;
        let b = aligned.get_pixel(x as u32, y as u32).0;
        let sum: f32 = (0..3).map(|c| (a[c] as f32 - b[c] as f32).abs()).sum();
        sum / 3.0
    });

    let b = DIFF_BORDER.min(h).min(w);
    diff.slice_mut(s![..b, ..]).fill(0.0);
    diff.slice_mut(s![h - b.., ..]).fill(0.0);
    diff.slice_mut(s![.., ..b]).fill(0.0);
    diff.slice_mut(s![.., w - b..]).fill(0.0);
    diff
}

/// `sqrt(height * width)` of the bounding box of the non-zero pixels, or 0
/// for an empty mask.
fn mask_extent(mask: &Array2<f32>) -> usize {
    let mut bounds: Option<(usize, usize, usize, usize)> = None;
    for ((y, x), &v) in mask.indexed_iter() {
        if v == 0.0 {
            continue;
        }
        bounds = Some(match bounds {
            None => (y, y, x, x),
            Some((y0, y1, x0, x1)) => (y0.min(y), y1.max(y), x0.min(x), x1.max(x)),
        });
    }
    match bounds {
        Some((y0, y1, x0, x1)) => (((y1 - y0) * (x1 - x0)) as f64).sqrt() as usize,
        None => 0,
    }
}

fn image_to_planes(image: &RgbImage) -> Array3<f32> {
    let (w, h) = image.dimensions();
    Array3::from_shape_fn((h as usize, w as usize, 3), |(y, x, c)| {
        image.get_pixel(x as u32, y as u32).0[c] as f32
    })
}

fn blend(target: &RgbImage, fake: &Array3<f32>, mask: &Array2<f32>) -> RgbImage {
    let mut merged = target.clone();
    for (x, y, pixel) in merged.enumerate_pixels_mut() {
        let (xi, yi) = (x as usize, y as usize);
        let m = mask[[yi, xi]];
        let t = pixel.0;
        let mut out = [0u8; 3];
        for c in 0..3 {
            out[c] = saturate_u8(fake[[yi, xi, c]] * m + t[c] as f32 * (1.0 - m));
        }
        *pixel = Rgb(out);
    }
    merged
}
