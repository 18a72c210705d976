use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{warp_into, Interpolation};
use ndarray::prelude::*;
use rayon::prelude::*;

use super::AffineTransform;
use crate::error::{Error, GeometryError, Result};

/// Resample `image` through `transform` (source -> output coordinates) into a
/// `width` x `height` image, black outside the source.
pub fn warp_image(
    image: &RgbImage,
    transform: &AffineTransform,
    width: u32,
    height: u32,
) -> Result<RgbImage> {
    let projection = transform.to_projection()?;
    let mut out = RgbImage::new(width, height);
    warp_into(
        image,
        &projection,
        Interpolation::Bilinear,
        Rgb([0, 0, 0]),
        &mut out,
    );
    Ok(out)
}

/// Float counterpart of [`warp_image`] for `(height, width, channels)` planes.
///
/// Bilinear sampling; taps that fall outside the source read as zero, so the
/// result fades to zero across the last source pixel.
pub fn warp_planes(
    src: ArrayView3<f32>,
    transform: &AffineTransform,
    width: usize,
    height: usize,
) -> Result<Array3<f32>> {
    let inv = transform.inverse()?;
    let m = *inv.matrix();
    let (src_h, src_w, channels) = src.dim();

    let rows: Vec<Vec<f32>> = (0..height)
        .into_par_iter()
        .map(|y| {
            let mut row = vec![0.0f32; width * channels];
            let yf = y as f32;
            let base_x = m[(0, 1)] * yf + m[(0, 2)];
            let base_y = m[(1, 1)] * yf + m[(1, 2)];

            for x in 0..width {
                let xf = x as f32;
                let sx = m[(0, 0)] * xf + base_x;
                let sy = m[(1, 0)] * xf + base_y;
                if !(sx > -1.0 && sy > -1.0 && sx < src_w as f32 && sy < src_h as f32) {
                    continue;
                }

                let x0 = sx.floor();
                let y0 = sy.floor();
                let fx = sx - x0;
                let fy = sy - y0;
                let (x0, y0) = (x0 as isize, y0 as isize);

                let tap = |xi: isize, yi: isize, c: usize| -> f32 {
                    if xi < 0 || yi < 0 || xi >= src_w as isize || yi >= src_h as isize {
                        0.0
                    } else {
                        src[[yi as usize, xi as usize, c]]
                    }
                };

                for c in 0..channels {
                    let top = tap(x0, y0, c) * (1.0 - fx) + tap(x0 + 1, y0, c) * fx;
                    let bottom = tap(x0, y0 + 1, c) * (1.0 - fx) + tap(x0 + 1, y0 + 1, c) * fx;
                    row[x * channels + c] = top * (1.0 - fy) + bottom * fy;
                }
            }
            row
        })
        .collect();

    let flat: Vec<f32> = rows.into_iter().flatten().collect();
    Array3::from_shape_vec((height, width, channels), flat)
        .map_err(|_| Error::Geometry(GeometryError::Degenerate("warp output has an unexpected shape")))
}

/// Single-plane wrapper around [`warp_planes`].
pub fn warp_plane(
    src: ArrayView2<f32>,
    transform: &AffineTransform,
    width: usize,
    height: usize,
) -> Result<Array2<f32>> {
    let warped = warp_planes(src.insert_axis(Axis(2)), transform, width, height)?;
    Ok(warped.index_axis_move(Axis(2), 0))
}
